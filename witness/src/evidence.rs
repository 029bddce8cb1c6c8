//! Evidence mapping from marks to derivation witnesses.
//!
//! | Source                                 | Witness            |
//! |----------------------------------------|--------------------|
//! | each principle                         | `principle`        |
//! | `spec_ref` (string)                    | `specification`    |
//! | `test_passed` (bool), `test_ref`       | `test`             |
//! | `proof` (string)                       | `proof`            |
//! | `model_generated` (true)               | `model_reasoning`  |

use derivation::{DerivationPath, Witness};

use crate::error::Result;
use crate::mark::Mark;

pub const SPEC_REF: &str = "spec_ref";
pub const TEST_PASSED: &str = "test_passed";
pub const TEST_REF: &str = "test_ref";
pub const PROOF: &str = "proof";
pub const MODEL_GENERATED: &str = "model_generated";

/// Witnesses backing a mark, principles first.
pub fn witnesses_for(mark: &Mark) -> Vec<Witness> {
    let mut witnesses: Vec<Witness> = mark.principles.iter().map(Witness::principle).collect();

    if let Some(spec) = mark.evidence_str(SPEC_REF) {
        witnesses.push(Witness::specification(spec));
    }
    if let Some(passed) = mark.evidence_bool(TEST_PASSED) {
        let reference = mark.evidence_str(TEST_REF).unwrap_or(&mark.id);
        witnesses.push(Witness::test(reference, passed));
    }
    if let Some(proof) = mark.evidence_str(PROOF) {
        witnesses.push(Witness::proof(proof));
    }
    if mark.evidence_bool(MODEL_GENERATED) == Some(true) {
        witnesses.push(Witness::model_reasoning(mark.id.as_str()));
    }

    witnesses
}

/// Direct path `source -> mark` carrying the mark's evidence and scores.
pub fn path_to_mark(source_id: &str, mark: &Mark, loss: f64) -> Result<DerivationPath> {
    let path = DerivationPath::direct(source_id, mark.id.as_str(), loss, witnesses_for(mark))?;
    Ok(match &mark.scores {
        Some(scores) => path.with_scores(scores.clone()),
        None => path,
    })
}
