//! Composition of derivation paths.
//!
//! Loss accumulates on the reliability complement:
//!
//! ```text
//! loss(p ; q) = 1 - (1 - loss(p)) * (1 - loss(q))
//! ```
//!
//! so composing never improves trust and a reflexive operand leaves the
//! other side untouched.

use chrono::Utc;
use std::collections::BTreeMap;

use crate::error::{DerivationError, Result};
use crate::path::{check_unit, new_path_id, DerivationPath, PathKind, Witness};

/// Accumulate two losses.
pub fn accumulate_loss(left: f64, right: f64) -> f64 {
    1.0 - (1.0 - left) * (1.0 - right)
}

/// Identity morphism on an artifact.
pub fn reflexive(artifact_id: impl Into<String>) -> DerivationPath {
    DerivationPath::reflexive(artifact_id)
}

/// Merge labeled scores: union of labels, minimum per label.
pub fn merge_scores(
    left: &BTreeMap<String, f64>,
    right: &BTreeMap<String, f64>,
) -> BTreeMap<String, f64> {
    let mut merged = left.clone();
    for (label, score) in right {
        merged
            .entry(label.clone())
            .and_modify(|existing| *existing = existing.min(*score))
            .or_insert(*score);
    }
    merged
}

/// Compose `p : A -> B` with `q : B -> C` into a path `A -> C`.
pub fn compose(p: &DerivationPath, q: &DerivationPath) -> Result<DerivationPath> {
    if p.target_id != q.source_id {
        return Err(DerivationError::TypeMismatch {
            left_target: p.target_id.clone(),
            right_source: q.source_id.clone(),
        });
    }
    for loss in [p.loss, q.loss] {
        if !check_unit(loss) {
            return Err(DerivationError::InvalidLoss(loss));
        }
    }

    if p.is_reflexive() {
        return Ok(q.clone());
    }
    if q.is_reflexive() {
        return Ok(p.clone());
    }

    let mut witnesses: Vec<Witness> = p.witnesses.iter().chain(q.witnesses.iter()).cloned().collect();
    let discount = Witness::composition(&witnesses);
    witnesses.push(discount);

    let mut lineage = p.lineage.clone();
    lineage.extend(q.lineage.iter().skip(1).cloned());

    let mut segments = p.segments.clone();
    segments.extend(q.segments.iter().cloned());

    Ok(DerivationPath {
        id: new_path_id(),
        kind: PathKind::Composed,
        source_id: p.source_id.clone(),
        target_id: q.target_id.clone(),
        witnesses,
        loss: accumulate_loss(p.loss, q.loss),
        labeled_scores: merge_scores(&p.labeled_scores, &q.labeled_scores),
        lineage,
        segments,
        created_at: Utc::now(),
    })
}

/// Left fold of [`compose`] over a chain of paths.
pub fn compose_all(paths: &[DerivationPath]) -> Result<DerivationPath> {
    let (first, rest) = paths.split_first().ok_or(DerivationError::EmptyChain)?;
    rest.iter()
        .try_fold(first.clone(), |acc, next| compose(&acc, next))
}
