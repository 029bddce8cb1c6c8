//! Runtime verification of the categorical laws.
//!
//! Every check returns a [`LawVerificationResult`] rather than panicking so the
//! graph can turn a failed check into a rejected insert.

use serde::{Deserialize, Serialize};
use tracing::error;

use crate::algebra::{accumulate_loss, compose, compose_all, reflexive};
use crate::error::{DerivationError, Result};
use crate::path::{DerivationPath, PathKind, EPSILON};

/// A law a derivation path must satisfy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Law {
    LeftIdentity,
    RightIdentity,
    Associativity,
    LossAccumulation,
}

/// Outcome of checking one law.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LawVerificationResult {
    pub law: Law,
    pub passed: bool,
    pub expected: String,
    pub actual: String,
    pub detail: String,
}

impl LawVerificationResult {
    fn pass(law: Law, expected: String, actual: String) -> Self {
        Self {
            law,
            passed: true,
            expected,
            actual,
            detail: String::new(),
        }
    }

    fn fail(law: Law, expected: String, actual: String, detail: impl Into<String>) -> Self {
        Self {
            law,
            passed: false,
            expected,
            actual,
            detail: detail.into(),
        }
    }

    /// Convert a failed result into a `LawViolation`.
    pub fn into_result(self) -> Result<()> {
        if self.passed {
            Ok(())
        } else {
            Err(DerivationError::LawViolation {
                law: self.law,
                detail: format!(
                    "{} (expected {}, got {})",
                    self.detail, self.expected, self.actual
                ),
            })
        }
    }
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() <= EPSILON
}

/// Structural equality: endpoints, loss, lineage and witnesses.
fn same_morphism(a: &DerivationPath, b: &DerivationPath) -> bool {
    a.source_id == b.source_id
        && a.target_id == b.target_id
        && close(a.loss, b.loss)
        && a.lineage == b.lineage
        && a.witnesses == b.witnesses
}

fn identity_check(law: Law, path: &DerivationPath, composed: Result<DerivationPath>) -> LawVerificationResult {
    let expected = path.signature();
    match composed {
        Ok(actual) if same_morphism(path, &actual) => {
            LawVerificationResult::pass(law, expected, actual.signature())
        }
        Ok(actual) => LawVerificationResult::fail(
            law,
            expected,
            actual.signature(),
            "composition with the identity changed the path",
        ),
        Err(e) => LawVerificationResult::fail(law, expected, "error".to_string(), e.to_string()),
    }
}

/// `reflexive(source) ; p == p`.
pub fn verify_left_identity(path: &DerivationPath) -> LawVerificationResult {
    let composed = compose(&reflexive(path.source_id.clone()), path);
    identity_check(Law::LeftIdentity, path, composed)
}

/// `p ; reflexive(target) == p`.
pub fn verify_right_identity(path: &DerivationPath) -> LawVerificationResult {
    let composed = compose(path, &reflexive(path.target_id.clone()));
    identity_check(Law::RightIdentity, path, composed)
}

/// `(p ; q) ; r` and `p ; (q ; r)` agree on endpoints, loss and lineage.
pub fn verify_associativity(
    p: &DerivationPath,
    q: &DerivationPath,
    r: &DerivationPath,
) -> LawVerificationResult {
    let left = compose(p, q).and_then(|pq| compose(&pq, r));
    let right = compose(q, r).and_then(|qr| compose(p, &qr));

    match (left, right) {
        (Ok(left), Ok(right)) => {
            let agrees = left.source_id == right.source_id
                && left.target_id == right.target_id
                && close(left.loss, right.loss)
                && left.lineage == right.lineage;
            if agrees {
                LawVerificationResult::pass(Law::Associativity, left.signature(), right.signature())
            } else {
                LawVerificationResult::fail(
                    Law::Associativity,
                    left.signature(),
                    right.signature(),
                    "groupings disagree",
                )
            }
        }
        (Err(e), _) | (_, Err(e)) => LawVerificationResult::fail(
            Law::Associativity,
            "composable chain".to_string(),
            "error".to_string(),
            e.to_string(),
        ),
    }
}

/// Recompute a path's loss from its segments and check the chain is contiguous.
pub fn verify_loss_accumulation(path: &DerivationPath) -> LawVerificationResult {
    let law = Law::LossAccumulation;

    if path.kind == PathKind::Reflexive {
        let expected = format!("{:.9}", 0.0);
        let actual = format!("{:.9}", path.loss);
        return if close(path.loss, 0.0) && path.segments.is_empty() {
            LawVerificationResult::pass(law, expected, actual)
        } else {
            LawVerificationResult::fail(law, expected, actual, "reflexive path carries loss or edges")
        };
    }

    if path.segments.is_empty() {
        return LawVerificationResult::fail(
            law,
            "at least one segment".to_string(),
            "none".to_string(),
            "path records no edges",
        );
    }

    let contiguous = path
        .segments
        .windows(2)
        .all(|pair| pair[0].target_id == pair[1].source_id);
    let first = &path.segments[0];
    let last = &path.segments[path.segments.len() - 1];
    if !contiguous || first.source_id != path.source_id || last.target_id != path.target_id {
        return LawVerificationResult::fail(
            law,
            format!("{} -> {}", path.source_id, path.target_id),
            format!("{} -> {}", first.source_id, last.target_id),
            "segments do not form a chain between the endpoints",
        );
    }

    let recomputed = path
        .segments
        .iter()
        .fold(0.0, |acc, segment| accumulate_loss(acc, segment.loss));
    let expected = format!("{:.9}", recomputed);
    let actual = format!("{:.9}", path.loss);

    if close(recomputed, path.loss) {
        LawVerificationResult::pass(law, expected, actual)
    } else {
        LawVerificationResult::fail(law, expected, actual, "loss does not match its segments")
    }
}

/// Every check that applies to `path`.
///
/// Associativity is checked when the path spans three or more edges, by
/// regrouping its segments as `s0 ; s1 ; (rest)`.
pub fn verify_all(path: &DerivationPath) -> Vec<LawVerificationResult> {
    let mut results = vec![
        verify_left_identity(path),
        verify_right_identity(path),
        verify_loss_accumulation(path),
    ];

    if path.segments.len() >= 3 {
        let edges: Vec<DerivationPath> = path
            .segments
            .iter()
            .map(DerivationPath::from_segment)
            .collect();
        let result = match compose_all(&edges[2..]) {
            Ok(rest) => verify_associativity(&edges[0], &edges[1], &rest),
            Err(e) => LawVerificationResult::fail(
                Law::Associativity,
                "composable chain".to_string(),
                "error".to_string(),
                e.to_string(),
            ),
        };
        results.push(result);
    }

    results
}

/// Run [`verify_all`] and fail on the first violation.
pub fn enforce(path: &DerivationPath) -> Result<()> {
    for result in verify_all(path) {
        if !result.passed {
            error!(
                path_id = %path.id,
                law = ?result.law,
                expected = %result.expected,
                actual = %result.actual,
                "Law violation"
            );
            return result.into_result();
        }
    }
    Ok(())
}
