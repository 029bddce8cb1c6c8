//! Error types for the derivation algebra and graph.

use crate::laws::Law;

/// Error types for derivation operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DerivationError {
    /// Composition of paths whose endpoints do not meet
    #[error("Type mismatch: left path ends at '{left_target}', right path starts at '{right_source}'")]
    TypeMismatch {
        left_target: String,
        right_source: String,
    },

    /// A composed path failed a categorical law
    #[error("Law violation ({law:?}): {detail}")]
    LawViolation { law: Law, detail: String },

    /// Inserting the edge would close a cycle
    #[error("Cycle detected: edge {source_id} -> {target_id} would close a cycle")]
    CycleDetected { source_id: String, target_id: String },

    /// No derivation connects the two artifacts
    #[error("No path found from '{from}' to '{to}'")]
    NoPathFound { from: String, to: String },

    /// Loss outside `[0, 1]` or not finite
    #[error("Invalid loss: {0}")]
    InvalidLoss(f64),

    /// Witness confidence outside `[0, 1]` or not finite
    #[error("Invalid witness confidence: {0}")]
    InvalidConfidence(f64),

    /// Composition of an empty sequence of paths
    #[error("Cannot compose an empty chain of paths")]
    EmptyChain,
}

pub type Result<T> = std::result::Result<T, DerivationError>;
