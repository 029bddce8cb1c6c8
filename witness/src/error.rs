//! Error types for the witness engine.

use constitution::ScoringError;
use derivation::DerivationError;
use synthesis::SynthesisError;

use crate::crystal::CrystalLevel;
use crate::store::StoreError;

/// How a caller should treat an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Rejected at the boundary; fix the input and retry
    Validation,
    /// May succeed if retried later with backoff
    Transient,
    /// Structural integrity violation; never repaired
    Integrity,
    /// Explicit terminal state of a run
    Terminal,
    NotFound,
}

/// Error types for witness operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WitnessError {
    /// Parent mark is not in the ledger
    #[error("Dangling parent: mark '{0}' does not exist")]
    DanglingParent(String),

    /// Backing store failed
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Cycle detected: {0}")]
    CycleDetected(String),

    /// Composition of paths whose endpoints do not meet
    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Law violation: {0}")]
    LawViolation(String),

    /// Source crystals are not all from the tier below the requested one
    #[error("Tier mismatch: expected {expected} sources, found {found}")]
    TierMismatch {
        expected: CrystalLevel,
        found: CrystalLevel,
    },

    /// Crystallization over an empty window
    #[error("Nothing to crystallize")]
    EmptySource,

    #[error("Synthesis unavailable: {0}")]
    SynthesisUnavailable(String),

    #[error("Score out of range for '{principle}' in domain '{domain}': {value}")]
    ScoreOutOfRange {
        domain: String,
        principle: String,
        value: f64,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    /// Crystallization run was cancelled
    #[error("Cancelled")]
    Cancelled,

    /// Malformed draft, configuration or argument
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Duplicate id: {0}")]
    DuplicateId(String),
}

impl WitnessError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::DanglingParent(_)
            | Self::TypeMismatch(_)
            | Self::TierMismatch { .. }
            | Self::EmptySource
            | Self::ScoreOutOfRange { .. }
            | Self::InvalidInput(_)
            | Self::DuplicateId(_) => ErrorClass::Validation,
            Self::Persistence(_) | Self::SynthesisUnavailable(_) => ErrorClass::Transient,
            Self::CycleDetected(_) | Self::LawViolation(_) => ErrorClass::Integrity,
            Self::Cancelled => ErrorClass::Terminal,
            Self::NotFound(_) => ErrorClass::NotFound,
        }
    }

    /// Whether an outer layer may retry the same call.
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

impl From<DerivationError> for WitnessError {
    fn from(err: DerivationError) -> Self {
        match err {
            DerivationError::TypeMismatch { .. } => Self::TypeMismatch(err.to_string()),
            DerivationError::LawViolation { .. } => Self::LawViolation(err.to_string()),
            DerivationError::CycleDetected { .. } => Self::CycleDetected(err.to_string()),
            DerivationError::NoPathFound { .. } => Self::NotFound(err.to_string()),
            DerivationError::InvalidLoss(_)
            | DerivationError::InvalidConfidence(_)
            | DerivationError::EmptyChain => Self::InvalidInput(err.to_string()),
        }
    }
}

impl From<ScoringError> for WitnessError {
    fn from(err: ScoringError) -> Self {
        match err {
            ScoringError::ScoreOutOfRange {
                domain,
                principle,
                value,
            } => Self::ScoreOutOfRange {
                domain,
                principle,
                value,
            },
            ScoringError::UnknownDomain(domain) => {
                Self::NotFound(format!("scoring domain '{}'", domain))
            }
            ScoringError::InvalidRuleSet(msg) => Self::InvalidInput(msg),
        }
    }
}

impl From<SynthesisError> for WitnessError {
    fn from(err: SynthesisError) -> Self {
        Self::SynthesisUnavailable(err.to_string())
    }
}

impl From<StoreError> for WitnessError {
    fn from(err: StoreError) -> Self {
        Self::Persistence(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, WitnessError>;
