//! Core types for constitutional scoring.
//!
//! Principles are opaque labels; a score is a real number in `[0, 1]`
//! describing how well an action embodies the labelled principle.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Principle label → score in `[0, 1]`.
///
/// A `BTreeMap` keeps iteration order deterministic, which matters for
/// hashing and for reproducible test output.
pub type LabeledScores = BTreeMap<String, f64>;

/// Free-form scoring context supplied by the caller.
pub type ScoringContext = serde_json::Map<String, serde_json::Value>;

/// A principle a rule set knows how to score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Principle {
    /// Label used as the key in [`LabeledScores`]
    pub label: String,
    /// Human-readable statement of the principle
    #[serde(default)]
    pub statement: String,
}

impl Principle {
    /// Create a principle with an empty statement.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            statement: String::new(),
        }
    }

    /// Builder: set the statement.
    pub fn with_statement(mut self, statement: impl Into<String>) -> Self {
        self.statement = statement.into();
        self
    }
}

/// Error types for scoring operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScoringError {
    /// A rule set returned a value outside `[0, 1]` (or a non-finite value)
    #[error("Score out of range for '{principle}' in domain '{domain}': {value}")]
    ScoreOutOfRange {
        domain: String,
        principle: String,
        value: f64,
    },

    /// No rule set is registered under the domain key
    #[error("No rule set registered for domain: {0}")]
    UnknownDomain(String),

    /// Rule set definition could not be parsed
    #[error("Invalid rule set: {0}")]
    InvalidRuleSet(String),
}

/// Check that every score lies in `[0, 1]`.
///
/// Values are never clamped here; the first offending label is reported.
pub fn validate_scores(domain: &str, scores: &LabeledScores) -> Result<(), ScoringError> {
    for (principle, value) in scores {
        if !value.is_finite() || !(0.0..=1.0).contains(value) {
            return Err(ScoringError::ScoreOutOfRange {
                domain: domain.to_string(),
                principle: principle.clone(),
                value: *value,
            });
        }
    }
    Ok(())
}
