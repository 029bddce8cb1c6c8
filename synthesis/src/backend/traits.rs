//! Core trait for text-synthesis backends.
//!
//! This module defines the `TextSynthesizer` trait - the abstraction the
//! crystallization engine uses to turn a batch of actions and reasonings
//! into an insight, a significance statement, a mood and topic tags.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::mood::Mood;

/// Error types for synthesis operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SynthesisError {
    /// Backend is not available
    #[error("Synthesizer unavailable: {0}")]
    Unavailable(String),

    /// Request failed
    #[error("Request failed: {0}")]
    RequestFailed(String),

    /// Rate limited by the backend
    #[error("Rate limited, retry after {retry_after_ms:?}ms")]
    RateLimited { retry_after_ms: Option<u64> },

    /// Backend did not answer in time
    #[error("Synthesis timed out after {0}ms")]
    Timeout(u64),

    /// Response could not be parsed
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Response parsed but violates the output contract
    #[error("Invalid synthesis output: {0}")]
    InvalidOutput(String),
}

/// Core trait for synthesis backends.
///
/// Implementations may be network-bound (LLM inference) or purely local.
#[async_trait]
pub trait TextSynthesizer: Send + Sync {
    /// Backend identifier (e.g. model name).
    fn id(&self) -> &str;

    /// Check if the backend is currently available.
    async fn is_available(&self) -> bool;

    /// Compress a batch of actions into a synthesized insight.
    async fn synthesize(&self, request: SynthesisRequest) -> Result<Synthesis, SynthesisError>;
}

/// Input to a synthesis call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SynthesisRequest {
    /// Tier being produced (`session`, `day`, ...)
    pub level: String,
    /// Action labels, in chronological order
    pub actions: Vec<String>,
    /// Reasonings, aligned with `actions`
    pub reasonings: Vec<String>,
    /// Principles the sources claim alignment with
    pub principles: Vec<String>,
    /// Moods of the source crystals, aligned with `actions`; empty for marks
    #[serde(default)]
    pub moods: Vec<Mood>,
}

impl SynthesisRequest {
    /// Create a request for a tier.
    pub fn new(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            ..Default::default()
        }
    }

    /// Add one action/reasoning pair.
    pub fn with_entry(mut self, action: impl Into<String>, reasoning: impl Into<String>) -> Self {
        self.actions.push(action.into());
        self.reasonings.push(reasoning.into());
        self
    }

    /// Add the mood of the entry most recently added.
    pub fn with_mood(mut self, mood: Mood) -> Self {
        self.moods.push(mood);
        self
    }

    /// Set the principles.
    pub fn with_principles(mut self, principles: Vec<String>) -> Self {
        self.principles = principles;
        self
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Whether the request has no entries.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Output of a synthesis call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Synthesis {
    /// One-sentence insight
    pub insight: String,
    /// One-sentence statement of why it matters
    pub significance: String,
    /// Affective signature
    #[serde(default)]
    pub mood: Mood,
    /// Free-form topic tags
    #[serde(default)]
    pub topics: Vec<String>,
    /// Self-reported confidence in `[0, 1]`, if the backend provides one
    #[serde(default)]
    pub confidence: Option<f64>,
}

impl Synthesis {
    /// Create a synthesis with a neutral mood and no topics.
    pub fn new(insight: impl Into<String>, significance: impl Into<String>) -> Self {
        Self {
            insight: insight.into(),
            significance: significance.into(),
            mood: Mood::neutral(),
            topics: Vec::new(),
            confidence: None,
        }
    }

    /// Set the mood.
    pub fn with_mood(mut self, mood: Mood) -> Self {
        self.mood = mood;
        self
    }

    /// Set the topics.
    pub fn with_topics(mut self, topics: Vec<String>) -> Self {
        self.topics = topics;
        self
    }

    /// Set the self-reported confidence.
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    /// Check the output contract: non-empty insight, mood in range,
    /// confidence in `[0, 1]`.
    pub fn validate(&self) -> Result<(), SynthesisError> {
        if self.insight.trim().is_empty() {
            return Err(SynthesisError::InvalidOutput("empty insight".to_string()));
        }
        if let Err(dimension) = self.mood.validate() {
            return Err(SynthesisError::InvalidOutput(format!(
                "mood dimension '{}' outside [-1, 1]",
                dimension
            )));
        }
        if let Some(confidence) = self.confidence {
            if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
                return Err(SynthesisError::InvalidOutput(format!(
                    "confidence {} outside [0, 1]",
                    confidence
                )));
            }
        }
        Ok(())
    }
}
