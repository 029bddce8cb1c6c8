//! Marks: atomic justified actions.

use chrono::{DateTime, Utc};
use constitution::{LabeledScores, ScoringContext};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, WitnessError};
use crate::store::Record;

/// Abstraction depth of a mark, 1 (axiom) to 7 (representation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Layer {
    Axiom = 1,
    Value = 2,
    Goal = 3,
    Specification = 4,
    Execution = 5,
    Reflection = 6,
    Representation = 7,
}

impl Layer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Axiom => "axiom",
            Self::Value => "value",
            Self::Goal => "goal",
            Self::Specification => "specification",
            Self::Execution => "execution",
            Self::Reflection => "reflection",
            Self::Representation => "representation",
        }
    }

    pub fn depth(&self) -> u8 {
        *self as u8
    }
}

impl TryFrom<u8> for Layer {
    type Error = WitnessError;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            1 => Self::Axiom,
            2 => Self::Value,
            3 => Self::Goal,
            4 => Self::Specification,
            5 => Self::Execution,
            6 => Self::Reflection,
            7 => Self::Representation,
            other => {
                return Err(WitnessError::InvalidInput(format!(
                    "layer {} outside 1..=7",
                    other
                )))
            }
        })
    }
}

impl From<Layer> for u8 {
    fn from(layer: Layer) -> u8 {
        layer.depth()
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An appended, immutable mark.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mark {
    pub id: String,
    pub action: String,
    pub reasoning: String,
    /// Principles the action claims alignment with, first occurrence order
    #[serde(default)]
    pub principles: Vec<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer: Option<Layer>,
    pub confidence: f64,
    #[serde(default)]
    pub evidence: serde_json::Map<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Scoring domain the action belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scores: Option<LabeledScores>,
}

impl Mark {
    pub fn has_principle(&self, principle: &str) -> bool {
        self.principles.iter().any(|p| p == principle)
    }

    pub fn evidence_str(&self, key: &str) -> Option<&str> {
        self.evidence.get(key).and_then(|v| v.as_str())
    }

    pub fn evidence_bool(&self, key: &str) -> Option<bool> {
        self.evidence.get(key).and_then(|v| v.as_bool())
    }
}

impl Record for Mark {
    fn record_id(&self) -> &str {
        &self.id
    }
}

/// A mark before it is appended.
#[derive(Debug, Clone, Default)]
pub struct MarkDraft {
    pub id: Option<String>,
    pub action: String,
    pub reasoning: String,
    pub principles: Vec<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub layer: Option<Layer>,
    pub confidence: Option<f64>,
    pub evidence: serde_json::Map<String, serde_json::Value>,
    pub parent_id: Option<String>,
    pub domain: Option<String>,
    /// Passed to the scorer, not stored
    pub context: ScoringContext,
}

impl MarkDraft {
    pub fn new(action: impl Into<String>, reasoning: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            reasoning: reasoning.into(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_principles<I, S>(mut self, principles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.principles = principles.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_layer(mut self, layer: Layer) -> Self {
        self.layer = Some(layer);
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_evidence(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.evidence.insert(key.into(), value.into());
        self
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Check fields that do not depend on ledger state.
    pub fn validate(&self) -> Result<()> {
        if self.action.trim().is_empty() {
            return Err(WitnessError::InvalidInput("action must not be empty".to_string()));
        }
        if let Some(confidence) = self.confidence {
            if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
                return Err(WitnessError::InvalidInput(format!(
                    "confidence {} outside [0, 1]",
                    confidence
                )));
            }
        }
        if let Some(id) = &self.id {
            if id.trim().is_empty() {
                return Err(WitnessError::InvalidInput("id must not be empty".to_string()));
            }
        }
        Ok(())
    }

    /// Principles with duplicates removed, keeping first occurrences.
    pub(crate) fn unique_principles(&self) -> Vec<String> {
        let mut seen = Vec::with_capacity(self.principles.len());
        for principle in &self.principles {
            if !seen.contains(principle) {
                seen.push(principle.clone());
            }
        }
        seen
    }
}

/// Query over marks. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkFilter {
    /// Inclusive lower bound
    pub since: Option<DateTime<Utc>>,
    /// Inclusive upper bound
    pub until: Option<DateTime<Utc>>,
    pub principle: Option<String>,
    pub domain: Option<String>,
    pub action: Option<String>,
    pub parent_id: Option<String>,
    pub min_confidence: Option<f64>,
    pub layer: Option<Layer>,
}

impl MarkFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    pub fn between(self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.since(start).until(end)
    }

    pub fn principle(mut self, principle: impl Into<String>) -> Self {
        self.principle = Some(principle.into());
        self
    }

    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn min_confidence(mut self, confidence: f64) -> Self {
        self.min_confidence = Some(confidence);
        self
    }

    pub fn layer(mut self, layer: Layer) -> Self {
        self.layer = Some(layer);
        self
    }

    pub fn matches(&self, mark: &Mark) -> bool {
        self.since.map_or(true, |t| mark.timestamp >= t)
            && self.until.map_or(true, |t| mark.timestamp <= t)
            && self.principle.as_deref().map_or(true, |p| mark.has_principle(p))
            && self
                .domain
                .as_deref()
                .map_or(true, |d| mark.domain.as_deref() == Some(d))
            && self.action.as_deref().map_or(true, |a| mark.action == a)
            && self
                .parent_id
                .as_deref()
                .map_or(true, |p| mark.parent_id.as_deref() == Some(p))
            && self.min_confidence.map_or(true, |c| mark.confidence >= c)
            && self.layer.map_or(true, |l| mark.layer == Some(l))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn mark(action: &str) -> Mark {
        Mark {
            id: format!("mark-{}", action),
            action: action.to_string(),
            reasoning: "because".to_string(),
            principles: vec!["composable".to_string()],
            timestamp: Utc::now(),
            layer: Some(Layer::Execution),
            confidence: 0.8,
            evidence: serde_json::Map::new(),
            parent_id: None,
            domain: Some("editor".to_string()),
            scores: None,
        }
    }

    #[test]
    fn test_layer_conversion() {
        assert_eq!(Layer::try_from(1u8).unwrap(), Layer::Axiom);
        assert_eq!(Layer::try_from(7u8).unwrap(), Layer::Representation);
        assert!(Layer::try_from(0u8).is_err());
        assert!(Layer::try_from(8u8).is_err());
        assert!(Layer::Axiom < Layer::Goal);

        assert_eq!(serde_json::to_string(&Layer::Goal).unwrap(), "3");
        assert!(serde_json::from_str::<Layer>("9").is_err());
    }

    #[test]
    fn test_draft_validation() {
        assert!(MarkDraft::new("refactor", "clarity").validate().is_ok());
        assert!(MarkDraft::new(" ", "x").validate().is_err());
        assert!(MarkDraft::new("a", "b").with_confidence(1.2).validate().is_err());
        assert!(MarkDraft::new("a", "b").with_confidence(f64::NAN).validate().is_err());
        assert!(MarkDraft::new("a", "b").with_id("").validate().is_err());
    }

    #[test]
    fn test_unique_principles() {
        let draft = MarkDraft::new("a", "b").with_principles(["tasteful", "joyful", "tasteful"]);
        assert_eq!(draft.unique_principles(), vec!["tasteful", "joyful"]);
    }

    #[test]
    fn test_filter() {
        let m = mark("refactor");
        assert!(MarkFilter::new().matches(&m));
        assert!(MarkFilter::new().principle("composable").matches(&m));
        assert!(!MarkFilter::new().principle("joyful").matches(&m));
        assert!(MarkFilter::new().domain("editor").action("refactor").matches(&m));
        assert!(!MarkFilter::new().domain("chat").matches(&m));
        assert!(!MarkFilter::new().min_confidence(0.9).matches(&m));
        assert!(MarkFilter::new().layer(Layer::Execution).matches(&m));

        let before = m.timestamp - Duration::seconds(1);
        let after = m.timestamp + Duration::seconds(1);
        assert!(MarkFilter::new().between(before, after).matches(&m));
        assert!(MarkFilter::new().between(m.timestamp, m.timestamp).matches(&m));
        assert!(!MarkFilter::new().since(after).matches(&m));
    }

    #[test]
    fn test_mark_serde_skips_empty_options() {
        let mut m = mark("write");
        m.layer = None;
        m.domain = None;
        let json = serde_json::to_value(&m).unwrap();
        assert!(json.get("layer").is_none());
        assert!(json.get("parent_id").is_none());

        let back: Mark = serde_json::from_value(json).unwrap();
        assert_eq!(back, m);
    }
}
