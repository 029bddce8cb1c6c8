//! Grounding thresholds and graph settings.

use serde::{Deserialize, Serialize};

use crate::error::{DerivationError, Result};

/// How trustworthy an artifact's best grounding is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Grounding {
    Categorical,
    Strong,
    Provisional,
    Orphan,
}

/// Loss thresholds used to classify a grounding.
///
/// Each bound is exclusive: a loss of exactly `strong` is provisional.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroundingPolicy {
    pub categorical: f64,
    pub strong: f64,
    pub provisional: f64,
}

impl Default for GroundingPolicy {
    fn default() -> Self {
        Self {
            categorical: 0.10,
            strong: 0.30,
            provisional: 0.50,
        }
    }
}

impl GroundingPolicy {
    pub fn classify(&self, loss: f64) -> Grounding {
        if loss < self.categorical {
            Grounding::Categorical
        } else if loss < self.strong {
            Grounding::Strong
        } else if loss < self.provisional {
            Grounding::Provisional
        } else {
            Grounding::Orphan
        }
    }

    /// Thresholds must lie in `[0, 1]` and be non-decreasing.
    pub fn validate(&self) -> Result<()> {
        for value in [self.categorical, self.strong, self.provisional] {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(DerivationError::InvalidLoss(value));
            }
        }
        if self.categorical > self.strong {
            return Err(DerivationError::InvalidLoss(self.categorical));
        }
        if self.strong > self.provisional {
            return Err(DerivationError::InvalidLoss(self.strong));
        }
        Ok(())
    }
}

/// Derivation graph settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Groundings at or above this loss are reported as not grounded
    pub max_loss_threshold: f64,
    /// Tag marking foundational artifacts
    pub axiom_tag: String,
    /// Tag marking principles
    pub principle_tag: String,
    pub policy: GroundingPolicy,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_loss_threshold: 0.5,
            axiom_tag: "axiom".to_string(),
            principle_tag: "principle".to_string(),
            policy: GroundingPolicy::default(),
        }
    }
}

impl GraphConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.max_loss_threshold.is_finite() || !(0.0..=1.0).contains(&self.max_loss_threshold) {
            return Err(DerivationError::InvalidLoss(self.max_loss_threshold));
        }
        self.policy.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_boundaries() {
        let policy = GroundingPolicy::default();
        assert_eq!(policy.classify(0.0), Grounding::Categorical);
        assert_eq!(policy.classify(0.09), Grounding::Categorical);
        assert_eq!(policy.classify(0.10), Grounding::Strong);
        assert_eq!(policy.classify(0.29), Grounding::Strong);
        assert_eq!(policy.classify(0.30), Grounding::Provisional);
        assert_eq!(policy.classify(0.50), Grounding::Orphan);
        assert_eq!(policy.classify(1.0), Grounding::Orphan);
    }

    #[test]
    fn test_validate() {
        assert!(GroundingPolicy::default().validate().is_ok());

        let inverted = GroundingPolicy {
            categorical: 0.4,
            strong: 0.3,
            provisional: 0.5,
        };
        assert!(inverted.validate().is_err());

        let config = GraphConfig {
            max_loss_threshold: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
