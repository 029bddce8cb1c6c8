//! Data-driven keyword rule set.
//!
//! A generic [`DomainRuleSet`] whose behaviour is entirely described by
//! configuration, so a calling subsystem can ship its rules as YAML instead
//! of code:
//!
//! ```yaml
//! domain: editing
//! rules:
//!   - label: composable
//!     statement: Small pieces that fit together.
//!     base: 0.5
//!     keywords:
//!       refactor: 0.3
//!       monolith: -0.4
//!     flags:
//!       tests_passed: 0.2
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::scoring::DomainRuleSet;
use crate::types::{LabeledScores, Principle, ScoringContext, ScoringError};

/// Rules for a single principle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrincipleRule {
    #[serde(flatten)]
    pub principle: Principle,
    /// Score before any adjustment
    pub base: f64,
    /// Case-insensitive substring of the action → score delta
    #[serde(default)]
    pub keywords: BTreeMap<String, f64>,
    /// Context key holding `true` → score delta
    #[serde(default)]
    pub flags: BTreeMap<String, f64>,
}

impl PrincipleRule {
    /// Create a rule with a base score and no adjustments.
    pub fn new(label: impl Into<String>, base: f64) -> Self {
        Self {
            principle: Principle::new(label),
            base,
            keywords: BTreeMap::new(),
            flags: BTreeMap::new(),
        }
    }

    /// Builder: adjust the score when the action mentions `keyword`.
    pub fn with_keyword(mut self, keyword: impl Into<String>, delta: f64) -> Self {
        self.keywords.insert(keyword.into().to_lowercase(), delta);
        self
    }

    /// Builder: adjust the score when `context[flag] == true`.
    pub fn with_flag(mut self, flag: impl Into<String>, delta: f64) -> Self {
        self.flags.insert(flag.into(), delta);
        self
    }

    fn evaluate(&self, action: &str, context: &ScoringContext) -> f64 {
        let action = action.to_lowercase();

        let keyword_delta: f64 = self
            .keywords
            .iter()
            .filter(|(keyword, _)| action.contains(keyword.as_str()))
            .map(|(_, delta)| delta)
            .sum();

        let flag_delta: f64 = self
            .flags
            .iter()
            .filter(|(flag, _)| {
                context
                    .get(flag.as_str())
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false)
            })
            .map(|(_, delta)| delta)
            .sum();

        // Saturation is part of this rule set's definition, not the
        // scorer's range contract.
        (self.base + keyword_delta + flag_delta).clamp(0.0, 1.0)
    }
}

/// A rule set driven by keyword and context-flag adjustments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordRuleSet {
    pub domain: String,
    pub rules: Vec<PrincipleRule>,
}

impl KeywordRuleSet {
    /// Create an empty rule set for a domain.
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            rules: Vec::new(),
        }
    }

    /// Builder: add a principle rule.
    pub fn with_rule(mut self, rule: PrincipleRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Load from YAML and validate.
    pub fn from_yaml(yaml: &str) -> Result<Self, ScoringError> {
        let rule_set: Self =
            serde_yaml::from_str(yaml).map_err(|e| ScoringError::InvalidRuleSet(e.to_string()))?;
        rule_set.validate()?;
        Ok(rule_set)
    }

    /// Serialize to YAML.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    /// Check base scores are in range and labels are unique.
    pub fn validate(&self) -> Result<(), ScoringError> {
        if self.domain.trim().is_empty() {
            return Err(ScoringError::InvalidRuleSet("empty domain".to_string()));
        }

        let mut seen = std::collections::BTreeSet::new();
        for rule in &self.rules {
            if !rule.base.is_finite() || !(0.0..=1.0).contains(&rule.base) {
                return Err(ScoringError::InvalidRuleSet(format!(
                    "base score for '{}' must be in [0, 1], got {}",
                    rule.principle.label, rule.base
                )));
            }
            if !seen.insert(rule.principle.label.as_str()) {
                return Err(ScoringError::InvalidRuleSet(format!(
                    "duplicate principle '{}'",
                    rule.principle.label
                )));
            }
        }
        Ok(())
    }

    /// Principles covered by this rule set.
    pub fn principles(&self) -> Vec<&Principle> {
        self.rules.iter().map(|r| &r.principle).collect()
    }
}

impl DomainRuleSet for KeywordRuleSet {
    fn domain(&self) -> &str {
        &self.domain
    }

    fn score(&self, action: &str, context: &ScoringContext) -> LabeledScores {
        self.rules
            .iter()
            .map(|rule| (rule.principle.label.clone(), rule.evaluate(action, context)))
            .collect()
    }
}
