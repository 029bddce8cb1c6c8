//! Domain-keyed scoring strategies.
//!
//! Each calling subsystem (chat, navigation, editing, ...) registers its own
//! [`DomainRuleSet`]. The scorer looks the rule set up by domain key at call
//! time and enforces the `[0, 1]` range contract on whatever it returns.

use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::types::{validate_scores, LabeledScores, ScoringContext, ScoringError};

/// A domain-specific scoring strategy.
///
/// Implementations must be pure: identical inputs yield identical scores and
/// scoring has no side effects.
pub trait DomainRuleSet: Send + Sync {
    /// Domain key this rule set is registered under.
    fn domain(&self) -> &str;

    /// Score an action against the principles this rule set knows.
    fn score(&self, action: &str, context: &ScoringContext) -> LabeledScores;
}

/// Registry of domain rule sets.
pub struct ConstitutionalScorer {
    rule_sets: DashMap<String, Arc<dyn DomainRuleSet>>,
}

impl ConstitutionalScorer {
    /// Create an empty scorer.
    pub fn new() -> Self {
        Self {
            rule_sets: DashMap::new(),
        }
    }

    /// Builder: register a rule set.
    pub fn with_rule_set(self, rule_set: Arc<dyn DomainRuleSet>) -> Self {
        self.register(rule_set);
        self
    }

    /// Register a rule set under its own domain key.
    ///
    /// Returns the rule set previously registered for that domain, if any.
    pub fn register(&self, rule_set: Arc<dyn DomainRuleSet>) -> Option<Arc<dyn DomainRuleSet>> {
        let domain = rule_set.domain().to_string();
        debug!(domain = %domain, "Registering domain rule set");
        self.rule_sets.insert(domain, rule_set)
    }

    /// Remove the rule set for a domain.
    pub fn unregister(&self, domain: &str) -> Option<Arc<dyn DomainRuleSet>> {
        self.rule_sets.remove(domain).map(|(_, rule_set)| rule_set)
    }

    /// Whether a rule set is registered for the domain.
    pub fn has_domain(&self, domain: &str) -> bool {
        self.rule_sets.contains_key(domain)
    }

    /// Registered domain keys, sorted.
    pub fn domains(&self) -> Vec<String> {
        let mut domains: Vec<String> = self.rule_sets.iter().map(|e| e.key().clone()).collect();
        domains.sort();
        domains
    }

    /// Score an action in the given domain.
    ///
    /// Out-of-range values are reported as [`ScoringError::ScoreOutOfRange`],
    /// never clamped.
    pub fn score(
        &self,
        action: &str,
        context: &ScoringContext,
        domain: &str,
    ) -> Result<LabeledScores, ScoringError> {
        // Clone the Arc out so the shard lock is not held while scoring.
        let rule_set = self
            .rule_sets
            .get(domain)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| ScoringError::UnknownDomain(domain.to_string()))?;

        let scores = rule_set.score(action, context);

        if let Err(err) = validate_scores(domain, &scores) {
            warn!(domain = %domain, action = %action, error = %err, "Rule set violated score range");
            return Err(err);
        }

        Ok(scores)
    }
}

impl Default for ConstitutionalScorer {
    fn default() -> Self {
        Self::new()
    }
}
