//! Constitutional Scoring
//!
//! A generic scoring contract: `score(action, context, domain)` returns a
//! mapping from principle label to a real number in `[0, 1]`. The core never
//! hardcodes domain logic; each calling subsystem registers a
//! [`DomainRuleSet`] under its domain key.
//!
//! # Key Components
//!
//! - [`ConstitutionalScorer`]: registry that dispatches by domain and
//!   enforces the range contract
//! - [`DomainRuleSet`]: the single-method strategy a domain implements
//! - [`KeywordRuleSet`]: a configurable rule set loaded from YAML
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use constitution::{ConstitutionalScorer, KeywordRuleSet, PrincipleRule, ScoringContext};
//!
//! let rules = KeywordRuleSet::new("chat")
//!     .with_rule(PrincipleRule::new("ethical", 0.5).with_keyword("consent", 0.4));
//! let scorer = ConstitutionalScorer::new().with_rule_set(Arc::new(rules));
//!
//! let scores = scorer.score("ask for consent", &ScoringContext::new(), "chat").unwrap();
//! assert!((scores["ethical"] - 0.9).abs() < 1e-9);
//! ```

pub mod rules;
pub mod scoring;
pub mod types;

pub use rules::{KeywordRuleSet, PrincipleRule};
pub use scoring::{ConstitutionalScorer, DomainRuleSet};
pub use types::*;
