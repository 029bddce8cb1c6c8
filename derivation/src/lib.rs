//! Derivation paths and the derivation graph.
//!
//! Artifacts are objects and derivation paths are morphisms between them.
//! Paths compose when their endpoints meet, carry the evidence that backs
//! them, and accumulate a loss in `[0, 1]`:
//!
//! ```
//! use derivation::{compose, DerivationPath, Witness};
//!
//! let p = DerivationPath::direct("A", "B", 0.10, vec![Witness::principle("care")]).unwrap();
//! let q = DerivationPath::direct("B", "C", 0.20, vec![Witness::test("suite", true)]).unwrap();
//! let pq = compose(&p, &q).unwrap();
//!
//! assert!((pq.loss - 0.28).abs() < 1e-9);
//! assert_eq!(pq.lineage, vec!["A", "B", "C"]);
//! ```
//!
//! The [`DerivationGraph`] keeps paths in an acyclic structure and answers
//! grounding and explanation queries.

pub mod algebra;
pub mod error;
pub mod graph;
pub mod laws;
pub mod path;
pub mod policy;

pub use algebra::{accumulate_loss, compose, compose_all, merge_scores, reflexive};
pub use error::{DerivationError, Result};
pub use graph::{Artifact, DerivationGraph, GroundingResult};
pub use laws::{
    verify_all, verify_associativity, verify_left_identity, verify_loss_accumulation,
    verify_right_identity, Law, LawVerificationResult,
};
pub use path::{DerivationPath, PathKind, PathSegment, Witness, WitnessKind, COMPOSITION_DISCOUNT, EPSILON};
pub use policy::{GraphConfig, Grounding, GroundingPolicy};
