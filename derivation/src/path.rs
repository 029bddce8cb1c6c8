//! Derivation paths: typed morphisms between artifact identifiers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{DerivationError, Result};

/// Absolute tolerance for comparing losses and confidences.
pub const EPSILON: f64 = 1e-9;

/// Discount applied to the mean confidence of chained evidence.
pub const COMPOSITION_DISCOUNT: f64 = 0.9;

/// Shape of a derivation path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathKind {
    /// Identity on an artifact
    Reflexive,
    /// A single non-composed edge
    Direct,
    /// Built by the composition operator
    Composed,
}

/// Kind of evidence backing a derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WitnessKind {
    PrincipleGrounding,
    SpecificationReference,
    TestResult,
    FormalProof,
    ModelReasoning,
    LossMeasurement,
    Composition,
}

impl WitnessKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PrincipleGrounding => "principle_grounding",
            Self::SpecificationReference => "specification_reference",
            Self::TestResult => "test_result",
            Self::FormalProof => "formal_proof",
            Self::ModelReasoning => "model_reasoning",
            Self::LossMeasurement => "loss_measurement",
            Self::Composition => "composition",
        }
    }
}

/// A single piece of evidence supporting a derivation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Witness {
    pub kind: WitnessKind,
    /// Confidence in `[0, 1]`
    pub confidence: f64,
    /// What the evidence points at (principle id, spec section, test name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

impl Witness {
    fn fixed(kind: WitnessKind, confidence: f64, reference: Option<String>) -> Self {
        Self {
            kind,
            confidence,
            reference,
        }
    }

    /// Grounding in a named principle (0.95).
    pub fn principle(reference: impl Into<String>) -> Self {
        Self::fixed(WitnessKind::PrincipleGrounding, 0.95, Some(reference.into()))
    }

    /// Reference to a specification (0.80).
    pub fn specification(reference: impl Into<String>) -> Self {
        Self::fixed(WitnessKind::SpecificationReference, 0.80, Some(reference.into()))
    }

    /// A test result: 0.90 when passing, 0.10 when failing.
    pub fn test(reference: impl Into<String>, passed: bool) -> Self {
        let confidence = if passed { 0.90 } else { 0.10 };
        Self::fixed(WitnessKind::TestResult, confidence, Some(reference.into()))
    }

    /// A formal proof (0.98).
    pub fn proof(reference: impl Into<String>) -> Self {
        Self::fixed(WitnessKind::FormalProof, 0.98, Some(reference.into()))
    }

    /// Model-generated reasoning (0.60).
    pub fn model_reasoning(reference: impl Into<String>) -> Self {
        Self::fixed(WitnessKind::ModelReasoning, 0.60, Some(reference.into()))
    }

    /// A measured loss; confidence is `1 - loss`.
    pub fn loss_measurement(loss: f64) -> Self {
        Self::fixed(WitnessKind::LossMeasurement, (1.0 - loss).clamp(0.0, 1.0), None)
    }

    /// Evidence that other evidence was chained: mean confidence × 0.9.
    ///
    /// An empty input carries no evidence and yields confidence 0.
    pub fn composition(witnesses: &[Witness]) -> Self {
        let confidence = if witnesses.is_empty() {
            0.0
        } else {
            let mean =
                witnesses.iter().map(|w| w.confidence).sum::<f64>() / witnesses.len() as f64;
            mean * COMPOSITION_DISCOUNT
        };
        Self::fixed(WitnessKind::Composition, confidence, None)
    }
}

/// One direct edge a path was built from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathSegment {
    pub path_id: String,
    pub source_id: String,
    pub target_id: String,
    pub loss: f64,
}

/// A typed morphism from `source_id` to `target_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivationPath {
    pub id: String,
    pub kind: PathKind,
    pub source_id: String,
    pub target_id: String,
    pub witnesses: Vec<Witness>,
    /// Semantic distance in `[0, 1]`; 0 is lossless
    pub loss: f64,
    pub labeled_scores: BTreeMap<String, f64>,
    /// Artifacts traversed, source first
    pub lineage: Vec<String>,
    /// Direct edges this path is made of (empty for reflexive paths)
    #[serde(default)]
    pub segments: Vec<PathSegment>,
    pub created_at: DateTime<Utc>,
}

pub(crate) fn new_path_id() -> String {
    format!("path-{}", uuid::Uuid::new_v4())
}

pub(crate) fn check_unit(value: f64) -> bool {
    value.is_finite() && (0.0..=1.0).contains(&value)
}

impl DerivationPath {
    /// Identity path on an artifact: loss 0, lineage `[id]`.
    pub fn reflexive(artifact_id: impl Into<String>) -> Self {
        let id: String = artifact_id.into();
        Self {
            id: format!("refl-{}", id),
            kind: PathKind::Reflexive,
            source_id: id.clone(),
            target_id: id.clone(),
            witnesses: Vec::new(),
            loss: 0.0,
            labeled_scores: BTreeMap::new(),
            lineage: vec![id],
            segments: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// A single edge with the given loss and evidence.
    ///
    /// The lineage of a direct path is `[source, target]`.
    pub fn direct(
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        loss: f64,
        witnesses: Vec<Witness>,
    ) -> Result<Self> {
        if !check_unit(loss) {
            return Err(DerivationError::InvalidLoss(loss));
        }
        if let Some(bad) = witnesses.iter().find(|w| !check_unit(w.confidence)) {
            return Err(DerivationError::InvalidConfidence(bad.confidence));
        }

        let id = new_path_id();
        let source_id: String = source_id.into();
        let target_id: String = target_id.into();

        Ok(Self {
            segments: vec![PathSegment {
                path_id: id.clone(),
                source_id: source_id.clone(),
                target_id: target_id.clone(),
                loss,
            }],
            id,
            kind: PathKind::Direct,
            lineage: vec![source_id.clone(), target_id.clone()],
            source_id,
            target_id,
            witnesses,
            loss,
            labeled_scores: BTreeMap::new(),
            created_at: Utc::now(),
        })
    }

    /// Rebuild a bare direct path from a recorded segment.
    pub fn from_segment(segment: &PathSegment) -> Self {
        Self {
            id: segment.path_id.clone(),
            kind: PathKind::Direct,
            source_id: segment.source_id.clone(),
            target_id: segment.target_id.clone(),
            witnesses: Vec::new(),
            loss: segment.loss,
            labeled_scores: BTreeMap::new(),
            lineage: vec![segment.source_id.clone(), segment.target_id.clone()],
            segments: vec![segment.clone()],
            created_at: Utc::now(),
        }
    }

    /// Builder: attach principle scores.
    pub fn with_scores(mut self, scores: BTreeMap<String, f64>) -> Self {
        self.labeled_scores = scores;
        self
    }

    /// Builder: attach one principle score.
    pub fn with_score(mut self, principle: impl Into<String>, score: f64) -> Self {
        self.labeled_scores.insert(principle.into(), score);
        self
    }

    pub fn is_reflexive(&self) -> bool {
        self.kind == PathKind::Reflexive
    }

    /// `1 - loss`.
    pub fn reliability(&self) -> f64 {
        1.0 - self.loss
    }

    /// Number of direct edges traversed.
    pub fn edge_count(&self) -> usize {
        self.segments.len()
    }

    /// Mean witness confidence, if any witnesses are attached.
    pub fn evidence_confidence(&self) -> Option<f64> {
        if self.witnesses.is_empty() {
            return None;
        }
        Some(self.witnesses.iter().map(|w| w.confidence).sum::<f64>() / self.witnesses.len() as f64)
    }

    /// Short human-readable signature used in law reports.
    pub fn signature(&self) -> String {
        format!(
            "{} -> {} loss={:.9} lineage=[{}] witnesses={}",
            self.source_id,
            self.target_id,
            self.loss,
            self.lineage.join(", "),
            self.witnesses.len()
        )
    }
}
