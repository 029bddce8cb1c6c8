//! The `Witness` service: one handle over ledger, graph, engine and scorer.

use chrono::{DateTime, Utc};
use constitution::{ConstitutionalScorer, DomainRuleSet};
use derivation::{DerivationGraph, DerivationPath, Grounding, GroundingResult};
use std::sync::Arc;
use synthesis::TextSynthesizer;
use tracing::{debug, info};

use crate::config::WitnessConfig;
use crate::crystal::{Crystal, CrystalFilter, CrystalLevel};
use crate::engine::CrystallizationEngine;
use crate::error::{Result, WitnessError};
use crate::evidence;
use crate::ledger::MarkLedger;
use crate::mark::{Layer, Mark, MarkDraft, MarkFilter};
use crate::store::{AppendStore, JsonlStore, MemoryStore};

/// File names under `storage.data_dir`.
pub const MARKS_FILE: &str = "marks.jsonl";
pub const CRYSTALS_FILE: &str = "crystals.jsonl";

/// Query facade.
///
/// Marks become graph vertices when appended. Marks at [`Layer::Axiom`] are
/// tagged with the configured axiom tag so grounding queries can reach them.
pub struct Witness {
    config: WitnessConfig,
    scorer: Arc<ConstitutionalScorer>,
    ledger: Arc<MarkLedger>,
    graph: DerivationGraph,
    engine: CrystallizationEngine,
}

impl Witness {
    /// Build over in-memory stores.
    pub fn in_memory(config: WitnessConfig, synthesizer: Arc<dyn TextSynthesizer>) -> Result<Self> {
        config.validate()?;
        Ok(Self::assemble(
            config,
            synthesizer,
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryStore::new()),
        ))
    }

    /// Build over JSON-lines stores in `storage.data_dir`.
    ///
    /// Crystal source links are rebuilt from the crystal store; other graph
    /// edges live only as long as the instance.
    pub async fn open(config: WitnessConfig, synthesizer: Arc<dyn TextSynthesizer>) -> Result<Self> {
        config.validate()?;
        let dir = config.storage.data_dir.clone().ok_or_else(|| {
            WitnessError::InvalidInput("storage.data_dir is required to open file stores".to_string())
        })?;

        let marks: JsonlStore<Mark> = JsonlStore::open(dir.join(MARKS_FILE)).await?;
        let crystals: JsonlStore<Crystal> = JsonlStore::open(dir.join(CRYSTALS_FILE)).await?;
        let crystals = Arc::new(crystals);

        let witness = Self::assemble(config, synthesizer, Arc::new(marks), crystals.clone());

        for mark in witness.ledger.list(&MarkFilter::new()).await? {
            witness.register_mark(&mark).await;
        }
        for crystal in crystals.list().await? {
            witness.engine.link_sources(&crystal).await;
        }

        info!(
            data_dir = %dir.display(),
            marks = witness.ledger.len().await?,
            artifacts = witness.graph.vertex_count().await,
            "Witness opened"
        );
        Ok(witness)
    }

    fn assemble(
        config: WitnessConfig,
        synthesizer: Arc<dyn TextSynthesizer>,
        marks: Arc<dyn AppendStore<Mark>>,
        crystals: Arc<dyn AppendStore<Crystal>>,
    ) -> Self {
        let scorer = Arc::new(ConstitutionalScorer::new());
        let ledger = Arc::new(MarkLedger::new(marks, config.ledger.clone()).with_scorer(Arc::clone(&scorer)));
        let graph = DerivationGraph::with_config(config.graph.clone());
        let engine = CrystallizationEngine::new(
            Arc::clone(&ledger),
            crystals,
            synthesizer,
            config.crystal.clone(),
        )
        .with_graph(graph.clone());

        Self {
            config,
            scorer,
            ledger,
            graph,
            engine,
        }
    }

    pub fn config(&self) -> &WitnessConfig {
        &self.config
    }

    pub fn ledger(&self) -> &MarkLedger {
        &self.ledger
    }

    pub fn graph(&self) -> &DerivationGraph {
        &self.graph
    }

    pub fn engine(&self) -> &CrystallizationEngine {
        &self.engine
    }

    pub fn scorer(&self) -> &ConstitutionalScorer {
        &self.scorer
    }

    /// Register a domain rule set used when marks are appended.
    pub fn register_rule_set(&self, rule_set: Arc<dyn DomainRuleSet>) {
        let domain = rule_set.domain().to_string();
        if self.scorer.register(rule_set).is_some() {
            debug!(domain = %domain, "Rule set replaced");
        }
    }

    /// Tag an artifact as an axiom.
    pub async fn declare_axiom(&self, id: &str) {
        self.graph.tag(id, &self.config.graph.axiom_tag).await;
    }

    /// Tag an artifact as a principle.
    pub async fn declare_principle(&self, id: &str) {
        self.graph.tag(id, &self.config.graph.principle_tag).await;
    }

    // Marks

    /// Append a mark and register it as an artifact.
    pub async fn mark(&self, draft: MarkDraft) -> Result<Mark> {
        let mark = self.ledger.append(draft).await?;
        self.register_mark(&mark).await;
        Ok(mark)
    }

    async fn register_mark(&self, mark: &Mark) {
        let mut tags: Vec<String> = Vec::new();
        if let Some(layer) = mark.layer {
            tags.push(layer.as_str().to_string());
            if layer == Layer::Axiom {
                tags.push(self.config.graph.axiom_tag.clone());
            }
        }
        self.graph.add_artifact(&mark.id, tags).await;
    }

    /// Newest marks first.
    pub async fn recent_marks(&self, filter: &MarkFilter, limit: usize) -> Result<Vec<Mark>> {
        self.ledger.recent(filter, limit).await
    }

    pub async fn causal_chain(&self, mark_id: &str) -> Result<Vec<Mark>> {
        self.ledger.causal_chain(mark_id).await
    }

    // Derivations

    /// Record a direct derivation `source -> target`.
    pub async fn derive(
        &self,
        source_id: &str,
        target_id: &str,
        loss: f64,
        witnesses: Vec<derivation::Witness>,
    ) -> Result<DerivationPath> {
        let path = DerivationPath::direct(source_id, target_id, loss, witnesses)?;
        self.graph.insert(path.clone()).await?;
        Ok(path)
    }

    /// Record `parent -> mark` with witnesses taken from the mark's
    /// principles and evidence.
    pub async fn derive_from_mark(&self, mark_id: &str, parent_artifact: &str, loss: f64) -> Result<DerivationPath> {
        let mark = self.ledger.get(mark_id).await?;
        let path = evidence::path_to_mark(parent_artifact, &mark, loss)?;
        self.graph.insert(path.clone()).await?;
        Ok(path)
    }

    pub async fn explain(&self, from: &str, to: &str) -> Result<Vec<DerivationPath>> {
        Ok(self.graph.explain(from, to).await?)
    }

    /// Grounding in axioms together with its policy classification.
    pub async fn grounding(&self, artifact_id: &str) -> Result<(GroundingResult, Grounding)> {
        let result = self.graph.grounded_in_axioms(artifact_id).await?;
        let class = self.graph.classify(&result);
        Ok((result, class))
    }

    /// [`grounding`](Self::grounding) for several artifacts at once.
    pub async fn groundings(&self, artifact_ids: &[&str]) -> Result<Vec<(GroundingResult, Grounding)>> {
        futures::future::try_join_all(artifact_ids.iter().map(|id| self.grounding(id))).await
    }

    pub async fn justifying_principles(&self, artifact_id: &str) -> Result<Vec<(String, DerivationPath)>> {
        Ok(self.graph.justifying_principles(artifact_id).await?)
    }

    /// Artifacts with no adequate grounding in an axiom.
    pub async fn orphans(&self) -> Result<Vec<String>> {
        let tag = self.config.graph.axiom_tag.clone();
        Ok(self.graph.orphans(move |a| a.has_tag(&tag)).await?)
    }

    // Crystals

    pub async fn crystals(&self, filter: &CrystalFilter) -> Result<Vec<Crystal>> {
        self.engine.list_crystals(filter).await
    }

    pub async fn crystallize_window(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Crystal> {
        self.engine.crystallize_window(start, end).await
    }

    pub async fn crystallize_tier_window(
        &self,
        level: CrystalLevel,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Crystal> {
        self.engine.crystallize_tier_window(level, start, end).await
    }
}
