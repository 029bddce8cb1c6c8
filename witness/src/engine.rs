//! Crystallization engine.
//!
//! A run moves through
//!
//! ```text
//! Collecting -> Synthesizing -> Validating -> Committed
//!      \              \              \
//!       +--------------+--------------+--> Failed(reason)
//! ```
//!
//! and commits at most one crystal. Nothing is written unless the run reaches
//! `Committed`, and the engine never retries on its own.
//!
//! Sources are resolved by id in `Collecting`: every mark must be in the
//! ledger and every crystal in the crystal store, and the stored records are
//! what gets compressed.

use chrono::{DateTime, Utc};
use derivation::{DerivationGraph, DerivationPath, Witness};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use synthesis::{Synthesis, SynthesisRequest, TextSynthesizer};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::CrystalConfig;
use crate::crystal::{Crystal, CrystalFilter, CrystalLevel};
use crate::error::{Result, WitnessError};
use crate::ledger::MarkLedger;
use crate::mark::Mark;
use crate::store::AppendStore;

/// Why a run failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    EmptySource,
    TierMismatch {
        expected: CrystalLevel,
        found: CrystalLevel,
    },
    SynthesisUnavailable(String),
    Cancelled,
    InvalidPeriod(String),
    InvalidInput(String),
    UnknownSource(String),
    Persistence(String),
}

impl From<FailureReason> for WitnessError {
    fn from(reason: FailureReason) -> Self {
        match reason {
            FailureReason::EmptySource => Self::EmptySource,
            FailureReason::TierMismatch { expected, found } => Self::TierMismatch { expected, found },
            FailureReason::SynthesisUnavailable(msg) => Self::SynthesisUnavailable(msg),
            FailureReason::Cancelled => Self::Cancelled,
            FailureReason::InvalidPeriod(msg) | FailureReason::InvalidInput(msg) => {
                Self::InvalidInput(msg)
            }
            FailureReason::UnknownSource(id) => Self::NotFound(format!("source '{}'", id)),
            FailureReason::Persistence(msg) => Self::Persistence(msg),
        }
    }
}

/// State of a crystallization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Collecting,
    Synthesizing,
    Validating,
    Committed,
    Failed(FailureReason),
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Committed | Self::Failed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    pub state: RunState,
    pub at: DateTime<Utc>,
}

/// One invocation of the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrystallizationRun {
    pub run_id: String,
    pub level: CrystalLevel,
    pub state: RunState,
    pub history: Vec<StateTransition>,
    /// Set only when the run committed
    pub crystal: Option<Crystal>,
}

impl CrystallizationRun {
    fn start(level: CrystalLevel) -> Self {
        let mut run = Self {
            run_id: format!("run-{}", uuid::Uuid::new_v4()),
            level,
            state: RunState::Collecting,
            history: Vec::new(),
            crystal: None,
        };
        run.record(RunState::Collecting);
        run
    }

    fn record(&mut self, state: RunState) {
        self.history.push(StateTransition {
            state: state.clone(),
            at: Utc::now(),
        });
        self.state = state;
    }

    fn transition(&mut self, state: RunState) {
        debug!(run_id = %self.run_id, level = %self.level, state = ?state, "Run transition");
        self.record(state);
    }

    fn fail(mut self, reason: FailureReason) -> Self {
        warn!(run_id = %self.run_id, level = %self.level, reason = ?reason, "Crystallization failed");
        self.record(RunState::Failed(reason));
        self
    }

    pub fn is_committed(&self) -> bool {
        self.state == RunState::Committed
    }

    /// States visited, in order.
    pub fn states(&self) -> Vec<&RunState> {
        self.history.iter().map(|t| &t.state).collect()
    }

    pub fn into_result(self) -> Result<Crystal> {
        match self.state {
            RunState::Committed => self
                .crystal
                .ok_or_else(|| WitnessError::NotFound(format!("crystal of run {}", self.run_id))),
            RunState::Failed(reason) => Err(reason.into()),
            other => Err(WitnessError::InvalidInput(format!(
                "run {} stopped in state {:?}",
                self.run_id, other
            ))),
        }
    }
}

/// What a run compresses.
enum Sources {
    Marks(Vec<Mark>),
    Crystals(Vec<Crystal>),
}

impl Sources {
    fn len(&self) -> usize {
        match self {
            Self::Marks(m) => m.len(),
            Self::Crystals(c) => c.len(),
        }
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Everything gathered in `Collecting`.
struct Collected {
    request: SynthesisRequest,
    source_mark_ids: Vec<String>,
    source_crystal_ids: Vec<String>,
    base_confidence: f64,
    principles: Vec<String>,
    source_topics: Vec<String>,
    timestamps: Vec<DateTime<Utc>>,
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
}

fn dedup_preserving_order(items: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in items {
        let item = item.trim().to_string();
        if !item.is_empty() && !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

fn sorted_union<'a>(sets: impl IntoIterator<Item = &'a Vec<String>>) -> Vec<String> {
    let mut all: Vec<String> = sets.into_iter().flatten().cloned().collect();
    all.sort();
    all.dedup();
    all
}

fn mean(values: impl ExactSizeIterator<Item = f64>) -> f64 {
    let n = values.len();
    if n == 0 {
        return 0.0;
    }
    values.sum::<f64>() / n as f64
}

/// Compresses marks and crystals into higher-tier crystals.
pub struct CrystallizationEngine {
    ledger: Arc<MarkLedger>,
    crystals: Arc<dyn AppendStore<Crystal>>,
    synthesizer: Arc<dyn TextSynthesizer>,
    graph: Option<DerivationGraph>,
    config: CrystalConfig,
}

impl CrystallizationEngine {
    pub fn new(
        ledger: Arc<MarkLedger>,
        crystals: Arc<dyn AppendStore<Crystal>>,
        synthesizer: Arc<dyn TextSynthesizer>,
        config: CrystalConfig,
    ) -> Self {
        Self {
            ledger,
            crystals,
            synthesizer,
            graph: None,
            config,
        }
    }

    /// Cross-reference committed crystals in a derivation graph.
    pub fn with_graph(mut self, graph: DerivationGraph) -> Self {
        self.graph = Some(graph);
        self
    }

    pub fn config(&self) -> &CrystalConfig {
        &self.config
    }

    /// Compress marks into a session crystal.
    pub async fn crystallize_session(&self, marks: Vec<Mark>) -> Result<Crystal> {
        self.crystallize_session_with_cancel(marks, CancellationToken::new())
            .await
            .into_result()
    }

    pub async fn crystallize_session_with_cancel(
        &self,
        marks: Vec<Mark>,
        cancel: CancellationToken,
    ) -> CrystallizationRun {
        self.run(CrystalLevel::Session, Sources::Marks(marks), &cancel)
            .await
    }

    /// Compress crystals of the tier directly below `level`.
    pub async fn crystallize_tier(&self, level: CrystalLevel, crystals: Vec<Crystal>) -> Result<Crystal> {
        self.crystallize_tier_with_cancel(level, crystals, CancellationToken::new())
            .await
            .into_result()
    }

    pub async fn crystallize_tier_with_cancel(
        &self,
        level: CrystalLevel,
        crystals: Vec<Crystal>,
        cancel: CancellationToken,
    ) -> CrystallizationRun {
        self.run(level, Sources::Crystals(crystals), &cancel).await
    }

    /// Session crystal over the ledger marks in `[start, end]`.
    pub async fn crystallize_window(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Crystal> {
        if start > end {
            return Err(WitnessError::InvalidInput("window starts after it ends".to_string()));
        }
        let marks = self.ledger.window(start, end).await?;
        self.crystallize_session(marks).await
    }

    /// `level` crystal over stored crystals of the tier below whose period
    /// lies in `[start, end]`.
    pub async fn crystallize_tier_window(
        &self,
        level: CrystalLevel,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Crystal> {
        if start > end {
            return Err(WitnessError::InvalidInput("window starts after it ends".to_string()));
        }
        let below = level.below().ok_or_else(|| {
            WitnessError::InvalidInput("session crystals are built from marks".to_string())
        })?;
        let sources = self
            .list_crystals(&CrystalFilter::new().level(below).between(start, end))
            .await?;
        self.crystallize_tier(level, sources).await
    }

    pub async fn list_crystals(&self, filter: &CrystalFilter) -> Result<Vec<Crystal>> {
        let crystals = self.crystals.list().await?;
        Ok(crystals.into_iter().filter(|c| filter.matches(c)).collect())
    }

    pub async fn get_crystal(&self, id: &str) -> Result<Crystal> {
        self.crystals
            .get(id)
            .await?
            .ok_or_else(|| WitnessError::NotFound(format!("crystal '{}'", id)))
    }

    async fn run(&self, level: CrystalLevel, sources: Sources, cancel: &CancellationToken) -> CrystallizationRun {
        let mut run = CrystallizationRun::start(level);

        let sources = match self.resolve(sources).await {
            Ok(sources) => sources,
            Err(reason) => return run.fail(reason),
        };

        let collected = match self.collect(level, sources) {
            Ok(collected) => collected,
            Err(reason) => return run.fail(reason),
        };

        if cancel.is_cancelled() {
            return run.fail(FailureReason::Cancelled);
        }

        run.transition(RunState::Synthesizing);
        let synthesis = tokio::select! {
            biased;
            _ = cancel.cancelled() => return run.fail(FailureReason::Cancelled),
            result = tokio::time::timeout(
                self.config.synthesis_timeout(),
                self.synthesizer.synthesize(collected.request.clone()),
            ) => match result {
                Ok(Ok(synthesis)) => synthesis,
                Ok(Err(e)) => return run.fail(FailureReason::SynthesisUnavailable(e.to_string())),
                Err(_) => {
                    return run.fail(FailureReason::SynthesisUnavailable(format!(
                        "{} timed out after {}ms",
                        self.synthesizer.id(),
                        self.config.synthesis_timeout_ms
                    )))
                }
            },
        };

        run.transition(RunState::Validating);
        let crystal = match self.assemble(level, collected, synthesis) {
            Ok(crystal) => crystal,
            Err(reason) => return run.fail(reason),
        };

        if cancel.is_cancelled() {
            return run.fail(FailureReason::Cancelled);
        }

        if let Err(e) = self.crystals.append(crystal.clone()).await {
            return run.fail(FailureReason::Persistence(e.to_string()));
        }

        info!(
            run_id = %run.run_id,
            crystal_id = %crystal.id,
            level = %crystal.level,
            sources = crystal.source_count(),
            confidence = crystal.confidence,
            "Crystal committed"
        );

        self.link_sources(&crystal).await;

        run.crystal = Some(crystal);
        run.transition(RunState::Committed);
        run
    }

    /// Replace every source with its committed record.
    async fn resolve(&self, sources: Sources) -> std::result::Result<Sources, FailureReason> {
        if sources.is_empty() {
            return Err(FailureReason::EmptySource);
        }
        if sources.len() > self.config.max_sources {
            return Err(FailureReason::InvalidInput(format!(
                "{} sources exceed the limit of {}",
                sources.len(),
                self.config.max_sources
            )));
        }

        match sources {
            Sources::Marks(marks) => {
                let mut stored = Vec::with_capacity(marks.len());
                for mark in marks {
                    match self.ledger.get(&mark.id).await {
                        Ok(found) => stored.push(found),
                        Err(WitnessError::NotFound(_)) => return Err(FailureReason::UnknownSource(mark.id)),
                        Err(e) => return Err(FailureReason::Persistence(e.to_string())),
                    }
                }
                Ok(Sources::Marks(stored))
            }
            Sources::Crystals(crystals) => {
                let mut stored = Vec::with_capacity(crystals.len());
                for crystal in crystals {
                    match self.crystals.get(&crystal.id).await {
                        Ok(Some(found)) => stored.push(found),
                        Ok(None) => return Err(FailureReason::UnknownSource(crystal.id)),
                        Err(e) => return Err(FailureReason::Persistence(e.to_string())),
                    }
                }
                Ok(Sources::Crystals(stored))
            }
        }
    }

    fn collect(&self, level: CrystalLevel, sources: Sources) -> std::result::Result<Collected, FailureReason> {
        match (level.below(), sources) {
            (None, Sources::Marks(marks)) => {
                let timestamps: Vec<DateTime<Utc>> = marks.iter().map(|m| m.timestamp).collect();
                let (period_start, period_end) = bounds(timestamps.iter().copied(), timestamps.iter().copied())?;

                let principles = sorted_union(marks.iter().map(|m| &m.principles));
                let request = marks
                    .iter()
                    .fold(SynthesisRequest::new(level.as_str()), |req, m| {
                        req.with_entry(m.action.clone(), m.reasoning.clone())
                    })
                    .with_principles(principles.clone());

                Ok(Collected {
                    request,
                    source_mark_ids: marks.iter().map(|m| m.id.clone()).collect(),
                    source_crystal_ids: Vec::new(),
                    base_confidence: mean(marks.iter().map(|m| m.confidence)),
                    principles,
                    source_topics: Vec::new(),
                    timestamps,
                    period_start,
                    period_end,
                })
            }
            (Some(expected), Sources::Crystals(crystals)) => {
                if let Some(wrong) = crystals.iter().find(|c| c.level != expected) {
                    return Err(FailureReason::TierMismatch {
                        expected,
                        found: wrong.level,
                    });
                }
                if let Some(bad) = crystals.iter().find(|c| c.period_start > c.period_end) {
                    return Err(FailureReason::InvalidPeriod(format!(
                        "source crystal {} starts after it ends",
                        bad.id
                    )));
                }

                let (period_start, period_end) = bounds(
                    crystals.iter().map(|c| c.period_start),
                    crystals.iter().map(|c| c.period_end),
                )?;

                let principles = sorted_union(crystals.iter().map(|c| &c.principles));
                let request = crystals
                    .iter()
                    .fold(SynthesisRequest::new(level.as_str()), |req, c| {
                        req.with_entry(c.insight.clone(), c.significance.clone())
                            .with_mood(c.mood)
                    })
                    .with_principles(principles.clone());

                Ok(Collected {
                    request,
                    source_mark_ids: Vec::new(),
                    source_crystal_ids: crystals.iter().map(|c| c.id.clone()).collect(),
                    base_confidence: mean(crystals.iter().map(|c| c.confidence)),
                    principles,
                    source_topics: dedup_preserving_order(
                        crystals.iter().flat_map(|c| c.topics.iter().cloned()),
                    ),
                    timestamps: crystals
                        .iter()
                        .flat_map(|c| [c.period_start, c.period_end])
                        .collect(),
                    period_start,
                    period_end,
                })
            }
            (None, Sources::Crystals(crystals)) => Err(FailureReason::InvalidInput(format!(
                "session crystals are built from marks, got {} crystals",
                crystals.len()
            ))),
            (Some(expected), Sources::Marks(_)) => Err(FailureReason::InvalidInput(format!(
                "{} crystals are built from {} crystals, not marks",
                level, expected
            ))),
        }
    }

    fn assemble(
        &self,
        level: CrystalLevel,
        collected: Collected,
        synthesis: Synthesis,
    ) -> std::result::Result<Crystal, FailureReason> {
        synthesis
            .validate()
            .map_err(|e| FailureReason::SynthesisUnavailable(e.to_string()))?;

        if collected
            .timestamps
            .iter()
            .any(|t| *t < collected.period_start || *t > collected.period_end)
        {
            return Err(FailureReason::InvalidPeriod(
                "period does not bound every source".to_string(),
            ));
        }

        let confidence =
            (collected.base_confidence * synthesis.confidence.unwrap_or(1.0)).clamp(0.0, 1.0);

        let mut topics = dedup_preserving_order(synthesis.topics);
        if topics.is_empty() {
            topics = collected.source_topics;
        }

        let crystal = Crystal {
            id: format!("crystal-{}", uuid::Uuid::new_v4()),
            level,
            insight: synthesis.insight.trim().to_string(),
            significance: synthesis.significance.trim().to_string(),
            source_mark_ids: collected.source_mark_ids,
            source_crystal_ids: collected.source_crystal_ids,
            confidence,
            principles: collected.principles,
            topics,
            mood: synthesis.mood,
            crystallized_at: Utc::now(),
            period_start: collected.period_start,
            period_end: collected.period_end,
        };

        crystal
            .validate()
            .map_err(|e| FailureReason::InvalidInput(e.to_string()))?;
        Ok(crystal)
    }

    /// Add `source -> crystal` edges. Failures never un-commit the crystal.
    pub(crate) async fn link_sources(&self, crystal: &Crystal) {
        let Some(graph) = &self.graph else {
            return;
        };
        if !self.config.link_sources {
            return;
        }

        let loss = (1.0 - crystal.confidence).clamp(0.0, 1.0);
        for source_id in crystal.source_ids() {
            let linked = match DerivationPath::direct(
                source_id.clone(),
                crystal.id.clone(),
                loss,
                vec![Witness::loss_measurement(loss)],
            ) {
                Ok(path) => graph.insert(path).await,
                Err(e) => Err(e),
            };
            if let Err(e) = linked {
                warn!(crystal_id = %crystal.id, source_id = %source_id, error = %e, "Failed to link crystal source");
            }
        }
    }
}

fn bounds(
    starts: impl Iterator<Item = DateTime<Utc>>,
    ends: impl Iterator<Item = DateTime<Utc>>,
) -> std::result::Result<(DateTime<Utc>, DateTime<Utc>), FailureReason> {
    match (starts.min(), ends.max()) {
        (Some(start), Some(end)) => Ok((start, end)),
        _ => Err(FailureReason::EmptySource),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedgerConfig;
    use crate::mark::MarkDraft;
    use crate::store::MemoryStore;
    use chrono::Duration;
    use synthesis::{MockSynthesizer, Mood};

    struct Fixture {
        ledger: Arc<MarkLedger>,
        crystals: Arc<MemoryStore<Crystal>>,
        synthesizer: Arc<MockSynthesizer>,
    }

    impl Fixture {
        fn new(synthesizer: MockSynthesizer) -> Self {
            Self {
                ledger: Arc::new(MarkLedger::new(
                    Arc::new(MemoryStore::new()),
                    LedgerConfig::default(),
                )),
                crystals: Arc::new(MemoryStore::new()),
                synthesizer: Arc::new(synthesizer),
            }
        }

        fn engine(&self, config: CrystalConfig) -> CrystallizationEngine {
            CrystallizationEngine::new(
                Arc::clone(&self.ledger),
                self.crystals.clone(),
                self.synthesizer.clone(),
                config,
            )
        }

        async fn committed(&self) -> usize {
            self.crystals.len().await.unwrap()
        }

        async fn stored(&self, crystals: Vec<Crystal>) -> Vec<Crystal> {
            for crystal in &crystals {
                self.crystals.append(crystal.clone()).await.unwrap();
            }
            crystals
        }
    }

    fn session_crystal(id: &str, confidence: f64, start: DateTime<Utc>, hours: i64) -> Crystal {
        Crystal {
            id: id.to_string(),
            level: CrystalLevel::Session,
            insight: format!("insight {}", id),
            significance: "it mattered".to_string(),
            source_mark_ids: vec![format!("mark-of-{}", id)],
            source_crystal_ids: vec![],
            confidence,
            principles: vec![format!("p-{}", id)],
            topics: vec!["shared".to_string(), id.to_string()],
            mood: Mood::neutral(),
            crystallized_at: start,
            period_start: start,
            period_end: start + Duration::hours(hours),
        }
    }

    #[tokio::test]
    async fn test_day_confidence_is_mean_of_sessions() {
        let fixture = Fixture::new(MockSynthesizer::default());
        let engine = fixture.engine(CrystalConfig::default());
        let t0 = Utc::now() - Duration::days(1);

        let sessions = fixture
            .stored(vec![
                session_crystal("s1", 0.9, t0, 1),
                session_crystal("s2", 0.8, t0 + Duration::hours(3), 2),
                session_crystal("s3", 0.7, t0 + Duration::hours(8), 1),
            ])
            .await;
        let day = engine.crystallize_tier(CrystalLevel::Day, sessions).await.unwrap();

        assert_eq!(day.level, CrystalLevel::Day);
        assert!((day.confidence - 0.8).abs() < 1e-9);
        assert_eq!(day.source_crystal_ids, vec!["s1", "s2", "s3"]);
        assert!(day.source_mark_ids.is_empty());
        assert_eq!(day.period_start, t0);
        assert_eq!(day.period_end, t0 + Duration::hours(9));
        assert_eq!(day.principles, vec!["p-s1", "p-s2", "p-s3"]);
        assert_eq!(day.topics, vec!["shared", "s1", "s2", "s3"]);
        assert_eq!(fixture.committed().await, 4);
    }

    #[tokio::test]
    async fn test_session_period_bounds_marks_exactly() {
        let fixture = Fixture::new(
            MockSynthesizer::default().with_output(
                Synthesis::new("Steady progress.", "Tests caught a bug.")
                    .with_topics(vec!["testing".into(), "testing".into(), "parser".into()])
                    .with_confidence(0.5),
            ),
        );
        let engine = fixture.engine(CrystalConfig::default());
        let t0 = Utc::now() - Duration::hours(5);

        let mut marks = Vec::new();
        for (i, (offset, confidence)) in [(30, 0.6), (0, 1.0), (90, 0.8)].into_iter().enumerate() {
            marks.push(
                fixture
                    .ledger
                    .append(
                        MarkDraft::new(format!("step {}", i), "why")
                            .with_timestamp(t0 + Duration::minutes(offset))
                            .with_confidence(confidence)
                            .with_principles(["tasteful"]),
                    )
                    .await
                    .unwrap(),
            );
        }

        let crystal = engine.crystallize_session(marks.clone()).await.unwrap();
        assert_eq!(crystal.period_start, t0);
        assert_eq!(crystal.period_end, t0 + Duration::minutes(90));
        assert!((crystal.confidence - 0.8 * 0.5).abs() < 1e-9);
        assert_eq!(crystal.topics, vec!["testing", "parser"]);
        assert_eq!(crystal.principles, vec!["tasteful"]);
        assert_eq!(
            crystal.source_mark_ids,
            marks.iter().map(|m| m.id.clone()).collect::<Vec<_>>()
        );
        assert_eq!(engine.get_crystal(&crystal.id).await.unwrap(), crystal);
    }

    #[tokio::test]
    async fn test_empty_source_commits_nothing() {
        let fixture = Fixture::new(MockSynthesizer::default());
        let engine = fixture.engine(CrystalConfig::default());

        let run = engine
            .crystallize_session_with_cancel(vec![], CancellationToken::new())
            .await;
        assert_eq!(run.state, RunState::Failed(FailureReason::EmptySource));
        assert!(run.crystal.is_none());
        assert!(matches!(run.into_result(), Err(WitnessError::EmptySource)));

        assert!(matches!(
            engine.crystallize_tier(CrystalLevel::Week, vec![]).await,
            Err(WitnessError::EmptySource)
        ));
        assert_eq!(fixture.committed().await, 0);
        assert_eq!(fixture.synthesizer.call_count(), 0);
    }

    #[tokio::test]
    async fn test_tier_mismatch() {
        let fixture = Fixture::new(MockSynthesizer::default());
        let engine = fixture.engine(CrystalConfig::default());
        let t0 = Utc::now();

        let mut day = session_crystal("d1", 0.9, t0, 1);
        day.level = CrystalLevel::Day;
        let mixed = fixture.stored(vec![session_crystal("s1", 0.9, t0, 1), day]).await;

        let result = engine.crystallize_tier(CrystalLevel::Day, mixed.clone()).await;
        assert_eq!(
            result,
            Err(WitnessError::TierMismatch {
                expected: CrystalLevel::Session,
                found: CrystalLevel::Day,
            })
        );

        let skipped = engine
            .crystallize_tier(CrystalLevel::Week, mixed[..1].to_vec())
            .await;
        assert!(matches!(skipped, Err(WitnessError::TierMismatch { .. })));
        assert_eq!(fixture.committed().await, 2);
    }

    #[tokio::test]
    async fn test_synthesis_unavailable() {
        let fixture = Fixture::new(MockSynthesizer::default().with_available(false));
        let engine = fixture.engine(CrystalConfig::default());
        let t0 = Utc::now();

        let sessions = fixture.stored(vec![session_crystal("s1", 0.9, t0, 1)]).await;

        let result = engine.crystallize_tier(CrystalLevel::Day, sessions).await;
        assert!(matches!(result, Err(WitnessError::SynthesisUnavailable(_))));
        assert_eq!(fixture.committed().await, 1);
    }

    #[tokio::test]
    async fn test_invalid_synthesis_output() {
        let fixture = Fixture::new(
            MockSynthesizer::default().with_output(Synthesis::new("ok", "ok").with_confidence(1.5)),
        );
        let engine = fixture.engine(CrystalConfig::default());
        let sessions = fixture.stored(vec![session_crystal("s1", 0.9, Utc::now(), 1)]).await;

        let run = engine
            .crystallize_tier_with_cancel(CrystalLevel::Day, sessions, CancellationToken::new())
            .await;
        assert!(matches!(run.state, RunState::Failed(FailureReason::SynthesisUnavailable(_))));
        assert_eq!(
            run.states(),
            vec![
                &RunState::Collecting,
                &RunState::Synthesizing,
                &RunState::Validating,
                &run.state,
            ]
        );
    }

    #[tokio::test]
    async fn test_synthesis_timeout() {
        let fixture = Fixture::new(MockSynthesizer::default().with_delay(std::time::Duration::from_millis(500)));
        let engine = fixture.engine(CrystalConfig {
            synthesis_timeout_ms: 20,
            ..Default::default()
        });

        let sessions = fixture.stored(vec![session_crystal("s1", 0.9, Utc::now(), 1)]).await;

        let result = engine.crystallize_tier(CrystalLevel::Day, sessions).await;
        assert!(matches!(result, Err(WitnessError::SynthesisUnavailable(msg)) if msg.contains("timed out")));
        assert_eq!(fixture.committed().await, 1);
    }

    #[tokio::test]
    async fn test_cancel_during_synthesis() {
        let fixture = Fixture::new(MockSynthesizer::default().with_delay(std::time::Duration::from_secs(10)));
        let engine = fixture.engine(CrystalConfig::default());
        let sessions = fixture.stored(vec![session_crystal("s1", 0.9, Utc::now(), 1)]).await;
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let run = engine
            .crystallize_tier_with_cancel(CrystalLevel::Day, sessions, cancel)
            .await;

        assert_eq!(run.state, RunState::Failed(FailureReason::Cancelled));
        assert!(run.states().contains(&&RunState::Synthesizing));
        assert!(run.crystal.is_none());
        assert_eq!(fixture.committed().await, 1);
    }

    #[tokio::test]
    async fn test_cancel_before_synthesis() {
        let fixture = Fixture::new(MockSynthesizer::default());
        let engine = fixture.engine(CrystalConfig::default());
        let sessions = fixture.stored(vec![session_crystal("s1", 0.9, Utc::now(), 1)]).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let run = engine
            .crystallize_tier_with_cancel(CrystalLevel::Day, sessions, cancel)
            .await;
        assert!(matches!(run.into_result(), Err(WitnessError::Cancelled)));
        assert_eq!(fixture.synthesizer.call_count(), 0);
    }

    #[tokio::test]
    async fn test_max_sources() {
        let fixture = Fixture::new(MockSynthesizer::default());
        let engine = fixture.engine(CrystalConfig {
            max_sources: 1,
            ..Default::default()
        });
        let t0 = Utc::now();

        let result = engine
            .crystallize_tier(
                CrystalLevel::Day,
                vec![session_crystal("s1", 0.9, t0, 1), session_crystal("s2", 0.9, t0, 1)],
            )
            .await;
        assert!(matches!(result, Err(WitnessError::InvalidInput(_))));
        assert_eq!(fixture.synthesizer.call_count(), 0);
    }

    #[tokio::test]
    async fn test_uncommitted_sources_are_rejected() {
        let fixture = Fixture::new(MockSynthesizer::default());
        let graph = DerivationGraph::new();
        let engine = fixture.engine(CrystalConfig::default()).with_graph(graph.clone());
        let t0 = Utc::now() - Duration::hours(2);

        let real = fixture.ledger.append(MarkDraft::new("real", "kept")).await.unwrap();
        let mut ghost = real.clone();
        ghost.id = "mark-ghost".to_string();

        let run = engine
            .crystallize_session_with_cancel(vec![real.clone(), ghost], CancellationToken::new())
            .await;
        assert_eq!(
            run.state,
            RunState::Failed(FailureReason::UnknownSource("mark-ghost".to_string()))
        );
        assert!(matches!(run.into_result(), Err(WitnessError::NotFound(_))));

        let sessions = fixture.stored(vec![session_crystal("s1", 0.9, t0, 1)]).await;
        let unstored = session_crystal("s2", 0.9, t0, 1);
        let result = engine
            .crystallize_tier(CrystalLevel::Day, vec![sessions[0].clone(), unstored])
            .await;
        assert!(matches!(result, Err(WitnessError::NotFound(msg)) if msg.contains("s2")));

        assert_eq!(fixture.committed().await, 1);
        assert_eq!(fixture.synthesizer.call_count(), 0);
        assert_eq!(graph.edge_count().await, 0);
    }

    #[tokio::test]
    async fn test_stored_source_wins_over_caller_copy() {
        let fixture = Fixture::new(MockSynthesizer::default());
        let engine = fixture.engine(CrystalConfig::default());
        let t0 = Utc::now() - Duration::days(1);

        let stored = fixture.stored(vec![session_crystal("s1", 0.6, t0, 1)]).await;
        let mut edited = stored[0].clone();
        edited.confidence = 1.0;
        edited.period_end = t0 + Duration::hours(12);

        let day = engine.crystallize_tier(CrystalLevel::Day, vec![edited]).await.unwrap();
        assert!((day.confidence - 0.6).abs() < 1e-9);
        assert_eq!(day.period_end, t0 + Duration::hours(1));
    }

    #[tokio::test]
    async fn test_synthesizer_mood_is_kept() {
        let fixture = Fixture::new(MockSynthesizer::default().with_output(Synthesis::new("Calm.", "Even.")));
        let engine = fixture.engine(CrystalConfig::default());
        let t0 = Utc::now() - Duration::days(1);

        let mut lively = session_crystal("s1", 0.9, t0, 1);
        lively.mood = Mood {
            tempo: 0.9,
            ..Mood::neutral()
        };
        let sessions = fixture.stored(vec![lively]).await;

        let day = engine.crystallize_tier(CrystalLevel::Day, sessions).await.unwrap();
        assert_eq!(day.mood, Mood::neutral());

        let request = fixture.synthesizer.last_request().unwrap();
        assert_eq!(request.moods.len(), 1);
        assert_eq!(request.moods[0].tempo, 0.9);
    }

    #[tokio::test]
    async fn test_windows_and_links() {
        let fixture = Fixture::new(MockSynthesizer::default().with_output(
            Synthesis::new("Focused day.", "Shipped.").with_confidence(1.0),
        ));
        let graph = DerivationGraph::new();
        let engine = fixture.engine(CrystalConfig::default()).with_graph(graph.clone());
        let t0 = Utc::now() - Duration::days(2);

        for offset in [0, 10, 20] {
            fixture
                .ledger
                .append(
                    MarkDraft::new("work", "steady")
                        .with_timestamp(t0 + Duration::minutes(offset))
                        .with_confidence(0.9),
                )
                .await
                .unwrap();
        }
        fixture
            .ledger
            .append(MarkDraft::new("late", "outside").with_timestamp(t0 + Duration::hours(5)))
            .await
            .unwrap();

        let session = engine
            .crystallize_window(t0, t0 + Duration::minutes(20))
            .await
            .unwrap();
        assert_eq!(session.source_mark_ids.len(), 3);
        let edges = graph.paths_to(&session.id).await;
        assert_eq!(edges.len(), 3);
        assert!(edges.iter().all(|e| (e.loss - 0.1).abs() < 1e-9));

        let day = engine
            .crystallize_tier_window(CrystalLevel::Day, t0 - Duration::hours(1), t0 + Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(day.source_crystal_ids, vec![session.id.clone()]);

        let listed = engine.list_crystals(&CrystalFilter::new().level(CrystalLevel::Day)).await.unwrap();
        assert_eq!(listed, vec![day]);

        assert!(matches!(
            engine.crystallize_window(t0 + Duration::hours(1), t0).await,
            Err(WitnessError::InvalidInput(_))
        ));
        assert!(matches!(
            engine.crystallize_window(t0 + Duration::days(1), t0 + Duration::days(1)).await,
            Err(WitnessError::EmptySource)
        ));
    }
}
