//! The mark ledger: an append-only log of justified actions.
//!
//! Marks reference causally prior marks by id, so the ledger is a flat store
//! plus a derivable parent DAG. A single append mutex makes the parent check
//! and the write linearizable; reads go straight to the store.

use chrono::{DateTime, Duration, Utc};
use constitution::ConstitutionalScorer;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::config::LedgerConfig;
use crate::error::{Result, WitnessError};
use crate::mark::{Mark, MarkDraft, MarkFilter};
use crate::store::{AppendStore, MemoryStore};

/// Append-only ledger of marks.
pub struct MarkLedger {
    store: Arc<dyn AppendStore<Mark>>,
    scorer: Option<Arc<ConstitutionalScorer>>,
    config: LedgerConfig,
    /// Held across parent check and write; guards the last timestamp the
    /// ledger assigned itself. Caller-supplied timestamps never move it.
    append_lock: Mutex<Option<DateTime<Utc>>>,
}

impl MarkLedger {
    /// Create a ledger over a store.
    pub fn new(store: Arc<dyn AppendStore<Mark>>, config: LedgerConfig) -> Self {
        Self {
            store,
            scorer: None,
            config,
            append_lock: Mutex::new(None),
        }
    }

    /// In-memory ledger with default settings.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), LedgerConfig::default())
    }

    /// Attach a scorer used on append.
    pub fn with_scorer(mut self, scorer: Arc<ConstitutionalScorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Append a mark.
    ///
    /// Scores are computed before anything is written, so a scoring failure
    /// leaves the ledger untouched.
    pub async fn append(&self, draft: MarkDraft) -> Result<Mark> {
        draft.validate()?;

        let domain = draft
            .domain
            .clone()
            .or_else(|| self.config.default_domain.clone());
        let scores = match (&self.scorer, &domain) {
            (Some(scorer), Some(domain)) if self.config.score_on_append => {
                Some(scorer.score(&draft.action, &draft.context, domain)?)
            }
            _ => None,
        };

        let mut last_timestamp = self.append_lock.lock().await;

        if let Some(id) = &draft.id {
            if self.store.get(id).await?.is_some() {
                return Err(WitnessError::DuplicateId(id.clone()));
            }
        }

        if let Some(parent_id) = &draft.parent_id {
            if self.store.get(parent_id).await?.is_none() {
                debug!(parent_id = %parent_id, "Rejecting mark with dangling parent");
                return Err(WitnessError::DanglingParent(parent_id.clone()));
            }
        }

        let assigned = draft.timestamp.is_none();
        let timestamp = match draft.timestamp {
            Some(ts) => ts,
            None => {
                let now = Utc::now();
                if last_timestamp.is_none() {
                    // Future-dated marks are caller-supplied; skip them.
                    *last_timestamp = self
                        .store
                        .list()
                        .await?
                        .iter()
                        .map(|m| m.timestamp)
                        .filter(|ts| *ts <= now)
                        .max();
                }
                match *last_timestamp {
                    Some(last) if now <= last => last + Duration::microseconds(1),
                    _ => now,
                }
            }
        };

        let mark = Mark {
            id: draft
                .id
                .clone()
                .unwrap_or_else(|| format!("mark-{}", uuid::Uuid::new_v4())),
            principles: draft.unique_principles(),
            action: draft.action,
            reasoning: draft.reasoning,
            timestamp,
            layer: draft.layer,
            confidence: draft.confidence.unwrap_or(1.0),
            evidence: draft.evidence,
            parent_id: draft.parent_id,
            domain,
            scores,
        };

        self.store.append(mark.clone()).await?;
        if assigned {
            *last_timestamp = Some(timestamp);
        }

        info!(
            mark_id = %mark.id,
            action = %mark.action,
            parent_id = ?mark.parent_id,
            "Mark appended"
        );

        Ok(mark)
    }

    /// Fetch a mark by id.
    pub async fn get(&self, id: &str) -> Result<Mark> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| WitnessError::NotFound(format!("mark '{}'", id)))
    }

    /// Marks matching a filter, in insertion order.
    pub async fn list(&self, filter: &MarkFilter) -> Result<Vec<Mark>> {
        self.list_where(|mark| filter.matches(mark)).await
    }

    /// Marks matching a predicate, in insertion order.
    pub async fn list_where<P>(&self, predicate: P) -> Result<Vec<Mark>>
    where
        P: Fn(&Mark) -> bool,
    {
        let marks = self.store.list().await?;
        Ok(marks.into_iter().filter(|m| predicate(m)).collect())
    }

    /// The `limit` most recently appended marks matching a filter, newest first.
    pub async fn recent(&self, filter: &MarkFilter, limit: usize) -> Result<Vec<Mark>> {
        let marks = self.store.list().await?;
        Ok(marks
            .into_iter()
            .rev()
            .filter(|m| filter.matches(m))
            .take(limit)
            .collect())
    }

    /// Marks whose timestamp lies in `[start, end]`.
    pub async fn window(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Mark>> {
        self.list(&MarkFilter::new().between(start, end)).await
    }

    /// Direct children of a mark.
    pub async fn children(&self, id: &str) -> Result<Vec<Mark>> {
        self.list(&MarkFilter::new().parent(id)).await
    }

    /// The chain of parents ending at `id`, root first.
    pub async fn causal_chain(&self, id: &str) -> Result<Vec<Mark>> {
        let mut chain = vec![self.get(id).await?];
        let mut visited: HashSet<String> = HashSet::from([id.to_string()]);

        while let Some(parent_id) = chain.last().and_then(|m| m.parent_id.clone()) {
            if !visited.insert(parent_id.clone()) {
                error!(mark_id = %id, parent_id = %parent_id, "Cycle in causal chain");
                return Err(WitnessError::CycleDetected(format!(
                    "causal chain of '{}' revisits '{}'",
                    id, parent_id
                )));
            }
            if chain.len() >= self.config.max_chain_depth {
                return Err(WitnessError::InvalidInput(format!(
                    "causal chain of '{}' exceeds {} marks",
                    id, self.config.max_chain_depth
                )));
            }

            let parent = self.store.get(&parent_id).await?.ok_or_else(|| {
                error!(mark_id = %id, parent_id = %parent_id, "Parent missing from ledger");
                WitnessError::DanglingParent(parent_id.clone())
            })?;
            chain.push(parent);
        }

        chain.reverse();
        Ok(chain)
    }

    pub async fn len(&self) -> Result<usize> {
        Ok(self.store.len().await?)
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}
