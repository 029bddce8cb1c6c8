//! The derivation graph: artifacts as vertices, derivation paths as edges.
//!
//! The graph is kept acyclic. Inserts take the write lock for both the
//! reachability check and the edge write, so two inserts that would jointly
//! close a cycle cannot both succeed.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeSet, BinaryHeap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use crate::algebra::{accumulate_loss, compose_all, reflexive};
use crate::error::{DerivationError, Result};
use crate::laws;
use crate::path::{check_unit, DerivationPath, PathKind};
use crate::policy::{GraphConfig, Grounding};

/// A vertex of the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl Artifact {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tags: BTreeSet::new(),
        }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }
}

/// Result of a grounding query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundingResult {
    pub artifact_id: String,
    /// True when the best path's loss is below the graph's threshold
    pub is_grounded: bool,
    /// Lowest-loss path from a matching axiom to the artifact
    pub path: Option<DerivationPath>,
    pub total_loss: Option<f64>,
    pub axiom_id: Option<String>,
}

impl GroundingResult {
    fn ungrounded(artifact_id: &str) -> Self {
        Self {
            artifact_id: artifact_id.to_string(),
            is_grounded: false,
            path: None,
            total_loss: None,
            axiom_id: None,
        }
    }
}

/// Best known route from some vertex down to the query target.
#[derive(Debug, Clone)]
struct Route {
    loss: f64,
    /// Path ids in traversal order
    edges: Vec<String>,
}

/// Min-heap entry ordered by loss, then vertex id.
#[derive(Debug, PartialEq)]
struct Frontier {
    loss: f64,
    vertex: String,
}

impl Eq for Frontier {}

impl Ord for Frontier {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .loss
            .total_cmp(&self.loss)
            .then_with(|| other.vertex.cmp(&self.vertex))
    }
}

impl PartialOrd for Frontier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
struct GraphState {
    artifacts: HashMap<String, Artifact>,
    paths: HashMap<String, DerivationPath>,
    outgoing: HashMap<String, Vec<String>>,
    incoming: HashMap<String, Vec<String>>,
}

impl GraphState {
    fn ensure(&mut self, id: &str) -> &mut Artifact {
        self.artifacts
            .entry(id.to_string())
            .or_insert_with(|| Artifact::new(id))
    }

    /// Whether `to` is reachable from `from` along outgoing edges.
    fn reaches(&self, from: &str, to: &str) -> bool {
        let mut queue = VecDeque::from([from.to_string()]);
        let mut seen = HashSet::new();

        while let Some(vertex) = queue.pop_front() {
            if vertex == to {
                return true;
            }
            if !seen.insert(vertex.clone()) {
                continue;
            }
            for path_id in self.outgoing.get(&vertex).into_iter().flatten() {
                if let Some(path) = self.paths.get(path_id) {
                    queue.push_back(path.target_id.clone());
                }
            }
        }
        false
    }

    /// Lowest-loss route from every ancestor of `target` down to it.
    ///
    /// Best-first over incoming edges; valid because accumulated loss never
    /// decreases along a route.
    fn best_routes(&self, target: &str) -> HashMap<String, Route> {
        let mut settled: HashMap<String, Route> = HashMap::new();
        let mut tentative: HashMap<String, Route> = HashMap::new();
        let mut heap = BinaryHeap::new();

        tentative.insert(
            target.to_string(),
            Route {
                loss: 0.0,
                edges: Vec::new(),
            },
        );
        heap.push(Frontier {
            loss: 0.0,
            vertex: target.to_string(),
        });

        while let Some(Frontier { vertex, .. }) = heap.pop() {
            if settled.contains_key(&vertex) {
                continue;
            }
            let Some(route) = tentative.get(&vertex).cloned() else {
                continue;
            };

            for path_id in self.incoming.get(&vertex).into_iter().flatten() {
                let Some(edge) = self.paths.get(path_id) else {
                    continue;
                };
                if settled.contains_key(&edge.source_id) {
                    continue;
                }

                let candidate = accumulate_loss(edge.loss, route.loss);
                let improves = tentative
                    .get(&edge.source_id)
                    .map(|known| candidate < known.loss)
                    .unwrap_or(true);

                if improves {
                    let mut edges = Vec::with_capacity(route.edges.len() + 1);
                    edges.push(path_id.clone());
                    edges.extend(route.edges.iter().cloned());

                    tentative.insert(edge.source_id.clone(), Route { loss: candidate, edges });
                    heap.push(Frontier {
                        loss: candidate,
                        vertex: edge.source_id.clone(),
                    });
                }
            }

            settled.insert(vertex, route);
        }

        settled
    }

    fn route_edges(&self, route: &Route) -> Vec<DerivationPath> {
        route
            .edges
            .iter()
            .filter_map(|id| self.paths.get(id).cloned())
            .collect()
    }

    fn route_path(&self, from: &str, route: &Route) -> Result<DerivationPath> {
        if route.edges.is_empty() {
            return Ok(reflexive(from));
        }
        compose_all(&self.route_edges(route))
    }

    fn ground<P>(&self, artifact_id: &str, predicate: &P, threshold: f64) -> Result<GroundingResult>
    where
        P: Fn(&Artifact) -> bool,
    {
        let Some(artifact) = self.artifacts.get(artifact_id) else {
            return Ok(GroundingResult::ungrounded(artifact_id));
        };

        if predicate(artifact) {
            return Ok(GroundingResult {
                artifact_id: artifact_id.to_string(),
                is_grounded: 0.0 < threshold,
                path: Some(reflexive(artifact_id)),
                total_loss: Some(0.0),
                axiom_id: Some(artifact_id.to_string()),
            });
        }

        let routes = self.best_routes(artifact_id);
        let best = routes
            .iter()
            .filter(|(vertex, _)| vertex.as_str() != artifact_id)
            .filter(|(vertex, _)| self.artifacts.get(*vertex).map(predicate).unwrap_or(false))
            .min_by(|a, b| a.1.loss.total_cmp(&b.1.loss).then_with(|| a.0.cmp(b.0)));

        match best {
            None => Ok(GroundingResult::ungrounded(artifact_id)),
            Some((axiom, route)) => Ok(GroundingResult {
                artifact_id: artifact_id.to_string(),
                is_grounded: route.loss < threshold,
                path: Some(self.route_path(axiom, route)?),
                total_loss: Some(route.loss),
                axiom_id: Some(axiom.clone()),
            }),
        }
    }
}

/// Directed acyclic graph of artifacts and derivation paths.
#[derive(Clone)]
pub struct DerivationGraph {
    state: Arc<RwLock<GraphState>>,
    config: GraphConfig,
}

impl DerivationGraph {
    /// Create an empty graph with default settings.
    pub fn new() -> Self {
        Self::with_config(GraphConfig::default())
    }

    /// Create an empty graph with custom settings.
    pub fn with_config(config: GraphConfig) -> Self {
        Self {
            state: Arc::new(RwLock::new(GraphState::default())),
            config,
        }
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    /// Add a vertex, merging tags into an existing one.
    pub async fn add_artifact<I, S>(&self, id: &str, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = self.state.write().await;
        let artifact = state.ensure(id);
        artifact.tags.extend(tags.into_iter().map(Into::into));
        debug!(artifact_id = %id, tags = artifact.tags.len(), "Artifact added");
    }

    /// Tag a vertex, creating it if absent.
    pub async fn tag(&self, id: &str, tag: &str) {
        self.add_artifact(id, [tag]).await;
    }

    pub async fn artifact(&self, id: &str) -> Option<Artifact> {
        self.state.read().await.artifacts.get(id).cloned()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.state.read().await.artifacts.contains_key(id)
    }

    /// Insert a path as an edge.
    ///
    /// Reflexive paths only register their vertex. Composed paths must pass
    /// the law checks. Re-inserting a known path id is a no-op.
    pub async fn insert(&self, path: DerivationPath) -> Result<()> {
        if path.is_reflexive() {
            self.state.write().await.ensure(&path.source_id);
            return Ok(());
        }
        if !check_unit(path.loss) {
            return Err(DerivationError::InvalidLoss(path.loss));
        }
        if path.source_id == path.target_id {
            error!(path_id = %path.id, artifact_id = %path.source_id, "Self-loop rejected");
            return Err(DerivationError::CycleDetected {
                source_id: path.source_id,
                target_id: path.target_id,
            });
        }
        if path.kind == PathKind::Composed {
            laws::enforce(&path)?;
        }

        let mut state = self.state.write().await;

        if state.paths.contains_key(&path.id) {
            debug!(path_id = %path.id, "Path already present");
            return Ok(());
        }

        if state.reaches(&path.target_id, &path.source_id) {
            error!(
                path_id = %path.id,
                source_id = %path.source_id,
                target_id = %path.target_id,
                "Insert would close a cycle"
            );
            return Err(DerivationError::CycleDetected {
                source_id: path.source_id,
                target_id: path.target_id,
            });
        }

        state.ensure(&path.source_id);
        state.ensure(&path.target_id);
        state
            .outgoing
            .entry(path.source_id.clone())
            .or_default()
            .push(path.id.clone());
        state
            .incoming
            .entry(path.target_id.clone())
            .or_default()
            .push(path.id.clone());

        info!(
            path_id = %path.id,
            source_id = %path.source_id,
            target_id = %path.target_id,
            loss = path.loss,
            "Derivation path inserted"
        );

        state.paths.insert(path.id.clone(), path);
        Ok(())
    }

    pub async fn get_path(&self, id: &str) -> Option<DerivationPath> {
        self.state.read().await.paths.get(id).cloned()
    }

    /// Edges leaving an artifact, in insertion order.
    pub async fn paths_from(&self, id: &str) -> Vec<DerivationPath> {
        let state = self.state.read().await;
        state
            .outgoing
            .get(id)
            .into_iter()
            .flatten()
            .filter_map(|path_id| state.paths.get(path_id).cloned())
            .collect()
    }

    /// Edges entering an artifact, in insertion order.
    pub async fn paths_to(&self, id: &str) -> Vec<DerivationPath> {
        let state = self.state.read().await;
        state
            .incoming
            .get(id)
            .into_iter()
            .flatten()
            .filter_map(|path_id| state.paths.get(path_id).cloned())
            .collect()
    }

    pub async fn vertex_count(&self) -> usize {
        self.state.read().await.artifacts.len()
    }

    pub async fn edge_count(&self) -> usize {
        self.state.read().await.paths.len()
    }

    /// Find the lowest-loss path from an artifact matching `predicate` to
    /// `artifact_id`.
    pub async fn is_grounded<P>(&self, artifact_id: &str, predicate: P) -> Result<GroundingResult>
    where
        P: Fn(&Artifact) -> bool,
    {
        let state = self.state.read().await;
        let result = state.ground(artifact_id, &predicate, self.config.max_loss_threshold)?;
        debug!(
            artifact_id = %artifact_id,
            grounded = result.is_grounded,
            loss = ?result.total_loss,
            "Grounding computed"
        );
        Ok(result)
    }

    /// Grounding against vertices carrying the configured axiom tag.
    pub async fn grounded_in_axioms(&self, artifact_id: &str) -> Result<GroundingResult> {
        let tag = self.config.axiom_tag.clone();
        self.is_grounded(artifact_id, move |a| a.has_tag(&tag)).await
    }

    /// Classify a grounding with the configured policy; no path is an orphan.
    pub fn classify(&self, result: &GroundingResult) -> Grounding {
        result
            .total_loss
            .map(|loss| self.config.policy.classify(loss))
            .unwrap_or(Grounding::Orphan)
    }

    /// Best path from each principle that reaches the artifact, ascending by
    /// loss (ties by principle id).
    pub async fn justifying_principles(&self, artifact_id: &str) -> Result<Vec<(String, DerivationPath)>> {
        let state = self.state.read().await;
        let tag = &self.config.principle_tag;

        let routes = state.best_routes(artifact_id);
        let mut found: Vec<(&String, &Route)> = routes
            .iter()
            .filter(|(vertex, _)| vertex.as_str() != artifact_id)
            .filter(|(vertex, _)| {
                state
                    .artifacts
                    .get(vertex.as_str())
                    .map(|a| a.has_tag(tag))
                    .unwrap_or(false)
            })
            .collect();
        found.sort_by(|a, b| a.1.loss.total_cmp(&b.1.loss).then_with(|| a.0.cmp(b.0)));

        found
            .into_iter()
            .map(|(principle, route)| Ok((principle.clone(), state.route_path(principle, route)?)))
            .collect()
    }

    /// The lowest-loss sequence of edges from `from` to `to`.
    pub async fn explain(&self, from: &str, to: &str) -> Result<Vec<DerivationPath>> {
        if from == to {
            return Ok(vec![reflexive(from)]);
        }

        let state = self.state.read().await;
        let routes = state.best_routes(to);
        let route = routes.get(from).ok_or_else(|| DerivationError::NoPathFound {
            from: from.to_string(),
            to: to.to_string(),
        })?;

        Ok(state.route_edges(route))
    }

    /// Artifacts whose best grounding classifies as orphan, or that have none.
    pub async fn orphans<P>(&self, predicate: P) -> Result<Vec<String>>
    where
        P: Fn(&Artifact) -> bool,
    {
        let state = self.state.read().await;
        let mut ids: Vec<&String> = state.artifacts.keys().collect();
        ids.sort();

        let mut orphans = Vec::new();
        for id in ids {
            let result = state.ground(id, &predicate, self.config.max_loss_threshold)?;
            if self.classify(&result) == Grounding::Orphan {
                orphans.push(id.clone());
            }
        }
        Ok(orphans)
    }
}

impl Default for DerivationGraph {
    fn default() -> Self {
        Self::new()
    }
}
