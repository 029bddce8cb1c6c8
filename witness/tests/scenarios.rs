//! End-to-end scenarios across ledger, algebra, graph and crystallization.

use chrono::{Duration, Utc};
use derivation::{compose, reflexive, DerivationPath, PathKind, Witness as Evidence};
use futures::future::join_all;
use std::sync::Arc;
use synthesis::{MockSynthesizer, Synthesis};
use witness::{
    CrystalFilter, CrystalLevel, Layer, MarkDraft, MarkFilter, Witness, WitnessConfig,
    WitnessError,
};

fn in_memory() -> Witness {
    Witness::in_memory(WitnessConfig::default(), Arc::new(MockSynthesizer::default())).unwrap()
}

#[tokio::test]
async fn causal_chain_is_root_first() {
    let w = in_memory();
    let a = w.mark(MarkDraft::new("A", "root")).await.unwrap();
    let b = w.mark(MarkDraft::new("B", "follows A").with_parent(a.id.clone())).await.unwrap();
    let c = w.mark(MarkDraft::new("C", "follows B").with_parent(b.id.clone())).await.unwrap();

    let chain: Vec<String> = w
        .causal_chain(&c.id)
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.action)
        .collect();
    assert_eq!(chain, vec!["A", "B", "C"]);

    let dangling = w.mark(MarkDraft::new("D", "orphaned").with_parent("mark-nope")).await;
    assert!(matches!(dangling, Err(WitnessError::DanglingParent(_))));
    assert_eq!(w.ledger().len().await.unwrap(), 3);
}

#[test]
fn reflexive_path_is_identity() {
    let x = reflexive("X");
    assert_eq!(x.loss, 0.0);
    assert_eq!(x.kind, PathKind::Reflexive);
    assert_eq!(x.lineage, vec!["X"]);
}

#[test]
fn composed_loss_accumulates() {
    let p = DerivationPath::direct("A", "B", 0.10, vec![Evidence::principle("care")]).unwrap();
    let q = DerivationPath::direct("B", "C", 0.20, vec![Evidence::specification("4.2")]).unwrap();
    let pq = compose(&p, &q).unwrap();

    assert!((pq.loss - 0.28).abs() < 1e-9);
    assert_eq!(pq.lineage, vec!["A", "B", "C"]);
    assert_eq!(pq.kind, PathKind::Composed);
}

#[tokio::test]
async fn back_edge_is_rejected_and_graph_unchanged() {
    let w = in_memory();
    let ab = w.derive("A", "B", 0.1, vec![]).await.unwrap();

    let ba = w.derive("B", "A", 0.1, vec![]).await;
    assert!(matches!(ba, Err(WitnessError::CycleDetected(_))));

    assert_eq!(w.graph().edge_count().await, 1);
    assert_eq!(w.graph().paths_from("A").await, vec![ab]);
    assert!(w.graph().paths_from("B").await.is_empty());
}

#[tokio::test]
async fn day_crystal_averages_session_confidence() {
    let w = in_memory();
    let t0 = Utc::now() - Duration::days(1);

    let mut sessions = Vec::new();
    for (hour, confidence) in [(1, 0.9), (4, 0.8), (9, 0.7)] {
        let start = t0 + Duration::hours(hour);
        w.mark(
            MarkDraft::new(format!("work at {}", hour), "progress")
                .with_timestamp(start)
                .with_confidence(confidence),
        )
        .await
        .unwrap();
        sessions.push(w.crystallize_window(start, start + Duration::minutes(45)).await.unwrap());
    }

    let day = w.engine().crystallize_tier(CrystalLevel::Day, sessions).await.unwrap();
    assert!((day.confidence - 0.8).abs() < 1e-9);
    assert_eq!(day.source_crystal_ids.len(), 3);
    assert_eq!(day.period_start, t0 + Duration::hours(1));
    assert_eq!(day.period_end, t0 + Duration::hours(9));
}

#[tokio::test]
async fn uncommitted_sources_never_crystallize() {
    let w = in_memory();
    let mut ghost = w.mark(MarkDraft::new("real", "kept")).await.unwrap();
    ghost.id = "mark-never-appended".to_string();

    let result = w.engine().crystallize_session(vec![ghost]).await;
    assert!(matches!(result, Err(WitnessError::NotFound(_))));
    assert!(w.crystals(&CrystalFilter::new()).await.unwrap().is_empty());
    assert!(w.graph().paths_from("mark-never-appended").await.is_empty());
}

#[tokio::test]
async fn concurrent_appends_with_committed_parents() {
    let w = Arc::new(in_memory());
    let root = w.mark(MarkDraft::new("root", "start")).await.unwrap();

    let mut parents = vec![root.id.clone()];
    for round in 0..4 {
        let appends = (0..8).map(|i| {
            let w = Arc::clone(&w);
            let parent = parents[i % parents.len()].clone();
            async move {
                w.mark(MarkDraft::new(format!("r{}-{}", round, i), "fan out").with_parent(parent))
                    .await
            }
        });
        let committed: Vec<_> = join_all(appends).await.into_iter().collect::<Result<_, _>>().unwrap();
        parents = committed.into_iter().map(|m: witness::Mark| m.id).collect();
    }

    let all = w.ledger().list(&MarkFilter::new()).await.unwrap();
    assert_eq!(all.len(), 33);
    for mark in &all {
        let chain = w.causal_chain(&mark.id).await.unwrap();
        assert_eq!(chain[0].id, root.id);
        assert_eq!(chain.last().map(|m| m.id.as_str()), Some(mark.id.as_str()));
    }
}

#[tokio::test]
async fn session_period_and_empty_window() {
    let w = in_memory();
    let t0 = Utc::now() - Duration::hours(3);
    for minutes in [5, 0, 40] {
        w.mark(MarkDraft::new("step", "why").with_timestamp(t0 + Duration::minutes(minutes)))
            .await
            .unwrap();
    }

    let crystal = w.crystallize_window(t0, t0 + Duration::hours(1)).await.unwrap();
    assert_eq!(crystal.period_start, t0);
    assert_eq!(crystal.period_end, t0 + Duration::minutes(40));

    let empty = w
        .crystallize_window(t0 + Duration::hours(2), t0 + Duration::hours(2))
        .await;
    assert!(matches!(empty, Err(WitnessError::EmptySource)));
    assert_eq!(w.crystals(&CrystalFilter::new()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn grounding_through_marks() {
    let w = in_memory();
    let axiom = w
        .mark(MarkDraft::new("care for users", "founding").with_layer(Layer::Axiom))
        .await
        .unwrap();
    let value = w
        .mark(MarkDraft::new("keep data local", "privacy").with_layer(Layer::Value))
        .await
        .unwrap();
    let action = w
        .mark(
            MarkDraft::new("drop telemetry", "privacy")
                .with_principles(["privacy"])
                .with_evidence("spec_ref", "privacy.md"),
        )
        .await
        .unwrap();

    w.derive(&axiom.id, &value.id, 0.2, vec![Evidence::principle("care")]).await.unwrap();
    w.derive_from_mark(&action.id, &value.id, 0.3).await.unwrap();

    let (result, _) = w.grounding(&action.id).await.unwrap();
    assert!((result.total_loss.unwrap() - 0.44).abs() < 1e-9);
    assert!(result.is_grounded);
    assert_eq!(result.path.unwrap().lineage, vec![axiom.id.clone(), value.id.clone(), action.id.clone()]);

    let steps = w.explain(&axiom.id, &action.id).await.unwrap();
    assert_eq!(steps.len(), 2);
}

#[tokio::test]
async fn file_stores_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = WitnessConfig::default();
    config.storage.data_dir = Some(dir.path().to_path_buf());
    let synthesizer = Arc::new(
        MockSynthesizer::default().with_output(Synthesis::new("Quiet session.", "Little changed.")),
    );

    let (mark_id, crystal_id) = {
        let w = Witness::open(config.clone(), synthesizer.clone()).await.unwrap();
        let start = Utc::now();
        let mark = w.mark(MarkDraft::new("write notes", "memory")).await.unwrap();
        let crystal = w
            .crystallize_window(start, Utc::now() + Duration::seconds(1))
            .await
            .unwrap();
        (mark.id, crystal.id)
    };

    let w = Witness::open(config, synthesizer).await.unwrap();
    assert_eq!(w.ledger().get(&mark_id).await.unwrap().action, "write notes");
    assert_eq!(w.engine().get_crystal(&crystal_id).await.unwrap().insight, "Quiet session.");
    assert_eq!(w.graph().paths_to(&crystal_id).await.len(), 1);

    let next = w.mark(MarkDraft::new("more notes", "memory")).await.unwrap();
    assert!(next.timestamp > w.ledger().get(&mark_id).await.unwrap().timestamp);
}

#[test]
fn config_round_trips_through_yaml() {
    let yaml = r#"
graph:
  max_loss_threshold: 0.4
crystal:
  synthesis_timeout_ms: 5000
"#;
    let config = WitnessConfig::from_yaml(yaml).unwrap();
    assert_eq!(config.graph.max_loss_threshold, 0.4);
    assert_eq!(config.crystal.max_sources, 500);

    let w = Witness::in_memory(config, Arc::new(MockSynthesizer::default())).unwrap();
    let grounding = tokio_test::block_on(w.grounding("unknown")).unwrap();
    assert!(!grounding.0.is_grounded);
}
