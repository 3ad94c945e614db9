mod common;

use common::*;
use controlmap::embed::EmbeddingCache;
use controlmap::graph::{ControlId, MappingMethod, RelationKind};
use controlmap::mapping::ReviewService;
use controlmap::pipeline::{CancelSignal, MappingPipeline, RunRequest};
use controlmap::repository::{ControlRepository, GraphRepository};
use controlmap::retry::RetryPolicy;
use std::sync::Arc;
use tempfile::TempDir;

fn durable_pipeline(
    repo: Arc<GraphRepository>,
    embedder: Arc<StubEmbedder>,
    verifier: Arc<StubVerifier>,
) -> MappingPipeline {
    let mut cache = EmbeddingCache::new(embedder, 4).with_retry(RetryPolicy::immediate(1));
    if let Some(storage) = repo.storage() {
        cache = cache.with_storage(storage);
    }
    MappingPipeline::new(repo, Arc::new(cache), verifier, run_config())
}

#[tokio::test]
async fn test_edges_and_embeddings_survive_restart() {
    let dir = TempDir::new().unwrap();

    {
        let repo = Arc::new(GraphRepository::open(dir.path()).unwrap());
        seed(&repo).await;
        let embedder = StubEmbedder::new();
        let verifier = StubVerifier::new();
        script_defaults(&verifier);

        let pipeline = durable_pipeline(repo.clone(), embedder.clone(), verifier);
        let summary = pipeline
            .run(RunRequest::standard("NIST"), &CancelSignal::new())
            .await
            .unwrap();
        assert_eq!(summary.edges_created, 3);
        assert_eq!(embedder.calls(), 6);
        repo.flush().await.unwrap();
    }

    let repo = Arc::new(GraphRepository::open(dir.path()).unwrap());
    let stats = repo.statistics().await.unwrap();
    assert_eq!(stats.standards, 2);
    assert_eq!(stats.controls, 6);
    assert_eq!(stats.active_edges, 3);

    let edges = repo.get_edges(&ControlId::new("AC-2")).await.unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].kind, RelationKind::Equivalent);
    assert_eq!(edges[0].confidence, 0.82);

    // Same judgments, fresh process: nothing recomputed, nothing rewritten
    let embedder = StubEmbedder::new();
    let verifier = StubVerifier::new();
    script_defaults(&verifier);
    let pipeline = durable_pipeline(repo.clone(), embedder.clone(), verifier);
    let summary = pipeline
        .run(RunRequest::standard("NIST"), &CancelSignal::new())
        .await
        .unwrap();

    assert_eq!(embedder.calls(), 0);
    assert_eq!(summary.edges_created, 0);
    assert_eq!(summary.edges_unchanged, 3);
}

#[tokio::test]
async fn test_supersession_history_is_durable() {
    let dir = TempDir::new().unwrap();

    {
        let repo = Arc::new(GraphRepository::open(dir.path()).unwrap());
        seed(&repo).await;
        let verifier = StubVerifier::new();
        script_defaults(&verifier);
        let pipeline = durable_pipeline(repo.clone(), StubEmbedder::new(), verifier.clone());
        let cancel = CancelSignal::new();

        pipeline.run(RunRequest::controls(["AC-2"]), &cancel).await.unwrap();
        verifier.answer("AC-2", "PR.AC-1", reply("broader", 0.91));
        pipeline.run(RunRequest::controls(["AC-2"]), &cancel).await.unwrap();
        repo.flush().await.unwrap();
    }

    let repo = GraphRepository::open(dir.path()).unwrap();
    let edges = repo.get_edges(&ControlId::new("AC-2")).await.unwrap();
    assert_eq!(edges.len(), 2);
    assert!(edges[0].superseded);
    assert_eq!(edges[1].kind, RelationKind::Broader);
    assert!(edges[1].is_active());
}

#[tokio::test]
async fn test_review_decisions_are_durable() {
    let dir = TempDir::new().unwrap();

    let revised_id = {
        let repo = Arc::new(GraphRepository::open(dir.path()).unwrap());
        seed(&repo).await;
        let verifier = StubVerifier::new();
        script_defaults(&verifier);
        let pipeline = durable_pipeline(repo.clone(), StubEmbedder::new(), verifier);
        pipeline
            .run(RunRequest::controls(["AC-2"]), &CancelSignal::new())
            .await
            .unwrap();

        let edge_id = repo.get_edges(&ControlId::new("AC-2")).await.unwrap()[0].id;
        let revised = ReviewService::new(repo.clone())
            .revise(edge_id, RelationKind::Narrower, "CSF control is broader in scope")
            .await
            .unwrap();
        repo.flush().await.unwrap();
        revised.id
    };

    let repo = GraphRepository::open(dir.path()).unwrap();
    let edge = repo.get_edge(revised_id).await.unwrap();
    assert_eq!(edge.kind, RelationKind::Narrower);
    assert_eq!(edge.method, MappingMethod::Human);
    assert_eq!(edge.confidence, 1.0);
    assert!(edge.previous_rationale.is_some());
    assert_eq!(repo.statistics().await.unwrap().superseded_edges, 1);
}
