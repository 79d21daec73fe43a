use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::ClassifierConfig;
use crate::models::{ConnectorKind, EventKind, Priority, RetryPriority};
use crate::services::classifier::ClassifierWorker;
use crate::services::classifier::model::{ClassifierModel, LinearHead};
use crate::services::embedding_client::EmbeddingProvider;
use crate::services::worker::WorkerHandle;
use crate::tests::common::{TestPipeline, build_pipeline, normalized_item, seed_channel};

const RELEVANT_VECTOR: [f32; 8] = [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0];
const IRRELEVANT_VECTOR: [f32; 8] = [-1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0];

fn head(weight: f32, bias: f32) -> LinearHead {
    let mut weights = vec![0.0; 8];
    weights[0] = weight;
    LinearHead { weights, bias }
}

/// Model over the fake 8-dim space: positive first component means
/// relevant, high priority and AK2.
fn test_model() -> ClassifierModel {
    ClassifierModel {
        relevance: head(4.0, 0.0),
        groups: BTreeMap::from([
            ("AK2".to_string(), head(2.0, 0.0)),
            ("AK3".to_string(), head(-2.0, 0.0)),
        ]),
        priority: BTreeMap::from([
            ("high".to_string(), head(2.0, 0.0)),
            ("none".to_string(), head(-2.0, 0.0)),
        ]),
    }
}

fn build_worker(
    pipeline: &TestPipeline,
    model: Option<ClassifierModel>,
) -> (ClassifierWorker, mpsc::Receiver<i64>) {
    let (fresh_tx, fresh_rx) = mpsc::channel(16);
    let worker = ClassifierWorker::with_model(
        Arc::new(WorkerHandle::new("classifier")),
        ClassifierConfig::default(),
        pipeline.items.clone(),
        pipeline.embedder.clone() as Arc<dyn EmbeddingProvider>,
        pipeline.retrieval_index.clone(),
        model,
        fresh_tx,
        pipeline.rule_engine.clone(),
    );
    (worker, fresh_rx)
}

async fn ingest_one(pipeline: &TestPipeline, title: &str, content: &str) -> i64 {
    let channel = seed_channel(&pipeline.pool, ConnectorKind::Feed, "Testquelle").await;
    let outcome = pipeline
        .ingest
        .ingest(&channel, normalized_item("x-1", title, content))
        .await
        .expect("ingest");
    match outcome {
        crate::services::ingest::IngestOutcome::Inserted(id) => id,
        other => panic!("expected insert, got {:?}", other),
    }
}

#[tokio::test]
async fn test_high_confidence_relevant() {
    let pipeline = build_pipeline().await;
    let title = "Landeshaushalt: Kürzungen bei Migrationsberatung angekündigt";
    pipeline.embedder.pin_vector(title, RELEVANT_VECTOR.to_vec());

    let item_id = ingest_one(&pipeline, title, "Langer Artikeltext.").await;
    let (worker, mut fresh_rx) = build_worker(&pipeline, Some(test_model()));

    worker.classify(item_id).await.expect("classify");

    let item = pipeline.items.get(item_id).await.expect("item");
    assert_eq!(item.retry_priority, Some(RetryPriority::High));
    // suggestions stay in metadata; first-class fields untouched
    assert_eq!(item.priority, Priority::None);
    assert!(item.assigned_groups.0.is_empty());
    let suggested = item.metadata.0.get("suggested_groups").expect("suggested groups");
    assert!(suggested.as_array().unwrap().iter().any(|g| g == "AK2"));

    // retained items go to the fresh queue
    assert_eq!(fresh_rx.try_recv().ok(), Some(item_id));

    let events = pipeline.items.events_for(item_id).await.expect("events");
    assert!(events.iter().any(|e| e.kind == EventKind::Classified));

    // the retrieval vector landed in the search index
    assert!(pipeline.retrieval_index.contains(item_id).await);

    // the embed call carries the bare item content next to the title
    let call = pipeline
        .embedder
        .calls_for("retrieval")
        .pop()
        .expect("retrieval embed call");
    assert_eq!(call.title, title);
    assert_eq!(call.content, "Langer Artikeltext.");
}

#[tokio::test]
async fn test_high_confidence_irrelevant_bypasses_llm() {
    let pipeline = build_pipeline().await;
    let title = "Fußball: Derby endet torlos";
    pipeline.embedder.pin_vector(title, IRRELEVANT_VECTOR.to_vec());

    let item_id = ingest_one(&pipeline, title, "Spielbericht ohne Sozialbezug.").await;
    let (worker, mut fresh_rx) = build_worker(&pipeline, Some(test_model()));

    worker.classify(item_id).await.expect("classify");

    let item = pipeline.items.get(item_id).await.expect("item");
    assert_eq!(item.retry_priority, Some(RetryPriority::Low));
    assert_eq!(item.priority, Priority::None);
    // no rule fired, so the item stays pending but is invisible to the
    // backlog query
    assert!(item.needs_llm);
    assert!(fresh_rx.try_recv().is_err());

    let backlog = pipeline.items.llm_backlog_batch(50).await.expect("backlog");
    assert!(backlog.iter().all(|i| i.id != item_id), "low items never enter the backlog");
}

#[tokio::test]
async fn test_low_item_with_matching_rule_leaves_pipeline() {
    let pipeline = build_pipeline().await;
    let title = "Vereinsmeldung mit Stichwort";
    pipeline.embedder.pin_vector(title, IRRELEVANT_VECTOR.to_vec());

    pipeline
        .rules
        .create(crate::models::CreateRuleRequest {
            name: "Stichwort".to_string(),
            kind: crate::models::RuleKind::Keyword,
            pattern: "stichwort".to_string(),
            priority_delta: 5,
            forced_priority: None,
            enabled: true,
            sort_order: 0,
        })
        .await
        .expect("create rule");

    let item_id = ingest_one(&pipeline, title, "Text mit Stichwort darin.").await;
    let (worker, _fresh_rx) = build_worker(&pipeline, Some(test_model()));

    worker.classify(item_id).await.expect("classify");

    let item = pipeline.items.get(item_id).await.expect("item");
    assert_eq!(item.retry_priority, Some(RetryPriority::Low));
    // the firing rule takes the item out of the LLM pipeline for good
    assert!(!item.needs_llm);
}

#[tokio::test]
async fn test_ambiguous_relevance_is_edge_case() {
    let pipeline = build_pipeline().await;
    let title = "Bericht mit unklarem Bezug";
    // relevance head output: sigmoid(4 * 0.1) ~ 0.6
    pipeline.embedder.pin_vector(title, vec![0.1, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);

    let item_id = ingest_one(&pipeline, title, "Unklarer Text.").await;
    let (worker, mut fresh_rx) = build_worker(&pipeline, Some(test_model()));

    worker.classify(item_id).await.expect("classify");

    let item = pipeline.items.get(item_id).await.expect("item");
    assert_eq!(item.retry_priority, Some(RetryPriority::EdgeCase));
    assert_eq!(fresh_rx.try_recv().ok(), Some(item_id));
}

#[tokio::test]
async fn test_missing_model_buckets_unknown() {
    let pipeline = build_pipeline().await;
    let item_id = ingest_one(&pipeline, "Beliebiger Titel", "Text.").await;
    let (worker, mut fresh_rx) = build_worker(&pipeline, None);

    worker.classify(item_id).await.expect("classify");

    let item = pipeline.items.get(item_id).await.expect("item");
    assert_eq!(item.retry_priority, Some(RetryPriority::Unknown));
    assert_eq!(fresh_rx.try_recv().ok(), Some(item_id));
}

#[tokio::test]
async fn test_embedder_outage_buckets_unknown() {
    let pipeline = build_pipeline().await;
    let item_id = ingest_one(&pipeline, "Beliebiger Titel", "Text.").await;
    pipeline.embedder.set_unavailable(true);
    let (worker, mut fresh_rx) = build_worker(&pipeline, Some(test_model()));

    worker.classify(item_id).await.expect("classify");

    let item = pipeline.items.get(item_id).await.expect("item");
    assert_eq!(item.retry_priority, Some(RetryPriority::Unknown));
    assert_eq!(fresh_rx.try_recv().ok(), Some(item_id));
}
