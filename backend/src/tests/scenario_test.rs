//! End-to-end flow: ingest -> classify -> LLM analysis -> rules, driven
//! stage by stage against one item.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::{ClassifierConfig, LlmConfig, OrganizationConfig};
use crate::models::{ConnectorKind, EventKind, Priority, RetryPriority};
use crate::services::classifier::ClassifierWorker;
use crate::services::classifier::model::{ClassifierModel, LinearHead};
use crate::services::embedding_client::EmbeddingProvider;
use crate::services::ingest::IngestOutcome;
use crate::services::llm_worker::LlmWorker;
use crate::services::worker::WorkerHandle;
use crate::tests::common::{analysis_json, build_pipeline, normalized_item, seed_channel};

fn head(weight: f32, bias: f32) -> LinearHead {
    let mut weights = vec![0.0; 8];
    weights[0] = weight;
    LinearHead { weights, bias }
}

fn model() -> ClassifierModel {
    ClassifierModel {
        relevance: head(4.0, 0.0),
        groups: BTreeMap::from([("AK2".to_string(), head(2.0, 0.0))]),
        priority: BTreeMap::from([
            ("high".to_string(), head(2.0, 0.0)),
            ("none".to_string(), head(-2.0, 0.0)),
        ]),
    }
}

#[tokio::test]
async fn test_fresh_relevant_item_reaches_high() {
    let pipeline = build_pipeline().await;
    let channel = seed_channel(&pipeline.pool, ConnectorKind::Feed, "Landespresse").await;

    let title = "Landeshaushalt: Kürzungen bei Migrationsberatung angekündigt";
    pipeline
        .embedder
        .pin_vector(title, vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);

    // ~3 kB of article text
    let content = "Die Landesregierung hat Kürzungen bei der Migrationsberatung angekündigt. "
        .repeat(40);

    // stage 1: ingestion
    let outcome = pipeline
        .ingest
        .ingest(&channel, normalized_item("e1-1", title, &content))
        .await
        .expect("ingest");
    let IngestOutcome::Inserted(item_id) = outcome else { panic!("expected insert") };

    // the paraphrase embed got the first 2000 chars of the content,
    // without the title folded in
    let paraphrase_call = pipeline
        .embedder
        .calls_for("paraphrase")
        .pop()
        .expect("paraphrase embed call");
    assert_eq!(paraphrase_call.title, title);
    assert_eq!(paraphrase_call.content.chars().count(), 2000);
    assert!(content.starts_with(&paraphrase_call.content));

    // stage 2: classification
    let (fresh_tx, mut fresh_rx) = mpsc::channel(16);
    let classifier = ClassifierWorker::with_model(
        Arc::new(WorkerHandle::new("classifier")),
        ClassifierConfig::default(),
        pipeline.items.clone(),
        pipeline.embedder.clone() as Arc<dyn EmbeddingProvider>,
        pipeline.retrieval_index.clone(),
        Some(model()),
        fresh_tx,
        pipeline.rule_engine.clone(),
    );
    classifier.classify(item_id).await.expect("classify");

    let item = pipeline.items.get(item_id).await.expect("item");
    assert_eq!(item.retry_priority, Some(RetryPriority::High));
    assert_eq!(fresh_rx.try_recv().ok(), Some(item_id), "retained item reaches the fresh queue");

    // stage 3: LLM analysis
    pipeline.llm.push_response(analysis_json("high", &["AK2"]));
    let llm_worker = LlmWorker::new(
        Arc::new(WorkerHandle::new("llm")),
        LlmConfig::default(),
        OrganizationConfig::default(),
        pipeline.items.clone(),
        pipeline.chain.clone(),
        pipeline.rule_engine.clone(),
    );
    let done = llm_worker.analyze(item_id).await.expect("analyze");
    assert!(done);

    // end state
    let item = pipeline.items.get(item_id).await.expect("item");
    assert_eq!(item.priority, Priority::High);
    assert!(item.assigned_groups.0.contains(&"AK2".to_string()));
    assert!(!item.needs_llm);

    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM items")
        .fetch_one(&pipeline.pool)
        .await
        .expect("count");
    assert_eq!(count, 1);

    // audit events in pipeline order
    let events = pipeline.items.events_for(item_id).await.expect("events");
    let positions: Vec<usize> = [EventKind::Fetched, EventKind::Classified, EventKind::LlmAnalyzed]
        .iter()
        .map(|kind| {
            events
                .iter()
                .position(|e| e.kind == *kind)
                .unwrap_or_else(|| panic!("missing event {:?}", kind))
        })
        .collect();
    assert!(positions[0] < positions[1], "fetched before classified");
    assert!(positions[1] < positions[2], "classified before llm-analyzed");
}
