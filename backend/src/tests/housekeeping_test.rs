use std::sync::Arc;

use chrono::{Duration, Utc};

use crate::config::HousekeepingConfig;
use crate::models::{ConnectorKind, EventKind, Priority};
use crate::services::embedding_client::EmbeddingProvider;
use crate::services::housekeeping::HousekeepingService;
use crate::services::ingest::IngestOutcome;
use crate::tests::common::{TestPipeline, build_pipeline, normalized_item, seed_channel};

fn service(pipeline: &TestPipeline, config: HousekeepingConfig) -> HousekeepingService {
    HousekeepingService::new(
        config,
        pipeline.items.clone(),
        pipeline.embedder.clone() as Arc<dyn EmbeddingProvider>,
        pipeline.paraphrase_index.clone(),
        pipeline.retrieval_index.clone(),
    )
}

/// Ingest one item, pin its priority and age it.
async fn seed_aged_item(
    pipeline: &TestPipeline,
    external_id: &str,
    axis: usize,
    priority: Priority,
    age_days: i64,
) -> i64 {
    let channel = seed_channel(&pipeline.pool, ConnectorKind::Feed, "Quelle").await;
    pipeline.embedder.pin_vector(external_id, crate::tests::common::axis_vector(axis));
    let outcome = pipeline
        .ingest
        .ingest(
            &channel,
            normalized_item(external_id, external_id, &format!("Inhalt zu {}.", external_id)),
        )
        .await
        .expect("ingest");
    let IngestOutcome::Inserted(item_id) = outcome else { panic!("expected insert") };

    sqlx::query("UPDATE items SET priority = ?, first_seen_at = ? WHERE id = ?")
        .bind(priority)
        .bind(Utc::now() - Duration::days(age_days))
        .bind(item_id)
        .execute(&pipeline.pool)
        .await
        .expect("age item");

    // give every item a retrieval vector too, so index coherence is
    // observable on both indexes
    pipeline
        .retrieval_index
        .add(item_id, crate::tests::common::axis_vector(axis))
        .await
        .expect("retrieval vector");

    item_id
}

async fn store_ids(pipeline: &TestPipeline) -> Vec<i64> {
    let rows: Vec<(i64,)> = sqlx::query_as("SELECT id FROM items")
        .fetch_all(&pipeline.pool)
        .await
        .expect("ids");
    rows.into_iter().map(|(id,)| id).collect()
}

#[tokio::test]
async fn test_retention_sweep_purges_expired_buckets() {
    let pipeline = build_pipeline().await;
    // retention: high 365, medium 180, low 90, none 30; all items 100 days old
    let config = HousekeepingConfig::default();

    let high_id = seed_aged_item(&pipeline, "hk-high", 0, Priority::High, 100).await;
    let medium_id = seed_aged_item(&pipeline, "hk-medium", 1, Priority::Medium, 100).await;
    let low_id = seed_aged_item(&pipeline, "hk-low", 2, Priority::Low, 100).await;
    let none_id = seed_aged_item(&pipeline, "hk-none", 3, Priority::None, 100).await;

    let stats = service(&pipeline, config).sweep().await.expect("sweep");
    assert_eq!(stats.purged, 2);
    assert_eq!(stats.failed, 0);

    // low and none are past retention, high and medium are not
    assert!(pipeline.items.get(high_id).await.is_ok());
    assert!(pipeline.items.get(medium_id).await.is_ok());
    assert!(pipeline.items.get(low_id).await.is_err());
    assert!(pipeline.items.get(none_id).await.is_err());

    // purge events survive the item rows
    for purged_id in [low_id, none_id] {
        let events = pipeline.items.events_for(purged_id).await.expect("events");
        assert!(events.iter().any(|e| e.kind == EventKind::Purged));
    }
}

#[tokio::test]
async fn test_sweep_keeps_indexes_coherent() {
    let pipeline = build_pipeline().await;

    seed_aged_item(&pipeline, "hk-a", 0, Priority::None, 100).await;
    seed_aged_item(&pipeline, "hk-b", 1, Priority::High, 100).await;
    seed_aged_item(&pipeline, "hk-c", 2, Priority::Low, 100).await;

    service(&pipeline, HousekeepingConfig::default()).sweep().await.expect("sweep");

    let remaining = store_ids(&pipeline).await;
    for index in [&pipeline.paraphrase_index, &pipeline.retrieval_index] {
        let mut index_ids = index.item_ids().await;
        index_ids.sort_unstable();
        let mut expected = remaining.clone();
        expected.sort_unstable();
        assert_eq!(index_ids, expected, "index ids must equal store ids after a sweep");
    }

    // the persisted side tables shrink with the in-memory maps
    let (blob_count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM item_embeddings_paraphrase")
            .fetch_one(&pipeline.pool)
            .await
            .expect("count");
    assert_eq!(blob_count as usize, remaining.len());
}

#[tokio::test]
async fn test_starred_items_are_exempt() {
    let pipeline = build_pipeline().await;

    let starred_id = seed_aged_item(&pipeline, "hk-star", 0, Priority::None, 400).await;
    pipeline.items.set_starred(starred_id, true).await.expect("star");

    let stats = service(&pipeline, HousekeepingConfig::default()).sweep().await.expect("sweep");
    assert_eq!(stats.purged, 0);
    assert!(pipeline.items.get(starred_id).await.is_ok());
}

#[tokio::test]
async fn test_starred_exemption_can_be_disabled() {
    let pipeline = build_pipeline().await;

    let starred_id = seed_aged_item(&pipeline, "hk-star2", 0, Priority::None, 400).await;
    pipeline.items.set_starred(starred_id, true).await.expect("star");

    let config = HousekeepingConfig { exclude_starred: false, ..Default::default() };
    let stats = service(&pipeline, config).sweep().await.expect("sweep");
    assert_eq!(stats.purged, 1);
    assert!(pipeline.items.get(starred_id).await.is_err());
}

#[tokio::test]
async fn test_auto_purge_disabled_leaves_everything() {
    let pipeline = build_pipeline().await;

    let item_id = seed_aged_item(&pipeline, "hk-keep", 0, Priority::None, 400).await;

    let config = HousekeepingConfig { enabled: false, ..Default::default() };
    let stats = service(&pipeline, config).sweep().await.expect("sweep");
    assert_eq!(stats.purged, 0);
    assert!(pipeline.items.get(item_id).await.is_ok());
}

#[tokio::test]
async fn test_reindex_fills_missing_paraphrase_vectors() {
    let pipeline = build_pipeline().await;

    // ingested while the embedding service was down: no paraphrase vector
    pipeline.embedder.set_unavailable(true);
    let item_id = seed_aged_item(&pipeline, "hk-reindex", 0, Priority::High, 1).await;
    assert!(!pipeline.paraphrase_index.contains(item_id).await);

    pipeline.embedder.set_unavailable(false);
    let stats = service(&pipeline, HousekeepingConfig::default()).sweep().await.expect("sweep");
    assert_eq!(stats.reindexed, 1);
    assert!(pipeline.paraphrase_index.contains(item_id).await);

    // the backfill call ships title and bare content, like the ingest path
    let call = pipeline
        .embedder
        .calls_for("paraphrase")
        .pop()
        .expect("re-index embed call");
    assert_eq!(call.title, "hk-reindex");
    assert_eq!(call.content, "Inhalt zu hk-reindex.");
}
