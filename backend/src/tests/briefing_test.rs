use chrono::{Duration, Utc};

use crate::models::{ConnectorKind, Priority};
use crate::services::briefing::{BriefingRequest, BriefingService};
use crate::services::ingest::IngestOutcome;
use crate::tests::common::{TestPipeline, build_pipeline, normalized_item, seed_channel};

async fn seed_briefing_item(
    pipeline: &TestPipeline,
    external_id: &str,
    axis: usize,
    title: &str,
    priority: Priority,
    hours_old: i64,
    is_read: bool,
) -> i64 {
    let channel = seed_channel(&pipeline.pool, ConnectorKind::Feed, "Quelle").await;
    pipeline.embedder.pin_vector(title, crate::tests::common::axis_vector(axis));
    let outcome = pipeline
        .ingest
        .ingest(&channel, normalized_item(external_id, title, &format!("Inhalt {}.", external_id)))
        .await
        .expect("ingest");
    let IngestOutcome::Inserted(item_id) = outcome else { panic!("expected insert") };

    sqlx::query(
        "UPDATE items SET priority = ?, first_seen_at = ?, is_read = ?, summary = ? WHERE id = ?",
    )
    .bind(priority)
    .bind(Utc::now() - Duration::hours(hours_old))
    .bind(is_read)
    .bind(format!("Zusammenfassung {}.", external_id))
    .bind(item_id)
    .execute(&pipeline.pool)
    .await
    .expect("update item");

    item_id
}

#[tokio::test]
async fn test_briefing_selects_and_groups() {
    let pipeline = build_pipeline().await;
    let briefing = BriefingService::new(pipeline.pool.clone());

    seed_briefing_item(&pipeline, "b-high", 0, "Wichtige Kürzung", Priority::High, 2, false).await;
    seed_briefing_item(&pipeline, "b-med", 1, "Mittlere Meldung", Priority::Medium, 3, false).await;
    // below min priority
    seed_briefing_item(&pipeline, "b-low", 2, "Randnotiz", Priority::Low, 1, false).await;
    // too old
    seed_briefing_item(&pipeline, "b-old", 3, "Alte Meldung", Priority::High, 48, false).await;
    // read
    seed_briefing_item(&pipeline, "b-read", 4, "Gelesene Meldung", Priority::High, 1, true).await;

    let result = briefing
        .build(BriefingRequest {
            recipients: vec!["vorstand@liga-hessen.de".to_string()],
            min_priority: Priority::Medium,
            hours_back: 24,
            include_read: false,
        })
        .await
        .expect("build briefing");

    assert_eq!(result.item_count, 2);
    assert!(result.subject.starts_with("Briefing — "));
    assert!(result.text_body.contains("Wichtige Kürzung"));
    assert!(result.text_body.contains("Mittlere Meldung"));
    assert!(!result.text_body.contains("Randnotiz"));
    assert!(!result.text_body.contains("Alte Meldung"));
    assert!(!result.text_body.contains("Gelesene Meldung"));

    // high priority renders before medium
    let high_pos = result.text_body.find("Wichtige Kürzung").unwrap();
    let medium_pos = result.text_body.find("Mittlere Meldung").unwrap();
    assert!(high_pos < medium_pos);

    assert!(result.html_body.contains("<h2>Hohe Priorität</h2>"));
    assert!(result.html_body.contains("<h2>Mittlere Priorität</h2>"));
}

#[tokio::test]
async fn test_briefing_include_read_flag() {
    let pipeline = build_pipeline().await;
    let briefing = BriefingService::new(pipeline.pool.clone());

    seed_briefing_item(&pipeline, "b-r1", 0, "Gelesene Meldung", Priority::High, 1, true).await;

    let without = briefing
        .build(BriefingRequest {
            recipients: vec![],
            min_priority: Priority::None,
            hours_back: 24,
            include_read: false,
        })
        .await
        .expect("build");
    assert_eq!(without.item_count, 0);

    let with = briefing
        .build(BriefingRequest {
            recipients: vec![],
            min_priority: Priority::None,
            hours_back: 24,
            include_read: true,
        })
        .await
        .expect("build");
    assert_eq!(with.item_count, 1);
}
