use crate::models::{ConnectorKind, EventKind};
use crate::services::ingest::IngestOutcome;
use crate::tests::common::{build_pipeline, normalized_item, seed_channel};

#[tokio::test]
async fn test_identity_dedupe_is_monotonic() {
    let pipeline = build_pipeline().await;
    let channel = seed_channel(&pipeline.pool, ConnectorKind::Feed, "Sozialblog").await;

    let item = normalized_item("ext-1", "Kita-Mittel werden gekürzt", "Das Land streicht Zuschüsse.");

    let first = pipeline.ingest.ingest(&channel, item.clone()).await.expect("first ingest");
    let IngestOutcome::Inserted(item_id) = first else {
        panic!("expected insert, got {:?}", first);
    };

    // re-ingesting the exact same driver output inserts nothing
    let second = pipeline.ingest.ingest(&channel, item.clone()).await.expect("second ingest");
    assert_eq!(second, IngestOutcome::DuplicateIdentity(item_id));

    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM items")
        .fetch_one(&pipeline.pool)
        .await
        .expect("count");
    assert_eq!(count, 1);

    let events = pipeline.items.events_for(item_id).await.expect("events");
    let identity_dupes =
        events.iter().filter(|e| e.kind == EventKind::DuplicateByIdentity).count();
    assert_eq!(identity_dupes, 1, "one duplicate-by-identity event per re-ingested input");
}

#[tokio::test]
async fn test_content_hash_dedupe_across_sources() {
    let pipeline = build_pipeline().await;
    let feed = seed_channel(&pipeline.pool, ConnectorKind::Feed, "Zeitung A").await;
    let alert = seed_channel(&pipeline.pool, ConnectorKind::SearchAlert, "Alert-Dienst").await;

    let content = "Der Landeshaushalt sieht Kürzungen bei der Migrationsberatung vor.";

    let first = pipeline
        .ingest
        .ingest(&feed, normalized_item("a-1", "Kürzungen angekündigt", content))
        .await
        .expect("first ingest");
    let IngestOutcome::Inserted(canonical_id) = first else {
        panic!("expected insert, got {:?}", first);
    };

    // same article body under a different external id on another channel
    let second = pipeline
        .ingest
        .ingest(&alert, normalized_item("b-7", "Kürzungen bei Beratung", content))
        .await
        .expect("second ingest");
    let IngestOutcome::DuplicateContent(duplicate_id) = second else {
        panic!("expected content duplicate, got {:?}", second);
    };

    let duplicate = pipeline.items.get(duplicate_id).await.expect("duplicate row");
    assert_eq!(duplicate.similar_to, Some(canonical_id));
    assert!(!duplicate.needs_llm);

    // classifier and LLM never see the duplicate
    let unclassified = pipeline.items.unclassified_batch(10).await.expect("unclassified");
    assert!(unclassified.iter().all(|i| i.id != duplicate_id));
    let backlog = pipeline.items.llm_backlog_batch(10).await.expect("backlog");
    assert!(backlog.iter().all(|i| i.id != duplicate_id));
}

#[tokio::test]
async fn test_title_similarity_within_channel() {
    let pipeline = build_pipeline().await;
    let channel = seed_channel(&pipeline.pool, ConnectorKind::Feed, "Landespresse").await;

    let first = pipeline
        .ingest
        .ingest(
            &channel,
            normalized_item("t-1", "Hessen kürzt Kita-Mittel drastisch", "Erste Fassung."),
        )
        .await
        .expect("first ingest");
    let IngestOutcome::Inserted(canonical_id) = first else {
        panic!("expected insert, got {:?}", first);
    };

    let second = pipeline
        .ingest
        .ingest(
            &channel,
            normalized_item(
                "t-2",
                "Hessen kürzt Kita-Mittel drastisch — Aktualisierung",
                "Aktualisierte Fassung mit neuen Zahlen.",
            ),
        )
        .await
        .expect("second ingest");
    let IngestOutcome::DuplicateTitle(duplicate_id) = second else {
        panic!("expected title duplicate, got {:?}", second);
    };

    let duplicate = pipeline.items.get(duplicate_id).await.expect("duplicate row");
    assert_eq!(duplicate.similar_to, Some(canonical_id));
}

#[tokio::test]
async fn test_canonical_anti_chain() {
    let pipeline = build_pipeline().await;
    let channel = seed_channel(&pipeline.pool, ConnectorKind::Feed, "Landespresse").await;

    let a = pipeline
        .ingest
        .ingest(&channel, normalized_item("c-1", "Wohngeld wird reformiert", "Fassung eins."))
        .await
        .expect("ingest a");
    let IngestOutcome::Inserted(a_id) = a else { panic!("expected insert") };

    let b = pipeline
        .ingest
        .ingest(
            &channel,
            normalized_item("c-2", "Wohngeld wird reformiert — Update", "Fassung zwei."),
        )
        .await
        .expect("ingest b");
    let IngestOutcome::DuplicateTitle(b_id) = b else { panic!("expected title duplicate") };

    let c = pipeline
        .ingest
        .ingest(
            &channel,
            normalized_item("c-3", "Wohngeld wird reformiert — zweites Update", "Fassung drei."),
        )
        .await
        .expect("ingest c");
    let IngestOutcome::DuplicateTitle(c_id) = c else { panic!("expected title duplicate") };

    // every duplicate points at the canonical root, never at another
    // duplicate
    let item_a = pipeline.items.get(a_id).await.expect("a");
    let item_b = pipeline.items.get(b_id).await.expect("b");
    let item_c = pipeline.items.get(c_id).await.expect("c");
    assert_eq!(item_a.similar_to, None);
    assert_eq!(item_b.similar_to, Some(a_id));
    assert_eq!(item_c.similar_to, Some(a_id));
}

#[tokio::test]
async fn test_paraphrase_dedupe_across_sources() {
    let pipeline = build_pipeline().await;
    let feed = seed_channel(&pipeline.pool, ConnectorKind::Feed, "Zeitung A").await;
    let social = seed_channel(&pipeline.pool, ConnectorKind::ShortPost, "Kanal B").await;

    let title_a = "Sozialetat schrumpft um zehn Prozent";
    let title_b = "Zehn Prozent weniger für Soziales im Etat";
    pipeline.embedder.pin_vector(title_a, vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
    // cosine similarity to title_a: 0.9
    pipeline
        .embedder
        .pin_vector(title_b, vec![0.9, 0.43589, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);

    let first = pipeline
        .ingest
        .ingest(&feed, normalized_item("p-1", title_a, "Ausführlicher Artikeltext."))
        .await
        .expect("first ingest");
    let IngestOutcome::Inserted(canonical_id) = first else { panic!("expected insert") };
    assert!(pipeline.paraphrase_index.contains(canonical_id).await);

    // the embedder receives title and content as separate arguments; the
    // content field carries exactly the item content
    let calls = pipeline.embedder.calls_for("paraphrase");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].title, title_a);
    assert_eq!(calls[0].content, "Ausführlicher Artikeltext.");

    let second = pipeline
        .ingest
        .ingest(&social, normalized_item("p-2", title_b, "Kurzer Post zum selben Thema."))
        .await
        .expect("second ingest");
    let IngestOutcome::DuplicateParaphrase(duplicate_id) = second else {
        panic!("expected paraphrase duplicate, got {:?}", second);
    };

    let duplicate = pipeline.items.get(duplicate_id).await.expect("duplicate row");
    assert_eq!(duplicate.similar_to, Some(canonical_id));
    // duplicates are not added to the paraphrase index
    assert!(!pipeline.paraphrase_index.contains(duplicate_id).await);
}

#[tokio::test]
async fn test_paraphrase_stage_skipped_when_embedder_down() {
    let pipeline = build_pipeline().await;
    let channel = seed_channel(&pipeline.pool, ConnectorKind::Feed, "Zeitung A").await;

    pipeline.embedder.set_unavailable(true);

    let outcome = pipeline
        .ingest
        .ingest(&channel, normalized_item("s-1", "Neue Pflegestatistik", "Viele Zahlen."))
        .await
        .expect("ingest");
    let IngestOutcome::Inserted(item_id) = outcome else { panic!("expected insert") };

    let events = pipeline.items.events_for(item_id).await.expect("events");
    assert!(events.iter().any(|e| e.kind == EventKind::DedupeParaphraseSkipped));
    assert_eq!(pipeline.paraphrase_index.len().await, 0);
}

#[tokio::test]
async fn test_empty_content_never_hash_dedupes() {
    let pipeline = build_pipeline().await;
    let a = seed_channel(&pipeline.pool, ConnectorKind::Feed, "Zeitung A").await;
    let b = seed_channel(&pipeline.pool, ConnectorKind::Feed, "Zeitung B").await;

    // keep the paraphrase stage out of the way
    pipeline.embedder.pin_vector("Nur ein Titel", vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
    pipeline
        .embedder
        .pin_vector("Ein ganz anderer Titel", vec![0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);

    let first = pipeline
        .ingest
        .ingest(&a, normalized_item("e-1", "Nur ein Titel", ""))
        .await
        .expect("first ingest");
    assert!(matches!(first, IngestOutcome::Inserted(_)));

    let second = pipeline
        .ingest
        .ingest(&b, normalized_item("e-2", "Ein ganz anderer Titel", ""))
        .await
        .expect("second ingest");
    assert!(matches!(second, IngestOutcome::Inserted(_)));
}
