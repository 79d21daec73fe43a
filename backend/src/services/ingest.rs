//! Ingestion pipeline: normalize, dedupe, persist, enqueue.
//!
//! Runs cooperatively inside each fetch task, so a full classifier queue
//! back-pressures the fetch through the blocking `send`. The identity check
//! is backed by the store's unique constraint: a constraint violation on
//! insert is handled exactly like a prior identity hit.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::connectors::NormalizedItem;
use crate::models::{Channel, EventKind};
use crate::utils::text::{EMPTY_CONTENT_HASH, content_hash};
use crate::utils::{AppError, AppResult};

use super::dedup::DedupService;
use super::embedding_index::VectorIndex;
use super::item_service::{ItemService, NewItem};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// New canonical item, queued for classification
    Inserted(i64),
    /// Dropped: (channel, external id) already known
    DuplicateIdentity(i64),
    /// Recorded as duplicate of an exact-content twin
    DuplicateContent(i64),
    /// Recorded as duplicate of a near-identical title on the same channel
    DuplicateTitle(i64),
    /// Recorded as duplicate of a cross-source paraphrase
    DuplicateParaphrase(i64),
}

pub struct IngestService {
    items: ItemService,
    dedup: Arc<DedupService>,
    paraphrase_index: Arc<VectorIndex>,
    classifier_tx: mpsc::Sender<i64>,
}

impl IngestService {
    pub fn new(
        items: ItemService,
        dedup: Arc<DedupService>,
        paraphrase_index: Arc<VectorIndex>,
        classifier_tx: mpsc::Sender<i64>,
    ) -> Self {
        Self { items, dedup, paraphrase_index, classifier_tx }
    }

    /// Run one normalized item through the pipeline.
    pub async fn ingest(
        &self,
        channel: &Channel,
        normalized: NormalizedItem,
    ) -> AppResult<IngestOutcome> {
        // 1. Identity dedupe
        if let Some(existing) =
            self.items.find_by_identity(channel.id, &normalized.external_id).await?
        {
            self.items
                .record_event(Some(existing.id), Some(channel.id), EventKind::DuplicateByIdentity, None)
                .await?;
            return Ok(IngestOutcome::DuplicateIdentity(existing.id));
        }

        let hash = normalized
            .content_hash_override
            .clone()
            .unwrap_or_else(|| content_hash(&normalized.content));

        // 2. Content-hash dedupe; the empty sentinel never matches anything
        if hash != EMPTY_CONTENT_HASH
            && let Some(canonical) = self.items.find_canonical_by_hash(&hash).await?
        {
            let id = self
                .insert_duplicate(channel, &normalized, &hash, canonical.id, EventKind::DuplicateByContent)
                .await?;
            return Ok(IngestOutcome::DuplicateContent(id));
        }

        // 3. Title similarity within the same channel
        if let Some(twin) = self.dedup.find_title_duplicate(channel.id, &normalized.title).await? {
            let canonical = self.dedup.canonical_root(twin).await?;
            let id = self
                .insert_duplicate(channel, &normalized, &hash, canonical, EventKind::DuplicateByTitle)
                .await?;
            return Ok(IngestOutcome::DuplicateTitle(id));
        }

        // 4. Paraphrase across sources; an unavailable embedding service
        //    skips the stage, everything else still happens
        let mut paraphrase_vector = None;
        let mut paraphrase_skipped = false;
        match self
            .dedup
            .find_paraphrase_duplicate(&normalized.title, &normalized.content)
            .await
        {
            Ok((_, Some(canonical))) => {
                let id = self
                    .insert_duplicate(
                        channel,
                        &normalized,
                        &hash,
                        canonical,
                        EventKind::DuplicateByParaphrase,
                    )
                    .await?;
                return Ok(IngestOutcome::DuplicateParaphrase(id));
            }
            Ok((vector, None)) => paraphrase_vector = Some(vector),
            Err(AppError::EmbeddingUnavailable(reason)) => {
                warn!("Paraphrase dedupe skipped for channel {}: {}", channel.id, reason);
                paraphrase_skipped = true;
            }
            Err(e) => return Err(e),
        }

        // 5. Insert as canonical
        let item = self
            .items
            .insert(self.new_item(channel, &normalized, &hash, None))
            .await;
        let item = match item {
            Ok(item) => item,
            // store-conflict: a concurrent fetch won the race
            Err(AppError::Conflict(_)) => {
                let existing = self
                    .items
                    .find_by_identity(channel.id, &normalized.external_id)
                    .await?
                    .ok_or_else(|| AppError::internal("conflicting item vanished"))?;
                self.items
                    .record_event(
                        Some(existing.id),
                        Some(channel.id),
                        EventKind::DuplicateByIdentity,
                        None,
                    )
                    .await?;
                return Ok(IngestOutcome::DuplicateIdentity(existing.id));
            }
            Err(e) => return Err(e),
        };

        self.items
            .record_event(Some(item.id), Some(channel.id), EventKind::Fetched, None)
            .await?;
        if paraphrase_skipped {
            self.items
                .record_event(
                    Some(item.id),
                    Some(channel.id),
                    EventKind::DedupeParaphraseSkipped,
                    None,
                )
                .await?;
        }

        if let Some(vector) = paraphrase_vector {
            self.paraphrase_index.add(item.id, vector).await?;
        }

        // 6. Hand to the classifier; blocks when the queue is full
        if self.classifier_tx.send(item.id).await.is_err() {
            warn!("Classifier queue closed; item {} stays unclassified", item.id);
        }

        debug!("Ingested item {} from channel {}", item.id, channel.id);
        Ok(IngestOutcome::Inserted(item.id))
    }

    async fn insert_duplicate(
        &self,
        channel: &Channel,
        normalized: &NormalizedItem,
        hash: &str,
        canonical_id: i64,
        kind: EventKind,
    ) -> AppResult<i64> {
        let item = self
            .items
            .insert(self.new_item(channel, normalized, hash, Some(canonical_id)))
            .await?;
        self.items
            .record_event(Some(item.id), Some(channel.id), EventKind::Fetched, None)
            .await?;
        self.items
            .record_event(
                Some(item.id),
                Some(channel.id),
                kind,
                Some(serde_json::json!({ "canonical_id": canonical_id })),
            )
            .await?;
        Ok(item.id)
    }

    fn new_item(
        &self,
        channel: &Channel,
        normalized: &NormalizedItem,
        hash: &str,
        similar_to: Option<i64>,
    ) -> NewItem {
        NewItem {
            channel_id: channel.id,
            external_id: normalized.external_id.clone(),
            title: normalized.title.clone(),
            content: normalized.content.clone(),
            url: normalized.url.clone(),
            author: normalized.author.clone(),
            published_at: normalized.published_at,
            content_hash: hash.to_string(),
            similar_to,
            metadata: normalized.metadata.clone(),
        }
    }
}
