//! Item store access: inserts, audit events, optimistic mutations and the
//! worker queries.
//!
//! Writes to an item race between the classifier, the LLM worker, the rule
//! engine and user actions. Every mutation is a conditional update on the
//! item's revision counter; a lost race re-reads the row and retries.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::types::Json;
use tracing::warn;

use crate::models::{
    DuplicateSibling, EventKind, Item, ItemDetail, ItemEvent, Priority, RetryPriority,
};
use crate::utils::{AppError, AppResult};

/// Retries for a revision-conditional update before giving up.
const REVISION_RETRIES: u32 = 3;

/// Fields of a new item row; enrichment fields start empty.
#[derive(Debug, Clone)]
pub struct NewItem {
    pub channel_id: i64,
    pub external_id: String,
    pub title: String,
    pub content: String,
    pub url: Option<String>,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub content_hash: String,
    pub similar_to: Option<i64>,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// The enrichment produced by a successful LLM analysis.
#[derive(Debug, Clone)]
pub struct LlmUpdate {
    pub summary: String,
    pub analysis: String,
    pub priority: Priority,
    pub priority_score: i64,
    pub assigned_groups: Vec<String>,
    pub tags: Vec<String>,
    pub provider: String,
    pub raw_response: String,
}

#[derive(Clone)]
pub struct ItemService {
    pool: SqlitePool,
}

impl ItemService {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ========================================================================
    // Inserts and lookups
    // ========================================================================

    /// Insert a new item. A violation of the (channel_id, external_id)
    /// uniqueness surfaces as `Conflict` and is treated by the caller as
    /// "already exists".
    pub async fn insert(&self, new: NewItem) -> AppResult<Item> {
        let result = sqlx::query(
            r#"
            INSERT INTO items (
                channel_id, external_id, title, content, url, author,
                published_at, first_seen_at, content_hash, similar_to,
                needs_llm, priority, priority_score, metadata
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'none', 0, ?)
            "#,
        )
        .bind(new.channel_id)
        .bind(&new.external_id)
        .bind(&new.title)
        .bind(&new.content)
        .bind(&new.url)
        .bind(&new.author)
        .bind(new.published_at)
        .bind(Utc::now())
        .bind(&new.content_hash)
        .bind(new.similar_to)
        // duplicates never reach the classifier or LLM stage
        .bind(new.similar_to.is_none())
        .bind(Json(&new.metadata))
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) => self.get(done.last_insert_rowid()).await,
            Err(sqlx::Error::Database(db)) if db.message().contains("UNIQUE constraint failed") => {
                Err(AppError::conflict(format!(
                    "item ({}, {}) already exists",
                    new.channel_id, new.external_id
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get(&self, item_id: i64) -> AppResult<Item> {
        sqlx::query_as("SELECT * FROM items WHERE id = ?")
            .bind(item_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Item {} not found", item_id)))
    }

    pub async fn find_by_identity(
        &self,
        channel_id: i64,
        external_id: &str,
    ) -> AppResult<Option<Item>> {
        Ok(sqlx::query_as("SELECT * FROM items WHERE channel_id = ? AND external_id = ?")
            .bind(channel_id)
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    /// Earliest canonical item carrying this content hash, on any channel.
    pub async fn find_canonical_by_hash(&self, content_hash: &str) -> AppResult<Option<Item>> {
        Ok(sqlx::query_as(
            r#"
            SELECT * FROM items
            WHERE content_hash = ? AND similar_to IS NULL
            ORDER BY first_seen_at ASC, id ASC
            LIMIT 1
            "#,
        )
        .bind(content_hash)
        .fetch_optional(&self.pool)
        .await?)
    }

    /// Canonical items on one channel published within the window, oldest
    /// first, as title-similarity candidates.
    pub async fn title_candidates(
        &self,
        channel_id: i64,
        since: DateTime<Utc>,
    ) -> AppResult<Vec<(i64, String)>> {
        Ok(sqlx::query_as(
            r#"
            SELECT id, title FROM items
            WHERE channel_id = ?
              AND similar_to IS NULL
              AND COALESCE(published_at, first_seen_at) >= ?
            ORDER BY first_seen_at ASC, id ASC
            "#,
        )
        .bind(channel_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?)
    }

    // ========================================================================
    // Audit trail
    // ========================================================================

    pub async fn record_event(
        &self,
        item_id: Option<i64>,
        channel_id: Option<i64>,
        kind: EventKind,
        payload: Option<serde_json::Value>,
    ) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO item_events (item_id, channel_id, kind, payload, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(item_id)
        .bind(channel_id)
        .bind(kind)
        .bind(payload.map(Json))
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn events_for(&self, item_id: i64) -> AppResult<Vec<ItemEvent>> {
        Ok(sqlx::query_as(
            "SELECT * FROM item_events WHERE item_id = ? ORDER BY created_at ASC, id ASC",
        )
        .bind(item_id)
        .fetch_all(&self.pool)
        .await?)
    }

    // ========================================================================
    // Worker queries
    // ========================================================================

    /// Canonical items the classifier has not yet seen, oldest first.
    pub async fn unclassified_batch(&self, limit: i64) -> AppResult<Vec<Item>> {
        Ok(sqlx::query_as(
            r#"
            SELECT * FROM items
            WHERE retry_priority IS NULL AND similar_to IS NULL
            ORDER BY first_seen_at ASC, id ASC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?)
    }

    /// Backlog for the LLM worker: pending items whose retry bucket is not
    /// `low`, ordered high -> unknown -> edge_case, then oldest first.
    pub async fn llm_backlog_batch(&self, limit: i64) -> AppResult<Vec<Item>> {
        Ok(sqlx::query_as(
            r#"
            SELECT * FROM items
            WHERE needs_llm = TRUE
              AND retry_priority IS NOT NULL
              AND retry_priority != 'low'
              AND similar_to IS NULL
            ORDER BY
                CASE retry_priority
                    WHEN 'high' THEN 0
                    WHEN 'unknown' THEN 1
                    WHEN 'edge_case' THEN 2
                    ELSE 3
                END,
                first_seen_at ASC,
                id ASC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?)
    }

    // ========================================================================
    // Optimistic mutations
    // ========================================================================

    /// Store the classifier outcome: the retry bucket column plus the
    /// suggestions in the metadata map. First-class priority and groups stay
    /// untouched until the LLM stage.
    pub async fn set_classifier_result(
        &self,
        item_id: i64,
        retry_priority: RetryPriority,
        confidence: Option<f64>,
        suggested_groups: Vec<String>,
        suggested_priority: Option<Priority>,
    ) -> AppResult<Item> {
        self.mutate(item_id, |item| {
            let mut metadata = item.metadata.0.clone();
            if let Some(confidence) = confidence {
                metadata
                    .insert("classifier_confidence".to_string(), serde_json::json!(confidence));
            }
            metadata.insert(
                "suggested_groups".to_string(),
                serde_json::json!(suggested_groups.clone()),
            );
            if let Some(priority) = suggested_priority {
                metadata.insert(
                    "suggested_priority".to_string(),
                    serde_json::json!(priority.as_str()),
                );
            }
            metadata.insert(
                "retry_priority".to_string(),
                serde_json::json!(retry_priority.as_str()),
            );

            ItemMutation {
                retry_priority: Some(Some(retry_priority)),
                metadata: Some(metadata),
                ..Default::default()
            }
        })
        .await
    }

    pub async fn apply_llm_update(&self, item_id: i64, update: LlmUpdate) -> AppResult<Item> {
        self.mutate(item_id, |item| {
            let mut metadata = item.metadata.0.clone();
            metadata.insert("llm_provider".to_string(), serde_json::json!(update.provider));
            metadata.insert("llm_raw".to_string(), serde_json::json!(update.raw_response));

            let mut tags = item.tags.0.clone();
            for tag in &update.tags {
                if !tags.contains(tag) {
                    tags.push(tag.clone());
                }
            }

            ItemMutation {
                summary: Some(Some(update.summary.clone())),
                analysis: Some(Some(update.analysis.clone())),
                priority: Some(update.priority),
                priority_score: Some(update.priority_score),
                assigned_groups: Some(update.assigned_groups.clone()),
                tags: Some(tags),
                needs_llm: Some(false),
                metadata: Some(metadata),
                ..Default::default()
            }
        })
        .await
    }

    /// Apply the rule engine outcome in one mutation.
    pub async fn apply_rule_adjustment(
        &self,
        item_id: i64,
        priority: Priority,
        priority_score: i64,
        rule_tags: Vec<String>,
        clear_needs_llm: bool,
    ) -> AppResult<Item> {
        self.mutate(item_id, |item| {
            let mut tags = item.tags.0.clone();
            for tag in &rule_tags {
                if !tags.contains(tag) {
                    tags.push(tag.clone());
                }
            }
            ItemMutation {
                priority: Some(priority),
                priority_score: Some(priority_score),
                tags: Some(tags),
                needs_llm: if clear_needs_llm { Some(false) } else { None },
                ..Default::default()
            }
        })
        .await
    }

    pub async fn set_read(&self, item_id: i64, is_read: bool) -> AppResult<Item> {
        let item = self
            .mutate(item_id, |_| ItemMutation { is_read: Some(is_read), ..Default::default() })
            .await?;
        if is_read {
            self.record_event(Some(item_id), None, EventKind::MarkedRead, None).await?;
        }
        Ok(item)
    }

    pub async fn set_starred(&self, item_id: i64, is_starred: bool) -> AppResult<Item> {
        let item = self
            .mutate(item_id, |_| ItemMutation {
                is_starred: Some(is_starred),
                ..Default::default()
            })
            .await?;
        if is_starred {
            self.record_event(Some(item_id), None, EventKind::Starred, None).await?;
        }
        Ok(item)
    }

    pub async fn set_archived(&self, item_id: i64, is_archived: bool) -> AppResult<Item> {
        let item = self
            .mutate(item_id, |_| ItemMutation {
                is_archived: Some(is_archived),
                ..Default::default()
            })
            .await?;
        if is_archived {
            self.record_event(Some(item_id), None, EventKind::Archived, None).await?;
        }
        Ok(item)
    }

    // ========================================================================
    // Listing and exchange records
    // ========================================================================

    pub async fn list(
        &self,
        priority: Option<Priority>,
        unread_only: bool,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<Item>> {
        let mut sql = String::from("SELECT * FROM items WHERE is_archived = FALSE");
        if priority.is_some() {
            sql.push_str(" AND priority = ?");
        }
        if unread_only {
            sql.push_str(" AND is_read = FALSE");
        }
        sql.push_str(" ORDER BY first_seen_at DESC, id DESC LIMIT ? OFFSET ?");

        let mut query = sqlx::query_as(&sql);
        if let Some(priority) = priority {
            query = query.bind(priority);
        }
        query = query.bind(limit).bind(offset);

        Ok(query.fetch_all(&self.pool).await?)
    }

    /// Load items by id, preserving the given order; unknown ids are
    /// skipped. Used by the semantic search to keep the ranking.
    pub async fn by_ids(&self, item_ids: &[i64]) -> AppResult<Vec<Item>> {
        let mut items = Vec::with_capacity(item_ids.len());
        for item_id in item_ids {
            if let Some(item) = sqlx::query_as("SELECT * FROM items WHERE id = ?")
                .bind(item_id)
                .fetch_optional(&self.pool)
                .await?
            {
                items.push(item);
            }
        }
        Ok(items)
    }

    /// Full exchange record: item plus source name, channel kind and its
    /// duplicate siblings.
    pub async fn detail(&self, item_id: i64) -> AppResult<ItemDetail> {
        let item = self.get(item_id).await?;

        let (source_name, channel_kind): (String, String) = sqlx::query_as(
            r#"
            SELECT s.name, c.kind
            FROM channels c JOIN sources s ON s.id = c.source_id
            WHERE c.id = ?
            "#,
        )
        .bind(item.channel_id)
        .fetch_one(&self.pool)
        .await?;

        let duplicates: Vec<DuplicateSibling> = sqlx::query_as(
            r#"
            SELECT i.id, i.title, i.url, i.priority, s.name AS source_name
            FROM items i
            JOIN channels c ON c.id = i.channel_id
            JOIN sources s ON s.id = c.source_id
            WHERE i.similar_to = ?
            ORDER BY i.first_seen_at ASC
            "#,
        )
        .bind(item_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(ItemDetail { item, source_name, channel_kind, duplicates })
    }

    /// Item context for the LLM prompt: the item plus its source name.
    pub async fn with_source_name(&self, item_id: i64) -> AppResult<(Item, String)> {
        let item = self.get(item_id).await?;
        let (source_name,): (String,) = sqlx::query_as(
            r#"
            SELECT s.name
            FROM channels c JOIN sources s ON s.id = c.source_id
            WHERE c.id = ?
            "#,
        )
        .bind(item.channel_id)
        .fetch_one(&self.pool)
        .await?;
        Ok((item, source_name))
    }

    /// Delete one expired item together with its embedding rows and write
    /// the purge event, all in one transaction.
    pub async fn purge(&self, item: &Item) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;

        {
            let conn = tx.as_mut();
            sqlx::query("DELETE FROM item_embeddings_paraphrase WHERE item_id = ?")
                .bind(item.id)
                .execute(conn)
                .await?;
        }
        {
            let conn = tx.as_mut();
            sqlx::query("DELETE FROM item_embeddings_retrieval WHERE item_id = ?")
                .bind(item.id)
                .execute(conn)
                .await?;
        }
        {
            let conn = tx.as_mut();
            sqlx::query("DELETE FROM items WHERE id = ?").bind(item.id).execute(conn).await?;
        }
        {
            let conn = tx.as_mut();
            let payload = serde_json::json!({
                "priority": item.priority.as_str(),
                "first_seen_at": item.first_seen_at,
            });
            sqlx::query(
                "INSERT INTO item_events (item_id, channel_id, kind, payload, created_at) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(item.id)
            .bind(item.channel_id)
            .bind(EventKind::Purged)
            .bind(Json(payload))
            .bind(Utc::now())
            .execute(conn)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    // ========================================================================
    // Revision-conditional update plumbing
    // ========================================================================

    async fn mutate<F>(&self, item_id: i64, build: F) -> AppResult<Item>
    where
        F: Fn(&Item) -> ItemMutation,
    {
        for attempt in 0..REVISION_RETRIES {
            let item = self.get(item_id).await?;
            let mutation = build(&item);

            let affected = self.execute_mutation(&item, &mutation).await?;
            if affected == 1 {
                return self.get(item_id).await;
            }

            warn!(
                "Revision conflict updating item {} (attempt {}/{})",
                item_id,
                attempt + 1,
                REVISION_RETRIES
            );
        }

        Err(AppError::conflict(format!(
            "item {} kept changing under {} update attempts",
            item_id, REVISION_RETRIES
        )))
    }

    async fn execute_mutation(&self, item: &Item, mutation: &ItemMutation) -> AppResult<u64> {
        let mut sets: Vec<&str> = Vec::new();
        if mutation.summary.is_some() {
            sets.push("summary = ?");
        }
        if mutation.analysis.is_some() {
            sets.push("analysis = ?");
        }
        if mutation.priority.is_some() {
            sets.push("priority = ?");
        }
        if mutation.priority_score.is_some() {
            sets.push("priority_score = ?");
        }
        if mutation.assigned_groups.is_some() {
            sets.push("assigned_groups = ?");
        }
        if mutation.tags.is_some() {
            sets.push("tags = ?");
        }
        if mutation.is_read.is_some() {
            sets.push("is_read = ?");
        }
        if mutation.is_starred.is_some() {
            sets.push("is_starred = ?");
        }
        if mutation.is_archived.is_some() {
            sets.push("is_archived = ?");
        }
        if mutation.needs_llm.is_some() {
            sets.push("needs_llm = ?");
        }
        if mutation.retry_priority.is_some() {
            sets.push("retry_priority = ?");
        }
        if mutation.metadata.is_some() {
            sets.push("metadata = ?");
        }

        if sets.is_empty() {
            return Ok(1);
        }
        sets.push("revision = revision + 1");

        let sql = format!(
            "UPDATE items SET {} WHERE id = ? AND revision = ?",
            sets.join(", ")
        );
        let mut query = sqlx::query(&sql);

        if let Some(value) = &mutation.summary {
            query = query.bind(value.clone());
        }
        if let Some(value) = &mutation.analysis {
            query = query.bind(value.clone());
        }
        if let Some(value) = mutation.priority {
            query = query.bind(value);
        }
        if let Some(value) = mutation.priority_score {
            query = query.bind(value);
        }
        if let Some(value) = &mutation.assigned_groups {
            query = query.bind(Json(value.clone()));
        }
        if let Some(value) = &mutation.tags {
            query = query.bind(Json(value.clone()));
        }
        if let Some(value) = mutation.is_read {
            query = query.bind(value);
        }
        if let Some(value) = mutation.is_starred {
            query = query.bind(value);
        }
        if let Some(value) = mutation.is_archived {
            query = query.bind(value);
        }
        if let Some(value) = mutation.needs_llm {
            query = query.bind(value);
        }
        if let Some(value) = mutation.retry_priority {
            query = query.bind(value);
        }
        if let Some(value) = &mutation.metadata {
            query = query.bind(Json(value.clone()));
        }

        query = query.bind(item.id).bind(item.revision);
        Ok(query.execute(&self.pool).await?.rows_affected())
    }
}

/// Field-wise patch: `None` leaves the column alone, `Some(v)` writes it.
#[derive(Default)]
struct ItemMutation {
    summary: Option<Option<String>>,
    analysis: Option<Option<String>>,
    priority: Option<Priority>,
    priority_score: Option<i64>,
    assigned_groups: Option<Vec<String>>,
    tags: Option<Vec<String>>,
    is_read: Option<bool>,
    is_starred: Option<bool>,
    is_archived: Option<bool>,
    needs_llm: Option<bool>,
    retry_priority: Option<Option<RetryPriority>>,
    metadata: Option<HashMap<String, serde_json::Value>>,
}
