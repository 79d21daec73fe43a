//! Housekeeping: the retention-driven purge sweep and the paraphrase
//! re-index pass.
//!
//! The sweep runs through the scheduled executor and fires once per day at
//! the configured local hour. Deletion is per-item transactional: the item
//! row, its two embedding rows and the purge event commit together; a
//! failing item is left in place and the sweep continues.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{Duration, Local, NaiveDate, Timelike, Utc};
use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::HousekeepingConfig;
use crate::models::{Item, Priority};
use crate::utils::text::truncate_chars;
use crate::utils::{AppResult, ScheduledExecutor, ScheduledTask};

use super::dedup::PARAPHRASE_CONTENT_CHARS;
use super::embedding_client::EmbeddingProvider;
use super::embedding_index::VectorIndex;
use super::item_service::ItemService;

/// Items re-embedded per sweep when the paraphrase stage was skipped at
/// ingest time.
const REINDEX_BATCH: i64 = 100;

#[derive(Debug, Default, Clone, Copy)]
pub struct SweepStats {
    pub examined: usize,
    pub purged: usize,
    pub failed: usize,
    pub reindexed: usize,
}

pub struct HousekeepingService {
    config: HousekeepingConfig,
    pool: SqlitePool,
    items: ItemService,
    embedder: Arc<dyn EmbeddingProvider>,
    paraphrase_index: Arc<VectorIndex>,
    retrieval_index: Arc<VectorIndex>,
}

impl HousekeepingService {
    pub fn new(
        config: HousekeepingConfig,
        items: ItemService,
        embedder: Arc<dyn EmbeddingProvider>,
        paraphrase_index: Arc<VectorIndex>,
        retrieval_index: Arc<VectorIndex>,
    ) -> Self {
        let pool = items.pool().clone();
        Self { config, pool, items, embedder, paraphrase_index, retrieval_index }
    }

    fn retention_days(&self, priority: Priority) -> i64 {
        match priority {
            Priority::High => self.config.retention_days_high,
            Priority::Medium => self.config.retention_days_medium,
            Priority::Low => self.config.retention_days_low,
            Priority::None => self.config.retention_days_none,
        }
    }

    /// Run one full sweep: purge expired items, then re-index items whose
    /// paraphrase embedding is missing.
    pub async fn sweep(&self) -> AppResult<SweepStats> {
        let mut stats = SweepStats::default();

        if self.config.enabled {
            for priority in [Priority::High, Priority::Medium, Priority::Low, Priority::None] {
                let cutoff = Utc::now() - Duration::days(self.retention_days(priority));

                let mut sql = String::from(
                    "SELECT * FROM items WHERE priority = ? AND first_seen_at < ?",
                );
                if self.config.exclude_starred {
                    sql.push_str(" AND is_starred = FALSE");
                }

                let expired: Vec<Item> = sqlx::query_as(&sql)
                    .bind(priority)
                    .bind(cutoff)
                    .fetch_all(&self.pool)
                    .await?;

                for item in expired {
                    stats.examined += 1;
                    match self.items.purge(&item).await {
                        Ok(()) => {
                            // the store commit succeeded; now drop the
                            // in-memory vectors
                            let _ = self.paraphrase_index.remove(item.id).await;
                            let _ = self.retrieval_index.remove(item.id).await;
                            stats.purged += 1;
                        }
                        Err(e) => {
                            warn!("Purge of item {} failed, keeping it: {}", item.id, e);
                            stats.failed += 1;
                        }
                    }
                }
            }
        }

        stats.reindexed = self.reindex_missing().await?;

        info!(
            "Housekeeping sweep done: {} purged, {} failed, {} re-indexed",
            stats.purged, stats.failed, stats.reindexed
        );
        Ok(stats)
    }

    /// Embed canonical items that skipped the paraphrase stage at ingest
    /// time. Best effort: an unavailable embedding service ends the pass.
    async fn reindex_missing(&self) -> AppResult<usize> {
        let candidates: Vec<Item> = sqlx::query_as(
            r#"
            SELECT i.* FROM items i
            LEFT JOIN item_embeddings_paraphrase e ON e.item_id = i.id
            WHERE i.similar_to IS NULL AND e.item_id IS NULL
            ORDER BY i.first_seen_at ASC
            LIMIT ?
            "#,
        )
        .bind(REINDEX_BATCH)
        .fetch_all(&self.pool)
        .await?;

        let mut reindexed = 0;
        for item in candidates {
            let content = truncate_chars(&item.content, PARAPHRASE_CONTENT_CHARS);
            match self.embedder.embed_paraphrase(&item.title, content).await {
                Ok(vector) => {
                    self.paraphrase_index.add(item.id, vector).await?;
                    reindexed += 1;
                }
                Err(e) => {
                    warn!("Re-index pass stopped, embedding service unavailable: {}", e);
                    break;
                }
            }
        }
        Ok(reindexed)
    }
}

// ============================================================================
// Scheduled task wrapper
// ============================================================================

/// Fires the sweep once per day at the configured local hour. The executor
/// ticks well below an hour so the window is never missed.
pub struct HousekeepingTask {
    service: Arc<HousekeepingService>,
    hour: u32,
    shutdown: Arc<AtomicBool>,
    last_sweep_day: Mutex<Option<NaiveDate>>,
}

impl HousekeepingTask {
    pub fn new(service: Arc<HousekeepingService>, hour: u32) -> Self {
        Self {
            service,
            hour,
            shutdown: Arc::new(AtomicBool::new(false)),
            last_sweep_day: Mutex::new(None),
        }
    }

    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    async fn execute(&self) -> Result<(), anyhow::Error> {
        let now = Local::now();
        if now.hour() != self.hour {
            return Ok(());
        }

        let today = now.date_naive();
        let mut last = self.last_sweep_day.lock().await;
        if *last == Some(today) {
            return Ok(());
        }

        self.service.sweep().await?;
        *last = Some(today);
        Ok(())
    }
}

impl ScheduledTask for HousekeepingTask {
    fn run(&self) -> Pin<Box<dyn Future<Output = Result<(), anyhow::Error>> + Send + '_>> {
        Box::pin(async move { self.execute().await })
    }

    fn should_terminate(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

/// Create and start the housekeeping task; returns the shutdown handle.
pub fn start_housekeeping_task(
    service: Arc<HousekeepingService>,
    hour: u32,
) -> Arc<AtomicBool> {
    let task = HousekeepingTask::new(service, hour);
    let shutdown_handle = task.shutdown_handle();

    let executor =
        ScheduledExecutor::new("housekeeping", std::time::Duration::from_secs(15 * 60));

    tokio::spawn(async move {
        executor.start(task).await;
    });

    info!("Housekeeping task started (daily at {:02}:00 local)", hour);

    shutdown_handle
}
