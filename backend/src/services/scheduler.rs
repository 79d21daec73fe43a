//! Fetch scheduler.
//!
//! One tick per configured period: enumerate enabled channels whose
//! interval has elapsed and that are not already in flight, then dispatch
//! each fetch under its kind group's concurrency cap and deadline. Manual
//! triggers bypass the schedule but obey the same caps and the in-flight
//! guard. Items from one fetch are ingested in driver-yield order.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::config::SchedulerConfig;
use crate::connectors::ConnectorSet;
use crate::models::{Channel, EventKind, KindGroup};
use crate::utils::{AppError, AppResult};

use super::channel_service::ChannelService;
use super::ingest::IngestService;
use super::item_service::ItemService;

#[derive(Clone)]
pub struct FetchScheduler {
    inner: Arc<Inner>,
}

struct Inner {
    config: SchedulerConfig,
    channels: ChannelService,
    connectors: Arc<ConnectorSet>,
    ingest: Arc<IngestService>,
    items: ItemService,
    running: AtomicBool,
    in_flight: DashMap<i64, ()>,
    feed_slots: Arc<Semaphore>,
    html_slots: Arc<Semaphore>,
    social_slots: Arc<Semaphore>,
    document_slots: Arc<Semaphore>,
}

impl FetchScheduler {
    pub fn new(
        config: SchedulerConfig,
        channels: ChannelService,
        connectors: Arc<ConnectorSet>,
        ingest: Arc<IngestService>,
        items: ItemService,
    ) -> Self {
        let feed_slots = Arc::new(Semaphore::new(config.feed_concurrency));
        let html_slots = Arc::new(Semaphore::new(config.html_concurrency));
        let social_slots = Arc::new(Semaphore::new(config.social_concurrency));
        let document_slots = Arc::new(Semaphore::new(config.document_concurrency));

        Self {
            inner: Arc::new(Inner {
                config,
                channels,
                connectors,
                ingest,
                items,
                running: AtomicBool::new(false),
                in_flight: DashMap::new(),
                feed_slots,
                html_slots,
                social_slots,
                document_slots,
            }),
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Relaxed)
    }

    pub fn stop(&self) {
        self.inner.running.store(false, Ordering::Relaxed);
        info!("Fetch scheduler stopping");
    }

    /// Start the tick loop. A second start while running is a no-op.
    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::Relaxed) {
            return;
        }

        let inner = self.inner.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(inner.config.tick_secs));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            info!("Fetch scheduler started (tick every {}s)", inner.config.tick_secs);

            loop {
                ticker.tick().await;
                if !inner.running.load(Ordering::Relaxed) {
                    info!("Fetch scheduler stopped");
                    return;
                }
                if let Err(e) = Inner::tick(&inner).await {
                    error!("Scheduler tick failed: {}", e);
                }
            }
        });
    }

    /// Trigger one channel outside the schedule.
    pub async fn fetch_channel_now(&self, channel_id: i64) -> AppResult<()> {
        let channel = self.inner.channels.get(channel_id).await?;
        if self.inner.in_flight.contains_key(&channel.id) {
            return Err(AppError::conflict(format!(
                "Channel {} fetch already in flight",
                channel_id
            )));
        }
        Inner::dispatch(self.inner.clone(), channel);
        Ok(())
    }

    /// Trigger every enabled channel outside the schedule.
    pub async fn fetch_all_now(&self) -> AppResult<usize> {
        let channels = self.inner.channels.list_enabled().await?;
        let mut dispatched = 0;
        for channel in channels {
            if !self.inner.in_flight.contains_key(&channel.id) {
                Inner::dispatch(self.inner.clone(), channel);
                dispatched += 1;
            }
        }
        Ok(dispatched)
    }
}

impl Inner {
    fn slots(&self, group: KindGroup) -> Arc<Semaphore> {
        match group {
            KindGroup::Feed => self.feed_slots.clone(),
            KindGroup::Html => self.html_slots.clone(),
            KindGroup::Social => self.social_slots.clone(),
            KindGroup::Document => self.document_slots.clone(),
        }
    }

    fn deadline(&self, group: KindGroup) -> Duration {
        let secs = match group {
            KindGroup::Feed => self.config.feed_deadline_secs,
            KindGroup::Html => self.config.html_deadline_secs,
            KindGroup::Social => self.config.social_deadline_secs,
            KindGroup::Document => self.config.document_deadline_secs,
        };
        Duration::from_secs(secs)
    }

    async fn tick(inner: &Arc<Inner>) -> AppResult<()> {
        let due = inner.channels.due_channels(Utc::now()).await?;
        debug!("Scheduler tick: {} channels due", due.len());

        for channel in due {
            Self::dispatch(inner.clone(), channel);
        }
        Ok(())
    }

    /// Spawn one fetch task. The in-flight marker is set before the task
    /// waits for its concurrency slot so a channel is never dispatched
    /// twice.
    fn dispatch(inner: Arc<Inner>, channel: Channel) {
        if inner.in_flight.insert(channel.id, ()).is_some() {
            return;
        }

        tokio::spawn(async move {
            let group = channel.kind.group();
            let slots = inner.slots(group);
            let _permit = match slots.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    inner.in_flight.remove(&channel.id);
                    return;
                }
            };

            inner.run_fetch(&channel).await;
            inner.in_flight.remove(&channel.id);
        });
    }

    async fn run_fetch(&self, channel: &Channel) {
        let Some(connector) = self.connectors.get(channel.kind) else {
            warn!("No driver for channel {} kind {:?}", channel.id, channel.kind);
            return;
        };

        let deadline = self.deadline(channel.kind.group());
        let outcome = tokio::time::timeout(deadline, connector.fetch(channel)).await;

        let error = match outcome {
            // deadline elapsed: the fetch future is dropped, which
            // cancels the driver
            Err(_) => Some(AppError::deadline_exceeded(format!(
                "fetch exceeded {}s",
                deadline.as_secs()
            ))),
            Ok(Err(e)) => Some(e),
            Ok(Ok(items)) => {
                let count = items.len();
                for normalized in items {
                    if let Err(e) = self.ingest.ingest(channel, normalized).await {
                        warn!("Ingest failed on channel {}: {}", channel.id, e);
                    }
                }
                debug!("Fetch of channel {} ingested {} items", channel.id, count);
                None
            }
        };

        match &error {
            Some(e) => {
                warn!("Fetch of channel {} failed: {}", channel.id, e);
                let _ = self
                    .items
                    .record_event(
                        None,
                        Some(channel.id),
                        EventKind::FetchFailed,
                        Some(serde_json::json!({ "error": e.to_string() })),
                    )
                    .await;
                if let Err(db) = self.channels.record_poll(channel.id, Some(&e.to_string())).await
                {
                    error!("Failed to record poll error for channel {}: {}", channel.id, db);
                }
            }
            None => {
                if let Err(db) = self.channels.record_poll(channel.id, None).await {
                    error!("Failed to record poll for channel {}: {}", channel.id, db);
                }
            }
        }
    }
}
