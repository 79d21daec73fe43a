//! Classifier worker (embedding-based pre-classification).
//!
//! Single long-lived worker. Drains the bounded ingestion queue first and
//! only then polls the store for items without a classifier result. Each
//! item gets a retrieval embedding, the linear model's three outputs and a
//! retry-priority bucket; first-class priority and groups stay untouched
//! until the LLM stage. Items whose bucket is not `low` move on to the LLM
//! fresh queue, `low` items go straight to the rule engine.

pub mod model;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::ClassifierConfig;
use crate::models::{EventKind, Item, Priority, RetryPriority};
use crate::utils::AppResult;
use crate::utils::text::truncate_chars;

use super::embedding_client::EmbeddingProvider;
use super::embedding_index::VectorIndex;
use super::item_service::ItemService;
use super::rules::RuleEngine;
use super::worker::WorkerHandle;

use model::ClassifierModel;

/// Content prefix fed into the retrieval embedding (~512 tokens).
const RETRIEVAL_CONTENT_CHARS: usize = 2000;

/// Group suggestion cutoff on the per-group confidence.
const GROUP_SUGGESTION_THRESHOLD: f64 = 0.5;

pub struct ClassifierWorker {
    handle: Arc<WorkerHandle>,
    config: ClassifierConfig,
    items: ItemService,
    embedder: Arc<dyn EmbeddingProvider>,
    retrieval_index: Arc<VectorIndex>,
    model: Option<ClassifierModel>,
    fresh_tx: mpsc::Sender<i64>,
    rules: Arc<RuleEngine>,
}

impl ClassifierWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        handle: Arc<WorkerHandle>,
        config: ClassifierConfig,
        items: ItemService,
        embedder: Arc<dyn EmbeddingProvider>,
        retrieval_index: Arc<VectorIndex>,
        fresh_tx: mpsc::Sender<i64>,
        rules: Arc<RuleEngine>,
    ) -> Self {
        let model = match ClassifierModel::load(&config.model_path) {
            Ok(model) => Some(model),
            Err(e) => {
                warn!("Classifier model unavailable, items will be bucketed 'unknown': {}", e);
                None
            }
        };

        Self::with_model(handle, config, items, embedder, retrieval_index, model, fresh_tx, rules)
    }

    /// Construct with an already-loaded (or absent) model.
    #[allow(clippy::too_many_arguments)]
    pub fn with_model(
        handle: Arc<WorkerHandle>,
        config: ClassifierConfig,
        items: ItemService,
        embedder: Arc<dyn EmbeddingProvider>,
        retrieval_index: Arc<VectorIndex>,
        model: Option<ClassifierModel>,
        fresh_tx: mpsc::Sender<i64>,
        rules: Arc<RuleEngine>,
    ) -> Self {
        Self { handle, config, items, embedder, retrieval_index, model, fresh_tx, rules }
    }

    /// Worker loop. Runs until the input channel closes and stays parked
    /// while paused or stopped.
    pub async fn run(self, mut rx: mpsc::Receiver<i64>) {
        info!("Classifier worker running");

        loop {
            self.handle.wait_until_runnable().await;

            // queue first, database poll second
            let next = match rx.try_recv() {
                Ok(item_id) => Some(item_id),
                Err(mpsc::error::TryRecvError::Empty)
                | Err(mpsc::error::TryRecvError::Disconnected) => {
                    match self.items.unclassified_batch(1).await {
                        Ok(batch) => batch.first().map(|item| item.id),
                        Err(e) => {
                            self.handle.record_failure(&format!("backlog poll: {}", e));
                            None
                        }
                    }
                }
            };

            let item_id = match next {
                Some(item_id) => item_id,
                None => {
                    // idle: wait for fresh work or the next poll window
                    tokio::select! {
                        received = rx.recv() => match received {
                            Some(item_id) => item_id,
                            None => {
                                info!("Classifier input queue closed, worker exiting");
                                return;
                            }
                        },
                        _ = tokio::time::sleep(Duration::from_secs(self.config.poll_secs)) => {
                            continue;
                        }
                    }
                }
            };

            match self.classify(item_id).await {
                Ok(()) => self.handle.record_success(),
                Err(e) => self.handle.record_failure(&format!("item {}: {}", item_id, e)),
            }
        }
    }

    pub(crate) async fn classify(&self, item_id: i64) -> AppResult<()> {
        let item = self.items.get(item_id).await?;
        if item.similar_to.is_some() {
            debug!("Skipping classification of duplicate item {}", item_id);
            return Ok(());
        }

        let outcome = self.model_outcome(&item).await?;

        self.items
            .set_classifier_result(
                item_id,
                outcome.retry_priority,
                outcome.confidence,
                outcome.suggested_groups.clone(),
                outcome.suggested_priority,
            )
            .await?;
        self.items
            .record_event(
                Some(item_id),
                Some(item.channel_id),
                EventKind::Classified,
                Some(serde_json::json!({
                    "retry_priority": outcome.retry_priority.as_str(),
                    "confidence": outcome.confidence,
                })),
            )
            .await?;

        if outcome.retry_priority == RetryPriority::Low {
            // never reaches the LLM; rules may still adjust it
            self.rules.apply(item_id, true).await?;
        } else if self.fresh_tx.send(item_id).await.is_err() {
            warn!("Fresh queue closed; item {} stays in the backlog", item_id);
        }

        debug!(
            "Classified item {} as {}",
            item_id,
            outcome.retry_priority.as_str()
        );
        Ok(())
    }

    async fn model_outcome(&self, item: &Item) -> AppResult<ClassificationOutcome> {
        let Some(model) = &self.model else {
            return Ok(ClassificationOutcome::unknown());
        };

        let content = truncate_chars(&item.content, RETRIEVAL_CONTENT_CHARS);
        let embedding = match self.embedder.embed_retrieval(&item.title, content).await {
            Ok(embedding) => embedding,
            Err(e) => {
                warn!("Retrieval embedding unavailable for item {}: {}", item.id, e);
                return Ok(ClassificationOutcome::unknown());
            }
        };

        // the retrieval vector doubles as the semantic-search entry
        self.retrieval_index.add(item.id, embedding.clone()).await?;

        let output = model.predict(&embedding);
        let retry_priority = if output.relevance >= self.config.high_confidence {
            RetryPriority::High
        } else if output.relevance <= self.config.low_confidence {
            RetryPriority::Low
        } else {
            RetryPriority::EdgeCase
        };

        let suggested_groups = output
            .group_confidences
            .iter()
            .filter(|(_, confidence)| **confidence >= GROUP_SUGGESTION_THRESHOLD)
            .map(|(group, _)| group.clone())
            .collect();

        Ok(ClassificationOutcome {
            retry_priority,
            confidence: Some(output.relevance),
            suggested_groups,
            suggested_priority: Some(output.priority),
        })
    }
}

struct ClassificationOutcome {
    retry_priority: RetryPriority,
    confidence: Option<f64>,
    suggested_groups: Vec<String>,
    suggested_priority: Option<Priority>,
}

impl ClassificationOutcome {
    fn unknown() -> Self {
        Self {
            retry_priority: RetryPriority::Unknown,
            confidence: None,
            suggested_groups: Vec::new(),
            suggested_priority: None,
        }
    }
}
