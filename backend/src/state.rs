//! Application state wiring.
//!
//! Builds every service once, hands the worker structs to the caller for
//! spawning, and exposes the shared state the handlers extract.

use std::sync::Arc;

use sqlx::SqlitePool;
use tokio::sync::mpsc;

use crate::config::Config;
use crate::connectors::ConnectorSet;
use crate::services::{
    BriefingService, ChannelService, ClassifierWorker, DedupService, EmbeddingProvider,
    FetchScheduler, HousekeepingService, HttpEmbeddingClient, IngestService, ItemService,
    LlmWorker, ProviderChain, RuleEngine, RuleService, StakeholderDirectory, VectorIndex,
    WorkerHandle,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub pool: SqlitePool,
    pub items: ItemService,
    pub channels: ChannelService,
    pub rules: RuleService,
    pub briefing: BriefingService,
    pub scheduler: FetchScheduler,
    pub housekeeping: Arc<HousekeepingService>,
    pub classifier_handle: Arc<WorkerHandle>,
    pub llm_handle: Arc<WorkerHandle>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub paraphrase_index: Arc<VectorIndex>,
    pub retrieval_index: Arc<VectorIndex>,
}

/// Worker structs plus their input queues, ready to be spawned.
pub struct Workers {
    pub classifier: ClassifierWorker,
    pub classifier_rx: mpsc::Receiver<i64>,
    pub llm: LlmWorker,
    pub fresh_rx: mpsc::Receiver<i64>,
}

impl AppState {
    /// Wire all services. The embedder can be substituted for tests.
    pub fn build_with_embedder(
        config: Config,
        pool: SqlitePool,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> (Self, Workers) {
        let connectors = Arc::new(ConnectorSet::new());

        let items = ItemService::new(pool.clone());
        let channels = ChannelService::new(pool.clone(), connectors.clone());
        let rules = RuleService::new(pool.clone());
        let briefing = BriefingService::new(pool.clone());
        let stakeholders = StakeholderDirectory::new(pool.clone());

        let paraphrase_index = Arc::new(VectorIndex::paraphrase(pool.clone()));
        let retrieval_index = Arc::new(VectorIndex::retrieval(pool.clone()));

        let llm_chain = Arc::new(ProviderChain::from_config(&config.llm));
        let rule_engine = Arc::new(RuleEngine::new(
            items.clone(),
            rules.clone(),
            stakeholders,
            llm_chain.clone(),
        ));

        let dedup = Arc::new(DedupService::new(
            config.dedup.clone(),
            items.clone(),
            embedder.clone(),
            paraphrase_index.clone(),
        ));

        let (classifier_tx, classifier_rx) =
            mpsc::channel(config.scheduler.classifier_queue_capacity);
        let (fresh_tx, fresh_rx) = mpsc::channel(config.llm.fresh_queue_capacity);

        let ingest = Arc::new(IngestService::new(
            items.clone(),
            dedup,
            paraphrase_index.clone(),
            classifier_tx,
        ));

        let scheduler = FetchScheduler::new(
            config.scheduler.clone(),
            channels.clone(),
            connectors,
            ingest,
            items.clone(),
        );

        let classifier_handle = Arc::new(WorkerHandle::new("classifier"));
        let classifier = ClassifierWorker::new(
            classifier_handle.clone(),
            config.classifier.clone(),
            items.clone(),
            embedder.clone(),
            retrieval_index.clone(),
            fresh_tx,
            rule_engine.clone(),
        );

        let llm_handle = Arc::new(WorkerHandle::new("llm"));
        let llm = LlmWorker::new(
            llm_handle.clone(),
            config.llm.clone(),
            config.organization.clone(),
            items.clone(),
            llm_chain,
            rule_engine,
        );

        let housekeeping = Arc::new(HousekeepingService::new(
            config.housekeeping.clone(),
            items.clone(),
            embedder.clone(),
            paraphrase_index.clone(),
            retrieval_index.clone(),
        ));

        let state = AppState {
            config,
            pool,
            items,
            channels,
            rules,
            briefing,
            scheduler,
            housekeeping,
            classifier_handle,
            llm_handle,
            embedder,
            paraphrase_index,
            retrieval_index,
        };

        let workers = Workers { classifier, classifier_rx, llm, fresh_rx };

        (state, workers)
    }

    pub fn build(config: Config, pool: SqlitePool) -> (Self, Workers) {
        let embedder: Arc<dyn EmbeddingProvider> =
            Arc::new(HttpEmbeddingClient::new(&config.embedding));
        Self::build_with_embedder(config, pool, embedder)
    }
}
