pub mod briefing;
pub mod channel_service;
pub mod classifier;
pub mod dedup;
pub mod embedding_client;
pub mod embedding_index;
pub mod housekeeping;
pub mod ingest;
pub mod item_service;
pub mod llm_client;
pub mod llm_worker;
pub mod rules;
pub mod scheduler;
pub mod stakeholder;
pub mod worker;

pub use briefing::{Briefing, BriefingRequest, BriefingService};
pub use channel_service::ChannelService;
pub use classifier::ClassifierWorker;
pub use dedup::DedupService;
pub use embedding_client::{EmbeddingProvider, HttpEmbeddingClient, EMBEDDING_DIM};
pub use embedding_index::VectorIndex;
pub use housekeeping::{HousekeepingService, SweepStats, start_housekeeping_task};
pub use ingest::{IngestOutcome, IngestService};
pub use item_service::{ItemService, LlmUpdate, NewItem};
pub use llm_client::{LlmProvider, OpenAiCompatProvider, ProviderChain};
pub use llm_worker::{LlmAnalysis, LlmWorker};
pub use rules::{RuleEngine, RuleService};
pub use scheduler::FetchScheduler;
pub use stakeholder::StakeholderDirectory;
pub use worker::{WorkerHandle, WorkerState, MAX_CONSECUTIVE_FAILURES};
