// Common test utilities and helpers

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use tokio::sync::mpsc;

use crate::config::DedupConfig;
use crate::connectors::NormalizedItem;
use crate::models::{Channel, ConnectorKind};
use crate::services::dedup::DedupService;
use crate::services::embedding_client::EmbeddingProvider;
use crate::services::embedding_index::VectorIndex;
use crate::services::ingest::IngestService;
use crate::services::item_service::ItemService;
use crate::services::llm_client::{LlmProvider, ProviderChain};
use crate::services::rules::{RuleEngine, RuleService};
use crate::services::stakeholder::StakeholderDirectory;
use crate::utils::{AppError, AppResult};

/// Vector width used by the fake embedder; small on purpose.
pub const TEST_DIM: usize = 8;

/// Create an in-memory SQLite database for testing
pub async fn create_test_db() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(3))
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create test database");

    // Run migrations
    sqlx::migrate!()
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    pool
}

/// Insert a source with one channel and return the channel.
pub async fn seed_channel(pool: &SqlitePool, kind: ConnectorKind, name: &str) -> Channel {
    let source = sqlx::query("INSERT INTO sources (name) VALUES (?)")
        .bind(name)
        .execute(pool)
        .await
        .expect("Failed to insert source");

    let channel = sqlx::query("INSERT INTO channels (source_id, kind, config) VALUES (?, ?, '{}')")
        .bind(source.last_insert_rowid())
        .bind(kind)
        .execute(pool)
        .await
        .expect("Failed to insert channel");

    sqlx::query_as("SELECT * FROM channels WHERE id = ?")
        .bind(channel.last_insert_rowid())
        .fetch_one(pool)
        .await
        .expect("Failed to fetch channel")
}

pub async fn seed_stakeholder(
    pool: &SqlitePool,
    handle: &str,
    organization: &str,
    category: &str,
) {
    sqlx::query(
        "INSERT INTO stakeholders (handle, organization, category, party) VALUES (?, ?, ?, NULL)",
    )
    .bind(handle)
    .bind(organization)
    .bind(category)
    .execute(pool)
    .await
    .expect("Failed to insert stakeholder");
}

pub fn normalized_item(external_id: &str, title: &str, content: &str) -> NormalizedItem {
    NormalizedItem {
        external_id: external_id.to_string(),
        title: title.to_string(),
        content: content.to_string(),
        url: Some(format!("https://example.org/{}", external_id)),
        ..Default::default()
    }
}

// ============================================================================
// Fake embedding provider
// ============================================================================

/// One observed call to the fake embedder, for assertions on the exact
/// text the production code hands over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbedCall {
    pub endpoint: &'static str,
    pub title: String,
    pub content: String,
}

/// Deterministic embedder. The fallback vector hashes title AND content,
/// so the same title with different content lands on a different point;
/// tests can pin vectors per title (paraphrase scenarios), flip the
/// provider to unavailable, and inspect the recorded calls.
pub struct FakeEmbedder {
    overrides: Mutex<HashMap<String, Vec<f32>>>,
    calls: Mutex<Vec<EmbedCall>>,
    unavailable: AtomicBool,
}

impl FakeEmbedder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            overrides: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            unavailable: AtomicBool::new(false),
        })
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }

    /// Pin the paraphrase/retrieval vector for one title.
    pub fn pin_vector(&self, title: &str, vector: Vec<f32>) {
        self.overrides.lock().expect("overrides lock").insert(title.to_string(), vector);
    }

    /// Every (endpoint, title, content) triple seen so far, in call order.
    pub fn calls(&self) -> Vec<EmbedCall> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn calls_for(&self, endpoint: &str) -> Vec<EmbedCall> {
        self.calls().into_iter().filter(|c| c.endpoint == endpoint).collect()
    }

    fn vector_for(&self, endpoint: &'static str, title: &str, content: &str) -> AppResult<Vec<f32>> {
        self.calls.lock().expect("calls lock").push(EmbedCall {
            endpoint,
            title: title.to_string(),
            content: content.to_string(),
        });

        if self.unavailable.load(Ordering::Relaxed) {
            return Err(AppError::embedding_unavailable("fake embedder offline"));
        }
        if let Some(vector) = self.overrides.lock().expect("overrides lock").get(title) {
            return Ok(vector.clone());
        }
        Ok(deterministic_vector(&format!("{}\u{1f}{}", title, content)))
    }
}

#[async_trait]
impl EmbeddingProvider for FakeEmbedder {
    async fn embed_retrieval(&self, title: &str, content: &str) -> AppResult<Vec<f32>> {
        self.vector_for("retrieval", title, content)
    }

    async fn embed_paraphrase(&self, title: &str, content: &str) -> AppResult<Vec<f32>> {
        self.vector_for("paraphrase", title, content)
    }
}

/// Standard basis vector for one axis; items pinned to different axes are
/// orthogonal and never paraphrase-dedupe against each other.
pub fn axis_vector(axis: usize) -> Vec<f32> {
    let mut vector = vec![0.0; TEST_DIM];
    vector[axis % TEST_DIM] = 1.0;
    vector
}

/// Standard basis vector picked by a text hash; handy to keep a handful of
/// test items pairwise orthogonal.
pub fn basis_vector(text: &str) -> Vec<f32> {
    let index = text.bytes().map(|b| b as usize).sum::<usize>() % TEST_DIM;
    axis_vector(index)
}

/// Unit vector derived from a text hash; distinct titles are very unlikely
/// to be near each other.
pub fn deterministic_vector(text: &str) -> Vec<f32> {
    let digest = Sha256::digest(text.as_bytes());
    let mut vector: Vec<f32> =
        digest.iter().take(TEST_DIM).map(|b| (*b as f32 / 255.0) * 2.0 - 1.0).collect();
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut vector {
            *value /= norm;
        }
    }
    vector
}

// ============================================================================
// Scripted LLM provider
// ============================================================================

/// Provider that returns queued responses in order; empty script or the
/// unavailable flag produce provider errors.
pub struct ScriptedLlm {
    responses: Mutex<VecDeque<String>>,
    unavailable: AtomicBool,
}

impl ScriptedLlm {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { responses: Mutex::new(VecDeque::new()), unavailable: AtomicBool::new(false) })
    }

    pub fn push_response(&self, response: impl Into<String>) {
        self.responses.lock().expect("responses lock").push_back(response.into());
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(
        &self,
        _system: &str,
        _user: &str,
        _temperature: f64,
        _max_tokens: u32,
    ) -> AppResult<String> {
        if self.unavailable.load(Ordering::Relaxed) {
            return Err(AppError::llm_provider("scripted provider offline"));
        }
        self.responses
            .lock()
            .expect("responses lock")
            .pop_front()
            .ok_or_else(|| AppError::llm_provider("script exhausted"))
    }
}

/// A canned analysis answer in the worker's expected JSON schema.
pub fn analysis_json(priority: &str, groups: &[&str]) -> String {
    serde_json::json!({
        "summary": "Kurze Zusammenfassung der Meldung.",
        "detailed_analysis": "Ausführliche Einordnung der Meldung und ihrer Folgen.",
        "priority": priority,
        "assigned_groups": groups,
        "tags": ["test"],
        "reasoning": "Begründung."
    })
    .to_string()
}

// ============================================================================
// Wired pipeline for scenario tests
// ============================================================================

pub struct TestPipeline {
    pub pool: SqlitePool,
    pub items: ItemService,
    pub rules: RuleService,
    pub ingest: IngestService,
    pub rule_engine: Arc<RuleEngine>,
    pub embedder: Arc<FakeEmbedder>,
    pub llm: Arc<ScriptedLlm>,
    pub chain: Arc<ProviderChain>,
    pub paraphrase_index: Arc<VectorIndex>,
    pub retrieval_index: Arc<VectorIndex>,
    pub classifier_rx: mpsc::Receiver<i64>,
}

/// Wire the ingestion side with fakes; workers are constructed per test.
pub async fn build_pipeline() -> TestPipeline {
    let pool = create_test_db().await;
    let items = ItemService::new(pool.clone());
    let rules = RuleService::new(pool.clone());
    let embedder = FakeEmbedder::new();
    let llm = ScriptedLlm::new();
    let chain = Arc::new(ProviderChain::new(vec![llm.clone() as Arc<dyn LlmProvider>]));

    let paraphrase_index = Arc::new(VectorIndex::paraphrase(pool.clone()));
    let retrieval_index = Arc::new(VectorIndex::retrieval(pool.clone()));

    let dedup = Arc::new(DedupService::new(
        DedupConfig::default(),
        items.clone(),
        embedder.clone() as Arc<dyn EmbeddingProvider>,
        paraphrase_index.clone(),
    ));

    let (classifier_tx, classifier_rx) = mpsc::channel(64);
    let ingest = IngestService::new(
        items.clone(),
        dedup,
        paraphrase_index.clone(),
        classifier_tx,
    );

    let rule_engine = Arc::new(RuleEngine::new(
        items.clone(),
        rules.clone(),
        StakeholderDirectory::new(pool.clone()),
        chain.clone(),
    ));

    TestPipeline {
        pool,
        items,
        rules,
        ingest,
        rule_engine,
        embedder,
        llm,
        chain,
        paraphrase_index,
        retrieval_index,
        classifier_rx,
    }
}
