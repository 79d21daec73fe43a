use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub organization: OrganizationConfig,
    pub scheduler: SchedulerConfig,
    pub dedup: DedupConfig,
    pub classifier: ClassifierConfig,
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub housekeeping: HousekeepingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

/// Organization context injected into LLM prompts and group validation.
/// `working_groups` is the closed vocabulary of group tags.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrganizationConfig {
    pub name: String,
    pub working_groups: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Wall-clock tick period in seconds (default: 60)
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub tick_secs: u64,
    /// Whether the scheduler starts at service startup (default: true)
    pub enabled: bool,
    /// Per-connector-kind concurrency caps
    pub feed_concurrency: usize,
    pub html_concurrency: usize,
    pub social_concurrency: usize,
    pub document_concurrency: usize,
    /// Per-connector-kind fetch deadlines in seconds
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub feed_deadline_secs: u64,
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub html_deadline_secs: u64,
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub social_deadline_secs: u64,
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub document_deadline_secs: u64,
    /// Bounded capacity of the classifier input queue
    pub classifier_queue_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Normalized Levenshtein similarity at or above which two titles on
    /// the same channel count as duplicates
    pub title_similarity_threshold: f64,
    /// Only candidates published within this many days are compared
    pub title_window_days: i64,
    /// Case-folded title prefix length for the candidate pre-filter
    pub title_prefix_chars: usize,
    /// Cosine similarity at or above which a paraphrase neighbor counts
    /// as a duplicate
    pub paraphrase_threshold: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Path to the linear model weights file
    pub model_path: String,
    /// Relevance confidence at or above which an item is high-confidence
    pub high_confidence: f64,
    /// Relevance confidence below which an irrelevant item is
    /// high-confidence irrelevant
    pub low_confidence: f64,
    /// Database poll interval when the input queue is empty
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub poll_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// OpenAI-compatible primary endpoint (reference: local model server)
    pub primary_base_url: String,
    pub primary_model: String,
    pub primary_api_key: Option<String>,
    /// Optional hosted fallback
    pub fallback_base_url: Option<String>,
    pub fallback_model: Option<String>,
    pub fallback_api_key: Option<String>,
    pub temperature: f64,
    pub max_tokens: u32,
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub request_timeout_secs: u64,
    /// Pause after an unreachable provider before retrying
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub cooldown_secs: u64,
    /// Backlog query batch size
    pub backlog_batch_size: i64,
    /// Bounded capacity of the fresh queue
    pub fresh_queue_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Embedding service base URL exposing the retrieval and paraphrase
    /// endpoints
    pub base_url: String,
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HousekeepingConfig {
    /// Whether the retention sweep runs at all (default: true)
    pub enabled: bool,
    /// Starred items are never purged when set (default: true)
    pub exclude_starred: bool,
    /// Local hour of day the sweep runs (default: 3)
    pub hour: u32,
    /// Retention days per priority bucket
    #[serde(deserialize_with = "deserialize_days_i64")]
    pub retention_days_high: i64,
    #[serde(deserialize_with = "deserialize_days_i64")]
    pub retention_days_medium: i64,
    #[serde(deserialize_with = "deserialize_days_i64")]
    pub retention_days_low: i64,
    #[serde(deserialize_with = "deserialize_days_i64")]
    pub retention_days_none: i64,
}

impl Config {
    /// Load configuration with environment variable override support
    ///
    /// Loading order:
    /// 1. Load from config.toml file
    /// 2. Override with environment variables (prefixed with APP_)
    /// 3. Validate the final configuration
    pub fn load() -> Result<Self, anyhow::Error> {
        // 1. Load from config file
        let mut config = if let Some(config_path) = Self::find_config_file() {
            Self::from_toml(&config_path)?
        } else {
            tracing::warn!("Configuration file not found, using defaults");
            Config::default()
        };

        // 2. Override with environment variables
        config.apply_env_overrides();

        // 3. Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - APP_SERVER_HOST: Server host (default: 0.0.0.0)
    /// - APP_SERVER_PORT: Server port (default: 8080)
    /// - APP_DATABASE_URL: Database URL (default: sqlite://data/news-monitor.db)
    /// - APP_LOG_LEVEL: Logging level (e.g., "info,news_monitor=debug")
    /// - APP_SCHEDULER_TICK_SECS: Scheduler tick period (accepts "60s", "2m")
    /// - APP_SCHEDULER_ENABLED: Enable/disable the fetch scheduler (true/false)
    /// - APP_LLM_PRIMARY_BASE_URL: Primary LLM endpoint
    /// - APP_LLM_PRIMARY_API_KEY: Primary LLM API key
    /// - APP_EMBEDDING_BASE_URL: Embedding service endpoint
    /// - APP_HOUSEKEEPING_ENABLED: Enable/disable the retention sweep (true/false)
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("APP_SERVER_HOST") {
            self.server.host = host;
            tracing::info!("Override server.host from env: {}", self.server.host);
        }

        if let Ok(port) = std::env::var("APP_SERVER_PORT")
            && let Ok(port) = port.parse()
        {
            self.server.port = port;
            tracing::info!("Override server.port from env: {}", self.server.port);
        }

        if let Ok(db_url) = std::env::var("APP_DATABASE_URL") {
            self.database.url = db_url;
            tracing::info!("Override database.url from env");
        }

        if let Ok(level) = std::env::var("APP_LOG_LEVEL") {
            self.logging.level = level;
            tracing::info!("Override logging.level from env: {}", self.logging.level);
        }

        if let Ok(tick) = std::env::var("APP_SCHEDULER_TICK_SECS") {
            match parse_duration_to_secs(&tick) {
                Ok(val) => {
                    self.scheduler.tick_secs = val;
                    tracing::info!(
                        "Override scheduler.tick_secs from env: {}",
                        self.scheduler.tick_secs
                    );
                },
                Err(e) => tracing::warn!(
                    "Invalid APP_SCHEDULER_TICK_SECS '{}': {} (keep {})",
                    tick,
                    e,
                    self.scheduler.tick_secs
                ),
            }
        }

        if let Ok(enabled) = std::env::var("APP_SCHEDULER_ENABLED")
            && let Ok(val) = enabled.parse()
        {
            self.scheduler.enabled = val;
            tracing::info!("Override scheduler.enabled from env: {}", self.scheduler.enabled);
        }

        if let Ok(url) = std::env::var("APP_LLM_PRIMARY_BASE_URL") {
            self.llm.primary_base_url = url;
            tracing::info!("Override llm.primary_base_url from env");
        }

        if let Ok(key) = std::env::var("APP_LLM_PRIMARY_API_KEY") {
            self.llm.primary_api_key = Some(key);
            tracing::info!("Override llm.primary_api_key from env");
        }

        if let Ok(url) = std::env::var("APP_EMBEDDING_BASE_URL") {
            self.embedding.base_url = url;
            tracing::info!("Override embedding.base_url from env");
        }

        if let Ok(enabled) = std::env::var("APP_HOUSEKEEPING_ENABLED")
            && let Ok(val) = enabled.parse()
        {
            self.housekeeping.enabled = val;
            tracing::info!(
                "Override housekeeping.enabled from env: {}",
                self.housekeeping.enabled
            );
        }
    }

    /// Validate configuration
    fn validate(&self) -> Result<(), anyhow::Error> {
        if self.server.port == 0 {
            anyhow::bail!("Server port cannot be 0");
        }

        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.scheduler.tick_secs == 0 {
            anyhow::bail!("scheduler.tick_secs must be > 0");
        }

        if self.scheduler.classifier_queue_capacity == 0 {
            anyhow::bail!("scheduler.classifier_queue_capacity must be > 0");
        }

        if !(0.0..=1.0).contains(&self.dedup.title_similarity_threshold) {
            anyhow::bail!("dedup.title_similarity_threshold must be within [0, 1]");
        }

        if !(0.0..=1.0).contains(&self.dedup.paraphrase_threshold) {
            anyhow::bail!("dedup.paraphrase_threshold must be within [0, 1]");
        }

        if self.housekeeping.hour > 23 {
            anyhow::bail!("housekeeping.hour must be within 0..=23");
        }

        for days in [
            self.housekeeping.retention_days_high,
            self.housekeeping.retention_days_medium,
            self.housekeeping.retention_days_low,
            self.housekeeping.retention_days_none,
        ] {
            if days <= 0 {
                anyhow::bail!("housekeeping retention days must be > 0");
            }
        }

        if self.organization.working_groups.is_empty() {
            anyhow::bail!("organization.working_groups cannot be empty");
        }

        Ok(())
    }

    fn find_config_file() -> Option<String> {
        let possible_paths =
            ["conf/config.toml", "config.toml", "./conf/config.toml", "./config.toml"];

        for path in &possible_paths {
            if Path::new(path).exists() {
                return Some(path.to_string());
            }
        }
        None
    }

    fn from_toml(path: &str) -> Result<Self, anyhow::Error> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "0.0.0.0".to_string(), port: 8080 }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { url: "sqlite://data/news-monitor.db".to_string() }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info,news_monitor=debug".to_string(),
            file: Some("logs/news-monitor.log".to_string()),
        }
    }
}

impl Default for OrganizationConfig {
    fn default() -> Self {
        let working_groups = BTreeMap::from([
            ("AK1".to_string(), "Existenzsicherung und Teilhabe".to_string()),
            ("AK2".to_string(), "Migration und Flucht".to_string()),
            ("AK3".to_string(), "Kinder, Jugend und Familie".to_string()),
            ("AK4".to_string(), "Pflege, Alter und Gesundheit".to_string()),
            ("AK5".to_string(), "Behinderung und Inklusion".to_string()),
            ("QAG".to_string(), "Querschnitts-AG Finanzierung und Recht".to_string()),
        ]);
        Self {
            name: "Liga der Freien Wohlfahrtspflege in Hessen".to_string(),
            working_groups,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_secs: 60,
            enabled: true,
            feed_concurrency: 8,
            html_concurrency: 4,
            social_concurrency: 2,
            document_concurrency: 2,
            feed_deadline_secs: 60,
            html_deadline_secs: 60,
            social_deadline_secs: 300,
            document_deadline_secs: 120,
            classifier_queue_capacity: 10_000,
        }
    }
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            title_similarity_threshold: 0.85,
            title_window_days: 7,
            title_prefix_chars: 50,
            paraphrase_threshold: 0.75,
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            model_path: "conf/classifier-weights.json".to_string(),
            high_confidence: 0.8,
            low_confidence: 0.2,
            poll_secs: 10,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            primary_base_url: "http://localhost:11434/v1".to_string(),
            primary_model: "qwen2.5:14b".to_string(),
            primary_api_key: None,
            fallback_base_url: None,
            fallback_model: None,
            fallback_api_key: None,
            temperature: 0.1,
            max_tokens: 1200,
            request_timeout_secs: 120,
            cooldown_secs: 30,
            backlog_batch_size: 50,
            fresh_queue_capacity: 1_000,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self { base_url: "http://localhost:8090".to_string(), request_timeout_secs: 30 }
    }
}

impl Default for HousekeepingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            exclude_starred: true,
            hour: 3,
            retention_days_high: 365,
            retention_days_medium: 180,
            retention_days_low: 90,
            retention_days_none: 30,
        }
    }
}

// =========================
// Helpers for parsing values
// =========================

fn parse_duration_to_secs(input: &str) -> Result<u64, String> {
    // Accept plain numbers (treated as seconds)
    if let Ok(val) = input.parse::<u64>() {
        return Ok(val);
    }

    let s = input.trim().to_lowercase();
    let (num_str, unit) = s.split_at(s.chars().take_while(|c| c.is_ascii_digit()).count());
    if num_str.is_empty() || unit.is_empty() {
        return Err("missing number or unit".into());
    }
    let n: u64 = num_str.parse().map_err(|_| "invalid number".to_string())?;
    match unit {
        "s" | "sec" | "secs" | "second" | "seconds" => Ok(n),
        "m" | "min" | "mins" | "minute" | "minutes" => Ok(n * 60),
        "h" | "hr" | "hour" | "hours" => Ok(n * 60 * 60),
        "d" | "day" | "days" => Ok(n * 60 * 60 * 24),
        _ => Err(format!("unsupported unit: {}", unit)),
    }
}

fn parse_days_to_i64(input: &str) -> Result<i64, String> {
    // Accept plain numbers (treated as days)
    if let Ok(val) = input.parse::<i64>() {
        return Ok(val);
    }

    let s = input.trim().to_lowercase();
    let (num_str, unit) = s.split_at(s.chars().take_while(|c| c.is_ascii_digit()).count());
    if num_str.is_empty() || unit.is_empty() {
        return Err("missing number or unit".into());
    }
    let n: i64 = num_str.parse().map_err(|_| "invalid number".to_string())?;
    match unit {
        "d" | "day" | "days" => Ok(n),
        "w" | "week" | "weeks" => Ok(n * 7),
        _ => Err(format!("unsupported unit: {}", unit)),
    }
}

// Custom serde deserializers to support numeric or human-friendly string values
fn deserialize_duration_secs<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct Visitor;
    impl<'de> serde::de::Visitor<'de> for Visitor {
        type Value = u64;
        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            write!(f, "a number of seconds or a string like '30s', '5m', '1h'")
        }
        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
            Ok(v)
        }
        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            if v >= 0 { Ok(v as u64) } else { Err(E::custom("negative not allowed")) }
        }
        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            parse_duration_to_secs(v).map_err(E::custom)
        }
        fn visit_string<E>(self, v: String) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            parse_duration_to_secs(&v).map_err(E::custom)
        }
    }
    deserializer.deserialize_any(Visitor)
}

fn deserialize_days_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct Visitor;
    impl<'de> serde::de::Visitor<'de> for Visitor {
        type Value = i64;
        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            write!(f, "a number of days or a string like '7d' or '2w'")
        }
        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E> {
            Ok(v)
        }
        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
            Ok(v as i64)
        }
        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            parse_days_to_i64(v).map_err(E::custom)
        }
        fn visit_string<E>(self, v: String) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            parse_days_to_i64(&v).map_err(E::custom)
        }
    }
    deserializer.deserialize_any(Visitor)
}
