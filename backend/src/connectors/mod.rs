//! Connector Drivers
//!
//! One driver per connector kind. Every driver implements the same two
//! operations: `validate` checks a channel configuration map and returns a
//! one-line human message, `fetch` pulls recent content from the endpoint
//! and yields normalized items in source order.
//!
//! Failure contract: a driver error surfaces as the channel's `last_error`
//! plus a `fetch_failed` event; there is no inline retry. Deadlines are
//! enforced by the scheduler around the whole `fetch` call.

mod alert;
mod document;
mod extract;
mod feed;
mod html;
mod social;

pub use extract::{extract_article, extract_blocks};
pub use feed::FeedConnector;
pub use html::HtmlPageConnector;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;

use crate::models::{Channel, ConnectorKind, ValidationOutcome};
use crate::utils::AppResult;

/// HTTP user agent sent by all connector drivers.
const USER_AGENT: &str = "news-monitor/1.0 (+https://github.com/liga-hessen/news-monitor)";

/// An item as yielded by a driver, before ingestion.
#[derive(Debug, Clone, Default)]
pub struct NormalizedItem {
    /// Connector-supplied identifier, unique within the channel
    pub external_id: String,
    pub title: String,
    pub content: String,
    pub url: Option<String>,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    /// Drivers that already know a canonical hash may override the
    /// pipeline's content hash
    pub content_hash_override: Option<String>,
    /// Structured extras: mentioned handles, thread id, reply target
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Capability contract shared by all drivers.
#[async_trait]
pub trait Connector: Send + Sync {
    fn kind(&self) -> ConnectorKind;

    /// Check a configuration map. Unknown keys are ignored.
    fn validate(&self, config: &HashMap<String, serde_json::Value>) -> ValidationOutcome;

    /// Fetch and normalize recent items. Order of the returned Vec is the
    /// order the ingestion pipeline sees.
    async fn fetch(&self, channel: &Channel) -> AppResult<Vec<NormalizedItem>>;
}

/// The closed set of drivers, dispatched by connector kind.
pub struct ConnectorSet {
    connectors: Vec<Arc<dyn Connector>>,
}

impl ConnectorSet {
    pub fn new() -> Self {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        let connectors: Vec<Arc<dyn Connector>> = vec![
            Arc::new(feed::FeedConnector::new(client.clone())),
            Arc::new(alert::SearchAlertConnector::new(client.clone())),
            Arc::new(html::HtmlPageConnector::new(client.clone())),
            Arc::new(social::ShortPostConnector::new(client.clone())),
            Arc::new(social::ParaphrasedHandleConnector::new(client.clone())),
            Arc::new(social::FederatedHandleConnector::new(client.clone())),
            Arc::new(social::LongPostConnector::new(client.clone())),
            Arc::new(social::ChannelPostConnector::new(client.clone())),
            Arc::new(document::DocumentConnector::new(client)),
        ];

        Self { connectors }
    }

    pub fn get(&self, kind: ConnectorKind) -> Option<&Arc<dyn Connector>> {
        self.connectors.iter().find(|c| c.kind() == kind)
    }
}

impl Default for ConnectorSet {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared helper: require a non-empty string key from a config map.
pub(crate) fn require_config_str<'a>(
    config: &'a HashMap<String, serde_json::Value>,
    key: &str,
) -> Option<&'a str> {
    config.get(key).and_then(|v| v.as_str()).filter(|s| !s.trim().is_empty())
}
