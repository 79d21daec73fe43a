use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;

/// Connector kind: the protocol/shape family a driver handles.
///
/// Closed variant set; dispatch is by tag. The social variants differ only
/// in transport, so they share caps and deadlines via [`KindGroup`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ConnectorKind {
    Feed,
    HtmlPage,
    ShortPost,
    ParaphrasedHandle,
    FederatedHandle,
    LongPost,
    ChannelPost,
    SearchAlert,
    DocumentBinary,
}

/// Concurrency/deadline group a connector kind belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KindGroup {
    Feed,
    Html,
    Social,
    Document,
}

impl ConnectorKind {
    pub fn group(self) -> KindGroup {
        match self {
            ConnectorKind::Feed | ConnectorKind::SearchAlert => KindGroup::Feed,
            ConnectorKind::HtmlPage => KindGroup::Html,
            ConnectorKind::ShortPost
            | ConnectorKind::ParaphrasedHandle
            | ConnectorKind::FederatedHandle
            | ConnectorKind::LongPost
            | ConnectorKind::ChannelPost => KindGroup::Social,
            ConnectorKind::DocumentBinary => KindGroup::Document,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectorKind::Feed => "feed",
            ConnectorKind::HtmlPage => "html_page",
            ConnectorKind::ShortPost => "short_post",
            ConnectorKind::ParaphrasedHandle => "paraphrased_handle",
            ConnectorKind::FederatedHandle => "federated_handle",
            ConnectorKind::LongPost => "long_post",
            ConnectorKind::ChannelPost => "channel_post",
            ConnectorKind::SearchAlert => "search_alert",
            ConnectorKind::DocumentBinary => "document_binary",
        }
    }
}

/// An organization or publisher grouping one or more channels.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Source {
    pub id: i64,
    pub name: String,
    pub enabled: bool,
    pub is_stakeholder: bool,
    pub created_at: DateTime<Utc>,
}

/// A concrete pollable endpoint belonging to a source.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Channel {
    pub id: i64,
    pub source_id: i64,
    pub kind: ConnectorKind,
    /// Opaque per-connector configuration map; unknown keys are ignored
    pub config: Json<HashMap<String, serde_json::Value>>,
    pub enabled: bool,
    pub interval_minutes: i64,
    pub last_poll: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Channel {
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.0.get(key).and_then(|v| v.as_str())
    }

    pub fn config_bool(&self, key: &str) -> Option<bool> {
        self.config.0.get(key).and_then(|v| v.as_bool())
    }
}

/// Outcome of a connector `validate` call: a boolean plus one
/// human-readable line.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationOutcome {
    pub ok: bool,
    pub message: String,
}

impl ValidationOutcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self { ok: true, message: message.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self { ok: false, message: message.into() }
    }
}
