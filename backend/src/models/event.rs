use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;

/// Append-only audit entry kind for an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum EventKind {
    Fetched,
    FetchFailed,
    DuplicateByIdentity,
    DuplicateByContent,
    DuplicateByTitle,
    DuplicateByParaphrase,
    DedupeParaphraseSkipped,
    Classified,
    LlmAnalyzed,
    LlmFailed,
    RuleApplied,
    MarkedRead,
    Starred,
    Archived,
    Purged,
}

/// Append-only audit entry.
///
/// Most events belong to an item; fetch failures carry only a channel id.
/// Purge events keep their item id after the item row is gone. Events for
/// one item appear in the order they were written; there is no global
/// ordering across items.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ItemEvent {
    pub id: i64,
    pub item_id: Option<i64>,
    pub channel_id: Option<i64>,
    pub kind: EventKind,
    pub payload: Option<Json<serde_json::Value>>,
    pub created_at: DateTime<Utc>,
}
