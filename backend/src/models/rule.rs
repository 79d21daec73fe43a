use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::item::Priority;

/// Classification-adjustment rule kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum RuleKind {
    Keyword,
    Regex,
    Semantic,
}

/// A user-authored classification adjustment.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Rule {
    pub id: i64,
    pub name: String,
    pub kind: RuleKind,
    pub pattern: String,
    /// Added to the priority score on match; clamped to -50..=50 at creation
    pub priority_delta: i64,
    /// When set, a match pins the priority instead of shifting the score
    pub forced_priority: Option<Priority>,
    pub enabled: bool,
    pub sort_order: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateRuleRequest {
    pub name: String,
    pub kind: RuleKind,
    pub pattern: String,
    #[serde(default)]
    pub priority_delta: i64,
    pub forced_priority: Option<Priority>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub sort_order: i64,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct UpdateRuleRequest {
    pub name: Option<String>,
    pub pattern: Option<String>,
    pub priority_delta: Option<i64>,
    pub forced_priority: Option<Option<Priority>>,
    pub enabled: Option<bool>,
    pub sort_order: Option<i64>,
}
