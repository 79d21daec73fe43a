use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;

/// Item priority bucket, derived from the numeric score.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
    #[default]
    None,
}

impl Priority {
    /// Bucket thresholds over the 0..=100 score range.
    pub fn from_score(score: i64) -> Self {
        match score {
            s if s >= 67 => Priority::High,
            s if s >= 34 => Priority::Medium,
            s if s >= 10 => Priority::Low,
            _ => Priority::None,
        }
    }

    /// Ordering rank: higher means more urgent.
    pub fn rank(self) -> u8 {
        match self {
            Priority::High => 3,
            Priority::Medium => 2,
            Priority::Low => 1,
            Priority::None => 0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
            Priority::None => "none",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "high" => Some(Priority::High),
            "medium" => Some(Priority::Medium),
            "low" => Some(Priority::Low),
            "none" => Some(Priority::None),
            _ => None,
        }
    }
}

/// Classifier-assigned disposition gating LLM work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum RetryPriority {
    High,
    EdgeCase,
    Unknown,
    Low,
}

impl RetryPriority {
    pub fn as_str(self) -> &'static str {
        match self {
            RetryPriority::High => "high",
            RetryPriority::EdgeCase => "edge_case",
            RetryPriority::Unknown => "unknown",
            RetryPriority::Low => "low",
        }
    }
}

/// A single news unit as persisted in the store.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Item {
    pub id: i64,
    pub channel_id: i64,
    /// Connector-supplied identifier, unique per channel
    pub external_id: String,
    pub title: String,
    pub content: String,
    pub url: Option<String>,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub first_seen_at: DateTime<Utc>,
    pub content_hash: String,
    pub summary: Option<String>,
    pub analysis: Option<String>,
    pub priority: Priority,
    pub priority_score: i64,
    pub assigned_groups: Json<Vec<String>>,
    pub tags: Json<Vec<String>>,
    pub is_read: bool,
    pub is_starred: bool,
    pub is_archived: bool,
    pub needs_llm: bool,
    pub retry_priority: Option<RetryPriority>,
    /// Back-reference to the canonical item when this is a duplicate
    pub similar_to: Option<i64>,
    pub metadata: Json<HashMap<String, serde_json::Value>>,
    /// Optimistic concurrency counter, bumped by every mutation
    pub revision: i64,
}

impl Item {
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.0.get(key).and_then(|v| v.as_str())
    }
}

/// Short form of a duplicate twin, served alongside the canonical item.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct DuplicateSibling {
    pub id: i64,
    pub title: String,
    pub url: Option<String>,
    pub priority: Priority,
    pub source_name: String,
}

/// Full item record exchanged with the reading front end and the export.
#[derive(Debug, Clone, Serialize)]
pub struct ItemDetail {
    #[serde(flatten)]
    pub item: Item,
    pub source_name: String,
    pub channel_kind: String,
    pub duplicates: Vec<DuplicateSibling>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_from_score_thresholds() {
        assert_eq!(Priority::from_score(100), Priority::High);
        assert_eq!(Priority::from_score(67), Priority::High);
        assert_eq!(Priority::from_score(66), Priority::Medium);
        assert_eq!(Priority::from_score(34), Priority::Medium);
        assert_eq!(Priority::from_score(33), Priority::Low);
        assert_eq!(Priority::from_score(10), Priority::Low);
        assert_eq!(Priority::from_score(9), Priority::None);
        assert_eq!(Priority::from_score(0), Priority::None);
    }

    #[test]
    fn test_priority_rank_order() {
        assert!(Priority::High.rank() > Priority::Medium.rank());
        assert!(Priority::Medium.rank() > Priority::Low.rank());
        assert!(Priority::Low.rank() > Priority::None.rank());
    }

    #[test]
    fn test_priority_parse_roundtrip() {
        for p in [Priority::High, Priority::Medium, Priority::Low, Priority::None] {
            assert_eq!(Priority::parse(p.as_str()), Some(p));
        }
        assert_eq!(Priority::parse("HIGH"), Some(Priority::High));
        assert_eq!(Priority::parse("urgent"), None);
    }
}
