//! Search-alert stream connector.
//!
//! Same wire format as the feed connector, but contents are pre-summaries
//! from an upstream alerting service: links are never followed and items
//! are tagged so downstream consumers can tell them apart.

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::models::{Channel, ConnectorKind, ValidationOutcome};
use crate::utils::{AppError, AppResult};

use super::feed::{parse_feed_entries, validate_feed_url};
use super::{Connector, NormalizedItem};

pub struct SearchAlertConnector {
    client: Client,
}

impl SearchAlertConnector {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Connector for SearchAlertConnector {
    fn kind(&self) -> ConnectorKind {
        ConnectorKind::SearchAlert
    }

    fn validate(&self, config: &HashMap<String, serde_json::Value>) -> ValidationOutcome {
        validate_feed_url(config)
    }

    async fn fetch(&self, channel: &Channel) -> AppResult<Vec<NormalizedItem>> {
        let url = channel
            .config_str("url")
            .ok_or_else(|| AppError::invalid_input("search-alert channel has no 'url' config"))?;

        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(AppError::network(format!(
                "alert fetch returned HTTP {}",
                response.status()
            )));
        }
        let bytes = response.bytes().await?;
        let mut items = parse_feed_entries(&bytes)?;

        for item in &mut items {
            item.metadata
                .insert("source_kind".to_string(), serde_json::json!("search_alert"));
        }

        debug!("Alert fetch for channel {} yielded {} items", channel.id, items.len());
        Ok(items)
    }
}
