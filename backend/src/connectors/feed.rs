//! Feed-style connector (RSS/Atom syndication documents).

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};

use crate::models::{Channel, ConnectorKind, ValidationOutcome};
use crate::utils::text::normalize_whitespace;
use crate::utils::{AppError, AppResult};

use super::extract::{extract_article, html_to_text};
use super::{Connector, NormalizedItem, require_config_str};

pub struct FeedConnector {
    client: Client,
}

impl FeedConnector {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Fetch the entry's target page and pull the article body out of it.
    /// Any failure keeps the feed-provided content.
    async fn follow_link(&self, url: &str) -> Option<String> {
        let response = self.client.get(url).send().await.ok()?;
        if !response.status().is_success() {
            debug!("Follow-link fetch for {} returned {}", url, response.status());
            return None;
        }
        let body = response.text().await.ok()?;
        let article = extract_article(&body);
        if article.text.is_empty() { None } else { Some(article.text) }
    }
}

/// Parse a syndication document into normalized items. Entries that carry
/// neither an identifier nor a link are malformed and dropped.
pub(super) fn parse_feed_entries(bytes: &[u8]) -> AppResult<Vec<NormalizedItem>> {
    let feed = feed_rs::parser::parse(bytes)
        .map_err(|e| AppError::malformed_upstream(format!("feed parse failed: {}", e)))?;

    let mut items = Vec::with_capacity(feed.entries.len());
    for entry in feed.entries {
        let url = entry.links.first().map(|l| l.href.clone());

        let external_id = if entry.id.trim().is_empty() {
            match &url {
                Some(u) => u.clone(),
                None => {
                    warn!("Dropping feed entry without id or link");
                    continue;
                }
            }
        } else {
            entry.id.clone()
        };

        let title = entry
            .title
            .as_ref()
            .map(|t| normalize_whitespace(&t.content))
            .unwrap_or_default();

        let raw_content = entry
            .content
            .as_ref()
            .and_then(|c| c.body.clone())
            .or_else(|| entry.summary.as_ref().map(|s| s.content.clone()))
            .unwrap_or_default();

        items.push(NormalizedItem {
            external_id,
            title,
            content: html_to_text(&raw_content),
            url,
            author: entry.authors.first().map(|p| p.name.clone()),
            published_at: entry.published.or(entry.updated),
            content_hash_override: None,
            metadata: HashMap::new(),
        });
    }

    Ok(items)
}

pub(super) fn validate_feed_url(
    config: &HashMap<String, serde_json::Value>,
) -> ValidationOutcome {
    let Some(url) = require_config_str(config, "url") else {
        return ValidationOutcome::error("Missing required config key 'url'");
    };
    match reqwest::Url::parse(url) {
        Ok(parsed) if parsed.scheme() == "http" || parsed.scheme() == "https" => {
            ValidationOutcome::ok(format!("Feed URL '{}' looks valid", url))
        }
        Ok(parsed) => {
            ValidationOutcome::error(format!("Unsupported URL scheme '{}'", parsed.scheme()))
        }
        Err(e) => ValidationOutcome::error(format!("Invalid URL '{}': {}", url, e)),
    }
}

#[async_trait]
impl Connector for FeedConnector {
    fn kind(&self) -> ConnectorKind {
        ConnectorKind::Feed
    }

    fn validate(&self, config: &HashMap<String, serde_json::Value>) -> ValidationOutcome {
        validate_feed_url(config)
    }

    async fn fetch(&self, channel: &Channel) -> AppResult<Vec<NormalizedItem>> {
        let url = channel
            .config_str("url")
            .ok_or_else(|| AppError::invalid_input("feed channel has no 'url' config"))?;

        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(AppError::network(format!(
                "feed fetch returned HTTP {}",
                response.status()
            )));
        }
        let bytes = response.bytes().await?;
        let mut items = parse_feed_entries(&bytes)?;

        // follow-links defaults to true
        if channel.config_bool("follow_links").unwrap_or(true) {
            for item in &mut items {
                if let Some(link) = item.url.clone()
                    && let Some(body) = self.follow_link(&link).await
                {
                    item.content = body;
                }
            }
        }

        debug!("Feed fetch for channel {} yielded {} items", channel.id, items.len());
        Ok(items)
    }
}
