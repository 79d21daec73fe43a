//! HTML page connector.
//!
//! Two extraction modes: a configured CSS selector yields one item per
//! matched element; without a selector the domain heuristic pulls a single
//! article (title + body) out of the page. External ids come from the
//! block's target link when present, else from the content hash, so an
//! unchanged page re-fetch dedupes by identity.

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::Client;
use scraper::Selector;
use tracing::debug;

use crate::models::{Channel, ConnectorKind, ValidationOutcome};
use crate::utils::text::content_hash;
use crate::utils::{AppError, AppResult};

use super::extract::{extract_article, extract_blocks};
use super::{Connector, NormalizedItem, require_config_str};

pub struct HtmlPageConnector {
    client: Client,
}

impl HtmlPageConnector {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn items_from_blocks(page_url: &str, html: &str, selector: &str) -> Vec<NormalizedItem> {
        extract_blocks(html, selector)
            .into_iter()
            .map(|block| {
                let url = block.link.as_ref().map(|link| resolve_href(page_url, link));
                let external_id =
                    url.clone().unwrap_or_else(|| content_hash(&block.text));
                NormalizedItem {
                    external_id,
                    title: block.title,
                    content: block.text,
                    url,
                    ..Default::default()
                }
            })
            .collect()
    }

    fn item_from_article(page_url: &str, html: &str) -> Option<NormalizedItem> {
        let article = extract_article(html);
        if article.title.is_empty() && article.text.is_empty() {
            return None;
        }
        Some(NormalizedItem {
            external_id: content_hash(&article.text),
            title: article.title,
            content: article.text,
            url: Some(page_url.to_string()),
            ..Default::default()
        })
    }
}

/// Resolve a possibly relative href against the page URL.
fn resolve_href(page_url: &str, href: &str) -> String {
    match reqwest::Url::parse(page_url).and_then(|base| base.join(href)) {
        Ok(resolved) => resolved.to_string(),
        Err(_) => href.to_string(),
    }
}

#[async_trait]
impl Connector for HtmlPageConnector {
    fn kind(&self) -> ConnectorKind {
        ConnectorKind::HtmlPage
    }

    fn validate(&self, config: &HashMap<String, serde_json::Value>) -> ValidationOutcome {
        let Some(url) = require_config_str(config, "url") else {
            return ValidationOutcome::error("Missing required config key 'url'");
        };
        if reqwest::Url::parse(url).is_err() {
            return ValidationOutcome::error(format!("Invalid URL '{}'", url));
        }
        if let Some(selector) = require_config_str(config, "selector")
            && Selector::parse(selector).is_err()
        {
            return ValidationOutcome::error(format!("Invalid CSS selector '{}'", selector));
        }
        ValidationOutcome::ok(format!("Page URL '{}' looks valid", url))
    }

    async fn fetch(&self, channel: &Channel) -> AppResult<Vec<NormalizedItem>> {
        let url = channel
            .config_str("url")
            .ok_or_else(|| AppError::invalid_input("html channel has no 'url' config"))?;

        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(AppError::network(format!(
                "page fetch returned HTTP {}",
                response.status()
            )));
        }
        let body = response.text().await?;

        let items = match channel.config_str("selector") {
            Some(selector) => Self::items_from_blocks(url, &body, selector),
            None => Self::item_from_article(url, &body).into_iter().collect(),
        };

        debug!("Page fetch for channel {} yielded {} items", channel.id, items.len());
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_items_from_blocks_resolves_links() {
        let html = r#"
            <div class="meldung"><h2>Erste</h2><a href="/a.html">mehr</a><p>Eins</p></div>
            <div class="meldung"><h2>Zweite</h2><a href="https://other.example/b">mehr</a><p>Zwei</p></div>
        "#;
        let items =
            HtmlPageConnector::items_from_blocks("https://example.org/news", html, "div.meldung");
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].url.as_deref(), Some("https://example.org/a.html"));
        assert_eq!(items[0].external_id, "https://example.org/a.html");
        assert_eq!(items[1].url.as_deref(), Some("https://other.example/b"));
    }

    #[test]
    fn test_item_from_article_hashes_external_id() {
        let html = "<html><body><article><h1>Titel</h1><p>Inhalt</p></article></body></html>";
        let item =
            HtmlPageConnector::item_from_article("https://example.org/seite", html).expect("item");
        assert_eq!(item.title, "Titel");
        assert_eq!(item.external_id, content_hash(&item.content));
    }

    #[test]
    fn test_validate_selector() {
        let connector = HtmlPageConnector::new(Client::new());
        let config = HashMap::from([
            ("url".to_string(), serde_json::json!("https://example.org")),
            ("selector".to_string(), serde_json::json!("div.teaser")),
        ]);
        assert!(connector.validate(&config).ok);

        let config = HashMap::from([
            ("url".to_string(), serde_json::json!("https://example.org")),
            ("selector".to_string(), serde_json::json!(":::bad")),
        ]);
        assert!(!connector.validate(&config).ok);
    }
}
