//! Social-timeline connectors.
//!
//! Five variants sharing one item contract: author is the configured
//! handle, the title is synthesized from the first characters of the post,
//! and mentioned handles land in item metadata for the stakeholder boosts.
//! The variants differ only in transport:
//!
//! - short-post / paraphrased-handle: a configured gateway mirrors the
//!   platform timeline (RSS respectively JSON; the paraphrased variant is
//!   backed by a browser-scraping gateway, hence the longer deadline class)
//! - federated-handle: the instance's public status API
//! - long-post: gateway JSON with full post bodies
//! - channel-post: the public channel preview page, scraped directly

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use scraper::{Html, Selector};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::models::{Channel, ConnectorKind, ValidationOutcome};
use crate::utils::text::{extract_mentions, normalize_whitespace, title_from_content};
use crate::utils::{AppError, AppResult};

use super::extract::html_to_text;
use super::feed::parse_feed_entries;
use super::{Connector, NormalizedItem, require_config_str};

/// Synthesized title length for title-less posts.
const TITLE_CHARS: usize = 80;

/// Default RSS mirror for the short-post variant; override per channel
/// with the `gateway` config key.
const DEFAULT_SHORT_POST_GATEWAY: &str = "https://nitter.net";

fn social_item(
    external_id: String,
    handle: &str,
    content: String,
    url: Option<String>,
    published_at: Option<DateTime<Utc>>,
) -> NormalizedItem {
    let mentions = extract_mentions(&content);
    let mut metadata = HashMap::new();
    if !mentions.is_empty() {
        metadata.insert("mentions".to_string(), serde_json::json!(mentions));
    }
    NormalizedItem {
        external_id,
        title: title_from_content(&content, TITLE_CHARS),
        content,
        url,
        author: Some(handle.to_string()),
        published_at,
        content_hash_override: None,
        metadata,
    }
}

fn validate_handle(config: &HashMap<String, serde_json::Value>) -> ValidationOutcome {
    match require_config_str(config, "handle") {
        Some(handle) if !handle.contains(char::is_whitespace) => {
            ValidationOutcome::ok(format!("Handle '{}' looks valid", handle))
        }
        Some(handle) => {
            ValidationOutcome::error(format!("Handle '{}' contains whitespace", handle))
        }
        None => ValidationOutcome::error("Missing required config key 'handle'"),
    }
}

fn validate_handle_and_gateway(
    config: &HashMap<String, serde_json::Value>,
) -> ValidationOutcome {
    let outcome = validate_handle(config);
    if !outcome.ok {
        return outcome;
    }
    match require_config_str(config, "gateway") {
        Some(gateway) if reqwest::Url::parse(gateway).is_ok() => outcome,
        Some(gateway) => ValidationOutcome::error(format!("Invalid gateway URL '{}'", gateway)),
        None => ValidationOutcome::error("Missing required config key 'gateway'"),
    }
}

// ============================================================================
// Short-post variant (gateway RSS mirror)
// ============================================================================

pub struct ShortPostConnector {
    client: Client,
}

impl ShortPostConnector {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Connector for ShortPostConnector {
    fn kind(&self) -> ConnectorKind {
        ConnectorKind::ShortPost
    }

    fn validate(&self, config: &HashMap<String, serde_json::Value>) -> ValidationOutcome {
        let outcome = validate_handle(config);
        if !outcome.ok {
            return outcome;
        }
        if let Some(gateway) = require_config_str(config, "gateway")
            && reqwest::Url::parse(gateway).is_err()
        {
            return ValidationOutcome::error(format!("Invalid gateway URL '{}'", gateway));
        }
        outcome
    }

    async fn fetch(&self, channel: &Channel) -> AppResult<Vec<NormalizedItem>> {
        let handle = required(channel, "handle")?;
        let gateway = channel
            .config_str("gateway")
            .unwrap_or(DEFAULT_SHORT_POST_GATEWAY)
            .to_string();
        let url = format!(
            "{}/{}/rss",
            gateway.trim_end_matches('/'),
            urlencoding::encode(&handle)
        );

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(AppError::network(format!(
                "timeline fetch returned HTTP {}",
                response.status()
            )));
        }
        let bytes = response.bytes().await?;
        let entries = parse_feed_entries(&bytes)?;

        let items = entries
            .into_iter()
            .map(|e| {
                let content = if e.content.is_empty() { e.title.clone() } else { e.content };
                social_item(e.external_id, &handle, content, e.url, e.published_at)
            })
            .collect::<Vec<_>>();

        debug!("Short-post fetch for @{} yielded {} items", handle, items.len());
        Ok(items)
    }
}

// ============================================================================
// Gateway JSON variants (paraphrased-handle, long-post)
// ============================================================================

#[derive(Debug, Deserialize)]
struct GatewayPost {
    id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(alias = "body")]
    text: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default, alias = "published_at")]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    in_reply_to: Option<String>,
}

async fn fetch_gateway_posts(
    client: &Client,
    channel: &Channel,
    path: &str,
) -> AppResult<(String, Vec<GatewayPost>)> {
    let handle = required(channel, "handle")?;
    let gateway = required(channel, "gateway")?;
    let url = format!(
        "{}/{}?handle={}",
        gateway.trim_end_matches('/'),
        path,
        urlencoding::encode(&handle)
    );

    let response = client.get(&url).send().await?;
    if !response.status().is_success() {
        return Err(AppError::network(format!(
            "gateway fetch returned HTTP {}",
            response.status()
        )));
    }
    let posts: Vec<GatewayPost> = response
        .json()
        .await
        .map_err(|e| AppError::malformed_upstream(format!("gateway JSON: {}", e)))?;
    Ok((handle, posts))
}

fn gateway_post_items(handle: &str, posts: Vec<GatewayPost>) -> Vec<NormalizedItem> {
    posts
        .into_iter()
        .filter_map(|post| {
            if post.id.trim().is_empty() {
                warn!("Dropping gateway post without id for @{}", handle);
                return None;
            }
            let mut item =
                social_item(post.id, handle, post.text, post.url, post.created_at);
            if let Some(title) = post.title.filter(|t| !t.trim().is_empty()) {
                item.title = normalize_whitespace(&title);
            }
            if let Some(reply) = post.in_reply_to {
                item.metadata.insert("reply_target".to_string(), serde_json::json!(reply));
            }
            Some(item)
        })
        .collect()
}

pub struct ParaphrasedHandleConnector {
    client: Client,
}

impl ParaphrasedHandleConnector {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Connector for ParaphrasedHandleConnector {
    fn kind(&self) -> ConnectorKind {
        ConnectorKind::ParaphrasedHandle
    }

    fn validate(&self, config: &HashMap<String, serde_json::Value>) -> ValidationOutcome {
        validate_handle_and_gateway(config)
    }

    async fn fetch(&self, channel: &Channel) -> AppResult<Vec<NormalizedItem>> {
        let (handle, posts) =
            fetch_gateway_posts(&self.client, channel, "api/scrape/posts").await?;
        let items = gateway_post_items(&handle, posts);
        debug!("Paraphrased fetch for @{} yielded {} items", handle, items.len());
        Ok(items)
    }
}

pub struct LongPostConnector {
    client: Client,
}

impl LongPostConnector {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Connector for LongPostConnector {
    fn kind(&self) -> ConnectorKind {
        ConnectorKind::LongPost
    }

    fn validate(&self, config: &HashMap<String, serde_json::Value>) -> ValidationOutcome {
        validate_handle_and_gateway(config)
    }

    async fn fetch(&self, channel: &Channel) -> AppResult<Vec<NormalizedItem>> {
        let (handle, posts) = fetch_gateway_posts(&self.client, channel, "api/posts").await?;
        let items = gateway_post_items(&handle, posts);
        debug!("Long-post fetch for @{} yielded {} items", handle, items.len());
        Ok(items)
    }
}

// ============================================================================
// Federated-handle variant (instance status API)
// ============================================================================

#[derive(Debug, Deserialize)]
struct FederatedAccount {
    id: String,
}

#[derive(Debug, Deserialize)]
struct FederatedStatus {
    id: String,
    content: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    in_reply_to_id: Option<String>,
    #[serde(default)]
    mentions: Vec<FederatedMention>,
}

#[derive(Debug, Deserialize)]
struct FederatedMention {
    acct: String,
}

pub struct FederatedHandleConnector {
    client: Client,
}

impl FederatedHandleConnector {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Split `user@instance` into its parts.
    fn split_handle(handle: &str) -> Option<(&str, &str)> {
        let trimmed = handle.trim_start_matches('@');
        let (user, instance) = trimmed.split_once('@')?;
        if user.is_empty() || instance.is_empty() {
            return None;
        }
        Some((user, instance))
    }
}

#[async_trait]
impl Connector for FederatedHandleConnector {
    fn kind(&self) -> ConnectorKind {
        ConnectorKind::FederatedHandle
    }

    fn validate(&self, config: &HashMap<String, serde_json::Value>) -> ValidationOutcome {
        match require_config_str(config, "handle") {
            Some(handle) => match Self::split_handle(handle) {
                Some((_, instance)) => {
                    ValidationOutcome::ok(format!("Federated handle on '{}' looks valid", instance))
                }
                None => ValidationOutcome::error(format!(
                    "Handle '{}' must have the form user@instance",
                    handle
                )),
            },
            None => ValidationOutcome::error("Missing required config key 'handle'"),
        }
    }

    async fn fetch(&self, channel: &Channel) -> AppResult<Vec<NormalizedItem>> {
        let handle = required(channel, "handle")?;
        let (user, instance) = Self::split_handle(&handle)
            .ok_or_else(|| AppError::invalid_input("handle must have the form user@instance"))?;

        let lookup_url = format!(
            "https://{}/api/v1/accounts/lookup?acct={}",
            instance,
            urlencoding::encode(user)
        );
        let account: FederatedAccount = self
            .client
            .get(&lookup_url)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| AppError::network(format!("account lookup failed: {}", e)))?
            .json()
            .await
            .map_err(|e| AppError::malformed_upstream(format!("account JSON: {}", e)))?;

        let statuses_url = format!(
            "https://{}/api/v1/accounts/{}/statuses?limit=40&exclude_reblogs=true",
            instance, account.id
        );
        let statuses: Vec<FederatedStatus> = self
            .client
            .get(&statuses_url)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| AppError::network(format!("status fetch failed: {}", e)))?
            .json()
            .await
            .map_err(|e| AppError::malformed_upstream(format!("status JSON: {}", e)))?;

        let items = statuses
            .into_iter()
            .map(|status| {
                let content = html_to_text(&status.content);
                let mut item = social_item(
                    status.id,
                    &handle,
                    content,
                    status.url,
                    status.created_at,
                );
                // API-provided mentions are authoritative; text-scanned
                // ones only fill the gap
                if !status.mentions.is_empty() {
                    let handles: Vec<String> =
                        status.mentions.into_iter().map(|m| m.acct.to_lowercase()).collect();
                    item.metadata.insert("mentions".to_string(), serde_json::json!(handles));
                }
                if let Some(reply) = status.in_reply_to_id {
                    item.metadata
                        .insert("reply_target".to_string(), serde_json::json!(reply));
                }
                item
            })
            .collect::<Vec<_>>();

        debug!("Federated fetch for @{} yielded {} items", handle, items.len());
        Ok(items)
    }
}

// ============================================================================
// Channel-post variant (public channel preview page)
// ============================================================================

pub struct ChannelPostConnector {
    client: Client,
}

impl ChannelPostConnector {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn parse_preview_page(channel_name: &str, html: &str) -> Vec<NormalizedItem> {
        let message_sel = Selector::parse("div.tgme_widget_message").expect("selector");
        let text_sel = Selector::parse("div.tgme_widget_message_text").expect("selector");
        let time_sel = Selector::parse("time[datetime]").expect("selector");

        let document = Html::parse_document(html);
        let mut items = Vec::new();

        for message in document.select(&message_sel) {
            let Some(post_id) = message.value().attr("data-post") else {
                continue;
            };
            let content = message
                .select(&text_sel)
                .next()
                .map(|el| normalize_whitespace(&el.text().collect::<Vec<_>>().join(" ")))
                .unwrap_or_default();
            if content.is_empty() {
                continue;
            }
            let published_at = message
                .select(&time_sel)
                .next()
                .and_then(|el| el.value().attr("datetime"))
                .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                .map(|dt| dt.with_timezone(&Utc));

            items.push(social_item(
                post_id.to_string(),
                channel_name,
                content,
                Some(format!("https://t.me/{}", post_id)),
                published_at,
            ));
        }

        items
    }
}

#[async_trait]
impl Connector for ChannelPostConnector {
    fn kind(&self) -> ConnectorKind {
        ConnectorKind::ChannelPost
    }

    fn validate(&self, config: &HashMap<String, serde_json::Value>) -> ValidationOutcome {
        match require_config_str(config, "channel_name") {
            Some(name) if name.chars().all(|c| c.is_alphanumeric() || c == '_') => {
                ValidationOutcome::ok(format!("Channel name '{}' looks valid", name))
            }
            Some(name) => {
                ValidationOutcome::error(format!("Channel name '{}' has invalid characters", name))
            }
            None => ValidationOutcome::error("Missing required config key 'channel_name'"),
        }
    }

    async fn fetch(&self, channel: &Channel) -> AppResult<Vec<NormalizedItem>> {
        let name = required(channel, "channel_name")?;
        let url = format!("https://t.me/s/{}", urlencoding::encode(&name));

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(AppError::network(format!(
                "channel preview returned HTTP {}",
                response.status()
            )));
        }
        let body = response.text().await?;
        let items = Self::parse_preview_page(&name, &body);

        debug!("Channel-post fetch for '{}' yielded {} items", name, items.len());
        Ok(items)
    }
}

fn required(channel: &Channel, key: &str) -> AppResult<String> {
    channel
        .config_str(key)
        .map(|s| s.to_string())
        .ok_or_else(|| AppError::invalid_input(format!("channel has no '{}' config", key)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_social_item_synthesizes_title_and_mentions() {
        let content = "Frage an @sozialministerium: Wie geht es mit der Kita-Finanzierung weiter? Wir erwarten eine Antwort noch in dieser Woche.";
        let item = social_item("42".to_string(), "liga_hessen", content.to_string(), None, None);
        assert_eq!(item.author.as_deref(), Some("liga_hessen"));
        assert!(item.title.chars().count() <= TITLE_CHARS);
        assert!(item.title.starts_with("Frage an @sozialministerium"));
        assert_eq!(
            item.metadata.get("mentions"),
            Some(&serde_json::json!(["sozialministerium"]))
        );
    }

    #[test]
    fn test_split_federated_handle() {
        assert_eq!(
            FederatedHandleConnector::split_handle("@liga@soziales.social"),
            Some(("liga", "soziales.social"))
        );
        assert_eq!(FederatedHandleConnector::split_handle("liga"), None);
    }

    #[test]
    fn test_parse_preview_page() {
        let html = r#"
            <div class="tgme_widget_message" data-post="sozialticker/101">
                <div class="tgme_widget_message_text">Landtag debattiert Haushalt</div>
                <time datetime="2025-03-01T10:00:00+00:00"></time>
            </div>
            <div class="tgme_widget_message" data-post="sozialticker/102">
                <div class="tgme_widget_message_text">Neue Zahlen zur Wohnungslosigkeit</div>
            </div>
        "#;
        let items = ChannelPostConnector::parse_preview_page("sozialticker", html);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].external_id, "sozialticker/101");
        assert!(items[0].published_at.is_some());
        assert_eq!(items[1].title, "Neue Zahlen zur Wohnungslosigkeit");
    }

    #[test]
    fn test_gateway_post_items_drop_missing_ids() {
        let posts = vec![
            GatewayPost {
                id: "p1".into(),
                title: None,
                text: "Beitrag eins".into(),
                url: None,
                created_at: None,
                in_reply_to: Some("p0".into()),
            },
            GatewayPost {
                id: "  ".into(),
                title: None,
                text: "kaputt".into(),
                url: None,
                created_at: None,
                in_reply_to: None,
            },
        ];
        let items = gateway_post_items("liga_hessen", posts);
        assert_eq!(items.len(), 1);
        assert_eq!(
            items[0].metadata.get("reply_target"),
            Some(&serde_json::json!("p0"))
        );
    }
}
