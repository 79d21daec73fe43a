//! LLM worker (full analysis of retained items).
//!
//! Two strictly prioritized queues feed the worker: the in-memory fresh
//! queue, filled by the classifier for items whose retry bucket is not
//! `low`, and the database backlog (pending items ordered by retry bucket,
//! then age). Backlog work happens only when the fresh queue is empty at
//! the start of a cycle. Within each queue the order is FIFO.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::{LlmConfig, OrganizationConfig};
use crate::models::{EventKind, Item, Priority};
use crate::utils::text::truncate_chars;
use crate::utils::{AppError, AppResult};

use super::item_service::{ItemService, LlmUpdate};
use super::llm_client::ProviderChain;
use super::rules::RuleEngine;
use super::worker::WorkerHandle;

/// Content cutoff for the analysis prompt.
const PROMPT_CONTENT_CHARS: usize = 6000;

/// Score a bucket maps to when the LLM decides the priority; rules shift
/// it from there.
fn bucket_score(priority: Priority) -> i64 {
    match priority {
        Priority::High => 80,
        Priority::Medium => 50,
        Priority::Low => 20,
        Priority::None => 0,
    }
}

/// The JSON document the model must return.
#[derive(Debug, Clone, Deserialize)]
pub struct LlmAnalysis {
    pub summary: String,
    pub detailed_analysis: String,
    pub priority: String,
    #[serde(default)]
    pub assigned_groups: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub reasoning: String,
}

pub struct LlmWorker {
    handle: Arc<WorkerHandle>,
    config: LlmConfig,
    organization: OrganizationConfig,
    items: ItemService,
    chain: Arc<ProviderChain>,
    rules: Arc<RuleEngine>,
    system_prompt: String,
}

impl LlmWorker {
    pub fn new(
        handle: Arc<WorkerHandle>,
        config: LlmConfig,
        organization: OrganizationConfig,
        items: ItemService,
        chain: Arc<ProviderChain>,
        rules: Arc<RuleEngine>,
    ) -> Self {
        let system_prompt = build_system_prompt(&organization);
        Self { handle, config, organization, items, chain, rules, system_prompt }
    }

    /// Worker loop; parks while paused or stopped, exits when the fresh
    /// queue closes.
    pub async fn run(self, mut fresh_rx: mpsc::Receiver<i64>) {
        info!("LLM worker running");
        let mut backlog: VecDeque<Item> = VecDeque::new();

        loop {
            self.handle.wait_until_runnable().await;

            // fresh strictly preempts backlog
            let next = match fresh_rx.try_recv() {
                Ok(item_id) => Some(item_id),
                Err(mpsc::error::TryRecvError::Empty)
                | Err(mpsc::error::TryRecvError::Disconnected) => {
                    if backlog.is_empty() {
                        match self.items.llm_backlog_batch(self.config.backlog_batch_size).await {
                            Ok(batch) => backlog.extend(batch),
                            Err(e) => {
                                self.handle.record_failure(&format!("backlog query: {}", e))
                            }
                        }
                    }
                    backlog.pop_front().map(|item| item.id)
                }
            };

            let item_id = match next {
                Some(item_id) => item_id,
                None => {
                    tokio::select! {
                        received = fresh_rx.recv() => match received {
                            Some(item_id) => item_id,
                            None => {
                                info!("Fresh queue closed, LLM worker exiting");
                                return;
                            }
                        },
                        _ = tokio::time::sleep(Duration::from_secs(5)) => continue,
                    }
                }
            };

            match self.analyze(item_id).await {
                Ok(true) => self.handle.record_success(),
                // worker was paused or stopped mid-call; the item stays
                // pending and nothing is recorded
                Ok(false) => {}
                Err(e) => {
                    let transient = e.is_transient();
                    self.handle.record_failure(&format!("item {}: {}", item_id, e));
                    if transient {
                        debug!(
                            "Provider unreachable, cooling down {}s",
                            self.config.cooldown_secs
                        );
                        tokio::time::sleep(Duration::from_secs(self.config.cooldown_secs)).await;
                    }
                }
            }
        }
    }

    /// Analyze one item. Returns false when the call was cancelled by a
    /// worker pause/stop.
    pub(crate) async fn analyze(&self, item_id: i64) -> AppResult<bool> {
        let (item, source_name) = self.items.with_source_name(item_id).await?;
        if !item.needs_llm {
            debug!("Item {} no longer pending, skipping", item_id);
            return Ok(true);
        }

        let user_prompt = self.build_user_prompt(&item, &source_name);

        // the in-flight call is dropped (cancelled) if the worker leaves
        // the running state
        let completion = tokio::select! {
            result = self.chain.complete(
                &self.system_prompt,
                &user_prompt,
                self.config.temperature,
                self.config.max_tokens,
            ) => result,
            _ = self.handle.interrupted() => {
                debug!("LLM call for item {} cancelled by worker state change", item_id);
                return Ok(false);
            }
        };

        let (provider, raw) = completion?;

        let analysis = match parse_analysis(&raw) {
            Ok(analysis) => analysis,
            Err(e) => {
                self.items
                    .record_event(
                        Some(item.id),
                        Some(item.channel_id),
                        EventKind::LlmFailed,
                        Some(serde_json::json!({ "provider": provider, "error": e.to_string() })),
                    )
                    .await?;
                return Err(e);
            }
        };

        let priority = Priority::parse(&analysis.priority).unwrap_or(Priority::None);
        let assigned_groups: Vec<String> = analysis
            .assigned_groups
            .iter()
            .filter(|group| self.organization.working_groups.contains_key(*group))
            .cloned()
            .collect();

        self.items
            .apply_llm_update(
                item.id,
                LlmUpdate {
                    summary: analysis.summary.clone(),
                    analysis: analysis.detailed_analysis.clone(),
                    priority,
                    priority_score: bucket_score(priority),
                    assigned_groups,
                    tags: analysis.tags.clone(),
                    provider: provider.clone(),
                    raw_response: raw,
                },
            )
            .await?;
        self.items
            .record_event(
                Some(item.id),
                Some(item.channel_id),
                EventKind::LlmAnalyzed,
                Some(serde_json::json!({
                    "provider": provider,
                    "priority": priority.as_str(),
                })),
            )
            .await?;

        self.rules.apply(item.id, false).await?;

        debug!("LLM analysis for item {} done via {}", item.id, provider);
        Ok(true)
    }

    fn build_user_prompt(&self, item: &Item, source_name: &str) -> String {
        let timestamp = item
            .published_at
            .unwrap_or(item.first_seen_at)
            .format("%d.%m.%Y %H:%M UTC")
            .to_string();
        format!(
            "Titel: {}\nQuelle: {}\nZeitstempel: {}\n\nInhalt:\n{}",
            item.title,
            source_name,
            timestamp,
            truncate_chars(&item.content, PROMPT_CONTENT_CHARS),
        )
    }
}

/// Parse the model's JSON answer; one reparse attempt after stripping a
/// leading code fence.
pub fn parse_analysis(raw: &str) -> AppResult<LlmAnalysis> {
    match serde_json::from_str::<LlmAnalysis>(raw.trim()) {
        Ok(analysis) => Ok(analysis),
        Err(first_error) => {
            let stripped = strip_code_fence(raw);
            serde_json::from_str::<LlmAnalysis>(stripped.trim()).map_err(|_| {
                AppError::malformed_llm_response(format!("not parseable as JSON: {}", first_error))
            })
        }
    }
}

fn strip_code_fence(raw: &str) -> String {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };
    // drop the info string ("json") up to the first newline
    let rest = match rest.split_once('\n') {
        Some((_, body)) => body,
        None => rest,
    };
    rest.strip_suffix("```").unwrap_or(rest).to_string()
}

fn build_system_prompt(organization: &OrganizationConfig) -> String {
    let groups = organization
        .working_groups
        .iter()
        .map(|(code, description)| format!("- {}: {}", code, description))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"Du bist Referent:in für Sozialpolitik bei {org} und bewertest eingehende Meldungen für den täglichen Pressespiegel.

## Arbeitskreise
{groups}

## Prioritätskriterien
- "high": unmittelbare Auswirkungen auf Wohlfahrtsverbände oder ihre Klient:innen in Hessen (Haushaltskürzungen, Gesetzesänderungen, Förderprogramme, Tarifabschlüsse)
- "medium": landespolitisch relevante Entwicklungen ohne unmittelbaren Handlungsdruck
- "low": Hintergrundberichte mit losem Bezug zur Freien Wohlfahrtspflege
- "none": kein fachlicher Bezug

## Ausgabeformat
Antworte ausschließlich mit einem JSON-Objekt, ohne Einleitung und ohne Markdown:
{{
  "summary": "2-4 Sätze Zusammenfassung",
  "detailed_analysis": "5-10 Sätze Einordnung und Auswirkungen",
  "priority": "high|medium|low|none",
  "assigned_groups": ["AK2"],
  "tags": ["haushalt"],
  "reasoning": "knappe Begründung der Priorität"
}}

"assigned_groups" darf nur Kürzel aus der Liste oben enthalten."#,
        org = organization.name,
        groups = groups,
    )
}
