//! Rule engine: implicit stakeholder-mention boosts plus user-authored
//! keyword / regex / semantic rules.
//!
//! Invoked after LLM analysis, or directly after classification for items
//! the classifier bucketed `low`. Boosts run first, then the enabled user
//! rules in ascending order key. The first matching forced-priority rule
//! pins the priority and leaves the score untouched; all other matches
//! accumulate deltas into the score, which is re-bucketed once at the end.

use std::sync::Arc;

use regex::RegexBuilder;
use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::models::{CreateRuleRequest, EventKind, Item, Priority, Rule, RuleKind, UpdateRuleRequest};
use crate::utils::text::{extract_mentions, truncate_chars};
use crate::utils::{AppError, AppResult};

use super::item_service::ItemService;
use super::llm_client::ProviderChain;
use super::stakeholder::StakeholderDirectory;

// Implicit boost values from the stakeholder directory
const BOOST_DIRECT_MENTION: i64 = 25;
const BOOST_MEMBER_MENTION: i64 = 15;
const BOOST_QUESTION: i64 = 10;
const BOOST_CRITICISM: i64 = 10;

/// Markers for the criticism boost; matched case-folded.
const CRITICISM_MARKERS: &[&str] =
    &["kritisiert", "kritik", "versagen", "skandal", "vorwurf", "wirft vor"];

/// Content cutoff for semantic rule prompts.
const SEMANTIC_CONTENT_CHARS: usize = 3000;

// ============================================================================
// Rule CRUD
// ============================================================================

#[derive(Clone)]
pub struct RuleService {
    pool: SqlitePool,
}

impl RuleService {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn list(&self) -> AppResult<Vec<Rule>> {
        Ok(sqlx::query_as("SELECT * FROM rules ORDER BY sort_order, id")
            .fetch_all(&self.pool)
            .await?)
    }

    pub async fn list_enabled(&self) -> AppResult<Vec<Rule>> {
        Ok(sqlx::query_as("SELECT * FROM rules WHERE enabled = TRUE ORDER BY sort_order, id")
            .fetch_all(&self.pool)
            .await?)
    }

    pub async fn get(&self, rule_id: i64) -> AppResult<Rule> {
        sqlx::query_as("SELECT * FROM rules WHERE id = ?")
            .bind(rule_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Rule {} not found", rule_id)))
    }

    pub async fn create(&self, req: CreateRuleRequest) -> AppResult<Rule> {
        if req.name.trim().is_empty() {
            return Err(AppError::invalid_input("Rule name cannot be empty"));
        }
        if !(-50..=50).contains(&req.priority_delta) {
            return Err(AppError::invalid_input("priority_delta must be within -50..=50"));
        }
        if req.kind == RuleKind::Regex
            && RegexBuilder::new(&req.pattern).build().is_err()
        {
            return Err(AppError::invalid_input(format!("Invalid regex '{}'", req.pattern)));
        }

        let result = sqlx::query(
            r#"
            INSERT INTO rules (name, kind, pattern, priority_delta, forced_priority, enabled, sort_order)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&req.name)
        .bind(req.kind)
        .bind(&req.pattern)
        .bind(req.priority_delta)
        .bind(req.forced_priority)
        .bind(req.enabled)
        .bind(req.sort_order)
        .execute(&self.pool)
        .await?;

        self.get(result.last_insert_rowid()).await
    }

    pub async fn update(&self, rule_id: i64, req: UpdateRuleRequest) -> AppResult<Rule> {
        let rule = self.get(rule_id).await?;

        let name = req.name.unwrap_or(rule.name);
        let pattern = req.pattern.unwrap_or(rule.pattern);
        let priority_delta = req.priority_delta.unwrap_or(rule.priority_delta);
        let forced_priority = req.forced_priority.unwrap_or(rule.forced_priority);
        let enabled = req.enabled.unwrap_or(rule.enabled);
        let sort_order = req.sort_order.unwrap_or(rule.sort_order);

        if !(-50..=50).contains(&priority_delta) {
            return Err(AppError::invalid_input("priority_delta must be within -50..=50"));
        }

        sqlx::query(
            r#"
            UPDATE rules
            SET name = ?, pattern = ?, priority_delta = ?, forced_priority = ?, enabled = ?, sort_order = ?
            WHERE id = ?
            "#,
        )
        .bind(&name)
        .bind(&pattern)
        .bind(priority_delta)
        .bind(forced_priority)
        .bind(enabled)
        .bind(sort_order)
        .bind(rule_id)
        .execute(&self.pool)
        .await?;

        self.get(rule_id).await
    }

    pub async fn delete(&self, rule_id: i64) -> AppResult<()> {
        let affected = sqlx::query("DELETE FROM rules WHERE id = ?")
            .bind(rule_id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if affected == 0 {
            return Err(AppError::not_found(format!("Rule {} not found", rule_id)));
        }
        Ok(())
    }
}

// ============================================================================
// Rule engine
// ============================================================================

pub struct RuleEngine {
    items: ItemService,
    rules: RuleService,
    stakeholders: StakeholderDirectory,
    llm: Arc<ProviderChain>,
}

impl RuleEngine {
    pub fn new(
        items: ItemService,
        rules: RuleService,
        stakeholders: StakeholderDirectory,
        llm: Arc<ProviderChain>,
    ) -> Self {
        Self { items, rules, stakeholders, llm }
    }

    /// Evaluate all rules against one item and write the outcome.
    ///
    /// `mark_processed_on_match` covers the post-classification path for
    /// `low` items: a firing rule takes the item out of the LLM pipeline
    /// for good.
    pub async fn apply(&self, item_id: i64, mark_processed_on_match: bool) -> AppResult<()> {
        let item = self.items.get(item_id).await?;
        let corpus = format!("{} {}", item.title, item.content);
        let corpus_folded = corpus.to_lowercase();

        let mut delta_sum: i64 = 0;
        let mut forced: Option<Priority> = None;
        let mut rule_tags: Vec<String> = Vec::new();
        let mut matched_any = false;

        // implicit mention boosts run before user rules
        for boost in self.mention_boosts(&item, &corpus, &corpus_folded).await? {
            delta_sum += boost.delta;
            matched_any = true;
            self.items
                .record_event(
                    Some(item.id),
                    Some(item.channel_id),
                    EventKind::RuleApplied,
                    Some(serde_json::json!({ "implicit": boost.label, "delta": boost.delta })),
                )
                .await?;
        }

        for rule in self.rules.list_enabled().await? {
            if !self.rule_matches(&rule, &corpus, &corpus_folded, &item).await {
                continue;
            }
            matched_any = true;
            rule_tags.push(format!("rule:{}", rule.name));

            match rule.forced_priority {
                // first matching forced rule wins; its delta is ignored
                Some(priority) if forced.is_none() => forced = Some(priority),
                Some(_) => {}
                None => delta_sum += rule.priority_delta,
            }

            self.items
                .record_event(
                    Some(item.id),
                    Some(item.channel_id),
                    EventKind::RuleApplied,
                    Some(serde_json::json!({
                        "rule_id": rule.id,
                        "rule_name": rule.name,
                        "forced_priority": rule.forced_priority.map(|p| p.as_str()),
                        "delta": rule.priority_delta,
                    })),
                )
                .await?;
        }

        if !matched_any {
            return Ok(());
        }

        let score = (item.priority_score + delta_sum).clamp(0, 100);
        let priority = forced.unwrap_or_else(|| Priority::from_score(score));
        // a forced priority pins the bucket without touching the score
        let score = if forced.is_some() { item.priority_score } else { score };

        self.items
            .apply_rule_adjustment(
                item.id,
                priority,
                score,
                rule_tags,
                mark_processed_on_match,
            )
            .await?;

        debug!(
            "Rules adjusted item {} to priority {} (score {})",
            item.id,
            priority.as_str(),
            score
        );
        Ok(())
    }

    async fn rule_matches(
        &self,
        rule: &Rule,
        corpus: &str,
        corpus_folded: &str,
        item: &Item,
    ) -> bool {
        match rule.kind {
            RuleKind::Keyword => rule
                .pattern
                .split(',')
                .map(|token| token.trim().to_lowercase())
                .filter(|token| !token.is_empty())
                .any(|token| corpus_folded.contains(&token)),
            RuleKind::Regex => {
                match RegexBuilder::new(&rule.pattern)
                    .case_insensitive(true)
                    .multi_line(true)
                    .build()
                {
                    Ok(regex) => regex.is_match(corpus),
                    Err(e) => {
                        warn!("Rule '{}' has an invalid regex: {}", rule.name, e);
                        false
                    }
                }
            }
            RuleKind::Semantic => self.semantic_matches(rule, item).await,
        }
    }

    /// Ask the LLM the rule's yes/no question about the raw title+content.
    async fn semantic_matches(&self, rule: &Rule, item: &Item) -> bool {
        let user = format!(
            "{}\n\nText:\n{} {}",
            rule.pattern,
            item.title,
            truncate_chars(&item.content, SEMANTIC_CONTENT_CHARS),
        );
        match self
            .llm
            .complete(
                "Du bist ein Klassifikationsassistent. Beantworte die Frage ausschließlich mit Ja oder Nein.",
                &user,
                0.0,
                8,
            )
            .await
        {
            Ok((_, answer)) => {
                let first_line = answer.lines().next().unwrap_or("").to_lowercase();
                first_line.contains("ja") || first_line.contains("yes")
            }
            Err(e) => {
                warn!("Semantic rule '{}' skipped, provider unavailable: {}", rule.name, e);
                false
            }
        }
    }

    /// Stakeholder-directory boosts; each fires at most once per item.
    async fn mention_boosts(
        &self,
        item: &Item,
        corpus: &str,
        corpus_folded: &str,
    ) -> AppResult<Vec<Boost>> {
        // connector-provided mentions take precedence, the text scan
        // fills the gap
        let mut handles: Vec<String> = item
            .metadata
            .0
            .get("mentions")
            .and_then(|v| v.as_array())
            .map(|list| {
                list.iter().filter_map(|v| v.as_str()).map(|s| s.to_lowercase()).collect()
            })
            .unwrap_or_default();
        for handle in extract_mentions(corpus) {
            if !handles.contains(&handle) {
                handles.push(handle);
            }
        }
        if handles.is_empty() {
            return Ok(Vec::new());
        }

        let resolved = self.stakeholders.resolve_mentions(&handles).await?;
        if resolved.is_empty() {
            return Ok(Vec::new());
        }

        let mut boosts = Vec::new();
        if resolved.iter().any(|s| s.is_own_organization()) {
            boosts.push(Boost { label: "direct_mention", delta: BOOST_DIRECT_MENTION });
        }
        if resolved.iter().any(|s| s.is_member_organization()) {
            boosts.push(Boost { label: "member_mention", delta: BOOST_MEMBER_MENTION });
        }
        if corpus.contains('?') {
            boosts.push(Boost { label: "stakeholder_question", delta: BOOST_QUESTION });
        }
        if CRITICISM_MARKERS.iter().any(|marker| corpus_folded.contains(marker)) {
            boosts.push(Boost { label: "stakeholder_criticism", delta: BOOST_CRITICISM });
        }

        Ok(boosts)
    }
}

struct Boost {
    label: &'static str,
    delta: i64,
}
