//! Briefing export: selection, grouping and rendering.
//!
//! Builds the daily briefing bodies (plain text and HTML) for a recipient
//! list. Delivery is outside the core; this service only renders.

use chrono::{Duration, Local, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::models::Priority;
use crate::utils::AppResult;

#[derive(Debug, Clone, Deserialize)]
pub struct BriefingRequest {
    pub recipients: Vec<String>,
    pub min_priority: Priority,
    pub hours_back: i64,
    #[serde(default)]
    pub include_read: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Briefing {
    pub subject: String,
    pub recipients: Vec<String>,
    pub text_body: String,
    pub html_body: String,
    pub item_count: usize,
}

#[derive(Debug, sqlx::FromRow)]
struct BriefingRow {
    title: String,
    url: Option<String>,
    summary: Option<String>,
    priority: Priority,
    source_name: String,
}

#[derive(Clone)]
pub struct BriefingService {
    pool: SqlitePool,
}

impl BriefingService {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn build(&self, request: BriefingRequest) -> AppResult<Briefing> {
        let since = Utc::now() - Duration::hours(request.hours_back);

        let mut sql = String::from(
            r#"
            SELECT i.title, i.url, i.summary, i.priority, s.name AS source_name
            FROM items i
            JOIN channels c ON c.id = i.channel_id
            JOIN sources s ON s.id = c.source_id
            WHERE i.first_seen_at >= ?
              AND i.is_archived = FALSE
              AND CASE i.priority
                      WHEN 'high' THEN 3
                      WHEN 'medium' THEN 2
                      WHEN 'low' THEN 1
                      ELSE 0
                  END >= ?
            "#,
        );
        if !request.include_read {
            sql.push_str(" AND i.is_read = FALSE");
        }
        sql.push_str(
            r#"
            ORDER BY
                CASE i.priority
                    WHEN 'high' THEN 3
                    WHEN 'medium' THEN 2
                    WHEN 'low' THEN 1
                    ELSE 0
                END DESC,
                i.first_seen_at DESC
            "#,
        );

        let rows: Vec<BriefingRow> = sqlx::query_as(&sql)
            .bind(since)
            .bind(request.min_priority.rank() as i64)
            .fetch_all(&self.pool)
            .await?;

        let subject = format!("Briefing — {}", Local::now().format("%d.%m.%Y"));
        let text_body = render_text(&rows);
        let html_body = render_html(&subject, &rows);

        Ok(Briefing {
            subject,
            recipients: request.recipients,
            item_count: rows.len(),
            text_body,
            html_body,
        })
    }
}

fn priority_heading(priority: Priority) -> &'static str {
    match priority {
        Priority::High => "Hohe Priorität",
        Priority::Medium => "Mittlere Priorität",
        Priority::Low => "Niedrige Priorität",
        Priority::None => "Ohne Priorität",
    }
}

fn render_text(rows: &[BriefingRow]) -> String {
    if rows.is_empty() {
        return "Keine neuen Meldungen im gewählten Zeitraum.\n".to_string();
    }

    let mut body = String::new();
    let mut current: Option<Priority> = None;

    for row in rows {
        if current != Some(row.priority) {
            if current.is_some() {
                body.push('\n');
            }
            body.push_str(&format!("== {} ==\n\n", priority_heading(row.priority)));
            current = Some(row.priority);
        }

        body.push_str(&format!("* {} ({})\n", row.title, row.source_name));
        if let Some(summary) = &row.summary {
            body.push_str(&format!("  {}\n", summary));
        }
        if let Some(url) = &row.url {
            body.push_str(&format!("  {}\n", url));
        }
        body.push('\n');
    }

    body
}

fn render_html(subject: &str, rows: &[BriefingRow]) -> String {
    let mut body = format!("<html><body><h1>{}</h1>", escape_html(subject));

    if rows.is_empty() {
        body.push_str("<p>Keine neuen Meldungen im gewählten Zeitraum.</p>");
    } else {
        let mut current: Option<Priority> = None;
        for row in rows {
            if current != Some(row.priority) {
                if current.is_some() {
                    body.push_str("</ul>");
                }
                body.push_str(&format!("<h2>{}</h2><ul>", priority_heading(row.priority)));
                current = Some(row.priority);
            }

            body.push_str("<li>");
            match &row.url {
                Some(url) => body.push_str(&format!(
                    "<a href=\"{}\">{}</a>",
                    escape_html(url),
                    escape_html(&row.title)
                )),
                None => body.push_str(&escape_html(&row.title)),
            }
            body.push_str(&format!(" <em>({})</em>", escape_html(&row.source_name)));
            if let Some(summary) = &row.summary {
                body.push_str(&format!("<br>{}", escape_html(summary)));
            }
            body.push_str("</li>");
        }
        body.push_str("</ul>");
    }

    body.push_str("</body></html>");
    body
}

fn escape_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
