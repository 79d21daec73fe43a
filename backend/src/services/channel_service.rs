//! Channel and source store access plus connector config validation.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;

use crate::connectors::ConnectorSet;
use crate::models::{Channel, ConnectorKind, Source, ValidationOutcome};
use crate::utils::{AppError, AppResult};

#[derive(Clone)]
pub struct ChannelService {
    pool: SqlitePool,
    connectors: Arc<ConnectorSet>,
}

impl ChannelService {
    pub fn new(pool: SqlitePool, connectors: Arc<ConnectorSet>) -> Self {
        Self { pool, connectors }
    }

    pub async fn get(&self, channel_id: i64) -> AppResult<Channel> {
        sqlx::query_as("SELECT * FROM channels WHERE id = ?")
            .bind(channel_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Channel {} not found", channel_id)))
    }

    pub async fn list(&self) -> AppResult<Vec<Channel>> {
        Ok(sqlx::query_as("SELECT * FROM channels ORDER BY id")
            .fetch_all(&self.pool)
            .await?)
    }

    pub async fn list_enabled(&self) -> AppResult<Vec<Channel>> {
        Ok(sqlx::query_as("SELECT * FROM channels WHERE enabled = TRUE ORDER BY id")
            .fetch_all(&self.pool)
            .await?)
    }

    pub async fn list_sources(&self) -> AppResult<Vec<Source>> {
        Ok(sqlx::query_as("SELECT * FROM sources ORDER BY name")
            .fetch_all(&self.pool)
            .await?)
    }

    /// Enabled channels whose poll interval has elapsed.
    pub async fn due_channels(&self, now: DateTime<Utc>) -> AppResult<Vec<Channel>> {
        let channels = self.list_enabled().await?;
        Ok(channels
            .into_iter()
            .filter(|c| match c.last_poll {
                None => true,
                Some(last) => last + Duration::minutes(c.interval_minutes) <= now,
            })
            .collect())
    }

    /// Record the outcome of a fetch: poll timestamp always moves forward,
    /// the error string reflects the latest attempt.
    pub async fn record_poll(
        &self,
        channel_id: i64,
        error: Option<&str>,
    ) -> AppResult<()> {
        sqlx::query("UPDATE channels SET last_poll = ?, last_error = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(error)
            .bind(channel_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Dispatch a configuration map to the matching driver's `validate`.
    pub fn validate_config(
        &self,
        kind: ConnectorKind,
        config: &HashMap<String, serde_json::Value>,
    ) -> ValidationOutcome {
        match self.connectors.get(kind) {
            Some(connector) => connector.validate(config),
            None => ValidationOutcome::error(format!("No driver for kind '{}'", kind.as_str())),
        }
    }
}
