//! Read-only stakeholder directory.
//!
//! Maps social handles to organization, category and party. Injected into
//! the rule engine for the implicit mention boosts; the core never writes
//! to it.

use sqlx::SqlitePool;

use crate::models::Stakeholder;
use crate::utils::AppResult;

#[derive(Clone)]
pub struct StakeholderDirectory {
    pool: SqlitePool,
}

impl StakeholderDirectory {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn lookup(&self, handle: &str) -> AppResult<Option<Stakeholder>> {
        Ok(sqlx::query_as("SELECT * FROM stakeholders WHERE handle = ?")
            .bind(handle.to_lowercase())
            .fetch_optional(&self.pool)
            .await?)
    }

    /// Resolve a batch of mentioned handles to directory entries; unknown
    /// handles are silently skipped.
    pub async fn resolve_mentions(&self, handles: &[String]) -> AppResult<Vec<Stakeholder>> {
        let mut resolved = Vec::new();
        for handle in handles {
            if let Some(entry) = self.lookup(handle).await? {
                resolved.push(entry);
            }
        }
        Ok(resolved)
    }
}
