//! In-memory vector indexes backed by the store's BLOB side tables.
//!
//! Two separate indexes exist, one per embedding space (paraphrase and
//! retrieval); they are keyed by item id and never mixed. Reads are
//! concurrent, writes serialized; both hit the side table first so the
//! in-memory map can always be rebuilt from the store.

use std::collections::HashMap;

use sqlx::SqlitePool;
use tokio::sync::RwLock;
use tracing::info;

use crate::utils::AppResult;

pub struct VectorIndex {
    name: &'static str,
    table: &'static str,
    pool: SqlitePool,
    vectors: RwLock<HashMap<i64, Vec<f32>>>,
}

impl VectorIndex {
    pub fn paraphrase(pool: SqlitePool) -> Self {
        Self {
            name: "paraphrase",
            table: "item_embeddings_paraphrase",
            pool,
            vectors: RwLock::new(HashMap::new()),
        }
    }

    pub fn retrieval(pool: SqlitePool) -> Self {
        Self {
            name: "retrieval",
            table: "item_embeddings_retrieval",
            pool,
            vectors: RwLock::new(HashMap::new()),
        }
    }

    /// Rebuild the in-memory map from the side table. Takes the write lock
    /// for the whole load.
    pub async fn load(&self) -> AppResult<usize> {
        let rows: Vec<(i64, Vec<u8>)> =
            sqlx::query_as(&format!("SELECT item_id, vector FROM {}", self.table))
                .fetch_all(&self.pool)
                .await?;

        let mut map = self.vectors.write().await;
        map.clear();
        for (item_id, blob) in rows {
            map.insert(item_id, decode_vector(&blob));
        }
        info!("Loaded {} vectors into the {} index", map.len(), self.name);
        Ok(map.len())
    }

    pub async fn add(&self, item_id: i64, vector: Vec<f32>) -> AppResult<()> {
        sqlx::query(&format!(
            "INSERT OR REPLACE INTO {} (item_id, vector) VALUES (?, ?)",
            self.table
        ))
        .bind(item_id)
        .bind(encode_vector(&vector))
        .execute(&self.pool)
        .await?;

        self.vectors.write().await.insert(item_id, vector);
        Ok(())
    }

    pub async fn add_batch(&self, entries: Vec<(i64, Vec<f32>)>) -> AppResult<()> {
        for (item_id, vector) in &entries {
            sqlx::query(&format!(
                "INSERT OR REPLACE INTO {} (item_id, vector) VALUES (?, ?)",
                self.table
            ))
            .bind(item_id)
            .bind(encode_vector(vector))
            .execute(&self.pool)
            .await?;
        }
        let mut map = self.vectors.write().await;
        for (item_id, vector) in entries {
            map.insert(item_id, vector);
        }
        Ok(())
    }

    pub async fn remove(&self, item_id: i64) -> AppResult<()> {
        sqlx::query(&format!("DELETE FROM {} WHERE item_id = ?", self.table))
            .bind(item_id)
            .execute(&self.pool)
            .await?;
        self.vectors.write().await.remove(&item_id);
        Ok(())
    }

    pub async fn remove_batch(&self, item_ids: &[i64]) -> AppResult<()> {
        for item_id in item_ids {
            sqlx::query(&format!("DELETE FROM {} WHERE item_id = ?", self.table))
                .bind(item_id)
                .execute(&self.pool)
                .await?;
        }
        let mut map = self.vectors.write().await;
        for item_id in item_ids {
            map.remove(item_id);
        }
        Ok(())
    }

    /// Nearest neighbor by cosine similarity; linear scan over the map.
    pub async fn nearest(&self, query: &[f32]) -> Option<(i64, f64)> {
        self.top_k(query, 1).await.into_iter().next()
    }

    /// The `k` most similar entries, best first.
    pub async fn top_k(&self, query: &[f32], k: usize) -> Vec<(i64, f64)> {
        let map = self.vectors.read().await;
        let mut scored: Vec<(i64, f64)> = map
            .iter()
            .map(|(item_id, vector)| (*item_id, cosine_similarity(query, vector)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(k);
        scored
    }

    pub async fn contains(&self, item_id: i64) -> bool {
        self.vectors.read().await.contains_key(&item_id)
    }

    pub async fn item_ids(&self) -> Vec<i64> {
        self.vectors.read().await.keys().copied().collect()
    }

    pub async fn len(&self) -> usize {
        self.vectors.read().await.len()
    }
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

fn decode_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += (*x as f64) * (*y as f64);
        norm_a += (*x as f64) * (*x as f64);
        norm_b += (*y as f64) * (*y as f64);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-9);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-9);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-9);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn test_vector_roundtrip() {
        let vector = vec![0.25f32, -1.5, 3.75];
        assert_eq!(decode_vector(&encode_vector(&vector)), vector);
    }

    #[tokio::test]
    async fn test_top_k_orders_by_similarity() {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("pool");
        sqlx::query(
            "CREATE TABLE item_embeddings_retrieval (item_id INTEGER PRIMARY KEY, vector BLOB NOT NULL)",
        )
        .execute(&pool)
        .await
        .expect("table");

        let index = VectorIndex::retrieval(pool);
        index.add(1, vec![1.0, 0.0]).await.expect("add");
        index.add(2, vec![0.8, 0.6]).await.expect("add");
        index.add(3, vec![0.0, 1.0]).await.expect("add");

        let top = index.top_k(&[1.0, 0.0], 2).await;
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].0, 1);
        assert_eq!(top[1].0, 2);
        assert!(top[0].1 > top[1].1);
    }
}
