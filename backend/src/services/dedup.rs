//! Title-similarity and paraphrase duplicate detection (stages B and C).
//!
//! Stage A (identity) and the content-hash check live in the ingestion
//! pipeline; this service covers the two fuzzy stages. Both stages resolve
//! a hit to the canonical root so `similar_to` chains never form.

use std::sync::Arc;

use chrono::{Duration, Utc};

use crate::config::DedupConfig;
use crate::utils::text::{title_prefix, truncate_chars};
use crate::utils::AppResult;

use super::embedding_client::EmbeddingProvider;
use super::embedding_index::VectorIndex;
use super::item_service::ItemService;

/// Content prefix fed into the paraphrase embedding.
pub(crate) const PARAPHRASE_CONTENT_CHARS: usize = 2000;

pub struct DedupService {
    config: DedupConfig,
    items: ItemService,
    embedder: Arc<dyn EmbeddingProvider>,
    paraphrase_index: Arc<VectorIndex>,
}

impl DedupService {
    pub fn new(
        config: DedupConfig,
        items: ItemService,
        embedder: Arc<dyn EmbeddingProvider>,
        paraphrase_index: Arc<VectorIndex>,
    ) -> Self {
        Self { config, items, embedder, paraphrase_index }
    }

    /// Stage B: same-channel title similarity.
    ///
    /// Candidates whose case-folded 50-char prefix is compatible (one is a
    /// prefix of the other) and that were published within the window are
    /// compared; the earliest one clearing the similarity threshold wins.
    /// A title that extends the other verbatim (the "— Aktualisierung"
    /// update pattern) counts as an exact match.
    pub async fn find_title_duplicate(
        &self,
        channel_id: i64,
        title: &str,
    ) -> AppResult<Option<i64>> {
        if title.trim().is_empty() {
            return Ok(None);
        }

        let since = Utc::now() - Duration::days(self.config.title_window_days);
        let candidates = self.items.title_candidates(channel_id, since).await?;

        let prefix = title_prefix(title, self.config.title_prefix_chars);
        let normalized = title.trim().to_lowercase();

        for (candidate_id, candidate_title) in candidates {
            let candidate_prefix =
                title_prefix(&candidate_title, self.config.title_prefix_chars);
            if !prefix.starts_with(&candidate_prefix) && !candidate_prefix.starts_with(&prefix) {
                continue;
            }
            let similarity =
                title_similarity(&normalized, &candidate_title.trim().to_lowercase());
            if similarity >= self.config.title_similarity_threshold {
                return Ok(Some(candidate_id));
            }
        }

        Ok(None)
    }

    /// Stage C: cross-source paraphrase lookup.
    ///
    /// Returns the embedding (for later index insertion) and, if the
    /// nearest neighbor clears the threshold, the duplicate's canonical id.
    /// An unavailable embedding service surfaces as `EmbeddingUnavailable`;
    /// the caller skips the stage.
    pub async fn find_paraphrase_duplicate(
        &self,
        title: &str,
        content: &str,
    ) -> AppResult<(Vec<f32>, Option<i64>)> {
        let vector = self
            .embedder
            .embed_paraphrase(title, truncate_chars(content, PARAPHRASE_CONTENT_CHARS))
            .await?;

        let duplicate = match self.paraphrase_index.nearest(&vector).await {
            Some((item_id, similarity)) if similarity >= self.config.paraphrase_threshold => {
                Some(self.canonical_root(item_id).await?)
            }
            _ => None,
        };

        Ok((vector, duplicate))
    }

    /// Follow a `similar_to` back-reference to its canonical item, so new
    /// duplicates always point at the root.
    pub async fn canonical_root(&self, item_id: i64) -> AppResult<i64> {
        let item = self.items.get(item_id).await?;
        Ok(item.similar_to.unwrap_or(item.id))
    }
}

/// Normalized Levenshtein similarity, with verbatim extension treated as
/// identical.
fn title_similarity(a: &str, b: &str) -> f64 {
    if a.starts_with(b) || b.starts_with(a) {
        return 1.0;
    }
    strsim::normalized_levenshtein(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title_similarity_extension_is_exact() {
        let a = "hessen kürzt kita-mittel drastisch";
        let b = "hessen kürzt kita-mittel drastisch — aktualisierung";
        assert_eq!(title_similarity(a, b), 1.0);
    }

    #[test]
    fn test_title_similarity_small_edit() {
        let a = "hessen kürzt kita-mittel drastisch";
        let b = "hessen kürzt kita-mittel drastisch!";
        assert!(title_similarity(a, b) >= 0.85);
    }

    #[test]
    fn test_title_similarity_different_titles() {
        let a = "hessen kürzt kita-mittel drastisch";
        let b = "neue pflegestatistik für hessen vorgestellt";
        assert!(title_similarity(a, b) < 0.85);
    }
}
