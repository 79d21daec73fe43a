//! Linear multi-output classification model.
//!
//! A trained logistic head per output over the 768-dim retrieval
//! embedding: one relevance head, one head per working group, one head per
//! priority bucket. Weights are exported by the training pipeline as a
//! JSON file and loaded at startup; a missing or unreadable file leaves
//! the worker in the "model unavailable" mode where every item gets the
//! `unknown` retry bucket.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::models::Priority;
use crate::utils::{AppError, AppResult};

#[derive(Debug, Clone, Deserialize)]
pub struct LinearHead {
    pub weights: Vec<f32>,
    pub bias: f32,
}

impl LinearHead {
    fn raw_score(&self, embedding: &[f32]) -> f64 {
        let dot: f64 = self
            .weights
            .iter()
            .zip(embedding.iter())
            .map(|(w, x)| (*w as f64) * (*x as f64))
            .sum();
        dot + self.bias as f64
    }

    fn probability(&self, embedding: &[f32]) -> f64 {
        sigmoid(self.raw_score(embedding))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClassifierModel {
    pub relevance: LinearHead,
    /// One head per working-group tag
    pub groups: BTreeMap<String, LinearHead>,
    /// One head per priority bucket (high/medium/low/none)
    pub priority: BTreeMap<String, LinearHead>,
}

/// The three classifier outputs for one item.
#[derive(Debug, Clone)]
pub struct ModelOutput {
    /// P(relevant) in [0, 1]
    pub relevance: f64,
    pub group_confidences: BTreeMap<String, f64>,
    pub priority: Priority,
    pub priority_confidence: f64,
}

impl ClassifierModel {
    pub fn load(path: impl AsRef<Path>) -> AppResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            AppError::ModelUnavailable(format!(
                "cannot read weights file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        let model: ClassifierModel = serde_json::from_str(&raw).map_err(|e| {
            AppError::ModelUnavailable(format!("cannot parse weights file: {}", e))
        })?;
        if model.priority.is_empty() {
            return Err(AppError::ModelUnavailable("weights file has no priority heads".into()));
        }
        Ok(model)
    }

    pub fn predict(&self, embedding: &[f32]) -> ModelOutput {
        let relevance = self.relevance.probability(embedding);

        let group_confidences: BTreeMap<String, f64> = self
            .groups
            .iter()
            .map(|(name, head)| (name.clone(), head.probability(embedding)))
            .collect();

        // softmax over the priority heads
        let raw: Vec<(&String, f64)> =
            self.priority.iter().map(|(name, head)| (name, head.raw_score(embedding))).collect();
        let max = raw.iter().map(|(_, s)| *s).fold(f64::NEG_INFINITY, f64::max);
        let exp: Vec<(&String, f64)> =
            raw.into_iter().map(|(name, s)| (name, (s - max).exp())).collect();
        let total: f64 = exp.iter().map(|(_, e)| e).sum();

        let (best_name, best_exp) = exp
            .iter()
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(name, e)| ((*name).clone(), *e))
            .unwrap_or_else(|| ("none".to_string(), 1.0));

        ModelOutput {
            relevance,
            group_confidences,
            priority: Priority::parse(&best_name).unwrap_or(Priority::None),
            priority_confidence: if total > 0.0 { best_exp / total } else { 0.0 },
        }
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}
