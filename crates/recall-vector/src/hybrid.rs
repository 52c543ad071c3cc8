//! Positional blending of keyword and vector result lists.
//!
//! Keyword relevance and cosine similarity are not on comparable scales, so
//! only rank position is blended. The item at index `i` of a list of length
//! `n` scores `1 - i/n`; the keyword list contributes `(1 - w)` of that and
//! the vector list `w`. Items found by both lists add their contributions.

use std::collections::HashMap;
use std::hash::Hash;

use recall_core::error::{RecallError, Result};

/// Blends two best-first ranked lists by positional score decay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HybridRanker {
    semantic_weight: f64,
}

impl Default for HybridRanker {
    fn default() -> Self {
        Self { semantic_weight: 0.5 }
    }
}

impl HybridRanker {
    /// `semantic_weight` must lie within `[0, 1]`.
    pub fn new(semantic_weight: f64) -> Result<Self> {
        if semantic_weight.is_nan() || !(0.0..=1.0).contains(&semantic_weight) {
            return Err(RecallError::InvalidWeight(semantic_weight));
        }
        Ok(Self { semantic_weight })
    }

    pub fn semantic_weight(&self) -> f64 {
        self.semantic_weight
    }

    /// Score of the item at index `i` in a list of length `n`.
    pub fn positional_weight(i: usize, n: usize) -> f64 {
        if n == 0 {
            return 0.0;
        }
        1.0 - (i as f64) / (n as f64)
    }

    /// Merge `text` and `vector` (each best-first) into the top `limit`
    /// keys by summed score.
    ///
    /// Equal scores keep the item seen first, keyword list before vector
    /// list, so the output is deterministic.
    pub fn rank<K>(&self, text: &[K], vector: &[K], limit: usize) -> Vec<(K, f64)>
    where
        K: Eq + Hash + Clone,
    {
        let mut scores: HashMap<K, (f64, usize)> = HashMap::with_capacity(text.len() + vector.len());
        let mut seen = 0usize;

        let text_weight = 1.0 - self.semantic_weight;
        for (i, key) in text.iter().enumerate() {
            let contribution = text_weight * Self::positional_weight(i, text.len());
            let slot = scores.entry(key.clone()).or_insert_with(|| {
                seen += 1;
                (0.0, seen)
            });
            slot.0 += contribution;
        }

        for (i, key) in vector.iter().enumerate() {
            let contribution = self.semantic_weight * Self::positional_weight(i, vector.len());
            let slot = scores.entry(key.clone()).or_insert_with(|| {
                seen += 1;
                (0.0, seen)
            });
            slot.0 += contribution;
        }

        let mut ranked: Vec<(K, f64, usize)> = scores
            .into_iter()
            .map(|(key, (score, first_seen))| (key, score, first_seen))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.2.cmp(&b.2)));
        ranked.truncate(limit);
        ranked.into_iter().map(|(key, score, _)| (key, score)).collect()
    }
}
