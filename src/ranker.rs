//! Brute-force cosine ranking over scanned rows.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::codec::decode_vector;
use crate::store::StoredRow;

/// One ranked hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityMatch {
    pub entity_id: String,
    /// Cosine similarity, nominally in `[-1, 1]`.
    pub similarity: f32,
}

/// Ranked hits plus bookkeeping about rows that could not be scored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RankOutcome {
    pub matches: Vec<SimilarityMatch>,
    /// Rows whose blob length is not a multiple of four.
    pub skipped_invalid: usize,
    /// Rows whose vector length differs from the query.
    pub skipped_mismatched: usize,
    /// Rows whose score came out NaN.
    pub skipped_nan: usize,
}

impl RankOutcome {
    pub fn skipped(&self) -> usize {
        self.skipped_invalid + self.skipped_mismatched + self.skipped_nan
    }
}

/// Cosine similarity accumulated in f64.
///
/// Returns `0.0` when the lengths differ, either slice is empty, or either
/// magnitude is zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())) as f32
}

/// Streaming top-k collector fed one row at a time from a backend scan.
#[derive(Debug)]
pub struct Ranker<'q> {
    query: &'q [f32],
    k: usize,
    outcome: RankOutcome,
}

impl<'q> Ranker<'q> {
    pub fn new(query: &'q [f32], k: usize) -> Self {
        Self {
            query,
            k,
            outcome: RankOutcome::default(),
        }
    }

    /// Decodes and scores one row.
    pub fn push(&mut self, row: StoredRow<'_>) {
        if self.k == 0 {
            return;
        }
        let Some(stored) = decode_vector(row.raw) else {
            self.outcome.skipped_invalid += 1;
            return;
        };
        if stored.len() != self.query.len() {
            self.outcome.skipped_mismatched += 1;
            return;
        }
        let similarity = cosine_similarity(self.query, &stored);
        if similarity.is_nan() {
            self.outcome.skipped_nan += 1;
            return;
        }
        self.outcome.matches.push(SimilarityMatch {
            entity_id: row.entity_id.to_string(),
            similarity,
        });
    }

    /// Sorts descending and keeps the first `k`. `sort_by` is stable, so equal
    /// scores stay in scan order.
    pub fn finish(mut self) -> RankOutcome {
        self.outcome.matches.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(Ordering::Equal)
        });
        self.outcome.matches.truncate(self.k);
        self.outcome
    }
}

/// Ranks `rows` against `query` and returns at most `k` matches.
pub fn rank<'a, I>(query: &[f32], rows: I, k: usize) -> RankOutcome
where
    I: IntoIterator<Item = StoredRow<'a>>,
{
    let mut ranker = Ranker::new(query, k);
    for row in rows {
        ranker.push(row);
    }
    ranker.finish()
}
