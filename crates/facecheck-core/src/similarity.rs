//! Pairwise embedding comparison under cosine similarity and Euclidean distance.

use crate::embedding::Embedding;
use serde::Serialize;

/// Decision thresholds, tuned for EdgeFace.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    /// Minimum cosine similarity for a match. Higher = stricter.
    pub cosine: f32,
    /// Maximum Euclidean distance for a match. Lower = stricter.
    pub euclidean: f32,
}

impl Thresholds {
    pub const DEFAULT_COSINE: f32 = 0.4;
    pub const DEFAULT_EUCLIDEAN: f32 = 1.0;
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            cosine: Self::DEFAULT_COSINE,
            euclidean: Self::DEFAULT_EUCLIDEAN,
        }
    }
}

/// Outcome of comparing two embeddings.
///
/// Both metrics are reported; only the cosine criterion decides `verified`.
/// The Euclidean flag is informational.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Verdict {
    #[serde(rename = "cosine_score")]
    pub cosine_similarity: f32,
    pub cosine_threshold: f32,
    #[serde(rename = "l2_distance")]
    pub euclidean_distance: f32,
    #[serde(rename = "l2_threshold")]
    pub euclidean_threshold: f32,
    #[serde(rename = "match_cosine")]
    pub cosine_match: bool,
    #[serde(rename = "match_l2")]
    pub euclidean_match: bool,
    pub verified: bool,
}

/// Compares normalized embeddings against fixed thresholds.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimilarityEvaluator {
    pub thresholds: Thresholds,
}

impl SimilarityEvaluator {
    pub fn new(thresholds: Thresholds) -> Self {
        Self { thresholds }
    }

    pub fn compare(&self, a: &Embedding, b: &Embedding) -> Verdict {
        let cosine_similarity = a.similarity(b);
        let euclidean_distance = a.euclidean_distance(b);
        let cosine_match = cosine_similarity >= self.thresholds.cosine;

        Verdict {
            cosine_similarity,
            cosine_threshold: self.thresholds.cosine,
            euclidean_distance,
            euclidean_threshold: self.thresholds.euclidean,
            cosine_match,
            euclidean_match: euclidean_distance <= self.thresholds.euclidean,
            verified: cosine_match,
        }
    }
}
