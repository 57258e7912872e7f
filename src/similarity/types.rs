use serde::{Deserialize, Serialize};

use crate::doc_id::DocumentId;

/// One row of a similarity query response.
///
/// `score` is only meaningful relative to the other rows of the same response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityResult {
    pub id: DocumentId,
    pub title: String,
    pub score: f64,
}

impl SimilarityResult {
    pub fn new(id: impl Into<DocumentId>, title: impl Into<String>, score: f64) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            score,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreRange {
    pub min: f64,
    pub max: f64,
}

impl ScoreRange {
    /// `None` for an empty batch.
    pub fn of(results: &[SimilarityResult]) -> Option<ScoreRange> {
        Self::of_scores(results.iter().map(|r| r.score))
    }

    /// Non-finite scores are ignored.
    pub fn of_scores(scores: impl IntoIterator<Item = f64>) -> Option<ScoreRange> {
        let mut scores = scores.into_iter().filter(|s| s.is_finite());
        let first = scores.next()?;

        Some(scores.fold(ScoreRange { min: first, max: first }, |range, s| ScoreRange {
            min: range.min.min(s),
            max: range.max.max(s),
        }))
    }
}

/// The results of one refresh, ordered by descending score.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultGeneration {
    pub token: u64,
    pub results: Vec<SimilarityResult>,
    pub range: Option<ScoreRange>,
}

impl ResultGeneration {
    pub fn new(token: u64, mut results: Vec<SimilarityResult>) -> Self {
        // stable, so equal scores keep server order
        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        let range = ScoreRange::of(&results);

        Self {
            token,
            results,
            range,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}
