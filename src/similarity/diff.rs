use std::collections::HashSet;

use super::types::{ScoreRange, SimilarityResult};
use crate::doc_id::DocumentId;

/// Delta between the rendered generation and a freshly fetched one.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultDiff {
    /// In `next` but not in `previous`, in `next` order.
    pub added: Vec<SimilarityResult>,
    /// In `previous` but not in `next`, in `previous` order.
    pub removed: Vec<SimilarityResult>,
    /// Range of `next` only; `None` when `next` is empty.
    pub range: Option<ScoreRange>,
}

impl ResultDiff {
    pub fn min_score(&self) -> Option<f64> {
        self.range.map(|r| r.min)
    }

    pub fn max_score(&self) -> Option<f64> {
        self.range.map(|r| r.max)
    }

    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Identity is the document id; positions and scores are ignored.
pub fn diff(previous: &[SimilarityResult], next: &[SimilarityResult]) -> ResultDiff {
    let previous_ids: HashSet<&DocumentId> = previous.iter().map(|r| &r.id).collect();
    let next_ids: HashSet<&DocumentId> = next.iter().map(|r| &r.id).collect();

    let added = next
        .iter()
        .filter(|r| !previous_ids.contains(&r.id))
        .cloned()
        .collect();

    let removed = previous
        .iter()
        .filter(|r| !next_ids.contains(&r.id))
        .cloned()
        .collect();

    ResultDiff {
        added,
        removed,
        range: ScoreRange::of(next),
    }
}
