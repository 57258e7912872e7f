//! Similarity results and generation bookkeeping.
//!
//! - `types`: result rows as returned by the similarity API
//! - `diff`: previous vs. next generation delta

mod diff;
mod types;

pub use diff::{diff, ResultDiff};
pub use types::{ResultGeneration, ScoreRange, SimilarityResult};
