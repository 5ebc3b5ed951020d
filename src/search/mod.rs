//! Image similarity search over the product catalog.
//!
//! # Architecture
//!
//! - `pipeline`: Bounded concurrent fetch/extract/score fan-out and ranking
//! - `service`: Ties the pipeline to the catalog and configured options

mod pipeline;
mod service;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;

use crate::catalog::{Candidate, CatalogError};
use crate::embedding::EmbeddingError;
use crate::fetch::{FetchError, RetryPolicy};
use crate::similarity::ScoreError;

#[cfg(test)]
pub use pipeline::rank_results;
pub use pipeline::SearchPipeline;
pub use service::SearchService;

/// Default minimum similarity for a product to be returned
pub const DEFAULT_THRESHOLD: f32 = 0.4;

/// Default number of candidates processed at once
pub const DEFAULT_MAX_CONCURRENCY: usize = 8;

/// Per-request search settings. Fixed for the duration of one search.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOptions {
    /// Inclusive lower bound on the similarity score
    pub threshold: f32,
    pub top_k: Option<usize>,
    pub max_concurrency: usize,
    /// Overall budget; once exceeded the search returns what it has
    pub timeout: Option<Duration>,
    pub retry: RetryPolicy,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            top_k: None,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            timeout: None,
            retry: RetryPolicy::none(),
        }
    }
}

/// A candidate that passed the threshold, with its score.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredResult<M> {
    pub candidate: Candidate<M>,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedCandidate {
    pub id: u64,
    pub cause: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchReport<M> {
    /// Sorted by score, highest first
    pub results: Vec<ScoredResult<M>>,
    /// Candidates that ran to completion, scored or skipped
    pub evaluated: usize,
    pub skipped: Vec<SkippedCandidate>,
    /// Cancelled or timed out before every candidate was evaluated
    pub cancelled: bool,
}

/// Why a single candidate was left out. Never fails the whole search.
#[derive(Debug, thiserror::Error)]
pub enum CandidateError {
    #[error("no image url")]
    NoImage,

    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error("scoring failed: {0}")]
    Score(#[from] ScoreError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("worker failed: {0}")]
    Worker(String),
}

pub enum CandidateOutcome {
    Scored(f32),
    Skipped(CandidateError),
}

/// Per-candidate progress, used for tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateState {
    Pending,
    Fetching,
    Extracting,
    Scored,
    Skipped,
}

impl fmt::Display for CandidateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CandidateState::Pending => "pending",
            CandidateState::Fetching => "fetching",
            CandidateState::Extracting => "extracting",
            CandidateState::Scored => "scored",
            CandidateState::Skipped => "skipped",
        };
        f.write_str(name)
    }
}

/// Errors that fail a whole search request.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("invalid query image: {0}")]
    InvalidQueryImage(#[source] EmbeddingError),

    #[error("catalog unavailable: {0}")]
    CatalogUnavailable(#[source] CatalogError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl SearchError {
    /// Stable cause code for API consumers.
    pub fn code(&self) -> &'static str {
        match self {
            SearchError::InvalidQueryImage(_) => "invalid_query_image",
            SearchError::CatalogUnavailable(_) => "catalog_unavailable",
            SearchError::Internal(_) => "internal",
        }
    }
}

/// Cooperative cancellation shared between a request and its workers.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once `cancel` has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // the sender lives as long as self, so this only returns on cancel
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}
