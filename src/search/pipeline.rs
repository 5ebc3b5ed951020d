//! Concurrent scoring of catalog candidates against a query image.
//!
//! Each candidate is fetched, embedded and scored independently. Work is
//! spread over a `JoinSet` bounded by a semaphore; embedding runs on the
//! blocking pool. A failing candidate is recorded and skipped, and only the
//! final ranking waits for every task.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use super::{
    CancelToken, CandidateError, CandidateOutcome, CandidateState, ScoredResult, SearchError,
    SearchOptions, SearchReport, SkippedCandidate,
};
use crate::catalog::Candidate;
use crate::embedding::{EmbeddingExtractor, FeatureVector};
use crate::fetch::{fetch_with_retry, ImageFetcher, RetryPolicy};
use crate::similarity::cosine_similarity;

pub struct SearchPipeline<F> {
    extractor: Arc<dyn EmbeddingExtractor>,
    fetcher: Arc<F>,
}

enum Event<T> {
    Stop,
    Joined(Option<T>),
}

async fn deadline_reached(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Fetch, embed and score one candidate image.
async fn evaluate<F: ImageFetcher>(
    fetcher: &F,
    extractor: Arc<dyn EmbeddingExtractor>,
    query: Arc<FeatureVector>,
    id: u64,
    url: &str,
    retry: RetryPolicy,
) -> Result<f32, CandidateError> {
    log::debug!("candidate {id}: {}", CandidateState::Fetching);
    let image = fetch_with_retry(fetcher, url, retry).await?;

    log::debug!("candidate {id}: {}", CandidateState::Extracting);
    tokio::task::spawn_blocking(move || {
        // `image` is dropped when this closure returns, deleting the file
        let bytes = image.bytes()?;
        let vector = extractor.extract(&bytes)?;
        Ok::<f32, CandidateError>(cosine_similarity(&query, &vector)?)
    })
    .await
    .map_err(|e| CandidateError::Worker(e.to_string()))?
}

/// Keep results at or above `threshold`, best first, at most `top_k`.
///
/// Equal scores keep their input order.
pub fn rank_results<M>(
    results: Vec<ScoredResult<M>>,
    threshold: f32,
    top_k: Option<usize>,
) -> Vec<ScoredResult<M>> {
    let mut results: Vec<_> = results
        .into_iter()
        .filter(|r| r.score >= threshold)
        .collect();

    // stable sort
    results.sort_by(|a, b| b.score.total_cmp(&a.score));

    if let Some(top_k) = top_k {
        results.truncate(top_k);
    }

    results
}

impl<F: ImageFetcher> SearchPipeline<F> {
    pub fn new(extractor: Arc<dyn EmbeddingExtractor>, fetcher: Arc<F>) -> Self {
        Self { extractor, fetcher }
    }

    pub fn extractor(&self) -> &Arc<dyn EmbeddingExtractor> {
        &self.extractor
    }

    /// Embed the query image. Failure here fails the whole request.
    pub async fn embed_query(&self, image: Vec<u8>) -> Result<Arc<FeatureVector>, SearchError> {
        let extractor = self.extractor.clone();
        tokio::task::spawn_blocking(move || extractor.extract(&image))
            .await
            .map_err(|e| SearchError::Internal(format!("query embedding task failed: {e}")))?
            .map(Arc::new)
            .map_err(SearchError::InvalidQueryImage)
    }

    /// Embed the query image, then rank `candidates` against it.
    ///
    /// `SearchService` splits these steps to read the catalog in between.
    #[cfg(test)]
    pub async fn search<M>(
        &self,
        query_image: Vec<u8>,
        candidates: Vec<Candidate<M>>,
        options: &SearchOptions,
        cancel: &CancelToken,
    ) -> Result<SearchReport<M>, SearchError> {
        let query = self.embed_query(query_image).await?;
        Ok(self.rank(query, candidates, options, cancel).await)
    }

    /// Score every candidate against `query` and rank the survivors.
    ///
    /// Per-candidate failures end up in `SearchReport::skipped`. On
    /// cancellation or timeout no further candidates are started, running
    /// ones are aborted, and whatever completed is ranked.
    pub async fn rank<M>(
        &self,
        query: Arc<FeatureVector>,
        candidates: Vec<Candidate<M>>,
        options: &SearchOptions,
        cancel: &CancelToken,
    ) -> SearchReport<M> {
        let started = Instant::now();
        let total = candidates.len();
        let deadline = options
            .timeout
            .map(|timeout| tokio::time::Instant::now() + timeout);
        let semaphore = Arc::new(Semaphore::new(options.max_concurrency.max(1)));

        let mut outcomes: Vec<Option<CandidateOutcome>> = (0..total).map(|_| None).collect();
        let mut tasks = JoinSet::new();
        let mut cancelled = false;

        for (index, candidate) in candidates.iter().enumerate() {
            log::debug!("candidate {}: {}", candidate.id, CandidateState::Pending);

            let Some(url) = candidate.primary_image() else {
                outcomes[index] = Some(CandidateOutcome::Skipped(CandidateError::NoImage));
                continue;
            };

            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                _ = deadline_reached(deadline) => None,
                permit = semaphore.clone().acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                cancelled = true;
                break;
            };

            let fetcher = self.fetcher.clone();
            let extractor = self.extractor.clone();
            let query = query.clone();
            let url = url.to_string();
            let id = candidate.id;
            let retry = options.retry;

            tasks.spawn(async move {
                let _permit = permit;
                let outcome =
                    match evaluate(fetcher.as_ref(), extractor, query, id, &url, retry).await {
                        Ok(score) => CandidateOutcome::Scored(score),
                        Err(err) => CandidateOutcome::Skipped(err),
                    };
                (index, outcome)
            });
        }

        if cancelled {
            tasks.abort_all();
        }

        // join barrier
        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled(), if !cancelled => Event::Stop,
                _ = deadline_reached(deadline), if !cancelled => Event::Stop,
                joined = tasks.join_next() => Event::Joined(joined),
            };

            match event {
                Event::Stop => {
                    cancelled = true;
                    tasks.abort_all();
                }
                Event::Joined(None) => break,
                Event::Joined(Some(Ok((index, outcome)))) => outcomes[index] = Some(outcome),
                Event::Joined(Some(Err(err))) if err.is_cancelled() => {}
                Event::Joined(Some(Err(err))) => log::error!("candidate task panicked: {err}"),
            }
        }

        let mut scored = Vec::new();
        let mut skipped = Vec::new();
        let mut evaluated = 0;
        for (candidate, outcome) in candidates.into_iter().zip(outcomes) {
            match outcome {
                Some(CandidateOutcome::Scored(score)) => {
                    evaluated += 1;
                    log::debug!(
                        "candidate {}: {} {score:.4}",
                        candidate.id,
                        CandidateState::Scored
                    );
                    scored.push(ScoredResult { candidate, score });
                }
                Some(CandidateOutcome::Skipped(err)) => {
                    evaluated += 1;
                    log::warn!(
                        "candidate {}: {}: {err}",
                        candidate.id,
                        CandidateState::Skipped
                    );
                    skipped.push(SkippedCandidate {
                        id: candidate.id,
                        cause: err.to_string(),
                    });
                }
                None => {}
            }
        }

        let results = rank_results(scored, options.threshold, options.top_k);

        log::info!(
            "search: {total} candidates, {evaluated} evaluated, {} matched, {} skipped, cancelled={cancelled}, took {:?}",
            results.len(),
            skipped.len(),
            started.elapsed()
        );

        SearchReport {
            results,
            evaluated,
            skipped,
            cancelled,
        }
    }
}
