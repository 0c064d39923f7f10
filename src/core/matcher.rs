use super::cancel::CancellationToken;
use super::candidate::CandidateSelector;
use super::distance::{self, Distances};
use super::ranker::{validate_threshold, AggregateRanker, MatchResult};
use super::MatchError;
use crate::config::{ConfigError, MatcherConfig};
use crate::database::models::{Fingerprint, FingerprintRecord};
use crate::database::repositories::FingerprintStore;
use crate::database::StoreError;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// One match request. `max_avg_distance` is inclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchQuery {
    pub fingerprint: Fingerprint,
    pub max_avg_distance: f64,
    /// Truncate the ranked list to at most this many results.
    pub limit: Option<usize>,
}

impl MatchQuery {
    pub fn new(fingerprint: Fingerprint, max_avg_distance: f64) -> Self {
        Self {
            fingerprint,
            max_avg_distance,
            limit: None,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn validate(&self) -> Result<(), MatchError> {
        self.fingerprint.validate().map_err(|e| match e {
            StoreError::InvalidArgument(msg) => MatchError::InvalidArgument(msg),
            other => MatchError::Store(other),
        })?;
        validate_threshold(self.max_avg_distance)?;
        if self.limit == Some(0) {
            return Err(MatchError::InvalidArgument("limit must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// How an incoming item was resolved by [`MatchEngine::identify`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "via", content = "result", rename_all = "snake_case")]
pub enum Identification {
    ByExternalKey(FingerprintRecord),
    ByFingerprint(Vec<MatchResult>),
}

/// Near-duplicate lookup over a fingerprint store.
///
/// Holds no per-request state: every call is independent, and identical requests
/// against an unchanged store return identical lists.
pub struct MatchEngine<S> {
    store: Arc<S>,
    selector: CandidateSelector,
    config: MatcherConfig,
    workers: rayon::ThreadPool,
}

impl<S: FingerprintStore> MatchEngine<S> {
    pub fn new(store: Arc<S>, config: MatcherConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let workers = rayon::ThreadPoolBuilder::new()
            .num_threads(config.worker_threads)
            .thread_name(|i| format!("fingermatch-eval-{}", i))
            .build()?;

        Ok(Self {
            store,
            selector: CandidateSelector::new(config.duration_tolerance_ms),
            config,
            workers,
        })
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    /// A query using the configured default threshold.
    pub fn query(&self, fingerprint: Fingerprint) -> MatchQuery {
        MatchQuery::new(fingerprint, self.config.max_avg_distance)
    }

    /// Run the full pipeline. Returns every candidate within the threshold, best first;
    /// an empty list means nothing matched. Cancellation yields `Cancelled`, never a
    /// partial list.
    pub fn find_matches(
        &self,
        query: &MatchQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<MatchResult>, MatchError> {
        query.validate()?;
        if cancel.is_cancelled() {
            return Err(MatchError::Cancelled);
        }

        let started = Instant::now();
        let ranker = AggregateRanker::new(query.max_avg_distance)?;

        let candidates = self
            .selector
            .select(self.store.as_ref(), query.fingerprint.duration_ms, cancel)?;
        let candidate_count = candidates.len();

        let evaluated = self.evaluate_all(&query.fingerprint, candidates, cancel)?;

        // Ranking needs the complete evaluated set; nothing is sorted before this point.
        let mut results = ranker.rank(evaluated);
        if let Some(limit) = query.limit {
            results.truncate(limit);
        }

        log::debug!(
            "Matched {} ms fingerprint: {} candidates, {} within {:.2} in {:.2?}",
            query.fingerprint.duration_ms,
            candidate_count,
            results.len(),
            query.max_avg_distance,
            started.elapsed()
        );
        Ok(results)
    }

    /// The top-ranked match, if any.
    pub fn best_match(
        &self,
        query: &MatchQuery,
        cancel: &CancellationToken,
    ) -> Result<Option<MatchResult>, MatchError> {
        let query = query.clone().with_limit(1);
        Ok(self.find_matches(&query, cancel)?.into_iter().next())
    }

    /// Resolve an incoming item, preferring the exact external-key lookup when the
    /// caller has a key and only falling back to fingerprint matching when it is unknown.
    pub fn identify(
        &self,
        external_key: Option<&str>,
        query: &MatchQuery,
        cancel: &CancellationToken,
    ) -> Result<Identification, MatchError> {
        if let Some(key) = external_key {
            match self.store.get_by_external_key(key) {
                Ok(record) => return Ok(Identification::ByExternalKey(record)),
                Err(StoreError::NotFound(_)) => {
                    log::debug!("External key {} unknown, falling back to fingerprint match", key);
                }
                Err(e) => return Err(e.into()),
            }
        }

        self.find_matches(query, cancel)
            .map(Identification::ByFingerprint)
    }

    fn evaluate_all(
        &self,
        query: &Fingerprint,
        candidates: Vec<FingerprintRecord>,
        cancel: &CancellationToken,
    ) -> Result<Vec<(FingerprintRecord, Distances)>, MatchError> {
        self.workers.install(|| {
            candidates
                .into_par_iter()
                .map(|record| {
                    if cancel.is_cancelled() {
                        return Err(MatchError::Cancelled);
                    }
                    let distances = distance::evaluate(query, &record);
                    Ok((record, distances))
                })
                .collect()
        })
    }
}

impl<S: FingerprintStore + 'static> MatchEngine<S> {
    /// Run [`find_matches`](Self::find_matches) on the blocking pool.
    ///
    /// When the token carries a deadline the request is raced against it: if the
    /// deadline passes first the token is tripped and `Cancelled` is returned at once,
    /// even if the store call has not yet returned.
    pub async fn find_matches_async(
        self: &Arc<Self>,
        query: MatchQuery,
        cancel: CancellationToken,
    ) -> Result<Vec<MatchResult>, MatchError> {
        let engine = Arc::clone(self);
        let token = cancel.clone();
        let handle = tokio::task::spawn_blocking(move || engine.find_matches(&query, &token));

        let joined = match cancel.deadline() {
            Some(deadline) => {
                match tokio::time::timeout_at(tokio::time::Instant::from_std(deadline), handle).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        cancel.cancel();
                        log::warn!("Match request exceeded its deadline; cancelled");
                        return Err(MatchError::Cancelled);
                    }
                }
            }
            None => handle.await,
        };

        match joined {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Err(MatchError::Cancelled),
        }
    }
}
