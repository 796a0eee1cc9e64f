//! Bounded worker pool that verifies a whole query map.
use super::{CancelToken, QueryRunner, Reporter, VerificationOutcome, Verifier};
use crate::error::{QueryFailure, VerifyError, VerifyFailure};
use crate::metadata::{Metadata, QueryMap};
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread;

/// Knobs for [`verify_all`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOptions {
    /// Maximum queries in flight at once.
    pub workers: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        BatchOptions {
            workers: default_workers(),
        }
    }
}

/// One worker per available CPU.
pub fn default_workers() -> usize {
    thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

/// Final state of one query in a run.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    Verified(VerificationOutcome),
    Skipped { platform: String },
    Failed(VerifyError),
}

impl QueryResult {
    fn from_verify(result: Result<VerificationOutcome, VerifyError>) -> Self {
        match result {
            Ok(outcome) => match outcome.incompatible_platform {
                Some(platform) => QueryResult::Skipped { platform },
                None => QueryResult::Verified(outcome),
            },
            Err(err) => QueryResult::Failed(err),
        }
    }
}

/// Aggregate result of verifying a query map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VerifyReport {
    /// Per-query results, keyed and ordered by name.
    pub results: BTreeMap<String, QueryResult>,
    pub verified: usize,
    pub skipped: usize,
    pub errored: usize,
    /// Queries never dispatched because the run was cancelled.
    pub not_run: usize,
    pub cancelled: bool,
}

impl VerifyReport {
    fn from_results(results: BTreeMap<String, QueryResult>, total: usize) -> Self {
        let mut report = VerifyReport {
            not_run: total.saturating_sub(results.len()),
            ..VerifyReport::default()
        };
        for result in results.values() {
            match result {
                QueryResult::Verified(_) => report.verified += 1,
                QueryResult::Skipped { .. } => report.skipped += 1,
                QueryResult::Failed(err) => {
                    report.errored += 1;
                    if *err == VerifyError::Cancelled {
                        report.cancelled = true;
                    }
                }
            }
        }
        if report.not_run > 0 {
            report.cancelled = true;
        }
        report.results = results;
        report
    }

    /// Number of queries the run was asked to verify.
    pub fn total(&self) -> usize {
        self.results.len() + self.not_run
    }

    /// Failed queries in name order.
    pub fn failures(&self) -> Vec<QueryFailure> {
        self.results
            .iter()
            .filter_map(|(name, result)| match result {
                QueryResult::Failed(error) => Some(QueryFailure {
                    name: name.clone(),
                    error: error.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    /// Overall verdict: any failure, a cancelled run, or nothing verified is
    /// an error.
    pub fn check(&self) -> Result<(), VerifyFailure> {
        let failure = VerifyFailure {
            failures: self.failures(),
            none_verified: self.verified == 0,
            cancelled: self.cancelled,
        };
        if failure.failures.is_empty() && !failure.none_verified && !failure.cancelled {
            return Ok(());
        }
        Err(failure)
    }
}

/// Verify every query in `queries` on up to `options.workers` threads.
///
/// Each query runs exactly once. Once `cancel` fires, workers stop taking
/// new queries and in-flight runs are terminated by the runner.
pub fn verify_all<R: QueryRunner>(
    verifier: &Verifier<R>,
    queries: &QueryMap,
    options: BatchOptions,
    cancel: &CancelToken,
    reporter: &dyn Reporter,
) -> VerifyReport {
    let pending: Vec<(&String, &Metadata)> = queries.iter().collect();
    let next = AtomicUsize::new(0);
    let results: Mutex<BTreeMap<String, QueryResult>> = Mutex::new(BTreeMap::new());
    let workers = options.workers.clamp(1, pending.len().max(1));

    thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| loop {
                if cancel.is_cancelled() {
                    break;
                }
                let idx = next.fetch_add(1, Ordering::SeqCst);
                let Some(&(name, meta)) = pending.get(idx) else {
                    break;
                };
                reporter.started(name);
                let result = QueryResult::from_verify(verifier.verify(meta, cancel));
                reporter.finished(name, &result);
                results
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(name.clone(), result);
            });
        }
    });

    let results = results.into_inner().unwrap_or_else(PoisonError::into_inner);
    let report = VerifyReport::from_results(results, pending.len());
    reporter.summary(&report);
    report
}
