//! Progress reporting for verification runs.
use super::{QueryResult, VerifyReport};

/// Observer for a verification run.
///
/// Called from worker threads, so implementations must be `Sync`.
pub trait Reporter: Sync {
    fn started(&self, _name: &str) {}

    fn finished(&self, name: &str, result: &QueryResult);

    fn summary(&self, _report: &VerifyReport) {}
}

/// Reports progress as `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn started(&self, name: &str) {
        tracing::info!(query = name, "verifying");
    }

    fn finished(&self, name: &str, result: &QueryResult) {
        match result {
            QueryResult::Verified(outcome) => tracing::info!(
                query = name,
                rows = outcome.results.len(),
                elapsed_ms = outcome.elapsed.as_millis(),
                "query verified"
            ),
            QueryResult::Skipped { platform } => {
                tracing::warn!(query = name, platform = %platform, "skipped: incompatible platform")
            }
            QueryResult::Failed(err) => {
                tracing::error!(query = name, error = %err, "query failed verification")
            }
        }
    }

    fn summary(&self, report: &VerifyReport) {
        tracing::info!(
            found = report.total(),
            verified = report.verified,
            errored = report.errored,
            skipped = report.skipped,
            not_run = report.not_run,
            "verification complete"
        );
    }
}
