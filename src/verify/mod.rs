//! Query verification: run each query once through the engine and classify
//! the result.
//!
//! A query either succeeds (rows decoded from the runner's JSON output), is
//! skipped because it targets a platform the host is not, or fails. Platform
//! skips are not errors. The engine never logs; progress flows through an
//! injected [`Reporter`].
mod batch;
mod reporter;
mod runner;

pub use batch::{verify_all, BatchOptions, QueryResult, VerifyReport};
pub use reporter::{Reporter, TracingReporter};
pub use runner::{Execution, OsqueryRunner, QueryRunner};

use crate::error::VerifyError;
use crate::metadata::Metadata;
use crate::platform;
use crate::util::truncate_string;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// Deadline for a single query run when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const MAX_DIAGNOSTIC_BYTES: usize = 512;

/// One result row: column name to value.
pub type Row = BTreeMap<String, serde_json::Value>;

/// Result of verifying one query.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VerificationOutcome {
    /// Platform the query needs when it was skipped; `None` when it ran.
    pub incompatible_platform: Option<String>,
    pub results: Vec<Row>,
    pub elapsed: Duration,
}

impl VerificationOutcome {
    fn skipped(platform: String, elapsed: Duration) -> Self {
        VerificationOutcome {
            incompatible_platform: Some(platform),
            results: Vec::new(),
            elapsed,
        }
    }
}

/// Shared cancellation flag for a verification run.
///
/// Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// The underlying flag, for handlers that can only set an `AtomicBool`.
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.0)
    }
}

/// Runs queries through a [`QueryRunner`] and classifies the outcome.
///
/// Safe to share across threads when the runner is.
#[derive(Debug, Clone)]
pub struct Verifier<R> {
    runner: R,
    timeout: Duration,
    host_platform: String,
}

impl<R: QueryRunner> Verifier<R> {
    pub fn new(runner: R) -> Self {
        Verifier {
            runner,
            timeout: DEFAULT_TIMEOUT,
            host_platform: platform::host_platform().to_string(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Treat `platform` as the host, e.g. to check a pack for another OS.
    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.host_platform = platform.into();
        self
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn host_platform(&self) -> &str {
        &self.host_platform
    }

    /// Verify a single query with one execution attempt.
    pub fn verify(
        &self,
        meta: &Metadata,
        cancel: &CancelToken,
    ) -> Result<VerificationOutcome, VerifyError> {
        if !platform::is_compatible(&meta.platform, &self.host_platform) {
            return Ok(VerificationOutcome::skipped(
                meta.platform.clone(),
                Duration::ZERO,
            ));
        }
        if cancel.is_cancelled() {
            return Err(VerifyError::Cancelled);
        }

        let execution = self.runner.execute(&meta.query, self.timeout, cancel)?;
        if execution.timed_out {
            return Err(VerifyError::Timeout(self.timeout));
        }
        if execution.cancelled {
            return Err(VerifyError::Cancelled);
        }

        if !execution.success || reports_error(&execution.stderr) {
            if let Some(platform) = incompatible_platform(&execution.stderr, &self.host_platform) {
                return Ok(VerificationOutcome::skipped(platform, execution.elapsed));
            }
            return Err(VerifyError::Subprocess {
                status: execution.status_label(),
                detail: diagnostic_line(&execution.stderr),
            });
        }

        let results = decode_rows(&execution.stdout).map_err(|err| VerifyError::Subprocess {
            status: execution.status_label(),
            detail: format!("decode rows: {err}"),
        })?;
        Ok(VerificationOutcome {
            incompatible_platform: None,
            results,
            elapsed: execution.elapsed,
        })
    }
}

/// Decode the runner's JSON array of row objects. Blank output is no rows.
pub fn decode_rows(stdout: &[u8]) -> Result<Vec<Row>, serde_json::Error> {
    if stdout.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    serde_json::from_slice(stdout)
}

fn missing_table_regex() -> &'static Regex {
    static MISSING_TABLE: OnceLock<Regex> = OnceLock::new();
    MISSING_TABLE.get_or_init(|| {
        Regex::new(r"(?i)no such table:\s*([A-Za-z0-9_]+)").expect("regex for missing tables")
    })
}

/// Table named in a "no such table" diagnostic.
pub fn missing_table(diagnostics: &str) -> Option<&str> {
    missing_table_regex()
        .captures(diagnostics)
        .and_then(|cap| cap.get(1))
        .map(|m| m.as_str())
}

/// Platform a failed query needs, when the failure is a missing table that
/// only exists on a platform `host` is not.
///
/// A declared platform that excludes the host never reaches the runner, so
/// only the table catalog is consulted here.
pub fn incompatible_platform(diagnostics: &str, host: &str) -> Option<String> {
    let table = missing_table(diagnostics)?;
    platform::table_platform(table)
        .filter(|needed| !platform::is_compatible(needed, host))
        .map(str::to_string)
}

// osqueryi can print query errors and still exit 0.
fn reports_error(stderr: &str) -> bool {
    stderr
        .lines()
        .any(|line| line.trim_start().starts_with("Error:"))
}

fn diagnostic_line(stderr: &str) -> String {
    let line = stderr
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("no diagnostics");
    truncate_string(line, MAX_DIAGNOSTIC_BYTES)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Runner that replays a canned execution and records the queries it saw.
    struct CannedRunner {
        execution: Execution,
        seen: Mutex<Vec<String>>,
    }

    impl CannedRunner {
        fn new(execution: Execution) -> Self {
            CannedRunner {
                execution,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl QueryRunner for CannedRunner {
        fn execute(
            &self,
            query: &str,
            _timeout: Duration,
            _cancel: &CancelToken,
        ) -> Result<Execution, VerifyError> {
            self.seen.lock().expect("seen lock").push(query.to_string());
            Ok(self.execution.clone())
        }
    }

    fn verifier(execution: Execution) -> Verifier<CannedRunner> {
        Verifier::new(CannedRunner::new(execution)).with_platform("linux")
    }

    #[test]
    fn decodes_rows_on_success() {
        let verifier = verifier(Execution::succeeded(
            br#"[{"pid":"1","name":"init"},{"pid":"2","name":"kthreadd"}]"#.to_vec(),
        ));
        let outcome = verifier
            .verify(&Metadata::new("procs", "SELECT pid, name FROM processes"), &CancelToken::new())
            .expect("verify");
        assert_eq!(outcome.incompatible_platform, None);
        assert_eq!(outcome.results.len(), 2);
        assert_eq!(outcome.results[1]["name"], "kthreadd");
        assert_eq!(
            verifier.runner.seen.lock().expect("seen lock").as_slice(),
            ["SELECT pid, name FROM processes"]
        );
    }

    #[test]
    fn blank_output_is_zero_rows() {
        let verifier = verifier(Execution::succeeded(b"\n".to_vec()));
        let outcome = verifier
            .verify(&Metadata::new("q", "SELECT 1"), &CancelToken::new())
            .expect("verify");
        assert!(outcome.results.is_empty());
    }

    #[test]
    fn declared_platform_mismatch_skips_without_running() {
        let verifier = verifier(Execution::succeeded(b"[]".to_vec()));
        let meta = Metadata {
            platform: "darwin".to_string(),
            ..Metadata::new("apps", "SELECT * FROM apps")
        };
        let outcome = verifier.verify(&meta, &CancelToken::new()).expect("verify");
        assert_eq!(outcome.incompatible_platform.as_deref(), Some("darwin"));
        assert!(verifier.runner.seen.lock().expect("seen lock").is_empty());
    }

    #[test]
    fn missing_restricted_table_is_a_skip() {
        let verifier = verifier(Execution::failed(1, "Error: no such table: apps\n"));
        let outcome = verifier
            .verify(&Metadata::new("apps", "SELECT * FROM apps"), &CancelToken::new())
            .expect("verify");
        assert_eq!(outcome.incompatible_platform.as_deref(), Some("darwin"));
    }

    #[test]
    fn missing_table_on_matching_platform_is_an_error() {
        let verifier = verifier(Execution::failed(1, "Error: no such table: proccesses\n"));
        let meta = Metadata {
            platform: "linux".to_string(),
            ..Metadata::new("typo", "SELECT * FROM proccesses")
        };
        let err = verifier.verify(&meta, &CancelToken::new()).unwrap_err();
        assert_eq!(
            err,
            VerifyError::Subprocess {
                status: "exit 1".to_string(),
                detail: "Error: no such table: proccesses".to_string(),
            }
        );
    }

    #[test]
    fn catalog_table_on_its_own_platform_is_an_error() {
        let verifier = verifier(Execution::failed(1, "Error: no such table: deb_packages\n"));
        let err = verifier
            .verify(&Metadata::new("debs", "SELECT * FROM deb_packages"), &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, VerifyError::Subprocess { .. }), "{err:?}");
    }

    #[test]
    fn unknown_missing_table_is_an_error() {
        let verifier = verifier(Execution::failed(1, "Error: no such table: proccesses\n"));
        let err = verifier
            .verify(&Metadata::new("typo", "SELECT * FROM proccesses"), &CancelToken::new())
            .unwrap_err();
        assert_eq!(
            err,
            VerifyError::Subprocess {
                status: "exit 1".to_string(),
                detail: "Error: no such table: proccesses".to_string(),
            }
        );
    }

    #[test]
    fn error_on_stderr_with_zero_exit_is_a_failure() {
        let mut execution = Execution::succeeded(Vec::new());
        execution.stderr = "Error: near \"SELEC\": syntax error\n".to_string();
        let err = verifier(execution)
            .verify(&Metadata::new("bad", "SELEC 1"), &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, VerifyError::Subprocess { .. }), "{err:?}");
    }

    #[test]
    fn undecodable_output_is_a_failure() {
        let err = verifier(Execution::succeeded(b"+----+".to_vec()))
            .verify(&Metadata::new("q", "SELECT 1"), &CancelToken::new())
            .unwrap_err();
        match err {
            VerifyError::Subprocess { detail, .. } => assert!(detail.starts_with("decode rows")),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn timed_out_execution_maps_to_timeout() {
        let verifier = verifier(Execution::timed_out(Duration::from_secs(2)))
            .with_timeout(Duration::from_secs(2));
        let err = verifier
            .verify(&Metadata::new("slow", "SELECT * FROM hash"), &CancelToken::new())
            .unwrap_err();
        assert_eq!(err, VerifyError::Timeout(Duration::from_secs(2)));
    }

    #[test]
    fn cancelled_token_stops_before_running() {
        let verifier = verifier(Execution::succeeded(b"[]".to_vec()));
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = verifier
            .verify(&Metadata::new("q", "SELECT 1"), &cancel)
            .unwrap_err();
        assert_eq!(err, VerifyError::Cancelled);
        assert!(verifier.runner.seen.lock().expect("seen lock").is_empty());
    }
}
