//! Shared test infrastructure for integration tests.
#![allow(dead_code)]

use querypack::verify::{CancelToken, Execution, QueryRunner};
use querypack::{Metadata, QueryMap, VerifyError};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

pub fn write_file(path: &Path, contents: &str) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create parent directory");
    }
    std::fs::write(path, contents.as_bytes()).expect("write file");
}

/// A mix of fully populated and minimal queries.
pub fn sample_queries() -> QueryMap {
    let queries = [
        Metadata {
            description: "Kernel extensions not signed by Apple".to_string(),
            platform: "darwin".to_string(),
            version: "4.9.0".to_string(),
            interval: 3600,
            value: "Unsigned kexts are a common persistence mechanism".to_string(),
            ..Metadata::new(
                "unsigned-kexts",
                "SELECT * FROM kernel_extensions\nWHERE linked_against NOT LIKE '%com.apple%';",
            )
        },
        Metadata {
            description: "Processes listening on all interfaces\n\nloopback excluded".to_string(),
            platform: "linux,darwin".to_string(),
            interval: 600,
            ..Metadata::new(
                "listening-any",
                "SELECT p.name, l.port FROM listening_ports l JOIN processes p USING (pid)\nWHERE l.address = '0.0.0.0';",
            )
        },
        Metadata::new("uptime", "SELECT * FROM uptime;"),
        Metadata {
            value: "Baseline for other queries".to_string(),
            ..Metadata::new("os_version", "-- cheap\nSELECT * FROM os_version;")
        },
    ];
    queries
        .into_iter()
        .map(|meta| (meta.name.clone(), meta))
        .collect()
}

/// In-memory runner keyed by query text. Unknown queries fail.
#[derive(Default)]
pub struct FakeRunner {
    executions: BTreeMap<String, Execution>,
    calls: Mutex<Vec<String>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        FakeRunner::default()
    }

    pub fn with(mut self, query: &str, execution: Execution) -> Self {
        self.executions.insert(query.to_string(), execution);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }
}

impl QueryRunner for FakeRunner {
    fn execute(
        &self,
        query: &str,
        _timeout: Duration,
        _cancel: &CancelToken,
    ) -> Result<Execution, VerifyError> {
        self.calls.lock().expect("calls lock").push(query.to_string());
        Ok(self
            .executions
            .get(query)
            .cloned()
            .unwrap_or_else(|| Execution::failed(1, format!("Error: unscripted query {query:?}"))))
    }
}

/// Write an executable shell script and return its path.
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    write_file(&path, &format!("#!/bin/sh\n{body}\n"));
    let mut perms = std::fs::metadata(&path)
        .expect("stat script")
        .permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).expect("chmod script");
    path
}

/// Stand-in for `osqueryi`: prints one row for any query and fails, like
/// osqueryi on a syntax error, when the query mentions `broken`.
#[cfg(unix)]
pub fn write_fake_osqueryi(dir: &Path) -> PathBuf {
    write_script(
        dir,
        "osqueryi",
        r#"for last; do :; done
case "$last" in
  *broken*) echo 'Error: near "broken": syntax error' >&2; exit 1 ;;
esac
echo '[{"one":"1"}]'"#,
    )
}
