//! Query runner capability and its `osqueryi` subprocess implementation.
use super::CancelToken;
use crate::error::VerifyError;
use anyhow::{Context, Result};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Raw result of one query execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Execution {
    pub stdout: Vec<u8>,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub success: bool,
    pub timed_out: bool,
    pub cancelled: bool,
    pub elapsed: Duration,
}

impl Execution {
    pub fn succeeded(stdout: Vec<u8>) -> Self {
        Execution {
            stdout,
            exit_code: Some(0),
            success: true,
            ..Execution::default()
        }
    }

    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Execution {
            stderr: stderr.into(),
            exit_code: Some(exit_code),
            ..Execution::default()
        }
    }

    pub fn timed_out(elapsed: Duration) -> Self {
        Execution {
            timed_out: true,
            elapsed,
            ..Execution::default()
        }
    }

    /// Short description of how the run ended.
    pub fn status_label(&self) -> String {
        match self.exit_code {
            Some(code) => format!("exit {code}"),
            None => "terminated by signal".to_string(),
        }
    }
}

/// Something that can execute one query and report rows and diagnostics.
///
/// Implementations must stop promptly once the deadline passes or `cancel`
/// fires, and must not leave processes behind.
pub trait QueryRunner: Send + Sync {
    fn execute(
        &self,
        query: &str,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<Execution, VerifyError>;
}

/// Runs queries with `osqueryi --json`.
#[derive(Debug, Clone)]
pub struct OsqueryRunner {
    binary: PathBuf,
    args: Vec<String>,
}

impl OsqueryRunner {
    pub fn new(binary: impl Into<PathBuf>, args: Vec<String>) -> Self {
        OsqueryRunner {
            binary: binary.into(),
            args,
        }
    }

    /// Resolve `program` on `PATH` (or as given, when it is a path).
    pub fn resolve(program: &Path, args: Vec<String>) -> Result<Self> {
        let binary = which::which(program)
            .with_context(|| format!("locate query runner {}", program.display()))?;
        Ok(OsqueryRunner::new(binary, args))
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }
}

impl QueryRunner for OsqueryRunner {
    fn execute(
        &self,
        query: &str,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<Execution, VerifyError> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("--json")
            .args(&self.args)
            .arg(query)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let start = Instant::now();
        let mut child = cmd
            .spawn()
            .map_err(|err| VerifyError::Process(format!("spawn {}: {err}", self.binary.display())))?;
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let mut timed_out = false;
        let mut cancelled = false;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break Ok(status),
                Ok(None) => {}
                Err(err) => break Err(err),
            }
            if start.elapsed() > timeout {
                timed_out = true;
                break terminate(&mut child);
            }
            if cancel.is_cancelled() {
                cancelled = true;
                break terminate(&mut child);
            }
            thread::sleep(POLL_INTERVAL);
        };
        if status.is_err() && !timed_out && !cancelled {
            let _ = terminate(&mut child);
        }
        let exit_code = reaped_exit_code(status, timed_out || cancelled)?;

        let stdout = stdout.join().unwrap_or_default();
        let stderr = stderr.join().unwrap_or_default();
        Ok(Execution {
            stdout,
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_code,
            success: exit_code == Some(0) && !timed_out && !cancelled,
            timed_out,
            cancelled,
            elapsed: start.elapsed(),
        })
    }
}

/// Exit code of a finished run. A run we stopped keeps its timeout or
/// cancellation verdict even when reaping it failed.
fn reaped_exit_code(
    status: io::Result<ExitStatus>,
    stopped: bool,
) -> Result<Option<i32>, VerifyError> {
    match status {
        Ok(status) => Ok(status.code()),
        Err(_) if stopped => Ok(None),
        Err(err) => Err(VerifyError::Process(format!("wait for query runner: {err}"))),
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

/// Kill the runner and anything it spawned, then reap it.
fn terminate(child: &mut Child) -> io::Result<ExitStatus> {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        // The child leads its own process group (set at spawn).
        if let Ok(pid) = i32::try_from(child.id()) {
            let _ = killpg(Pid::from_raw(pid), Signal::SIGKILL);
        }
    }
    let _ = child.kill();
    child.wait()
}
