//! Error types for loading, rendering, and verifying queries.
//!
//! Load errors abort the whole batch; verification errors are collected per
//! query and folded into a [`VerifyFailure`] by the caller.
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Failure while loading or persisting a query mapping.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error(
        "duplicate query name {name:?}: {} and {}",
        first.display(),
        second.display()
    )]
    DuplicateName {
        name: String,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("{action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("pack {origin}: {message}")]
    Serialization { origin: String, message: String },
}

impl QueryError {
    pub(crate) fn parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        QueryError::Parse {
            path: path.into(),
            message: message.into(),
        }
    }

    pub(crate) fn io(
        action: &'static str,
        path: impl Into<PathBuf>,
        source: std::io::Error,
    ) -> Self {
        QueryError::Io {
            action,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn serialization(origin: impl Into<String>, message: impl Into<String>) -> Self {
        QueryError::Serialization {
            origin: origin.into(),
            message: message.into(),
        }
    }
}

/// Failure of a single query's verification run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    #[error("query runner process: {0}")]
    Process(String),

    #[error("query runner failed ({status}): {detail}")]
    Subprocess { status: String, detail: String },

    #[error("query exceeded {}s deadline", .0.as_secs_f64())]
    Timeout(Duration),

    #[error("verification cancelled")]
    Cancelled,
}

/// One failed query in an aggregate run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryFailure {
    pub name: String,
    pub error: VerifyError,
}

/// Aggregate failure of a verification run.
///
/// Failures are ordered by query name.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VerifyFailure {
    pub failures: Vec<QueryFailure>,
    pub none_verified: bool,
    pub cancelled: bool,
}

impl VerifyFailure {
    pub fn names(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.name.as_str()).collect()
    }
}

impl fmt::Display for VerifyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        for failure in &self.failures {
            parts.push(format!("{}: {}", failure.name, failure.error));
        }
        if self.cancelled {
            parts.push("verification was cancelled".to_string());
        }
        if self.none_verified {
            parts.push("0 queries were verified".to_string());
        }
        match parts.len() {
            0 => write!(f, "verification failed"),
            1 => write!(f, "{}", parts[0]),
            n => {
                write!(f, "{n} errors occurred:")?;
                for part in parts {
                    write!(f, "\n\t* {part}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for VerifyFailure {}
