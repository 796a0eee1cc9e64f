//! Verification settings.
//!
//! Settings come from an optional JSON file (`--config`, or
//! `<config dir>/querypack/config.json` when present) and are then
//! overridden by command-line flags.
use crate::platform::KNOWN_PLATFORMS;
use crate::verify::{BatchOptions, OsqueryRunner, Verifier, DEFAULT_TIMEOUT};
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_DIR_NAME: &str = "querypack";
const CONFIG_FILE_NAME: &str = "config.json";
const DEFAULT_RUNNER: &str = "osqueryi";

/// Settings for verification runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VerifyConfig {
    /// Query runner executable, looked up on `PATH` when not a path.
    pub osqueryi: PathBuf,
    /// Extra flags passed to the runner before the query.
    pub runner_args: Vec<String>,
    /// Per-query deadline.
    pub timeout_secs: u64,
    /// Concurrent queries; 0 means one per CPU.
    pub workers: usize,
    /// Platform to verify as, instead of the host's.
    pub platform: Option<String>,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        VerifyConfig {
            osqueryi: PathBuf::from(DEFAULT_RUNNER),
            runner_args: Vec::new(),
            timeout_secs: DEFAULT_TIMEOUT.as_secs(),
            workers: 0,
            platform: None,
        }
    }
}

impl VerifyConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn batch_options(&self) -> BatchOptions {
        if self.workers == 0 {
            return BatchOptions::default();
        }
        BatchOptions {
            workers: self.workers,
        }
    }

    /// Build an `osqueryi`-backed verifier from these settings.
    pub fn build_verifier(&self) -> Result<Verifier<OsqueryRunner>> {
        validate_config(self)?;
        let runner = OsqueryRunner::resolve(&self.osqueryi, self.runner_args.clone())?;
        let mut verifier = Verifier::new(runner).with_timeout(self.timeout());
        if let Some(platform) = &self.platform {
            verifier = verifier.with_platform(platform.clone());
        }
        Ok(verifier)
    }
}

/// Location of the per-user config file.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

/// Load a config file.
pub fn load_config(path: &Path) -> Result<VerifyConfig> {
    let bytes = fs::read(path).with_context(|| format!("read config {}", path.display()))?;
    let config: VerifyConfig = serde_json::from_slice(&bytes)
        .with_context(|| format!("parse config {}", path.display()))?;
    validate_config(&config)?;
    Ok(config)
}

/// Load `explicit` if given, else the per-user config if it exists, else
/// defaults.
pub fn resolve_config(explicit: Option<&Path>) -> Result<VerifyConfig> {
    if let Some(path) = explicit {
        return load_config(path);
    }
    match default_config_path() {
        Some(path) if path.is_file() => load_config(&path),
        _ => Ok(VerifyConfig::default()),
    }
}

/// Reject settings that cannot produce a working verifier.
pub fn validate_config(config: &VerifyConfig) -> Result<()> {
    if config.osqueryi.as_os_str().is_empty() {
        return Err(anyhow!("osqueryi must be non-empty"));
    }
    if config.timeout_secs == 0 {
        return Err(anyhow!("timeout_secs must be greater than zero"));
    }
    if let Some(platform) = config.platform.as_deref() {
        if !KNOWN_PLATFORMS.contains(&platform) {
            return Err(anyhow!(
                "platform must be one of {} (got {platform:?})",
                KNOWN_PLATFORMS.join(", ")
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.json");
        fs::write(&path, r#"{"timeout_secs": 5, "runner_args": ["--verbose"]}"#)
            .expect("write config");
        let config = load_config(&path).expect("load");
        assert_eq!(config.timeout(), Duration::from_secs(5));
        assert_eq!(config.runner_args, vec!["--verbose".to_string()]);
        assert_eq!(config.osqueryi, PathBuf::from("osqueryi"));
        assert_eq!(config.workers, 0);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.json");
        fs::write(&path, r#"{"timeout": 5}"#).expect("write config");
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = resolve_config(Some(&temp.path().join("absent.json"))).unwrap_err();
        assert!(err.to_string().contains("read config"));
    }

    #[test]
    fn validation_rejects_bad_values() {
        let zero = VerifyConfig {
            timeout_secs: 0,
            ..VerifyConfig::default()
        };
        assert!(validate_config(&zero).is_err());
        let platform = VerifyConfig {
            platform: Some("darwin,linux".to_string()),
            ..VerifyConfig::default()
        };
        assert!(validate_config(&platform).is_err());
        assert!(validate_config(&VerifyConfig::default()).is_ok());
    }

    #[test]
    fn workers_zero_means_default_pool() {
        assert_eq!(VerifyConfig::default().batch_options(), BatchOptions::default());
        let fixed = VerifyConfig {
            workers: 2,
            ..VerifyConfig::default()
        };
        assert_eq!(fixed.batch_options().workers, 2);
    }
}
