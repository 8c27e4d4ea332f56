//! Engine configuration.

use crate::error::FlowError;
use crate::storage::FileStorage;
use crate::store::ProcessStore;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable holding the lookup timeout in milliseconds.
pub const LOOKUP_TIMEOUT_VAR: &str = "SCANFLOW_LOOKUP_TIMEOUT_MS";

/// Environment variable holding the record directory.
pub const STORAGE_DIR_VAR: &str = "SCANFLOW_STORAGE_DIR";

const DEFAULT_LOOKUP_TIMEOUT_MS: u64 = 30_000;

/// Settings shared by every process of a terminal session.
///
/// # Examples
///
/// ```
/// use scanflow::FlowConfig;
/// use std::time::Duration;
///
/// let config: FlowConfig = serde_json::from_str(r#"{ "lookup_timeout_ms": 5000 }"#)?;
/// assert_eq!(config.lookup_timeout(), Some(Duration::from_secs(5)));
/// assert!(config.storage_dir.is_none());
/// # Ok::<(), serde_json::Error>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// Lookup timeout in milliseconds; `0` disables the timeout.
    pub lookup_timeout_ms: u64,
    /// Directory for persisted process records; in-memory when unset.
    pub storage_dir: Option<PathBuf>,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            lookup_timeout_ms: DEFAULT_LOOKUP_TIMEOUT_MS,
            storage_dir: None,
        }
    }
}

impl FlowConfig {
    /// Reads the configuration from the process environment, loading a
    /// `.env` file first if there is one.
    pub fn from_env() -> Result<Self, FlowError> {
        Self::from_vars(|key| dotenvy::var(key).ok())
    }

    /// Reads the configuration through `var`, falling back to defaults.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self, FlowError> {
        let mut config = Self::default();
        if let Some(raw) = var(LOOKUP_TIMEOUT_VAR) {
            config.lookup_timeout_ms = raw.trim().parse().map_err(|_| {
                FlowError::Configuration(format!(
                    "{LOOKUP_TIMEOUT_VAR} must be a number of milliseconds, got '{raw}'"
                ))
            })?;
        }
        if let Some(dir) = var(STORAGE_DIR_VAR).filter(|dir| !dir.trim().is_empty()) {
            config.storage_dir = Some(PathBuf::from(dir));
        }
        Ok(config)
    }

    /// Lookup timeout, `None` when disabled.
    pub fn lookup_timeout(&self) -> Option<Duration> {
        (self.lookup_timeout_ms > 0).then(|| Duration::from_millis(self.lookup_timeout_ms))
    }

    /// Opens the store described by this configuration.
    pub fn open_store(&self) -> Result<ProcessStore, FlowError> {
        match &self.storage_dir {
            Some(dir) => Ok(ProcessStore::new(FileStorage::open(dir)?)),
            None => Ok(ProcessStore::in_memory()),
        }
    }
}
