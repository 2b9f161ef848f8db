//! Engine configuration.
//!
//! Every knob has a default, so an empty TOML document is a valid config.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldSyncConfig {
    /// Quiet period after the last edit before a value is persisted.
    pub debounce_ms: u64,
    /// Interval of the periodic full reconciliation.
    pub sync_interval_secs: u64,
    /// Upper bound on a single remote fetch/upsert.
    pub request_timeout_ms: u64,
    /// Upper bound on the best-effort pull performed when a field is opened.
    pub cold_start_timeout_ms: u64,
    /// First retry delay after a retryable push failure.
    pub retry_base_delay_ms: u64,
    /// Retry delays double up to this cap.
    pub retry_max_delay_ms: u64,
    /// Outbound requests the coordinator keeps in flight at once.
    pub max_concurrent_requests: usize,
    /// How long shutdown waits for in-flight requests.
    pub shutdown_grace_ms: u64,
    /// SQLite database file. `None` keeps the store in memory.
    pub database_path: Option<PathBuf>,
}

impl Default for FieldSyncConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 500,
            sync_interval_secs: 30,
            request_timeout_ms: 15_000,
            cold_start_timeout_ms: 5_000,
            retry_base_delay_ms: 1_000,
            retry_max_delay_ms: 60_000,
            max_concurrent_requests: 4,
            shutdown_grace_ms: 2_000,
            database_path: None,
        }
    }
}

impl FieldSyncConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        fn positive(field: &'static str, v: u64) -> Result<(), ConfigError> {
            if v == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
            Ok(())
        }

        positive("sync_interval_secs", self.sync_interval_secs)?;
        positive("request_timeout_ms", self.request_timeout_ms)?;
        positive("retry_base_delay_ms", self.retry_base_delay_ms)?;
        if self.max_concurrent_requests == 0 {
            return Err(ConfigError::Invalid {
                field: "max_concurrent_requests",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.retry_max_delay_ms < self.retry_base_delay_ms {
            return Err(ConfigError::Invalid {
                field: "retry_max_delay_ms",
                reason: format!(
                    "must be at least retry_base_delay_ms ({})",
                    self.retry_base_delay_ms
                ),
            });
        }
        Ok(())
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn cold_start_timeout(&self) -> Duration {
        Duration::from_millis(self.cold_start_timeout_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}
