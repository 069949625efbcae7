use std::fs;
use std::path::Path;
use std::time::Duration;

use directories::ProjectDirs;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::core::errors::CoreError;

/// Upper bound for keys handled per bulk-delete batch.
pub const MAX_DELETE_BATCH: usize = 1000;

/// Tunables for the session manager, sweepers and bulk operations.
///
/// Every field has a default, so a partial `config.json` is fine:
/// `{ "idle_timeout_secs": 600 }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Sessions idle for longer than this lose their connection.
    pub idle_timeout_secs: u64,
    pub session_sweep_interval_secs: u64,
    pub retention_sweep_interval_secs: u64,
    /// How often the telemetry poller samples live connections.
    pub sample_interval_secs: u64,
    /// How long a finished operation stays pollable.
    pub operation_retention_secs: u64,
    pub operation_gc_interval_secs: u64,
    pub connect_timeout_ms: u64,
    pub command_timeout_ms: u64,
    pub delete_batch_size: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 30 * 60,
            session_sweep_interval_secs: 60,
            retention_sweep_interval_secs: 5 * 60,
            sample_interval_secs: 10,
            operation_retention_secs: 10 * 60,
            operation_gc_interval_secs: 60,
            connect_timeout_ms: 5_000,
            command_timeout_ms: 5_000,
            delete_batch_size: MAX_DELETE_BATCH,
        }
    }
}

impl CoreConfig {
    /// `config.json` from the per-user config dir, or defaults when absent.
    pub fn load() -> Result<Self, CoreError> {
        match ProjectDirs::from("", "", "kvdesk") {
            Some(proj) => {
                let path = proj.config_dir().join("config.json");
                if path.exists() {
                    return Self::from_path(&path);
                }
                debug!("No config at {:?}, using defaults", path);
                Ok(Self::default())
            }
            None => Ok(Self::default()),
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, CoreError> {
        let text = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn session_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.session_sweep_interval_secs.max(1))
    }

    pub fn retention_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.retention_sweep_interval_secs.max(1))
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs(self.sample_interval_secs.max(1))
    }

    pub fn operation_retention(&self) -> Duration {
        Duration::from_secs(self.operation_retention_secs)
    }

    pub fn operation_gc_interval(&self) -> Duration {
        Duration::from_secs(self.operation_gc_interval_secs.max(1))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// Clamped to `1..=MAX_DELETE_BATCH`.
    pub fn delete_batch_size(&self) -> usize {
        self.delete_batch_size.clamp(1, MAX_DELETE_BATCH)
    }
}
