use lookout_common::MonitorRecord;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{fs, io};
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read agent config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to parse agent config file: {0}")]
    Parse(#[from] toml::de::Error),
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_notify_timeout_seconds() -> u64 {
    10
}

fn default_reload_interval_seconds() -> u64 {
    30
}

#[derive(Deserialize, Debug, Clone)]
pub struct AgentConfig {
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    #[serde(default = "default_notify_timeout_seconds")]
    pub notify_timeout_seconds: u64,
    /// How often the file is re-read and the monitor set reconciled. `0` disables reload.
    #[serde(default = "default_reload_interval_seconds")]
    pub reload_interval_seconds: u64,
    #[serde(default)]
    pub monitors: Vec<MonitorRecord>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            notify_timeout_seconds: default_notify_timeout_seconds(),
            reload_interval_seconds: default_reload_interval_seconds(),
            monitors: Vec::new(),
        }
    }
}

impl AgentConfig {
    pub fn notify_timeout(&self) -> Duration {
        Duration::from_secs(self.notify_timeout_seconds.max(1))
    }

    pub fn reload_interval(&self) -> Option<Duration> {
        (self.reload_interval_seconds > 0).then(|| Duration::from_secs(self.reload_interval_seconds))
    }

    /// The monitors that pass validation, in file order. Invalid records and
    /// repeated ids are logged and dropped.
    pub fn valid_monitors(&self) -> Vec<MonitorRecord> {
        let mut seen = HashSet::new();
        self.monitors
            .iter()
            .filter(|record| {
                if let Err(e) = record.validate() {
                    warn!(monitor_id = record.id, monitor_name = %record.name, error = %e, "Skipping invalid monitor.");
                    return false;
                }
                if !seen.insert(record.id) {
                    warn!(monitor_id = record.id, "Skipping monitor with a duplicate id.");
                    return false;
                }
                true
            })
            .cloned()
            .collect()
    }
}

pub fn load_config(config_path: impl AsRef<Path>) -> Result<AgentConfig, ConfigError> {
    let config_path = config_path.as_ref();
    info!(path = %config_path.display(), "Loading agent config.");

    let config_str = fs::read_to_string(config_path).map_err(|source| {
        error!(path = %config_path.display(), error = %source, "Failed to read agent config file.");
        ConfigError::Read {
            path: config_path.to_path_buf(),
            source,
        }
    })?;

    let config: AgentConfig = toml::from_str(&config_str).map_err(|e| {
        error!(path = %config_path.display(), error = %e, "Failed to parse agent config file.");
        ConfigError::Parse(e)
    })?;

    info!(
        log_dir = %config.log_dir.display(),
        monitors = config.monitors.len(),
        reload_interval_seconds = config.reload_interval_seconds,
        "Loaded agent config."
    );
    Ok(config)
}
