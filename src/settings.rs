//! Agent settings
//!
//! Loaded from settings.json in the same directory as the executable.
//! Every section and field has a default, so a partial file is fine and a
//! missing or broken file falls back to the defaults with a warning.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::models::ValidationStatus;

/// Settings loaded from settings.json
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub host: HostSettings,
    pub storage: StorageSettings,
    pub databases: DatabaseSettings,
    pub timeouts: TimeoutSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub listen_address: String,
    pub port: u16,
    pub api_key_file: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        ServerSettings {
            listen_address: "0.0.0.0".to_string(),
            port: 9876,
            api_key_file: ".stagdb_api".to_string(),
        }
    }
}

/// How host commands reach the machine that owns the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Local,
    Nsenter,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostSettings {
    pub name: String,
    pub address: String,
    pub zfs_pool: String,
    pub execution: ExecutionMode,
    pub nsenter_target_pid: u32,
    /// Skip probing at startup and trust this status instead
    pub validation_status: Option<ValidationStatus>,
}

impl Default for HostSettings {
    fn default() -> Self {
        HostSettings {
            name: "local".to_string(),
            address: "127.0.0.1".to_string(),
            zfs_pool: "tank".to_string(),
            execution: ExecutionMode::Local,
            nsenter_target_pid: 1,
            validation_status: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// JSON state file; defaults to <data dir>/stagdb/state.json
    pub state_file: Option<PathBuf>,
}

impl StorageSettings {
    pub fn state_path(&self) -> PathBuf {
        match &self.state_file {
            Some(path) => path.clone(),
            None => dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("stagdb")
                .join("state.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub port_range_start: u16,
    pub port_range_end: u16,
    pub supported_versions: Vec<u32>,
    pub default_version: u32,
    pub image_repository: String,
    pub image_suffix: String,
    pub readiness_timeout_secs: u64,
    pub readiness_interval_secs: u64,
    pub restart_delay_secs: u64,
    pub port_conflict_retries: u32,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            port_range_start: 5432,
            port_range_end: 5500,
            supported_versions: vec![11, 12, 13, 14, 15, 16],
            default_version: 15,
            image_repository: "postgres".to_string(),
            image_suffix: "-alpine".to_string(),
            readiness_timeout_secs: 60,
            readiness_interval_secs: 2,
            restart_delay_secs: 2,
            port_conflict_retries: 3,
        }
    }
}

impl DatabaseSettings {
    /// e.g. `postgres:15-alpine`
    pub fn image_for(&self, version: u32) -> String {
        format!("{}:{}{}", self.image_repository, version, self.image_suffix)
    }

    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_secs(self.readiness_timeout_secs)
    }

    pub fn readiness_interval(&self) -> Duration {
        Duration::from_secs(self.readiness_interval_secs)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_secs(self.restart_delay_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    pub command_secs: u64,
    pub image_pull_secs: u64,
    pub stop_secs: u64,
    pub probe_secs: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        TimeoutSettings {
            command_secs: 30,
            image_pull_secs: 600,
            stop_secs: 30,
            probe_secs: 10,
        }
    }
}

impl TimeoutSettings {
    pub fn command(&self) -> Duration {
        Duration::from_secs(self.command_secs)
    }

    pub fn image_pull(&self) -> Duration {
        Duration::from_secs(self.image_pull_secs)
    }

    pub fn probe(&self) -> Duration {
        Duration::from_secs(self.probe_secs)
    }
}

/// Load settings from settings.json or use defaults
/// Looks for settings.json in the same directory as the executable
pub fn load_settings() -> Settings {
    let settings_path = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("settings.json")))
        .unwrap_or_else(|| PathBuf::from("settings.json"));

    load_settings_from(&settings_path)
}

pub fn load_settings_from(settings_path: &Path) -> Settings {
    match fs::read_to_string(settings_path) {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(settings) => {
                info!(path = %settings_path.display(), "loaded settings");
                settings
            }
            Err(e) => {
                warn!(
                    path = %settings_path.display(),
                    error = %e,
                    "failed to parse settings, using defaults"
                );
                Settings::default()
            }
        },
        Err(_) => {
            info!(
                path = %settings_path.display(),
                "settings file not found, using defaults"
            );
            Settings::default()
        }
    }
}
