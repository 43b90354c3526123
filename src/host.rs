//! Host validation
//!
//! Checks that a host has working ZFS utilities, a reachable Docker engine
//! and a usable pool before any database is created on it. Validation is
//! stateless: it runs commands and returns a report, which the caller then
//! applies to the stored [`Host`].

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

use crate::command;
use crate::executor::CommandExecutor;
use crate::models::{Host, ValidationStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Warning,
    Fail,
}

#[derive(Debug, Clone, Serialize)]
pub struct HostCheck {
    pub name: &'static str,
    pub status: CheckStatus,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub overall: ValidationStatus,
    pub message: String,
    pub checks: Vec<HostCheck>,
    pub zfs_version: Option<String>,
    pub docker_version: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl ValidationReport {
    /// Copy the outcome onto the persisted host
    pub fn apply_to(&self, host: &mut Host) {
        host.validation_status = self.overall;
        host.last_validated = Some(self.checked_at);
        host.zfs_version = self.zfs_version.clone();
        host.docker_version = self.docker_version.clone();
    }
}

/// Run every check against the host behind `executor`
pub async fn validate_host(
    executor: &dyn CommandExecutor,
    pool: &str,
    timeout: Duration,
) -> ValidationReport {
    let mut checks = Vec::new();

    let zfs = executor.execute(&command::zfs_version(), timeout).await;
    let zfs_version = if zfs.success {
        let version = first_line(&zfs.stdout);
        checks.push(HostCheck {
            name: "zfs_utilities",
            status: CheckStatus::Pass,
            message: format!("ZFS version: {}", version),
        });
        Some(version)
    } else {
        checks.push(HostCheck {
            name: "zfs_utilities",
            status: CheckStatus::Fail,
            message: format!("ZFS utilities unavailable: {}", zfs.message()),
        });
        None
    };

    let docker = executor.execute(&command::docker_version(), timeout).await;
    let docker_version = if docker.success {
        let version = first_line(&docker.stdout);
        checks.push(HostCheck {
            name: "docker_engine",
            status: CheckStatus::Pass,
            message: format!("Docker engine version: {}", version),
        });
        Some(version)
    } else {
        checks.push(HostCheck {
            name: "docker_engine",
            status: CheckStatus::Fail,
            message: format!("Docker engine unreachable: {}", docker.message()),
        });
        None
    };

    let pool_output = executor.execute(&command::zpool_health(pool), timeout).await;
    checks.push(pool_check(pool, pool_output.success, &pool_output.stdout, &pool_output.message()));

    let overall = overall_status(&checks);
    let message = match overall {
        ValidationStatus::Valid => "Host is ready for database creation",
        ValidationStatus::Warning => "Host is usable but has warnings",
        ValidationStatus::Invalid => "Host cannot run databases",
        ValidationStatus::Pending => "Host validation pending",
    }
    .to_string();

    for check in checks.iter().filter(|c| c.status != CheckStatus::Pass) {
        warn!(check = check.name, status = ?check.status, message = %check.message, "host check");
    }
    info!(pool, status = ?overall, "host validation completed");

    ValidationReport {
        overall,
        message,
        checks,
        zfs_version,
        docker_version,
        checked_at: Utc::now(),
    }
}

// Missing or degraded pool: warning, not failure
fn pool_check(pool: &str, success: bool, stdout: &str, error: &str) -> HostCheck {
    if !success {
        return HostCheck {
            name: "zfs_pool",
            status: CheckStatus::Warning,
            message: format!("Pool '{}' not found: {}", pool, error),
        };
    }

    let health = stdout
        .lines()
        .filter_map(|line| line.split_once('\t'))
        .find(|(name, _)| *name == pool)
        .map(|(_, health)| health.trim().to_string())
        .unwrap_or_else(|| "UNKNOWN".to_string());

    if health == "ONLINE" {
        HostCheck {
            name: "zfs_pool",
            status: CheckStatus::Pass,
            message: format!("Pool '{}' is ONLINE", pool),
        }
    } else {
        HostCheck {
            name: "zfs_pool",
            status: CheckStatus::Warning,
            message: format!("Pool '{}' health is {}", pool, health),
        }
    }
}

fn overall_status(checks: &[HostCheck]) -> ValidationStatus {
    if checks.iter().any(|c| c.status == CheckStatus::Fail) {
        ValidationStatus::Invalid
    } else if checks.iter().any(|c| c.status == CheckStatus::Warning) {
        ValidationStatus::Warning
    } else {
        ValidationStatus::Valid
    }
}

fn first_line(output: &str) -> String {
    output.lines().next().unwrap_or_default().trim().to_string()
}
