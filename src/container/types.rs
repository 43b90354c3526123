// container/types.rs
// Public types for the container lifecycle manager

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{ContainerStatus, HealthStatus};

/// `docker run` parameters for one database container
pub type ContainerConfig = crate::command::RunSpec;

/// Live container state as reported by `docker inspect`
#[derive(Debug, Clone, Serialize)]
pub struct ContainerStatusReport {
    pub container: String,
    /// One of missing, running, stopped or error
    pub status: ContainerStatus,
    pub container_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i64>,
    pub uptime: Option<String>,
    pub message: Option<String>,
}

impl ContainerStatusReport {
    pub(crate) fn missing(container: &str) -> Self {
        ContainerStatusReport {
            container: container.to_string(),
            status: ContainerStatus::Missing,
            container_id: None,
            started_at: None,
            exit_code: None,
            uptime: None,
            message: Some("Container does not exist".to_string()),
        }
    }

    pub(crate) fn error(container: &str, message: String) -> Self {
        ContainerStatusReport {
            status: ContainerStatus::Error,
            message: Some(message),
            ..ContainerStatusReport::missing(container)
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == ContainerStatus::Running
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthChecks {
    pub existence: bool,
    pub running: bool,
    pub engine_ready: bool,
}

/// Layered check: exists, then running, then the engine accepts connections
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheckReport {
    pub container: String,
    pub overall: HealthStatus,
    pub checks: HealthChecks,
    pub message: String,
    pub checked_at: DateTime<Utc>,
}

/// What `remove` did. Escalations are warnings, not failures.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RemovalReport {
    pub container: String,
    pub removed: bool,
    pub already_absent: bool,
    pub stopped_gracefully: bool,
    pub force_killed: bool,
    pub warnings: Vec<String>,
    pub error: Option<String>,
}

// Subset of `docker inspect` output

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct InspectEntry {
    pub id: String,
    pub state: InspectState,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct InspectState {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub running: bool,
    pub started_at: Option<String>,
    pub exit_code: Option<i64>,
}
