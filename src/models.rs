use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::SystemTime;

use crate::container::ContainerStatusReport;
use crate::orchestrator::CleanupSummary;
use crate::zfs_management::{DatasetMetrics, SnapshotEntry};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastAction {
    pub function: String,
    pub timestamp: u64,
}

impl LastAction {
    pub fn new(function: String) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();

        Self { function, timestamp }
    }
}

//-----------------------------------------------------
// HOST
//-----------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStatus {
    Pending,
    Valid,
    Warning,
    Invalid,
}

/// Machine that owns the pool and runs the containers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    pub id: u64,
    pub name: String,
    pub address: String,
    pub zfs_pool: String,
    pub is_active: bool,
    /// Commands reach this host through nsenter rather than locally
    pub is_docker_host: bool,
    pub validation_status: ValidationStatus,
    pub last_validated: Option<DateTime<Utc>>,
    pub zfs_version: Option<String>,
    pub docker_version: Option<String>,
}

impl Host {
    pub fn can_create_databases(&self) -> bool {
        self.is_active
            && matches!(
                self.validation_status,
                ValidationStatus::Valid | ValidationStatus::Warning
            )
    }
}

//-----------------------------------------------------
// DATABASE
//-----------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Creating,
    Running,
    Stopped,
    Error,
    Removing,
    /// The container runtime has no container by this name
    Missing,
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ContainerStatus::Creating => "creating",
            ContainerStatus::Running => "running",
            ContainerStatus::Stopped => "stopped",
            ContainerStatus::Error => "error",
            ContainerStatus::Removing => "removing",
            ContainerStatus::Missing => "missing",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Starting,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CreationType {
    #[default]
    Empty,
    Clone,
    Snapshot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Database {
    pub id: u64,
    pub host_id: u64,
    /// Name as requested by the user
    pub name: String,
    /// Name of the database inside the engine
    pub database_name: String,
    pub description: Option<String>,
    pub db_type: String,
    pub db_version: u32,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub container_id: Option<String>,
    pub container_name: String,
    pub container_status: ContainerStatus,
    pub health_status: HealthStatus,
    pub zfs_dataset: String,
    pub mount_path: String,
    pub creation_type: CreationType,
    pub source_database: Option<u64>,
    /// Full `dataset@snapshot` path this database was cloned from
    pub source_snapshot: Option<String>,
    pub created_from_operation: Option<u64>,
    pub storage_used_bytes: u64,
    pub storage_referenced_bytes: u64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Database {
    pub fn connection_info(&self, host_address: &str) -> ConnectionInfo {
        ConnectionInfo {
            host: host_address.to_string(),
            port: self.port,
            database: self.database_name.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            connection_string: format!(
                "postgresql://{}:{}@{}:{}/{}",
                self.username, self.password, host_address, self.port, self.database_name
            ),
        }
    }

    pub fn summary(&self, host_address: &str) -> DatabaseSummary {
        DatabaseSummary {
            id: self.id,
            name: self.name.clone(),
            description: self.description.clone(),
            version: self.db_version,
            status: self.container_status,
            health: self.health_status,
            port: self.port,
            zfs_dataset: self.zfs_dataset.clone(),
            creation_type: self.creation_type,
            source_database: self.source_database,
            source_snapshot: self.source_snapshot.clone(),
            storage_used_bytes: self.storage_used_bytes,
            created_at: self.created_at,
            connection_info: self.connection_info(host_address),
        }
    }
}

//-----------------------------------------------------
// ZFS OPERATION LEDGER
//-----------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Create,
    Snapshot,
    Clone,
    Destroy,
    Rollback,
    Rename,
    Promote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Pending,
    Success,
    Failed,
}

/// One attempted ZFS command. Immutable once `status` leaves `Pending`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZfsOperation {
    pub id: u64,
    pub operation_id: String,
    pub host_id: u64,
    pub operation_type: OperationType,
    pub source_dataset: Option<String>,
    pub source_snapshot: Option<String>,
    pub target_dataset: Option<String>,
    pub command: String,
    pub status: OperationStatus,
    pub stdout: String,
    pub stderr: String,
    pub initiated_by_database: Option<u64>,
    pub context: BTreeMap<String, Value>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
}

impl ZfsOperation {
    pub fn succeeded(&self) -> bool {
        self.status == OperationStatus::Success
    }

    /// True if the operation read from or wrote to `dataset`
    pub fn touches(&self, dataset: &str) -> bool {
        let prefix = format!("{}@", dataset);
        self.source_dataset.as_deref() == Some(dataset)
            || self.target_dataset.as_deref() == Some(dataset)
            || self
                .source_snapshot
                .as_deref()
                .map(|s| s.starts_with(&prefix))
                .unwrap_or(false)
    }
}

//-----------------------------------------------------
// REQUESTS
//-----------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct CreateDatabaseRequest {
    pub name: String,
    pub version: Option<u32>,
    pub description: Option<String>,
    #[serde(default)]
    pub creation_type: CreationType,
    pub source_database_id: Option<u64>,
    pub source_snapshot: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateSnapshotRequest {
    pub snapshot_name: String,
}

//-----------------------------------------------------
// RESPONSES
//-----------------------------------------------------

#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub status: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub host: String,
    pub last_action: Option<LastAction>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    pub connection_string: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatabaseSummary {
    pub id: u64,
    pub name: String,
    pub description: Option<String>,
    pub version: u32,
    pub status: ContainerStatus,
    pub health: HealthStatus,
    pub port: u16,
    pub zfs_dataset: String,
    pub creation_type: CreationType,
    pub source_database: Option<u64>,
    pub source_snapshot: Option<String>,
    pub storage_used_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub connection_info: ConnectionInfo,
}

#[derive(Debug, Serialize)]
pub struct DatabaseResponse {
    pub status: String,
    pub message: String,
    pub database: DatabaseSummary,
    pub warnings: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct DatabaseListResponse {
    pub status: String,
    pub databases: Vec<DatabaseSummary>,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub status: String,
    pub message: String,
    pub dependencies: Vec<DependentDatabase>,
    pub cleanup_summary: Option<CleanupSummary>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DependentDatabase {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct DatabaseStatusResponse {
    pub status: String,
    pub database_id: u64,
    pub name: String,
    pub container_status: ContainerStatus,
    pub health_status: HealthStatus,
    pub uptime: Option<String>,
    pub port: u16,
    pub version: u32,
    pub last_updated: DateTime<Utc>,
}

impl DatabaseStatusResponse {
    pub fn new(database: &Database, report: &ContainerStatusReport) -> Self {
        DatabaseStatusResponse {
            status: "success".to_string(),
            database_id: database.id,
            name: database.name.clone(),
            container_status: database.container_status,
            health_status: database.health_status,
            uptime: report.uptime.clone(),
            port: database.port,
            version: database.db_version,
            last_updated: Utc::now(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SnapshotListResponse {
    pub status: String,
    pub snapshots: Vec<SnapshotEntry>,
}

#[derive(Debug, Serialize)]
pub struct SnapshotCreatedResponse {
    pub status: String,
    pub message: String,
    pub snapshot: String,
    pub operation_id: u64,
}

#[derive(Debug, Serialize)]
pub struct NameValidationResponse {
    pub status: String,
    pub valid: bool,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct LineageResponse {
    pub status: String,
    pub dataset: String,
    pub operations: Vec<ZfsOperation>,
}

#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub status: String,
    pub metrics: DatasetMetrics,
}
