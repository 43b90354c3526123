//-----------------------------------------------------
// ERROR TYPES
//-----------------------------------------------------
//
// One enum per layer. Lower layers never decide whether a failure is fatal;
// the orchestrator maps these into LifecycleError or into warnings.

use thiserror::Error;

// ============================================================================
// State store
// ============================================================================

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("state lock poisoned")]
    Poisoned,

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: u64 },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("operation {0} is already completed")]
    OperationCompleted(u64),

    #[error("failed to persist state to {path}: {source}")]
    Persist {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("state file is not valid JSON: {0}")]
    Corrupt(#[from] serde_json::Error),
}

// ============================================================================
// ZFS operation ledger
// ============================================================================

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger entry {0} is already finalized")]
    AlreadyFinalized(u64),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::OperationCompleted(id) => LedgerError::AlreadyFinalized(id),
            other => LedgerError::Store(other),
        }
    }
}

// ============================================================================
// ZFS dataset manager
// ============================================================================

#[derive(Debug, Error)]
pub enum ZfsError {
    #[error("invalid dataset name '{name}': {reason}")]
    InvalidDatasetName { name: String, reason: String },

    #[error("invalid snapshot name '{0}'")]
    InvalidSnapshotName(String),

    #[error("invalid snapshot path '{0}': must be dataset@snapshot")]
    InvalidSnapshotPath(String),

    /// A zfs/chown/chmod command returned non-zero or timed out
    #[error("{action} failed for {target}: {stderr}")]
    CommandFailed {
        action: &'static str,
        target: String,
        stderr: String,
    },

    #[error("failed to set permissions on {mount}: {reason}")]
    Permissions { mount: String, reason: String },

    #[error("unexpected zfs output: {0}")]
    Parse(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

// ============================================================================
// Container lifecycle
// ============================================================================

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("failed to pull image {image}: {stderr}")]
    ImagePull { image: String, stderr: String },

    #[error("port {port} is already allocated: {stderr}")]
    PortConflict { port: u16, stderr: String },

    #[error("docker {action} failed for {container}: {stderr}")]
    CommandFailed {
        action: &'static str,
        container: String,
        stderr: String,
    },

    #[error("container {0} does not exist")]
    Missing(String),

    #[error("unexpected docker output: {0}")]
    Parse(String),

    #[error("no available ports in range {start}-{end}")]
    NoAvailablePorts { start: u16, end: u16 },
}

// ============================================================================
// Database lifecycle orchestrator
// ============================================================================

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{0}")]
    ResourceExhausted(String),

    #[error("database {0} not found")]
    NotFound(u64),

    #[error("host '{0}' cannot create databases")]
    HostUnavailable(String),

    #[error("database engine did not become ready within {0}s")]
    ReadinessTimeout(u64),

    #[error(transparent)]
    Zfs(#[from] ZfsError),

    #[error(transparent)]
    Container(#[from] ContainerError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
