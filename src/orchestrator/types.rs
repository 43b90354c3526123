// orchestrator/types.rs
// Result types of database lifecycle operations

use serde::Serialize;
use std::fmt;

use crate::container::RemovalReport;
use crate::models::{ConnectionInfo, Database, DependentDatabase};

/// States of a create operation, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CreatePhase {
    Validating,
    Allocating,
    CreatingStorage,
    CreatingContainer,
    Initializing,
    Renaming,
    Persisting,
    Done,
}

impl fmt::Display for CreatePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CreatePhase::Validating => "validating",
            CreatePhase::Allocating => "allocating",
            CreatePhase::CreatingStorage => "creating_storage",
            CreatePhase::CreatingContainer => "creating_container",
            CreatePhase::Initializing => "initializing",
            CreatePhase::Renaming => "renaming",
            CreatePhase::Persisting => "persisting",
            CreatePhase::Done => "done",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct CreateOutcome {
    pub database: Database,
    pub connection: ConnectionInfo,
    /// Non-fatal problems (failed rename, root snapshot, password reset...)
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ChildDatabaseAction {
    pub id: u64,
    pub name: String,
    pub action: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DatasetCleanup {
    pub dataset: String,
    pub destroyed: bool,
    pub already_absent: bool,
    /// Snapshots of other databases' origins found on this dataset
    pub protected_snapshots: Vec<String>,
    pub error: Option<String>,
}

/// Everything a delete did and did not manage to clean up
#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupSummary {
    pub container_cleanup: Option<RemovalReport>,
    pub dataset_cleanup: DatasetCleanup,
    pub snapshots_cleaned: Vec<String>,
    pub child_databases_handled: Vec<ChildDatabaseAction>,
    pub ledger_entries_purged: usize,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DeleteOutcome {
    pub success: bool,
    pub message: String,
    /// Non-empty only when deletion was blocked by dependents
    pub dependencies: Vec<DependentDatabase>,
    pub cleanup_summary: Option<CleanupSummary>,
}
