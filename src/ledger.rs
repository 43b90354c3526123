// ledger.rs
// Append-only record of every ZFS command that changes a dataset

use chrono::Utc;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::command::HostCommand;
use crate::error::LedgerError;
use crate::executor::{CommandExecutor, CommandOutput};
use crate::models::{OperationStatus, OperationType, ZfsOperation};
use crate::store::StateStore;

/// Who asked for an operation and why; copied onto the ledger entry
#[derive(Debug, Clone, Default)]
pub struct Provenance {
    pub database_id: Option<u64>,
    pub context: BTreeMap<String, Value>,
}

impl Provenance {
    pub fn none() -> Self {
        Provenance::default()
    }

    pub fn database(id: u64) -> Self {
        Provenance {
            database_id: Some(id),
            context: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.context.insert(key.to_string(), value.into());
        self
    }
}

/// What an entry is about, before the command runs
#[derive(Debug, Clone)]
pub struct OperationSpec {
    pub operation_type: OperationType,
    pub source_dataset: Option<String>,
    pub source_snapshot: Option<String>,
    pub target_dataset: Option<String>,
    pub provenance: Provenance,
}

impl OperationSpec {
    pub fn new(operation_type: OperationType, provenance: &Provenance) -> Self {
        OperationSpec {
            operation_type,
            source_dataset: None,
            source_snapshot: None,
            target_dataset: None,
            provenance: provenance.clone(),
        }
    }

    pub fn source(mut self, dataset: impl Into<String>) -> Self {
        self.source_dataset = Some(dataset.into());
        self
    }

    pub fn snapshot(mut self, snapshot: impl Into<String>) -> Self {
        self.source_snapshot = Some(snapshot.into());
        self
    }

    pub fn target(mut self, dataset: impl Into<String>) -> Self {
        self.target_dataset = Some(dataset.into());
        self
    }

    pub fn with_context(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.provenance.context.insert(key.to_string(), value.into());
        self
    }
}

/// A pending entry. Must be passed to `complete_operation` exactly once.
#[derive(Debug)]
pub struct OperationHandle {
    pub id: u64,
    started: Instant,
}

#[derive(Debug, Clone)]
pub struct TrackedOutcome {
    pub operation: ZfsOperation,
    pub output: CommandOutput,
}

impl TrackedOutcome {
    pub fn success(&self) -> bool {
        self.output.success
    }
}

#[derive(Clone)]
pub struct ZfsLedger {
    store: StateStore,
    host_id: u64,
}

impl ZfsLedger {
    pub fn new(store: StateStore, host_id: u64) -> Self {
        ZfsLedger { store, host_id }
    }

    /// Record the command as pending before it runs
    pub fn begin_operation(
        &self,
        spec: OperationSpec,
        command: &HostCommand,
    ) -> Result<OperationHandle, LedgerError> {
        let operation = ZfsOperation {
            id: 0,
            operation_id: Uuid::new_v4().to_string(),
            host_id: self.host_id,
            operation_type: spec.operation_type,
            source_dataset: spec.source_dataset,
            source_snapshot: spec.source_snapshot,
            target_dataset: spec.target_dataset,
            command: command.to_string(),
            status: OperationStatus::Pending,
            stdout: String::new(),
            stderr: String::new(),
            initiated_by_database: spec.provenance.database_id,
            context: spec.provenance.context,
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: None,
        };
        let id = self.store.begin_operation(operation)?;
        debug!(operation = id, command = %command, "ledger entry opened");
        Ok(OperationHandle {
            id,
            started: Instant::now(),
        })
    }

    /// Finalize a pending entry with the command's outcome
    pub fn complete_operation(
        &self,
        handle: OperationHandle,
        output: &CommandOutput,
    ) -> Result<ZfsOperation, LedgerError> {
        let elapsed = handle.started.elapsed();
        let operation = self.store.complete_operation(handle.id, |op| {
            op.status = if output.success {
                OperationStatus::Success
            } else {
                OperationStatus::Failed
            };
            op.stdout = output.stdout.clone();
            op.stderr = output.stderr.clone();
            op.completed_at = Some(Utc::now());
            op.duration_ms = Some(elapsed.as_millis() as u64);
        })?;

        if !operation.succeeded() {
            warn!(
                operation = operation.id,
                command = %operation.command,
                stderr = %output.stderr.trim(),
                "zfs operation failed"
            );
        }
        Ok(operation)
    }

    /// Begin, execute, complete. The only path for dataset-mutating commands.
    pub async fn execute_tracked(
        &self,
        executor: &dyn CommandExecutor,
        spec: OperationSpec,
        command: &HostCommand,
        timeout: Duration,
    ) -> Result<TrackedOutcome, LedgerError> {
        let handle = self.begin_operation(spec, command)?;
        let output = executor.execute(command, timeout).await;
        let operation = self.complete_operation(handle, &output)?;
        Ok(TrackedOutcome { operation, output })
    }

    /// Every operation touching `dataset`, oldest first
    pub fn lineage(&self, dataset: &str) -> Result<Vec<ZfsOperation>, LedgerError> {
        Ok(self
            .store
            .list_operations()?
            .into_iter()
            .filter(|op| op.host_id == self.host_id && op.touches(dataset))
            .collect())
    }

    /// Drop the entries owned by a database that is being deleted
    pub fn purge_for_database(&self, database_id: u64) -> Result<usize, LedgerError> {
        Ok(self.store.purge_operations(database_id)?)
    }
}
