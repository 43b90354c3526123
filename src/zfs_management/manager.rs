// zfs_management/manager.rs
// ZfsDatasetManager struct definition and shared command plumbing

use super::types::ZfsError;
use crate::command::{self, HostCommand};
use crate::executor::CommandExecutor;
use crate::ledger::{OperationSpec, TrackedOutcome, ZfsLedger};
use std::sync::Arc;
use std::time::Duration;

/// Dataset lifecycle for one host.
/// Mutating commands go through the ledger; read-only queries do not.
#[derive(Clone)]
pub struct ZfsDatasetManager {
    pub(crate) executor: Arc<dyn CommandExecutor>,
    pub(crate) ledger: ZfsLedger,
    pub(crate) timeout: Duration,
}

impl ZfsDatasetManager {
    pub fn new(executor: Arc<dyn CommandExecutor>, ledger: ZfsLedger, timeout: Duration) -> Self {
        ZfsDatasetManager {
            executor,
            ledger,
            timeout,
        }
    }

    pub fn ledger(&self) -> &ZfsLedger {
        &self.ledger
    }

    /// Extract pool name from a dataset/snapshot path
    pub fn get_pool_from_path(path: &str) -> String {
        path.split('/')
            .next()
            .unwrap_or(path)
            .split('@')
            .next()
            .unwrap_or(path)
            .to_string()
    }

    pub async fn dataset_exists(&self, dataset: &str) -> bool {
        self.executor
            .execute(&command::zfs_exists(dataset), self.timeout)
            .await
            .success
    }

    /// Run an untracked read-only command and return stdout
    pub(crate) async fn query(
        &self,
        action: &'static str,
        target: &str,
        cmd: &HostCommand,
    ) -> Result<String, ZfsError> {
        let output = self.executor.execute(cmd, self.timeout).await;
        if output.success {
            Ok(output.stdout)
        } else {
            Err(ZfsError::CommandFailed {
                action,
                target: target.to_string(),
                stderr: output.message(),
            })
        }
    }

    /// Run a mutating command through the ledger; non-zero exit becomes an error
    pub(crate) async fn tracked(
        &self,
        action: &'static str,
        target: &str,
        spec: OperationSpec,
        cmd: &HostCommand,
    ) -> Result<TrackedOutcome, ZfsError> {
        let outcome = self
            .ledger
            .execute_tracked(self.executor.as_ref(), spec, cmd, self.timeout)
            .await?;
        if outcome.success() {
            Ok(outcome)
        } else {
            Err(ZfsError::CommandFailed {
                action,
                target: target.to_string(),
                stderr: outcome.output.message(),
            })
        }
    }
}
