// zfs_management/snapshots.rs
// Snapshot operations: create, list, hierarchy across ancestor datasets

use super::helpers::{is_missing_dataset, parse_snapshot_list};
use super::manager::ZfsDatasetManager;
use super::types::{HierarchyEntry, SnapshotEntry, SnapshotResult, SnapshotSource, ZfsError};
use crate::command;
use crate::ledger::{OperationSpec, Provenance};
use crate::models::OperationType;
use crate::naming;
use tracing::{debug, info};

impl ZfsDatasetManager {
    pub async fn create_snapshot(&self, dataset: &str, name: &str) -> Result<String, ZfsError> {
        self.create_snapshot_tracked(dataset, name, &Provenance::none())
            .await
            .map(|result| result.snapshot_path)
    }

    /// Snapshot with the requesting database and context on the ledger entry
    pub async fn create_snapshot_tracked(
        &self,
        dataset: &str,
        name: &str,
        provenance: &Provenance,
    ) -> Result<SnapshotResult, ZfsError> {
        if dataset.is_empty() || dataset.contains('@') {
            return Err(ZfsError::InvalidDatasetName {
                name: dataset.to_string(),
                reason: "snapshot source must be a dataset path".to_string(),
            });
        }
        if !naming::validate_snapshot_name(name) {
            return Err(ZfsError::InvalidSnapshotName(name.to_string()));
        }

        let snapshot_path = naming::snapshot_path(dataset, name);
        info!(snapshot = %snapshot_path, "creating snapshot");

        let outcome = self
            .tracked(
                "zfs snapshot",
                &snapshot_path,
                OperationSpec::new(OperationType::Snapshot, provenance)
                    .source(dataset)
                    .snapshot(snapshot_path.clone()),
                &command::zfs_snapshot(&snapshot_path),
            )
            .await?;

        Ok(SnapshotResult {
            snapshot_path,
            operation_id: outcome.operation.id,
        })
    }

    /// Snapshots taken directly on `dataset`, oldest first
    pub async fn list_dataset_snapshots(&self, dataset: &str) -> Result<Vec<SnapshotEntry>, ZfsError> {
        let stdout = self
            .query(
                "zfs list",
                dataset,
                &command::zfs_list_own_snapshots(dataset),
            )
            .await?;
        Ok(parse_snapshot_list(&stdout)
            .into_iter()
            .filter(|s| s.dataset == dataset)
            .collect())
    }

    /// Snapshots of the dataset and of every ancestor up to the pool,
    /// ordered by creation time. These are the states the dataset could
    /// have been restored from.
    pub async fn get_snapshot_hierarchy(
        &self,
        dataset: &str,
    ) -> Result<Vec<HierarchyEntry>, ZfsError> {
        let mut entries: Vec<HierarchyEntry> = self
            .list_dataset_snapshots(dataset)
            .await?
            .into_iter()
            .map(|snapshot| HierarchyEntry {
                snapshot,
                source: SnapshotSource::CurrentDataset,
                parent_level: 0,
            })
            .collect();

        for (index, ancestor) in naming::ancestors(dataset).into_iter().enumerate() {
            match self.list_dataset_snapshots(&ancestor).await {
                Ok(snapshots) => entries.extend(snapshots.into_iter().map(|snapshot| {
                    HierarchyEntry {
                        snapshot,
                        source: SnapshotSource::ParentDataset,
                        parent_level: index as u32 + 1,
                    }
                })),
                Err(e) => debug!(dataset = %ancestor, error = %e, "skipping ancestor"),
            }
        }

        entries.sort_by(|a, b| {
            a.snapshot
                .creation
                .cmp(&b.snapshot.creation)
                .then(a.parent_level.cmp(&b.parent_level))
        });
        Ok(entries)
    }

    /// Every snapshot under a stagdb dataset, usable as a clone or restore source
    pub async fn list_available_snapshots(
        &self,
        pool: Option<&str>,
    ) -> Result<Vec<SnapshotEntry>, ZfsError> {
        let (root, cmd) = match pool {
            Some(pool) => {
                let root = naming::stagdb_dataset(pool);
                let cmd = command::zfs_list_snapshots_recursive(Some(&root));
                (root, cmd)
            }
            None => ("all pools".to_string(), command::zfs_list_snapshots_recursive(None)),
        };

        let output = self.executor.execute(&cmd, self.timeout).await;
        if !output.success {
            if is_missing_dataset(&output.stderr) {
                return Ok(Vec::new());
            }
            return Err(ZfsError::CommandFailed {
                action: "zfs list",
                target: root,
                stderr: output.message(),
            });
        }

        let marker = format!("/{}", naming::STAGDB_ROOT);
        Ok(parse_snapshot_list(&output.stdout)
            .into_iter()
            .filter(|s| {
                s.dataset.contains(&format!("{}/", marker)) || s.dataset.ends_with(&marker)
            })
            .collect())
    }
}
