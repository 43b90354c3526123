// zfs_management/datasets.rs
// Dataset operations: parent hierarchy, create, clone, restore, destroy, promote

use super::helpers::is_missing_dataset;
use super::manager::ZfsDatasetManager;
use super::types::{CloneResult, CreateResult, DestroyResult, PromoteResult, ZfsError};
use crate::command;
use crate::executor::CommandOutput;
use crate::ledger::{OperationSpec, Provenance};
use crate::models::OperationType;
use crate::naming;
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

/// Properties tuned for PostgreSQL's 8K pages
fn postgres_properties(mount_path: &str) -> Vec<(&'static str, String)> {
    vec![
        ("compression", "lz4".to_string()),
        ("recordsize", "8K".to_string()),
        ("mountpoint", mount_path.to_string()),
    ]
}

impl ZfsDatasetManager {
    /// Create `{pool}/stagdb` and `{pool}/stagdb/databases` if missing.
    /// Returns the datasets that were actually created.
    pub async fn ensure_parent_datasets(
        &self,
        pool: &str,
        provenance: &Provenance,
    ) -> Result<Vec<String>, ZfsError> {
        let mut created = Vec::new();

        for parent in [naming::stagdb_dataset(pool), naming::databases_dataset(pool)] {
            if self.dataset_exists(&parent).await {
                continue;
            }
            info!(dataset = %parent, "creating parent dataset");
            self.tracked(
                "zfs create",
                &parent,
                OperationSpec::new(OperationType::Create, provenance)
                    .target(parent.clone())
                    .with_context("parent_dataset", true),
                &command::zfs_create(&parent, &[]),
            )
            .await?;
            created.push(parent);
        }

        Ok(created)
    }

    /// New empty dataset for a database, owned by the postgres user
    pub async fn create_empty(
        &self,
        pool: &str,
        name: &str,
        provenance: &Provenance,
    ) -> Result<CreateResult, ZfsError> {
        validate_target_name(name)?;
        self.ensure_parent_datasets(pool, provenance).await?;

        let dataset_path = naming::dataset_path(pool, name);
        let mount_path = naming::mount_path(name);

        info!(dataset = %dataset_path, mount = %mount_path, "creating dataset");
        let outcome = self
            .tracked(
                "zfs create",
                &dataset_path,
                OperationSpec::new(OperationType::Create, provenance).target(dataset_path.clone()),
                &command::zfs_create(&dataset_path, &postgres_properties(&mount_path)),
            )
            .await?;

        self.prepare_mount(&dataset_path, &mount_path, provenance)
            .await?;

        Ok(CreateResult {
            dataset_path,
            mount_path,
            operation_id: outcome.operation.id,
        })
    }

    /// Clone a live dataset: snapshot it under a unique throwaway name, then
    /// clone that snapshot. Each step is its own ledger entry.
    pub async fn create_from_clone(
        &self,
        source_dataset: &str,
        target_name: &str,
        pool: &str,
        provenance: &Provenance,
    ) -> Result<CloneResult, ZfsError> {
        validate_target_name(target_name)?;
        self.ensure_parent_datasets(pool, provenance).await?;

        let snapshot_name = naming::clone_snapshot_name(target_name, Utc::now().timestamp());
        let snapshot = self
            .create_snapshot_tracked(source_dataset, &snapshot_name, provenance)
            .await?;

        let dataset_path = naming::dataset_path(pool, target_name);
        let mount_path = naming::mount_path(target_name);

        info!(
            source = %snapshot.snapshot_path,
            target = %dataset_path,
            "cloning dataset"
        );
        let clone = match self
            .tracked(
                "zfs clone",
                &dataset_path,
                OperationSpec::new(OperationType::Clone, provenance)
                    .source(source_dataset)
                    .snapshot(snapshot.snapshot_path.clone())
                    .target(dataset_path.clone()),
                &command::zfs_clone(&snapshot.snapshot_path, &dataset_path, &mount_path),
            )
            .await
        {
            Ok(clone) => clone,
            Err(e) => {
                warn!(snapshot = %snapshot.snapshot_path, error = %e, "clone failed, destroying throwaway snapshot");
                if let Err(cleanup) = self
                    .destroy(
                        &snapshot.snapshot_path,
                        &provenance.clone().with("compensation", true),
                    )
                    .await
                {
                    warn!(snapshot = %snapshot.snapshot_path, error = %cleanup, "compensating destroy failed");
                }
                return Err(e);
            }
        };

        self.prepare_mount(&dataset_path, &mount_path, provenance)
            .await?;

        Ok(CloneResult {
            dataset_path,
            mount_path,
            source_snapshot: snapshot.snapshot_path,
            snapshot_operation_id: snapshot.operation_id,
            clone_operation_id: clone.operation.id,
        })
    }

    /// Clone directly from an existing `dataset@snapshot`
    pub async fn create_from_snapshot(
        &self,
        snapshot_path: &str,
        target_name: &str,
        pool: &str,
        provenance: &Provenance,
    ) -> Result<CreateResult, ZfsError> {
        let (source_dataset, snapshot_name) = naming::split_snapshot_path(snapshot_path)
            .ok_or_else(|| ZfsError::InvalidSnapshotPath(snapshot_path.to_string()))?;
        if !naming::validate_snapshot_name(snapshot_name) {
            return Err(ZfsError::InvalidSnapshotName(snapshot_name.to_string()));
        }
        validate_target_name(target_name)?;
        self.ensure_parent_datasets(pool, provenance).await?;

        let dataset_path = naming::dataset_path(pool, target_name);
        let mount_path = naming::mount_path(target_name);

        info!(source = %snapshot_path, target = %dataset_path, "restoring dataset from snapshot");
        let outcome = self
            .tracked(
                "zfs clone",
                &dataset_path,
                OperationSpec::new(OperationType::Clone, provenance)
                    .source(source_dataset)
                    .snapshot(snapshot_path)
                    .target(dataset_path.clone()),
                &command::zfs_clone(snapshot_path, &dataset_path, &mount_path),
            )
            .await?;

        self.prepare_mount(&dataset_path, &mount_path, provenance)
            .await?;

        Ok(CreateResult {
            dataset_path,
            mount_path,
            operation_id: outcome.operation.id,
        })
    }

    /// `zfs destroy -r`. A dataset that is already gone counts as destroyed.
    pub async fn destroy(
        &self,
        dataset_path: &str,
        provenance: &Provenance,
    ) -> Result<DestroyResult, ZfsError> {
        let cmd = command::zfs_destroy_recursive(dataset_path);
        let handle = self.ledger.begin_operation(
            OperationSpec::new(OperationType::Destroy, provenance).target(dataset_path),
            &cmd,
        )?;

        let mut output = self.executor.execute(&cmd, self.timeout).await;
        let already_absent = !output.success && is_missing_dataset(&output.stderr);
        if already_absent {
            info!(dataset = %dataset_path, "dataset already absent");
            output = CommandOutput {
                success: true,
                ..output
            };
        }

        let operation = self.ledger.complete_operation(handle, &output)?;
        if !output.success {
            return Err(ZfsError::CommandFailed {
                action: "zfs destroy",
                target: dataset_path.to_string(),
                stderr: output.message(),
            });
        }

        info!(dataset = %dataset_path, "dataset destroyed");
        Ok(DestroyResult {
            dataset_path: dataset_path.to_string(),
            already_absent,
            operation_id: operation.id,
        })
    }

    /// `zfs promote` a clone of `origin_snapshot`. The origin's snapshots up
    /// to and including that one move to the clone; any whose name the clone
    /// already uses is renamed on the origin first.
    pub async fn promote_clone(
        &self,
        clone_dataset: &str,
        origin_snapshot: &str,
        provenance: &Provenance,
    ) -> Result<PromoteResult, ZfsError> {
        let (origin_dataset, _) = naming::split_snapshot_path(origin_snapshot)
            .ok_or_else(|| ZfsError::InvalidSnapshotPath(origin_snapshot.to_string()))?;

        let origin_snapshots = self.list_dataset_snapshots(origin_dataset).await?;
        let cutoff = origin_snapshots
            .iter()
            .position(|s| s.name == origin_snapshot)
            .ok_or_else(|| ZfsError::CommandFailed {
                action: "zfs promote",
                target: clone_dataset.to_string(),
                stderr: format!("origin snapshot {} not found", origin_snapshot),
            })?;

        let mut taken: BTreeSet<String> = self
            .list_dataset_snapshots(clone_dataset)
            .await?
            .into_iter()
            .map(|s| s.snapshot_name)
            .collect();
        let mut origin_names: BTreeSet<String> = origin_snapshots
            .iter()
            .map(|s| s.snapshot_name.clone())
            .collect();
        let origin_leaf = origin_dataset.rsplit('/').next().unwrap_or(origin_dataset);

        let mut moved = BTreeMap::new();
        let mut current_origin = origin_snapshot.to_string();
        for snapshot in &origin_snapshots[..=cutoff] {
            let mut name = snapshot.snapshot_name.clone();
            if taken.contains(&name) {
                let renamed = free_snapshot_name(&name, origin_leaf, &taken, &origin_names);
                let to = naming::snapshot_path(origin_dataset, &renamed);
                info!(from = %snapshot.name, to = %to, "renaming snapshot ahead of promote");
                self.tracked(
                    "zfs rename",
                    &snapshot.name,
                    OperationSpec::new(OperationType::Rename, provenance)
                        .source(origin_dataset)
                        .snapshot(snapshot.name.clone())
                        .target(origin_dataset)
                        .with_context("renamed_to", to.clone()),
                    &command::zfs_rename(&snapshot.name, &to),
                )
                .await?;
                if snapshot.name == origin_snapshot {
                    current_origin = to;
                }
                origin_names.insert(renamed.clone());
                name = renamed;
            }
            taken.insert(name.clone());
            moved.insert(snapshot.name.clone(), naming::snapshot_path(clone_dataset, &name));
        }

        info!(dataset = %clone_dataset, origin = %origin_snapshot, snapshots = moved.len(), "promoting clone");
        let outcome = self
            .tracked(
                "zfs promote",
                clone_dataset,
                OperationSpec::new(OperationType::Promote, provenance)
                    .source(origin_dataset)
                    .snapshot(current_origin)
                    .target(clone_dataset),
                &command::zfs_promote(clone_dataset),
            )
            .await?;

        Ok(PromoteResult {
            dataset_path: clone_dataset.to_string(),
            moved,
            operation_id: outcome.operation.id,
        })
    }

    /// Hand the mount to uid/gid 999 with mode 700. If that fails the fresh
    /// dataset is destroyed again before the error is returned.
    async fn prepare_mount(
        &self,
        dataset_path: &str,
        mount_path: &str,
        provenance: &Provenance,
    ) -> Result<(), ZfsError> {
        let reason = match self.set_permissions(mount_path).await {
            Ok(()) => return Ok(()),
            Err(reason) => reason,
        };

        warn!(mount = %mount_path, reason = %reason, "permission setup failed, destroying dataset");
        if let Err(e) = self
            .destroy(
                dataset_path,
                &provenance.clone().with("compensation", true),
            )
            .await
        {
            warn!(dataset = %dataset_path, error = %e, "compensating destroy failed");
        }

        Err(ZfsError::Permissions {
            mount: mount_path.to_string(),
            reason,
        })
    }

    async fn set_permissions(&self, mount_path: &str) -> Result<(), String> {
        for cmd in [command::chown_recursive(mount_path), command::chmod_private(mount_path)] {
            let output = self.executor.execute(&cmd, self.timeout).await;
            if !output.success {
                return Err(format!("{}: {}", cmd, output.message()));
            }
        }
        Ok(())
    }
}

/// `{name}-{origin}`, then `{name}-{origin}-2`, ... until neither dataset has it
fn free_snapshot_name(
    name: &str,
    origin_leaf: &str,
    clone_names: &BTreeSet<String>,
    origin_names: &BTreeSet<String>,
) -> String {
    let base = format!("{}-{}", name, origin_leaf);
    let mut candidate = base.clone();
    let mut n = 2;
    while clone_names.contains(&candidate) || origin_names.contains(&candidate) {
        candidate = format!("{}-{}", base, n);
        n += 1;
    }
    candidate
}

fn validate_target_name(name: &str) -> Result<(), ZfsError> {
    naming::validate_dataset_name(name).map_err(|reason| ZfsError::InvalidDatasetName {
        name: name.to_string(),
        reason,
    })
}
