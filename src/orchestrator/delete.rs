// orchestrator/delete.rs
// Delete flow: dependency gate, container teardown, clone promotion, ZFS teardown, ledger purge

use tracing::{error, info, warn};

use super::types::{ChildDatabaseAction, CleanupSummary, DeleteOutcome};
use super::DatabaseManager;
use crate::error::LifecycleError;
use crate::ledger::Provenance;
use crate::models::{ContainerStatus, Database, DependentDatabase};
use crate::zfs_management::SnapshotSource;

impl DatabaseManager {
    /// Tear a database down completely. Cleanup problems become warnings
    /// on the summary; only a failed dataset teardown makes it unsuccessful,
    /// and then the record stays.
    pub async fn delete_database(
        &self,
        id: u64,
        force: bool,
    ) -> Result<DeleteOutcome, LifecycleError> {
        let mut database = self.get_database(id)?;
        let dependents = self.store.dependents(id)?;

        if !dependents.is_empty() && !force {
            let dependencies: Vec<DependentDatabase> = dependents
                .iter()
                .map(|d| DependentDatabase {
                    id: d.id,
                    name: d.name.clone(),
                })
                .collect();
            info!(
                database_id = id,
                dependents = dependencies.len(),
                "delete blocked by dependent databases"
            );
            return Ok(DeleteOutcome {
                success: false,
                message: format!(
                    "Cannot delete database \"{}\". {} databases were cloned from it.",
                    database.name,
                    dependencies.len()
                ),
                dependencies,
                cleanup_summary: None,
            });
        }

        info!(database_id = id, name = %database.name, force, "deleting database");
        let mut summary = CleanupSummary::default();

        for mut child in dependents {
            child.source_database = None;
            child.updated_at = chrono::Utc::now();
            self.store.update_database(&child)?;
            warn!(database_id = child.id, parent = id, "orphaned dependent database");
            summary.warnings.push(format!(
                "Orphaned dependent database '{}' (ID: {})",
                child.name, child.id
            ));
            summary.child_databases_handled.push(ChildDatabaseAction {
                id: child.id,
                name: child.name,
                action: "orphaned".to_string(),
            });
        }

        database.container_status = ContainerStatus::Removing;
        database.updated_at = chrono::Utc::now();
        self.store.update_database(&database)?;

        let removal = self.containers.remove(&database.container_name).await;
        summary.warnings.extend(removal.warnings.iter().cloned());
        if let Some(e) = &removal.error {
            summary.warnings.push(e.clone());
        }
        let container_gone = removal.error.is_none();
        summary.container_cleanup = Some(removal);

        self.cleanup_dataset(&database, &mut summary).await;

        let success = summary.errors.is_empty();
        if success {
            match self.zfs.ledger().purge_for_database(id) {
                Ok(purged) => summary.ledger_entries_purged = purged,
                Err(e) => summary
                    .warnings
                    .push(format!("Could not purge ledger entries: {}", e)),
            }
            self.store.delete_database(id)?;
        } else {
            // The dataset is still on disk; keep the record so a retry can find it
            database.container_status = if container_gone {
                ContainerStatus::Missing
            } else {
                ContainerStatus::Error
            };
            database.updated_at = chrono::Utc::now();
            self.store.update_database(&database)?;
        }

        let message = if !success {
            error!(database_id = id, errors = ?summary.errors, "database deletion failed, record kept");
            format!(
                "Database \"{}\" deletion failed with errors; the record was kept",
                database.name
            )
        } else if !summary.warnings.is_empty() {
            warn!(database_id = id, warnings = summary.warnings.len(), "database deleted with warnings");
            format!("Database \"{}\" deleted with warnings", database.name)
        } else {
            info!(database_id = id, "database deleted");
            format!("Database \"{}\" deleted successfully", database.name)
        };

        Ok(DeleteOutcome {
            success,
            message,
            dependencies: Vec::new(),
            cleanup_summary: Some(summary),
        })
    }

    async fn cleanup_dataset(&self, database: &Database, summary: &mut CleanupSummary) {
        let dataset = database.zfs_dataset.as_str();
        summary.dataset_cleanup.dataset = dataset.to_string();

        match self.zfs.get_snapshot_hierarchy(dataset).await {
            Ok(entries) => {
                summary.snapshots_cleaned = entries
                    .into_iter()
                    .filter(|e| e.source == SnapshotSource::CurrentDataset)
                    .map(|e| e.snapshot.name)
                    .collect()
            }
            Err(e) => summary
                .warnings
                .push(format!("Could not inspect snapshots of {}: {}", dataset, e)),
        }

        let consumers = match self.store.snapshot_consumers(dataset, database.id) {
            Ok(consumers) => consumers,
            Err(e) => {
                summary
                    .warnings
                    .push(format!("Could not check snapshot consumers: {}", e));
                Vec::new()
            }
        };
        if !consumers.is_empty() {
            let protected: Vec<String> = consumers
                .iter()
                .filter_map(|d| d.source_snapshot.clone())
                .collect();
            summary.warnings.push(format!(
                "Found {} snapshots in use by other databases",
                protected.len()
            ));
            summary.dataset_cleanup.protected_snapshots = protected;

            if let Err(message) = self.hand_off_snapshots(database, consumers, summary).await {
                summary.dataset_cleanup.error = Some(message.clone());
                summary.errors.push(message);
                return;
            }
        }

        let provenance = Provenance::database(database.id).with("cleanup", true);
        match self.zfs.destroy(dataset, &provenance).await {
            Ok(result) => {
                summary.dataset_cleanup.destroyed = true;
                summary.dataset_cleanup.already_absent = result.already_absent;
            }
            Err(e) => {
                let message = format!("Failed to destroy dataset {}: {}", dataset, e);
                summary.dataset_cleanup.error = Some(message.clone());
                summary.errors.push(message);
            }
        }
    }

    /// ZFS refuses to destroy a dataset whose snapshots still have clones.
    /// Promote the clone of the newest consumed snapshot: it takes over every
    /// consumed snapshot, and each consumer's record is repointed there.
    async fn hand_off_snapshots(
        &self,
        database: &Database,
        consumers: Vec<Database>,
        summary: &mut CleanupSummary,
    ) -> Result<(), String> {
        let dataset = database.zfs_dataset.as_str();
        if !self.zfs.dataset_exists(dataset).await {
            return Ok(());
        }
        let own = self
            .zfs
            .list_dataset_snapshots(dataset)
            .await
            .map_err(|e| format!("Could not list snapshots of {}: {}", dataset, e))?;

        let mut heir: Option<(usize, &Database, &str)> = None;
        for consumer in &consumers {
            let Some(origin) = consumer.source_snapshot.as_deref() else {
                continue;
            };
            let Some(position) = own.iter().position(|s| s.name == origin) else {
                continue;
            };
            if heir.is_some_and(|(best, ..)| best >= position)
                || !self.zfs.dataset_exists(&consumer.zfs_dataset).await
            {
                continue;
            }
            heir = Some((position, consumer, origin));
        }
        let Some((_, heir, origin)) = heir else {
            return Ok(());
        };
        let (heir_id, heir_name, heir_dataset, origin) = (
            heir.id,
            heir.name.clone(),
            heir.zfs_dataset.clone(),
            origin.to_string(),
        );

        let provenance = Provenance::database(heir_id).with("replaces_origin", dataset);
        let promoted = self
            .zfs
            .promote_clone(&heir_dataset, &origin, &provenance)
            .await
            .map_err(|e| format!("Failed to promote {} off {}: {}", heir_dataset, dataset, e))?;

        for mut consumer in consumers {
            if consumer.id == heir_id {
                consumer.source_snapshot = database.source_snapshot.clone();
            } else if let Some(moved) = consumer
                .source_snapshot
                .as_ref()
                .and_then(|s| promoted.moved.get(s))
            {
                consumer.source_snapshot = Some(moved.clone());
            } else {
                continue;
            }
            consumer.updated_at = chrono::Utc::now();
            self.store
                .update_database(&consumer)
                .map_err(|e| format!("Could not update database {}: {}", consumer.id, e))?;
        }

        info!(
            database_id = database.id,
            heir = heir_id,
            snapshots = promoted.moved.len(),
            "promoted clone to take over snapshots"
        );
        summary
            .snapshots_cleaned
            .retain(|s| !promoted.moved.contains_key(s));
        summary.warnings.push(format!(
            "Promoted '{}' (ID: {}); it now holds {} snapshots of {}",
            heir_name,
            heir_id,
            promoted.moved.len(),
            dataset
        ));
        summary.child_databases_handled.push(ChildDatabaseAction {
            id: heir_id,
            name: heir_name,
            action: "promoted".to_string(),
        });
        Ok(())
    }
}
