// orchestrator/control.rs
// Start/stop/restart, status reconciliation, health, storage and snapshots

use chrono::Utc;
use tokio::time::sleep;
use tracing::{info, warn};

use super::DatabaseManager;
use crate::container::{ContainerStatusReport, HealthCheckReport};
use crate::error::LifecycleError;
use crate::ledger::Provenance;
use crate::models::{ContainerStatus, Database, ZfsOperation};
use crate::zfs_management::{DatasetMetrics, SnapshotEntry, SnapshotResult};

impl DatabaseManager {
    /// Returns a human-readable message; starting a running database succeeds
    pub async fn start_database(&self, id: u64) -> Result<String, LifecycleError> {
        let mut database = self.get_database(id)?;
        if self.containers.status(&database.container_name).await.is_running() {
            self.sync_container_status(&mut database, ContainerStatus::Running)?;
            return Ok(format!("Database \"{}\" is already running", database.name));
        }

        self.containers.start(&database.container_name).await?;
        self.sync_container_status(&mut database, ContainerStatus::Running)?;
        info!(database_id = id, "database started");
        Ok(format!("Database \"{}\" started", database.name))
    }

    pub async fn stop_database(&self, id: u64) -> Result<String, LifecycleError> {
        let mut database = self.get_database(id)?;
        let report = self.containers.status(&database.container_name).await;
        if report.status == ContainerStatus::Stopped {
            self.sync_container_status(&mut database, ContainerStatus::Stopped)?;
            return Ok(format!("Database \"{}\" is already stopped", database.name));
        }

        self.containers.stop(&database.container_name).await?;
        self.sync_container_status(&mut database, ContainerStatus::Stopped)?;
        info!(database_id = id, "database stopped");
        Ok(format!("Database \"{}\" stopped", database.name))
    }

    /// Stop, pause briefly, start. A failed stop ends the restart.
    pub async fn restart_database(&self, id: u64) -> Result<String, LifecycleError> {
        self.stop_database(id).await?;
        sleep(self.settings.restart_delay()).await;
        self.start_database(id).await?;

        let database = self.get_database(id)?;
        Ok(format!("Database \"{}\" restarted", database.name))
    }

    /// Live container status. The stored status is corrected when it drifted.
    pub async fn get_status(
        &self,
        id: u64,
    ) -> Result<(Database, ContainerStatusReport), LifecycleError> {
        let mut database = self.get_database(id)?;
        let report = self.containers.status(&database.container_name).await;

        if report.status != database.container_status {
            info!(
                database_id = id,
                stored = %database.container_status,
                live = %report.status,
                "container status drifted, updating record"
            );
            self.sync_container_status(&mut database, report.status)?;
        }
        Ok((database, report))
    }

    pub async fn check_health(&self, id: u64) -> Result<HealthCheckReport, LifecycleError> {
        let mut database = self.get_database(id)?;
        let report = self.containers.health_check(&database.container_name).await;

        if database.health_status != report.overall {
            database.health_status = report.overall;
            database.updated_at = Utc::now();
            self.store.update_database(&database)?;
        }
        Ok(report)
    }

    /// Re-read dataset space usage onto the record
    pub async fn refresh_storage(&self, id: u64) -> Result<DatasetMetrics, LifecycleError> {
        let mut database = self.get_database(id)?;
        let metrics = self.zfs.get_metrics(&database.zfs_dataset).await?;

        database.storage_used_bytes = metrics.used.bytes;
        database.storage_referenced_bytes = metrics.referenced.bytes;
        database.updated_at = Utc::now();
        self.store.update_database(&database)?;
        Ok(metrics)
    }

    pub async fn create_manual_snapshot(
        &self,
        id: u64,
        snapshot_name: &str,
    ) -> Result<SnapshotResult, LifecycleError> {
        let database = self.get_database(id)?;
        let provenance = Provenance::database(id)
            .with("manual_snapshot", true)
            .with("user_requested", true);
        let result = self
            .zfs
            .create_snapshot_tracked(&database.zfs_dataset, snapshot_name, &provenance)
            .await?;
        info!(database_id = id, snapshot = %result.snapshot_path, "manual snapshot created");
        Ok(result)
    }

    /// Every ledger entry that touched the database's dataset
    pub fn lineage(&self, id: u64) -> Result<(String, Vec<ZfsOperation>), LifecycleError> {
        let database = self.get_database(id)?;
        let operations = self.zfs.ledger().lineage(&database.zfs_dataset)?;
        Ok((database.zfs_dataset, operations))
    }

    /// Databases that can be cloned right now: active and running
    pub fn list_clone_sources(&self) -> Result<Vec<Database>, LifecycleError> {
        Ok(self
            .list_databases()?
            .into_iter()
            .filter(|d| d.is_active && d.container_status == ContainerStatus::Running)
            .collect())
    }

    pub async fn list_snapshots(
        &self,
        pool: Option<&str>,
    ) -> Result<Vec<SnapshotEntry>, LifecycleError> {
        Ok(self.zfs.list_available_snapshots(pool).await?)
    }

    fn sync_container_status(
        &self,
        database: &mut Database,
        status: ContainerStatus,
    ) -> Result<(), LifecycleError> {
        if database.container_status == status {
            return Ok(());
        }
        database.container_status = status;
        database.updated_at = Utc::now();
        if let Err(e) = self.store.update_database(database) {
            warn!(database_id = database.id, error = %e, "could not persist container status");
            return Err(e.into());
        }
        Ok(())
    }
}
