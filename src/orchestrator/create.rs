// orchestrator/create.rs
// Create flow: validate, allocate, storage, container, readiness, rename, persist

use chrono::Utc;
use std::collections::BTreeMap;
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

use super::rollback::{Compensation, Rollback};
use super::types::{CreateOutcome, CreatePhase};
use super::{generate_password, DatabaseManager};
use crate::command;
use crate::container::ContainerConfig;
use crate::error::{ContainerError, LifecycleError};
use crate::ledger::Provenance;
use crate::models::{
    ContainerStatus, CreateDatabaseRequest, CreationType, Database, HealthStatus,
};
use crate::naming;

const POSTGRES_USER: &str = "postgres";

/// Where the data of a new database comes from
enum Source {
    Empty,
    Clone(Database),
    Snapshot(String),
}

impl Source {
    fn creation_type(&self) -> CreationType {
        match self {
            Source::Empty => CreationType::Empty,
            Source::Clone(_) => CreationType::Clone,
            Source::Snapshot(_) => CreationType::Snapshot,
        }
    }
}

/// What the storage phase produced
struct Storage {
    dataset_path: String,
    mount_path: String,
    source_snapshot: Option<String>,
    created_from_operation: u64,
}

impl DatabaseManager {
    /// Create a database end to end. Any failure after storage exists
    /// removes what was created before the error is returned.
    pub async fn create_database(
        &self,
        request: CreateDatabaseRequest,
    ) -> Result<CreateOutcome, LifecycleError> {
        let mut phase = CreatePhase::Validating;
        info!(
            name = %request.name,
            creation_type = ?request.creation_type,
            phase = %phase,
            "creating database"
        );

        self.validate_name(&request.name)
            .map_err(LifecycleError::Validation)?;
        let version = request.version.unwrap_or(self.settings.default_version);
        if !self.settings.supported_versions.contains(&version) {
            return Err(LifecycleError::Validation(format!(
                "Unsupported PostgreSQL version {}. Supported versions: {:?}",
                version, self.settings.supported_versions
            )));
        }

        let sanitized = request.name.to_lowercase();
        let container_name = naming::container_name(&sanitized);
        if self.store.container_name_in_use(&container_name)? {
            return Err(LifecycleError::Validation(format!(
                "Container name '{}' is already in use",
                container_name
            )));
        }
        let source = self.resolve_source(&request)?;

        phase = CreatePhase::Allocating;
        let reserved_ports = self.store.active_ports(self.host.id)?;
        let port = self.allocate_port(&reserved_ports).await?;
        let id = self.store.reserve_database_id()?;
        let provenance = Provenance::database(id)
            .with("creation_type", serde_json::to_value(source.creation_type()).unwrap_or_default());
        info!(database_id = id, port, phase = %phase, "resources allocated");

        let mut warnings = Vec::new();
        let password = match &source {
            // the data directory carries the source's credential hashes
            Source::Clone(db) => db.password.clone(),
            _ => generate_password(),
        };

        phase = CreatePhase::CreatingStorage;
        info!(database_id = id, phase = %phase, "creating storage");
        let storage = self.create_storage(&source, &sanitized, &provenance).await?;
        let mut rollback = Rollback::new();
        rollback.push(Compensation::DestroyDataset(storage.dataset_path.clone()));

        phase = CreatePhase::CreatingContainer;
        info!(database_id = id, phase = %phase, "creating container");
        let mut env = BTreeMap::new();
        env.insert("POSTGRES_DB".to_string(), sanitized.clone());
        env.insert("POSTGRES_USER".to_string(), POSTGRES_USER.to_string());
        env.insert("POSTGRES_PASSWORD".to_string(), password.clone());
        env.insert(
            "POSTGRES_INITDB_ARGS".to_string(),
            "--data-checksums".to_string(),
        );
        let mut config = ContainerConfig {
            name: container_name.clone(),
            image: self.settings.image_for(version),
            host_port: port,
            volume_mount: storage.mount_path.clone(),
            env,
            secret_env: vec!["POSTGRES_PASSWORD".to_string()],
        };

        // A failed `docker run` can still leave a container under this name
        rollback.push(Compensation::RemoveContainer(container_name.clone()));
        let container_id = match self.run_container(&mut config, &reserved_ports).await {
            Ok(container_id) => container_id,
            Err(e) => {
                warn!(database_id = id, error = %e, phase = %phase, "container creation failed");
                rollback.run(&self.containers, &self.zfs, &provenance).await;
                return Err(e);
            }
        };

        phase = CreatePhase::Initializing;
        info!(database_id = id, phase = %phase, "waiting for engine readiness");
        if let Err(e) = self.wait_until_ready(&container_name).await {
            warn!(database_id = id, error = %e, phase = %phase, "engine never became ready");
            rollback.run(&self.containers, &self.zfs, &provenance).await;
            return Err(e);
        }

        if let Source::Snapshot(snapshot) = &source {
            warn!(
                database_id = id,
                snapshot = %snapshot,
                "restored data keeps its original credentials, resetting password"
            );
            if let Err(e) = self.reset_password(&container_name, &password).await {
                warnings.push(format!(
                    "Could not reset password after snapshot restore: {}",
                    e
                ));
            }
        }

        let mut database_name = sanitized.clone();
        if let Source::Clone(source_db) = &source {
            if source_db.database_name != sanitized {
                phase = CreatePhase::Renaming;
                info!(database_id = id, phase = %phase, from = %source_db.database_name, to = %sanitized, "renaming cloned database");
                match self
                    .rename_database(&container_name, &source_db.database_name, &sanitized)
                    .await
                {
                    Ok(()) => {}
                    Err(e) => {
                        warn!(database_id = id, error = %e, "rename failed, keeping original name");
                        warnings.push(format!(
                            "Database rename failed, it is still named '{}': {}",
                            source_db.database_name, e
                        ));
                        database_name = source_db.database_name.clone();
                    }
                }
            }
        }

        phase = CreatePhase::Persisting;
        let now = Utc::now();
        let database = Database {
            id,
            host_id: self.host.id,
            name: request.name.clone(),
            database_name,
            description: request.description.clone(),
            db_type: "postgresql".to_string(),
            db_version: version,
            port: config.host_port,
            username: POSTGRES_USER.to_string(),
            password,
            container_id: Some(container_id),
            container_name: container_name.clone(),
            container_status: ContainerStatus::Running,
            health_status: HealthStatus::Healthy,
            zfs_dataset: storage.dataset_path.clone(),
            mount_path: storage.mount_path.clone(),
            creation_type: source.creation_type(),
            source_database: match &source {
                Source::Clone(db) => Some(db.id),
                _ => None,
            },
            source_snapshot: storage.source_snapshot.clone(),
            created_from_operation: Some(storage.created_from_operation),
            storage_used_bytes: 0,
            storage_referenced_bytes: 0,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        if let Err(e) = self.store.insert_database(database.clone()) {
            warn!(database_id = id, error = %e, phase = %phase, "could not persist database");
            rollback.run(&self.containers, &self.zfs, &provenance).await;
            return Err(e.into());
        }
        rollback.disarm();

        // a base for future branching; the database is usable without it
        let root_provenance = Provenance::database(id).with("root_snapshot", true);
        if let Err(e) = self
            .zfs
            .create_snapshot_tracked(&storage.dataset_path, "root", &root_provenance)
            .await
        {
            warn!(database_id = id, error = %e, "root snapshot failed");
            warnings.push(format!("Root snapshot could not be created: {}", e));
        }

        phase = CreatePhase::Done;
        info!(
            database_id = id,
            name = %database.name,
            port = database.port,
            phase = %phase,
            "database created"
        );
        Ok(CreateOutcome {
            connection: database.connection_info(&self.host.address),
            database,
            warnings,
        })
    }

    fn resolve_source(&self, request: &CreateDatabaseRequest) -> Result<Source, LifecycleError> {
        match request.creation_type {
            CreationType::Empty => Ok(Source::Empty),
            CreationType::Clone => {
                let source_id = request.source_database_id.ok_or_else(|| {
                    LifecycleError::Validation(
                        "source_database_id is required when cloning".to_string(),
                    )
                })?;
                let source = self.store.get_database(source_id)?.ok_or_else(|| {
                    LifecycleError::Validation(format!("Source database {} not found", source_id))
                })?;
                if !source.is_active {
                    return Err(LifecycleError::Validation(format!(
                        "Source database '{}' is not active",
                        source.name
                    )));
                }
                if source.host_id != self.host.id {
                    return Err(LifecycleError::Validation(
                        "Cross-host cloning is not yet supported. Source and target databases must be on the same host."
                            .to_string(),
                    ));
                }
                Ok(Source::Clone(source))
            }
            CreationType::Snapshot => {
                let snapshot = request.source_snapshot.clone().ok_or_else(|| {
                    LifecycleError::Validation(
                        "source_snapshot is required when restoring from a snapshot".to_string(),
                    )
                })?;
                if naming::split_snapshot_path(&snapshot).is_none() {
                    return Err(LifecycleError::Validation(format!(
                        "Invalid snapshot path '{}', expected dataset@snapshot",
                        snapshot
                    )));
                }
                Ok(Source::Snapshot(snapshot))
            }
        }
    }

    async fn allocate_port(&self, exclude: &[u16]) -> Result<u16, LifecycleError> {
        let (start, end) = (self.settings.port_range_start, self.settings.port_range_end);
        match self.containers.find_available_port(start, end, exclude).await {
            Ok(port) => Ok(port),
            Err(ContainerError::NoAvailablePorts { start, end }) => Err(
                LifecycleError::ResourceExhausted(format!(
                    "No available ports in range {}-{}",
                    start, end
                )),
            ),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_storage(
        &self,
        source: &Source,
        name: &str,
        provenance: &Provenance,
    ) -> Result<Storage, LifecycleError> {
        let pool = &self.host.zfs_pool;
        let storage = match source {
            Source::Empty => {
                let created = self.zfs.create_empty(pool, name, provenance).await?;
                Storage {
                    dataset_path: created.dataset_path,
                    mount_path: created.mount_path,
                    source_snapshot: None,
                    created_from_operation: created.operation_id,
                }
            }
            Source::Clone(source_db) => {
                let cloned = self
                    .zfs
                    .create_from_clone(&source_db.zfs_dataset, name, pool, provenance)
                    .await?;
                Storage {
                    dataset_path: cloned.dataset_path,
                    mount_path: cloned.mount_path,
                    source_snapshot: Some(cloned.source_snapshot),
                    created_from_operation: cloned.clone_operation_id,
                }
            }
            Source::Snapshot(snapshot) => {
                let restored = self
                    .zfs
                    .create_from_snapshot(snapshot, name, pool, provenance)
                    .await?;
                Storage {
                    dataset_path: restored.dataset_path,
                    mount_path: restored.mount_path,
                    source_snapshot: Some(snapshot.clone()),
                    created_from_operation: restored.operation_id,
                }
            }
        };
        Ok(storage)
    }

    /// `docker run`, moving to another port when the chosen one was taken
    /// between allocation and use. `config.host_port` ends up as the port
    /// actually bound.
    async fn run_container(
        &self,
        config: &mut ContainerConfig,
        reserved_ports: &[u16],
    ) -> Result<String, LifecycleError> {
        let mut tried = vec![config.host_port];
        let mut retries = 0;

        loop {
            match self.containers.create(config).await {
                Ok(container_id) => return Ok(container_id),
                Err(ContainerError::PortConflict { port, stderr }) => {
                    // docker leaves the container behind in "created" state
                    let removal = self.containers.remove(&config.name).await;
                    if let Some(error) = removal.error {
                        warn!(container = %config.name, error = %error, "could not remove conflicting container");
                    }
                    if retries >= self.settings.port_conflict_retries {
                        return Err(ContainerError::PortConflict { port, stderr }.into());
                    }
                    retries += 1;

                    let mut exclude = reserved_ports.to_vec();
                    exclude.extend(&tried);
                    let next = self.allocate_port(&exclude).await?;
                    warn!(
                        container = %config.name,
                        conflicted = port,
                        next,
                        attempt = retries,
                        "port taken at container start, retrying"
                    );
                    tried.push(next);
                    config.host_port = next;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn wait_until_ready(&self, container_name: &str) -> Result<(), LifecycleError> {
        let timeout = self.settings.readiness_timeout();
        let deadline = Instant::now() + timeout;

        loop {
            if self.containers.engine_ready(container_name).await {
                info!(container = %container_name, "engine ready");
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(LifecycleError::ReadinessTimeout(timeout.as_secs()));
            }
            sleep(self.settings.readiness_interval()).await;
        }
    }

    async fn reset_password(&self, container_name: &str, password: &str) -> Result<(), String> {
        let sql = format!(
            "ALTER USER {} WITH PASSWORD {}",
            POSTGRES_USER,
            command::sql_literal(password)
        );
        let output = self
            .containers
            .exec_in(container_name, &command::psql_secret(&sql))
            .await;
        if output.success {
            Ok(())
        } else {
            Err(output.message())
        }
    }

    /// Drop connections to `from`, then rename it to `to`
    async fn rename_database(&self, container_name: &str, from: &str, to: &str) -> Result<(), String> {
        let terminate = format!(
            "SELECT pg_terminate_backend(pid) FROM pg_stat_activity WHERE datname = {} AND pid <> pg_backend_pid()",
            command::sql_literal(from)
        );
        let output = self
            .containers
            .exec_in(container_name, &command::psql(&terminate))
            .await;
        if !output.success {
            warn!(container = %container_name, error = %output.message(), "could not terminate connections");
        }

        let rename = format!(
            "ALTER DATABASE {} RENAME TO {}",
            command::sql_identifier(from),
            command::sql_identifier(to)
        );
        let output = self
            .containers
            .exec_in(container_name, &command::psql(&rename))
            .await;
        if output.success || output.stdout.contains("ALTER DATABASE") {
            Ok(())
        } else {
            Err(output.message())
        }
    }
}
