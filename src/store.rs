//! State store for hosts, databases and the ZFS operation ledger
//!
//! Everything lives in one `Arc<RwLock<State>>`. When opened with a path,
//! the whole state is written back as JSON after every mutation (temp file
//! then rename, so a crash never leaves a half-written file).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::models::{Database, Host, OperationStatus, ZfsOperation};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct State {
    next_host_id: u64,
    next_database_id: u64,
    next_operation_id: u64,
    hosts: BTreeMap<u64, Host>,
    databases: BTreeMap<u64, Database>,
    operations: BTreeMap<u64, ZfsOperation>,
}

impl State {
    fn allocate(counter: &mut u64) -> u64 {
        *counter += 1;
        *counter
    }
}

#[derive(Clone)]
pub struct StateStore {
    state: Arc<RwLock<State>>,
    path: Option<PathBuf>,
}

impl StateStore {
    /// Store that is never written to disk
    pub fn in_memory() -> Self {
        StateStore {
            state: Arc::new(RwLock::new(State::default())),
            path: None,
        }
    }

    /// Load state from `path` if it exists, otherwise start empty
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let state = match fs::read_to_string(&path) {
            Ok(contents) => {
                let state: State = serde_json::from_str(&contents)?;
                info!(
                    path = %path.display(),
                    databases = state.databases.len(),
                    operations = state.operations.len(),
                    "loaded state"
                );
                state
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => State::default(),
            Err(source) => {
                return Err(StoreError::Persist {
                    path: path.display().to_string(),
                    source,
                })
            }
        };

        Ok(StateStore {
            state: Arc::new(RwLock::new(state)),
            path: Some(path),
        })
    }

    fn read<T>(&self, f: impl FnOnce(&State) -> T) -> Result<T, StoreError> {
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
        Ok(f(&state))
    }

    /// Apply a mutation to a copy of the state and swap it in only once it
    /// is persisted. A failing `f` or write leaves the state untouched.
    fn mutate<T>(
        &self,
        f: impl FnOnce(&mut State) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut state = self.state.write().map_err(|_| StoreError::Poisoned)?;
        let mut next = state.clone();
        let value = f(&mut next)?;
        if let Some(path) = &self.path {
            persist_json(path, &next)?;
        }
        *state = next;
        Ok(value)
    }

    // =========================================================================
    // Hosts
    // =========================================================================

    /// Insert the host, or replace the stored host with the same name.
    /// Returns the host with its id filled in.
    pub fn upsert_host(&self, mut host: Host) -> Result<Host, StoreError> {
        self.mutate(|state| {
            let existing = state
                .hosts
                .values()
                .find(|h| h.name == host.name)
                .map(|h| h.id);
            host.id = match existing {
                Some(id) => id,
                None => State::allocate(&mut state.next_host_id),
            };
            state.hosts.insert(host.id, host.clone());
            Ok(host)
        })
    }

    pub fn get_host(&self, id: u64) -> Result<Option<Host>, StoreError> {
        self.read(|state| state.hosts.get(&id).cloned())
    }

    // =========================================================================
    // Databases
    // =========================================================================

    /// Reserve an id before the record exists, so ledger entries written
    /// during creation can already point at it
    pub fn reserve_database_id(&self) -> Result<u64, StoreError> {
        self.mutate(|state| Ok(State::allocate(&mut state.next_database_id)))
    }

    pub fn insert_database(&self, database: Database) -> Result<(), StoreError> {
        self.mutate(|state| {
            if state.databases.contains_key(&database.id) {
                return Err(StoreError::Conflict(format!(
                    "database id {} already exists",
                    database.id
                )));
            }
            if state
                .databases
                .values()
                .any(|d| d.container_name == database.container_name)
            {
                return Err(StoreError::Conflict(format!(
                    "container name '{}' is already in use",
                    database.container_name
                )));
            }
            state.databases.insert(database.id, database);
            Ok(())
        })
    }

    pub fn update_database(&self, database: &Database) -> Result<(), StoreError> {
        self.mutate(|state| match state.databases.get_mut(&database.id) {
            Some(slot) => {
                *slot = database.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound {
                kind: "database",
                id: database.id,
            }),
        })
    }

    pub fn get_database(&self, id: u64) -> Result<Option<Database>, StoreError> {
        self.read(|state| state.databases.get(&id).cloned())
    }

    /// Databases on `host_id`, or all hosts when None
    pub fn list_databases(&self, host_id: Option<u64>) -> Result<Vec<Database>, StoreError> {
        self.read(|state| {
            state
                .databases
                .values()
                .filter(|d| host_id.map(|h| d.host_id == h).unwrap_or(true))
                .cloned()
                .collect()
        })
    }

    /// Case-insensitive lookup among active databases of one host
    pub fn find_active_by_name(
        &self,
        host_id: u64,
        name: &str,
    ) -> Result<Option<Database>, StoreError> {
        self.read(|state| {
            state
                .databases
                .values()
                .find(|d| d.is_active && d.host_id == host_id && d.name.eq_ignore_ascii_case(name))
                .cloned()
        })
    }

    pub fn container_name_in_use(&self, container_name: &str) -> Result<bool, StoreError> {
        self.read(|state| {
            state
                .databases
                .values()
                .any(|d| d.container_name == container_name)
        })
    }

    /// Active databases whose `source_database` is `id`
    pub fn dependents(&self, id: u64) -> Result<Vec<Database>, StoreError> {
        self.read(|state| {
            state
                .databases
                .values()
                .filter(|d| d.is_active && d.source_database == Some(id))
                .cloned()
                .collect()
        })
    }

    /// Other databases whose source snapshot lives on `dataset`
    pub fn snapshot_consumers(
        &self,
        dataset: &str,
        excluding: u64,
    ) -> Result<Vec<Database>, StoreError> {
        let prefix = format!("{}@", dataset);
        self.read(|state| {
            state
                .databases
                .values()
                .filter(|d| d.id != excluding)
                .filter(|d| {
                    d.source_snapshot
                        .as_deref()
                        .map(|s| s.starts_with(&prefix))
                        .unwrap_or(false)
                })
                .cloned()
                .collect()
        })
    }

    /// Ports held by active databases on the host
    pub fn active_ports(&self, host_id: u64) -> Result<Vec<u16>, StoreError> {
        self.read(|state| {
            state
                .databases
                .values()
                .filter(|d| d.is_active && d.host_id == host_id)
                .map(|d| d.port)
                .collect()
        })
    }

    pub fn delete_database(&self, id: u64) -> Result<Option<Database>, StoreError> {
        self.mutate(|state| Ok(state.databases.remove(&id)))
    }

    // =========================================================================
    // ZFS operations
    // =========================================================================

    /// Store a new pending operation and return its id
    pub fn begin_operation(&self, mut operation: ZfsOperation) -> Result<u64, StoreError> {
        self.mutate(|state| {
            operation.id = State::allocate(&mut state.next_operation_id);
            operation.status = OperationStatus::Pending;
            let id = operation.id;
            state.operations.insert(id, operation);
            Ok(id)
        })
    }

    /// Finalize a pending operation. Completed operations are never changed.
    pub fn complete_operation(
        &self,
        id: u64,
        finalize: impl FnOnce(&mut ZfsOperation),
    ) -> Result<ZfsOperation, StoreError> {
        self.mutate(|state| {
            let op = state
                .operations
                .get_mut(&id)
                .ok_or(StoreError::NotFound {
                    kind: "operation",
                    id,
                })?;
            if op.status != OperationStatus::Pending {
                return Err(StoreError::OperationCompleted(id));
            }
            finalize(op);
            if op.status == OperationStatus::Pending {
                op.status = OperationStatus::Failed;
            }
            Ok(op.clone())
        })
    }

    pub fn get_operation(&self, id: u64) -> Result<Option<ZfsOperation>, StoreError> {
        self.read(|state| state.operations.get(&id).cloned())
    }

    /// Every operation, oldest first
    pub fn list_operations(&self) -> Result<Vec<ZfsOperation>, StoreError> {
        self.read(|state| {
            let mut ops: Vec<ZfsOperation> = state.operations.values().cloned().collect();
            ops.sort_by(|a, b| a.started_at.cmp(&b.started_at).then(a.id.cmp(&b.id)));
            ops
        })
    }

    /// Delete every operation initiated by `database_id`; returns how many
    pub fn purge_operations(&self, database_id: u64) -> Result<usize, StoreError> {
        self.mutate(|state| {
            let before = state.operations.len();
            state
                .operations
                .retain(|_, op| op.initiated_by_database != Some(database_id));
            Ok(before - state.operations.len())
        })
    }
}

/// Write JSON to `path` atomically (temp file in the same dir, then rename)
fn persist_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let to_err = |source| StoreError::Persist {
        path: path.display().to_string(),
        source,
    };

    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            fs::create_dir_all(dir).map_err(to_err)?;
        }
    }

    let json = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).map_err(to_err)?;
    fs::rename(&tmp, path).map_err(to_err)?;
    debug!(path = %path.display(), "state persisted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        ContainerStatus, CreationType, HealthStatus, OperationType, ValidationStatus,
    };
    use chrono::Utc;

    fn host(name: &str) -> Host {
        Host {
            id: 0,
            name: name.to_string(),
            address: "127.0.0.1".to_string(),
            zfs_pool: "tank".to_string(),
            is_active: true,
            is_docker_host: false,
            validation_status: ValidationStatus::Valid,
            last_validated: None,
            zfs_version: None,
            docker_version: None,
        }
    }

    fn database(id: u64, host_id: u64, name: &str) -> Database {
        let now = Utc::now();
        Database {
            id,
            host_id,
            name: name.to_string(),
            database_name: name.to_lowercase(),
            description: None,
            db_type: "postgresql".to_string(),
            db_version: 15,
            port: 5432 + id as u16,
            username: "postgres".to_string(),
            password: "pw".to_string(),
            container_id: None,
            container_name: format!("stagdb_db_{}", name.to_lowercase()),
            container_status: ContainerStatus::Running,
            health_status: HealthStatus::Healthy,
            zfs_dataset: format!("tank/stagdb/databases/{}", name.to_lowercase()),
            mount_path: format!("/stagdb/data/{}", name.to_lowercase()),
            creation_type: CreationType::Empty,
            source_database: None,
            source_snapshot: None,
            created_from_operation: None,
            storage_used_bytes: 0,
            storage_referenced_bytes: 0,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn pending_op(initiated_by: Option<u64>) -> ZfsOperation {
        ZfsOperation {
            id: 0,
            operation_id: uuid::Uuid::new_v4().to_string(),
            host_id: 1,
            operation_type: OperationType::Snapshot,
            source_dataset: Some("tank/a".to_string()),
            source_snapshot: None,
            target_dataset: None,
            command: "zfs snapshot tank/a@s".to_string(),
            status: OperationStatus::Pending,
            stdout: String::new(),
            stderr: String::new(),
            initiated_by_database: initiated_by,
            context: BTreeMap::new(),
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: None,
        }
    }

    #[test]
    fn test_upsert_host_reuses_id_by_name() {
        let store = StateStore::in_memory();
        let first = store.upsert_host(host("local")).unwrap();
        let mut changed = host("local");
        changed.zfs_pool = "data".to_string();
        let second = store.upsert_host(changed).unwrap();
        let other = store.upsert_host(host("remote")).unwrap();

        assert_eq!(first.id, second.id);
        assert_ne!(first.id, other.id);
        assert_eq!(store.get_host(first.id).unwrap().unwrap().zfs_pool, "data");
    }

    #[test]
    fn test_container_name_must_be_unique() {
        let store = StateStore::in_memory();
        store.insert_database(database(1, 1, "orders_db")).unwrap();
        let mut dup = database(2, 2, "other");
        dup.container_name = "stagdb_db_orders_db".to_string();
        assert!(matches!(
            store.insert_database(dup),
            Err(StoreError::Conflict(_))
        ));
    }

    #[test]
    fn test_find_active_by_name_is_case_insensitive_and_host_scoped() {
        let store = StateStore::in_memory();
        store.insert_database(database(1, 1, "Orders_DB")).unwrap();

        assert!(store.find_active_by_name(1, "orders_db").unwrap().is_some());
        assert!(store.find_active_by_name(2, "orders_db").unwrap().is_none());
    }

    #[test]
    fn test_dependents_and_snapshot_consumers() {
        let store = StateStore::in_memory();
        store.insert_database(database(1, 1, "parent")).unwrap();
        let mut child = database(2, 1, "child");
        child.source_database = Some(1);
        child.source_snapshot = Some("tank/stagdb/databases/parent@clone-child-1".to_string());
        store.insert_database(child).unwrap();

        let deps = store.dependents(1).unwrap();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].name, "child");

        let consumers = store
            .snapshot_consumers("tank/stagdb/databases/parent", 1)
            .unwrap();
        assert_eq!(consumers.len(), 1);
        assert!(store
            .snapshot_consumers("tank/stagdb/databases/par", 1)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_completed_operation_is_immutable() {
        let store = StateStore::in_memory();
        let id = store.begin_operation(pending_op(None)).unwrap();
        assert_eq!(
            store.get_operation(id).unwrap().unwrap().status,
            OperationStatus::Pending
        );

        let done = store
            .complete_operation(id, |op| op.status = OperationStatus::Success)
            .unwrap();
        assert!(done.succeeded());

        let again = store.complete_operation(id, |op| op.status = OperationStatus::Failed);
        assert!(matches!(again, Err(StoreError::OperationCompleted(_))));
        assert!(store.get_operation(id).unwrap().unwrap().succeeded());
    }

    #[test]
    fn test_purge_operations_by_database() {
        let store = StateStore::in_memory();
        store.begin_operation(pending_op(Some(1))).unwrap();
        store.begin_operation(pending_op(Some(1))).unwrap();
        store.begin_operation(pending_op(Some(2))).unwrap();
        store.begin_operation(pending_op(None)).unwrap();

        assert_eq!(store.purge_operations(1).unwrap(), 2);
        assert_eq!(store.list_operations().unwrap().len(), 2);
    }

    /// Test: A failed write leaves counters and records as they were
    #[test]
    fn test_failed_persist_discards_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = StateStore::open(&path).unwrap();
        let h = store.upsert_host(host("local")).unwrap();

        // a directory in place of the file makes the rename fail
        fs::create_dir(&path).unwrap();
        assert!(matches!(
            store.reserve_database_id(),
            Err(StoreError::Persist { .. })
        ));
        assert!(store.reserve_database_id().is_err());
        assert!(store.insert_database(database(1, h.id, "orders_db")).is_err());
        assert_eq!(store.read(|s| s.next_database_id).unwrap(), 0);
        assert!(store.get_database(1).unwrap().is_none());

        fs::remove_dir(&path).unwrap();
        assert_eq!(store.reserve_database_id().unwrap(), 1);
    }

    #[test]
    fn test_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");

        {
            let store = StateStore::open(&path).unwrap();
            let h = store.upsert_host(host("local")).unwrap();
            let id = store.reserve_database_id().unwrap();
            store.insert_database(database(id, h.id, "orders_db")).unwrap();
            store.begin_operation(pending_op(Some(id))).unwrap();
        }

        let reopened = StateStore::open(&path).unwrap();
        assert_eq!(reopened.list_databases(None).unwrap().len(), 1);
        assert_eq!(reopened.list_operations().unwrap().len(), 1);
        // counters survive too, so ids are never reused
        assert_eq!(reopened.reserve_database_id().unwrap(), 2);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_corrupt_state_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{ nope").unwrap();
        assert!(matches!(StateStore::open(&path), Err(StoreError::Corrupt(_))));
    }
}
