// orchestrator/mod.rs
// Database lifecycle: the only layer that decides fatal vs. warning and
// issues compensating actions

mod control;
mod create;
mod delete;
mod rollback;
mod types;

pub use types::{
    ChildDatabaseAction, CleanupSummary, CreateOutcome, CreatePhase, DatasetCleanup,
    DeleteOutcome,
};

use rand::distr::Alphanumeric;
use rand::Rng;
use std::sync::Arc;

use crate::container::{BindProbe, ContainerManager};
use crate::error::LifecycleError;
use crate::executor::CommandExecutor;
use crate::ledger::ZfsLedger;
use crate::models::{Database, Host};
use crate::naming;
use crate::settings::{DatabaseSettings, Settings, TimeoutSettings};
use crate::store::StateStore;
use crate::zfs_management::ZfsDatasetManager;

const PASSWORD_LENGTH: usize = 32;

/// Lifecycle manager for the databases of one host
#[derive(Clone)]
pub struct DatabaseManager {
    host: Host,
    store: StateStore,
    zfs: ZfsDatasetManager,
    containers: ContainerManager,
    settings: DatabaseSettings,
    timeouts: TimeoutSettings,
}

impl DatabaseManager {
    pub fn new(
        host: Host,
        executor: Arc<dyn CommandExecutor>,
        store: StateStore,
        settings: &Settings,
    ) -> Result<Self, LifecycleError> {
        if !host.can_create_databases() {
            return Err(LifecycleError::HostUnavailable(host.name.clone()));
        }

        let ledger = ZfsLedger::new(store.clone(), host.id);
        let zfs = ZfsDatasetManager::new(executor.clone(), ledger, settings.timeouts.command());
        let containers = ContainerManager::new(executor, settings.timeouts.clone());

        Ok(DatabaseManager {
            host,
            store,
            zfs,
            containers,
            settings: settings.databases.clone(),
            timeouts: settings.timeouts.clone(),
        })
    }

    /// Replace the bind test used during port allocation
    pub fn with_bind_probe(mut self, probe: Arc<dyn BindProbe>) -> Self {
        self.containers = self.containers.with_bind_probe(probe);
        self
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    pub fn zfs(&self) -> &ZfsDatasetManager {
        &self.zfs
    }

    pub fn containers(&self) -> &ContainerManager {
        &self.containers
    }

    /// Format rules plus uniqueness among active databases on this host
    pub fn validate_name(&self, name: &str) -> Result<(), String> {
        naming::validate_database_name_format(name)?;
        match self.store.find_active_by_name(self.host.id, name) {
            Ok(Some(_)) => Err(format!("Database '{}' already exists on this host", name)),
            Ok(None) => Ok(()),
            Err(e) => Err(format!("Could not check name uniqueness: {}", e)),
        }
    }

    /// Databases that belong to another host are reported as not found
    pub fn get_database(&self, id: u64) -> Result<Database, LifecycleError> {
        match self.store.get_database(id)? {
            Some(db) if db.host_id == self.host.id => Ok(db),
            _ => Err(LifecycleError::NotFound(id)),
        }
    }

    pub fn list_databases(&self) -> Result<Vec<Database>, LifecycleError> {
        Ok(self.store.list_databases(Some(self.host.id))?)
    }
}

pub(crate) fn generate_password() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(PASSWORD_LENGTH)
        .map(char::from)
        .collect()
}
