// orchestrator/rollback.rs
// Compensating actions accumulated during a create, executed in reverse on abort

use tracing::{info, warn};

use crate::container::ContainerManager;
use crate::ledger::Provenance;
use crate::zfs_management::ZfsDatasetManager;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Compensation {
    RemoveContainer(String),
    DestroyDataset(String),
}

#[derive(Debug, Default)]
pub(crate) struct Rollback {
    steps: Vec<Compensation>,
}

impl Rollback {
    pub fn new() -> Self {
        Rollback::default()
    }

    pub fn push(&mut self, step: Compensation) {
        self.steps.push(step);
    }

    /// The flow succeeded; nothing is undone
    pub fn disarm(mut self) {
        self.steps.clear();
    }

    /// Undo everything, newest first. Failures are returned, never raised.
    pub async fn run(
        mut self,
        containers: &ContainerManager,
        zfs: &ZfsDatasetManager,
        provenance: &Provenance,
    ) -> Vec<String> {
        let mut problems = Vec::new();

        while let Some(step) = self.steps.pop() {
            info!(step = ?step, "rolling back");
            match step {
                Compensation::RemoveContainer(name) => {
                    let report = containers.remove(&name).await;
                    problems.extend(report.warnings);
                    if let Some(error) = report.error {
                        problems.push(error);
                    }
                }
                Compensation::DestroyDataset(dataset) => {
                    let provenance = provenance.clone().with("rollback", true);
                    if let Err(e) = zfs.destroy(&dataset, &provenance).await {
                        problems.push(format!("Failed to destroy {}: {}", dataset, e));
                    }
                }
            }
        }

        for problem in &problems {
            warn!(problem = %problem, "rollback incomplete");
        }
        problems
    }
}
