// container/manager.rs
// Docker CLI lifecycle for database containers

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::ports::{BindProbe, TcpBindProbe};
use super::types::{
    ContainerConfig, ContainerStatusReport, HealthCheckReport, HealthChecks, InspectEntry,
    RemovalReport,
};
use crate::command::{self, HostCommand};
use crate::error::ContainerError;
use crate::executor::{CommandExecutor, CommandOutput};
use crate::models::{ContainerStatus, HealthStatus};
use crate::settings::TimeoutSettings;


#[derive(Clone)]
pub struct ContainerManager {
    pub(crate) executor: Arc<dyn CommandExecutor>,
    pub(crate) timeouts: TimeoutSettings,
    pub(crate) bind_probe: Arc<dyn BindProbe>,
}

impl ContainerManager {
    pub fn new(executor: Arc<dyn CommandExecutor>, timeouts: TimeoutSettings) -> Self {
        ContainerManager {
            executor,
            timeouts,
            bind_probe: Arc::new(TcpBindProbe),
        }
    }

    pub fn with_bind_probe(mut self, probe: Arc<dyn BindProbe>) -> Self {
        self.bind_probe = probe;
        self
    }

    async fn docker(&self, cmd: &HostCommand) -> CommandOutput {
        self.executor.execute(cmd, self.timeouts.command()).await
    }

    fn stop_timeout(&self) -> Duration {
        // docker's own grace period plus room for the CLI round trip
        Duration::from_secs(self.timeouts.stop_secs) + self.timeouts.command()
    }

    /// Make sure `image` is present locally, pulling it if needed.
    /// Returns true if a pull happened.
    pub async fn ensure_image(&self, image: &str) -> Result<bool, ContainerError> {
        let cached = self
            .executor
            .execute(&command::docker_image_inspect(image), self.timeouts.probe())
            .await;
        if cached.success {
            debug!(image, "image already present");
            return Ok(false);
        }

        info!(image, "pulling image");
        let pulled = self
            .executor
            .execute(&command::docker_pull(image), self.timeouts.image_pull())
            .await;
        if !pulled.success {
            return Err(ContainerError::ImagePull {
                image: image.to_string(),
                stderr: pulled.message(),
            });
        }
        Ok(true)
    }

    /// Pull the image (separately, with the long pull timeout), then run the
    /// container detached. Returns the container id.
    pub async fn create(&self, config: &ContainerConfig) -> Result<String, ContainerError> {
        self.ensure_image(&config.image).await?;

        info!(container = %config.name, port = config.host_port, "creating container");
        let output = self.docker(&command::docker_run(config)).await;
        if output.success && !output.stdout.trim().is_empty() {
            let id = output.stdout.trim().to_string();
            info!(container = %config.name, id = %short_id(&id), "container created");
            return Ok(id);
        }

        let stderr = output.message();
        if is_port_conflict(&stderr) {
            return Err(ContainerError::PortConflict {
                port: config.host_port,
                stderr,
            });
        }
        Err(ContainerError::CommandFailed {
            action: "run",
            container: config.name.clone(),
            stderr,
        })
    }

    pub async fn status(&self, name: &str) -> ContainerStatusReport {
        let output = self.docker(&command::docker_inspect(name)).await;
        if !output.success {
            if is_missing_container(&output.stderr) {
                return ContainerStatusReport::missing(name);
            }
            return ContainerStatusReport::error(
                name,
                format!("Failed to inspect container: {}", output.message()),
            );
        }

        match parse_inspect(name, &output.stdout, Utc::now()) {
            Ok(report) => report,
            Err(e) => ContainerStatusReport::error(name, e.to_string()),
        }
    }

    /// Starting a running container is a no-op success
    pub async fn start(&self, name: &str) -> Result<(), ContainerError> {
        let output = self.docker(&command::docker_start(name)).await;
        check(output, "start", name)?;
        info!(container = %name, "container started");
        Ok(())
    }

    /// Graceful stop; stopping a stopped container succeeds
    pub async fn stop(&self, name: &str) -> Result<(), ContainerError> {
        let output = self
            .executor
            .execute(
                &command::docker_stop(name, self.timeouts.stop_secs),
                self.stop_timeout(),
            )
            .await;
        check(output, "stop", name)?;
        info!(container = %name, "container stopped");
        Ok(())
    }

    pub async fn kill(&self, name: &str) -> Result<(), ContainerError> {
        let output = self.docker(&command::docker_kill(name)).await;
        check(output, "kill", name)?;
        warn!(container = %name, "container force-killed");
        Ok(())
    }

    /// Stop (escalating to kill) and remove. Never fails outright; every
    /// escalation and failure is reported on the returned summary.
    pub async fn remove(&self, name: &str) -> RemovalReport {
        let mut report = RemovalReport {
            container: name.to_string(),
            ..RemovalReport::default()
        };

        let status = self.status(name).await;
        if status.status == ContainerStatus::Missing {
            info!(container = %name, "container already absent");
            report.already_absent = true;
            report.removed = true;
            return report;
        }

        if status.is_running() {
            match self.stop(name).await {
                Ok(()) => report.stopped_gracefully = true,
                Err(e) => {
                    report
                        .warnings
                        .push(format!("Graceful stop failed, forcing kill: {}", e));
                    match self.kill(name).await {
                        Ok(()) => report.force_killed = true,
                        Err(e) => report.warnings.push(format!("Force kill failed: {}", e)),
                    }
                }
            }
        }

        let output = self.docker(&command::docker_rm(name, true)).await;
        if output.success || is_missing_container(&output.stderr) {
            info!(container = %name, "container removed");
            report.removed = true;
        } else {
            let message = format!("Failed to remove container {}: {}", name, output.message());
            warn!(container = %name, error = %message, "container removal failed");
            report.error = Some(message);
        }
        report
    }

    /// Run a command inside the container
    pub async fn exec_in(&self, name: &str, cmd: &HostCommand) -> CommandOutput {
        self.docker(&command::docker_exec(name, cmd)).await
    }

    /// Engine-level readiness probe
    pub async fn engine_ready(&self, name: &str) -> bool {
        self.executor
            .execute(
                &command::docker_exec(name, &command::pg_isready()),
                self.timeouts.probe(),
            )
            .await
            .success
    }

    pub async fn health_check(&self, name: &str) -> HealthCheckReport {
        let status = self.status(name).await;
        let mut checks = HealthChecks {
            existence: status.status != ContainerStatus::Missing,
            running: false,
            engine_ready: false,
        };

        let message = if !checks.existence {
            "Container does not exist".to_string()
        } else if !status.is_running() {
            format!("Container is {}", status.status)
        } else {
            checks.running = true;
            checks.engine_ready = self.engine_ready(name).await;
            if checks.engine_ready {
                "PostgreSQL is accepting connections".to_string()
            } else {
                "PostgreSQL is not accepting connections".to_string()
            }
        };

        let overall = if checks.existence && checks.running && checks.engine_ready {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        };

        HealthCheckReport {
            container: name.to_string(),
            overall,
            checks,
            message,
            checked_at: Utc::now(),
        }
    }
}

fn check(output: CommandOutput, action: &'static str, name: &str) -> Result<(), ContainerError> {
    if output.success {
        return Ok(());
    }
    if is_missing_container(&output.stderr) {
        return Err(ContainerError::Missing(name.to_string()));
    }
    Err(ContainerError::CommandFailed {
        action,
        container: name.to_string(),
        stderr: output.message(),
    })
}

/// `docker inspect` says "No such object", the container subcommands "No such container"
fn is_missing_container(stderr: &str) -> bool {
    stderr.contains("No such container") || stderr.contains("No such object")
}

fn short_id(id: &str) -> &str {
    &id[..id.len().min(12)]
}

fn is_port_conflict(stderr: &str) -> bool {
    stderr.contains("port is already allocated") || stderr.contains("address already in use")
}

/// Turn `docker inspect` JSON into a status report
pub(crate) fn parse_inspect(
    name: &str,
    json: &str,
    now: DateTime<Utc>,
) -> Result<ContainerStatusReport, ContainerError> {
    let entries: Vec<InspectEntry> = serde_json::from_str(json)
        .map_err(|e| ContainerError::Parse(format!("docker inspect {}: {}", name, e)))?;
    let entry = entries
        .into_iter()
        .next()
        .ok_or_else(|| ContainerError::Parse(format!("docker inspect {}: empty result", name)))?;

    let state = entry.state;
    let status = if state.running {
        ContainerStatus::Running
    } else if state.status == "dead" {
        ContainerStatus::Error
    } else {
        ContainerStatus::Stopped
    };

    let started_at = state
        .started_at
        .as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
        .filter(|t| t.timestamp() > 0);

    let uptime = if state.running {
        started_at.map(|t| format_uptime(now.signed_duration_since(t)))
    } else {
        None
    };

    Ok(ContainerStatusReport {
        container: name.to_string(),
        status,
        container_id: Some(short_id(&entry.id).to_string()),
        started_at,
        exit_code: if state.running { None } else { state.exit_code },
        uptime,
        message: None,
    })
}

/// "2d 3h 4m", "3h 4m" or "4m"
pub(crate) fn format_uptime(elapsed: chrono::Duration) -> String {
    let total_minutes = elapsed.num_minutes().max(0);
    let days = total_minutes / (24 * 60);
    let hours = (total_minutes / 60) % 24;
    let minutes = total_minutes % 60;

    if days > 0 {
        format!("{}d {}h {}m", days, hours, minutes)
    } else if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else {
        format!("{}m", minutes)
    }
}
