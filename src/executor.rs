// executor.rs
// Command execution strategies: local process, host namespace via nsenter, scripted fake

use crate::command::HostCommand;
use crate::settings::{ExecutionMode, HostSettings};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Result of one external command. A zero exit code is the only success.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        CommandOutput {
            success: true,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(stderr: impl Into<String>) -> Self {
        CommandOutput {
            success: false,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn timed_out(timeout: Duration) -> Self {
        CommandOutput::failed(format!("Command timed out after {}s", timeout.as_secs()))
    }

    /// stderr if present, otherwise stdout; for error messages
    pub fn message(&self) -> String {
        if self.stderr.trim().is_empty() {
            self.stdout.trim().to_string()
        } else {
            self.stderr.trim().to_string()
        }
    }
}

/// Runs host commands. Implementations never return an error: spawn
/// failures and timeouts are reported as `success == false`.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(&self, command: &HostCommand, timeout: Duration) -> CommandOutput;

    /// Short label for logs
    fn describe(&self) -> String;
}

/// Runs the argv directly in the agent's own namespaces
#[derive(Debug, Clone, Default)]
pub struct LocalExecutor;

#[async_trait]
impl CommandExecutor for LocalExecutor {
    async fn execute(&self, command: &HostCommand, timeout: Duration) -> CommandOutput {
        run_process(command, timeout).await
    }

    fn describe(&self) -> String {
        "local".to_string()
    }
}

/// Enters the namespaces of `target_pid` (normally the host's init) before
/// running the command. Used when the agent itself runs in a privileged container.
#[derive(Debug, Clone)]
pub struct NsenterExecutor {
    target_pid: u32,
}

impl NsenterExecutor {
    pub fn new(target_pid: u32) -> Self {
        NsenterExecutor { target_pid }
    }

    fn wrap(&self, command: &HostCommand) -> HostCommand {
        let prefix: Vec<String> = ["-t", &self.target_pid.to_string(), "-m", "-u", "-i", "-n", "-p", "--"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        command.wrapped_in("nsenter", &prefix)
    }
}

#[async_trait]
impl CommandExecutor for NsenterExecutor {
    async fn execute(&self, command: &HostCommand, timeout: Duration) -> CommandOutput {
        run_process(&self.wrap(command), timeout).await
    }

    fn describe(&self) -> String {
        format!("nsenter(pid {})", self.target_pid)
    }
}

/// Pick the executor for the configured host. Resolved once at startup.
pub fn executor_for(host: &HostSettings) -> Arc<dyn CommandExecutor> {
    match host.execution {
        ExecutionMode::Local => Arc::new(LocalExecutor),
        ExecutionMode::Nsenter => Arc::new(NsenterExecutor::new(host.nsenter_target_pid)),
    }
}

async fn run_process(command: &HostCommand, timeout: Duration) -> CommandOutput {
    debug!(command = %command, timeout_secs = timeout.as_secs(), "executing");

    let child = Command::new(command.program())
        .args(command.argv())
        .kill_on_drop(true)
        .output();

    match tokio::time::timeout(timeout, child).await {
        Ok(Ok(output)) => CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        },
        Ok(Err(e)) => {
            warn!(command = %command, error = %e, "failed to spawn command");
            CommandOutput::failed(format!("Failed to execute {}: {}", command.program(), e))
        }
        Err(_) => {
            warn!(command = %command, "command timed out");
            CommandOutput::timed_out(timeout)
        }
    }
}

//-----------------------------------------------------
// SCRIPTED EXECUTOR
//-----------------------------------------------------

struct Rule {
    pattern: String,
    responses: Vec<CommandOutput>,
    hits: usize,
}

/// Fake executor matching rendered commands against substring rules.
///
/// The first matching rule wins; a rule with several responses returns them
/// in order and then keeps repeating the last one. Unmatched commands get the
/// fallback output (success with empty stdout unless changed).
pub struct ScriptedExecutor {
    rules: Mutex<Vec<Rule>>,
    fallback: CommandOutput,
    calls: Mutex<Vec<String>>,
}

impl Default for ScriptedExecutor {
    fn default() -> Self {
        ScriptedExecutor::new()
    }
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        ScriptedExecutor {
            rules: Mutex::new(Vec::new()),
            fallback: CommandOutput::ok(""),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_fallback(mut self, fallback: CommandOutput) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn on(self, pattern: &str, output: CommandOutput) -> Self {
        self.on_sequence(pattern, vec![output])
    }

    pub fn on_sequence(self, pattern: &str, responses: Vec<CommandOutput>) -> Self {
        if let Ok(mut rules) = self.rules.lock() {
            rules.push(Rule {
                pattern: pattern.to_string(),
                responses,
                hits: 0,
            });
        }
        self
    }

    /// Every command seen so far, rendered with secrets masked
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn calls_matching(&self, pattern: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.contains(pattern))
            .collect()
    }
}

#[async_trait]
impl CommandExecutor for ScriptedExecutor {
    async fn execute(&self, command: &HostCommand, _timeout: Duration) -> CommandOutput {
        let rendered = command.to_string();
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(rendered.clone());
        }

        let mut rules = match self.rules.lock() {
            Ok(rules) => rules,
            Err(_) => return CommandOutput::failed("scripted executor poisoned"),
        };
        for rule in rules.iter_mut() {
            if rendered.contains(&rule.pattern) && !rule.responses.is_empty() {
                let index = rule.hits.min(rule.responses.len() - 1);
                rule.hits += 1;
                return rule.responses[index].clone();
            }
        }
        self.fallback.clone()
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}
