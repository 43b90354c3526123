//! Shared fixtures for integration tests
//!
//! `SimulatedHost` is an in-memory host: it answers the zfs, docker and
//! container-exec commands the agent issues, keeps datasets, snapshots and
//! containers consistent between calls, and records every command. Failure
//! switches let tests drive the error paths.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use stagdb_agent::command::HostCommand;
use stagdb_agent::container::BindProbe;
use stagdb_agent::executor::{CommandExecutor, CommandOutput};
use stagdb_agent::models::{Host, ValidationStatus};
use stagdb_agent::orchestrator::DatabaseManager;
use stagdb_agent::settings::Settings;
use stagdb_agent::store::StateStore;

pub const POOL: &str = "tank";

#[derive(Debug, Clone)]
pub struct SimDataset {
    pub mountpoint: Option<String>,
    pub origin: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SimContainer {
    pub id: String,
    pub running: bool,
    pub port: u16,
    pub mount: String,
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
pub struct SimState {
    pub datasets: BTreeMap<String, SimDataset>,
    pub snapshots: BTreeMap<String, i64>,
    pub containers: BTreeMap<String, SimContainer>,
    pub images: BTreeSet<String>,
    /// Ports some other process listens on
    pub listening: BTreeSet<u16>,
    /// Ports that `docker run` reports as already allocated, once each
    pub conflicting_ports: BTreeSet<u16>,
    pub fail_permissions: bool,
    pub fail_destroy: bool,
    pub fail_rename: bool,
    pub fail_docker_run: bool,
    pub never_ready: bool,
    pub log: Vec<String>,
    clock: i64,
    next_container: u64,
}

#[derive(Clone)]
pub struct SimulatedHost {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedHost {
    /// A host with pool `tank` and nothing else
    pub fn new() -> Self {
        let mut state = SimState {
            clock: 1_700_000_000,
            ..SimState::default()
        };
        state.datasets.insert(
            POOL.to_string(),
            SimDataset {
                mountpoint: Some(format!("/{}", POOL)),
                origin: None,
            },
        );
        SimulatedHost {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn with<F: FnOnce(&mut SimState)>(&self, f: F) {
        f(&mut self.state.lock().unwrap());
    }

    pub fn state(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().unwrap()
    }

    pub fn has_dataset(&self, name: &str) -> bool {
        self.state().datasets.contains_key(name)
    }

    pub fn has_snapshot(&self, path: &str) -> bool {
        self.state().snapshots.contains_key(path)
    }

    pub fn container(&self, name: &str) -> Option<SimContainer> {
        self.state().containers.get(name).cloned()
    }

    pub fn commands(&self) -> Vec<String> {
        self.state().log.clone()
    }

    pub fn commands_matching(&self, pattern: &str) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter(|c| c.contains(pattern))
            .collect()
    }

    fn respond(&self, program: &str, args: &[String]) -> CommandOutput {
        let mut state = self.state.lock().unwrap();
        state.clock += 1;
        match program {
            "zfs" => zfs(&mut state, args),
            "zpool" => CommandOutput::ok(format!("{}\tONLINE\n", POOL)),
            "chown" | "chmod" => {
                if state.fail_permissions {
                    CommandOutput::failed(format!("{}: Operation not permitted", program))
                } else {
                    CommandOutput::ok("")
                }
            }
            "cat" => proc_net_tcp(&state, args.first().map(String::as_str).unwrap_or("")),
            "docker" => docker(&mut state, args),
            other => CommandOutput::failed(format!("{}: command not found", other)),
        }
    }
}

#[async_trait]
impl CommandExecutor for SimulatedHost {
    async fn execute(&self, command: &HostCommand, _timeout: Duration) -> CommandOutput {
        self.state.lock().unwrap().log.push(command.to_string());
        let args: Vec<String> = command.argv().into_iter().map(String::from).collect();
        self.respond(command.program(), &args)
    }

    fn describe(&self) -> String {
        "simulated".to_string()
    }
}

fn missing(name: &str) -> CommandOutput {
    CommandOutput::failed(format!("cannot open '{}': dataset does not exist", name))
}

fn zfs(state: &mut SimState, args: &[String]) -> CommandOutput {
    let target = args.last().cloned().unwrap_or_default();
    match args.first().map(String::as_str) {
        Some("version") => CommandOutput::ok("zfs-2.2.2-1\nzfs-kmod-2.2.2-1\n"),
        Some("list") if args.iter().any(|a| a == "snapshot") => {
            let recursive = args.iter().any(|a| a == "-r");
            let depth_one = args.iter().any(|a| a == "-d");
            let root = if recursive || depth_one {
                if !state.datasets.contains_key(&target) {
                    return missing(&target);
                }
                Some(target.clone())
            } else {
                None
            };
            let mut rows: Vec<(&String, &i64)> = state
                .snapshots
                .iter()
                .filter(|(path, _)| {
                    let dataset = path.split('@').next().unwrap_or_default();
                    match &root {
                        None => true,
                        Some(root) if depth_one => dataset == root,
                        Some(root) => dataset == root || dataset.starts_with(&format!("{}/", root)),
                    }
                })
                .collect();
            rows.sort_by_key(|(_, creation)| **creation);
            let out: String = rows
                .into_iter()
                .map(|(path, creation)| format!("{}\t{}\t0\t8388608\n", path, creation))
                .collect();
            CommandOutput::ok(out)
        }
        Some("list") => {
            if state.datasets.contains_key(&target) {
                CommandOutput::ok(format!("{}\n", target))
            } else {
                missing(&target)
            }
        }
        Some("create") => {
            if state.datasets.contains_key(&target) {
                return CommandOutput::failed(format!(
                    "cannot create '{}': dataset already exists",
                    target
                ));
            }
            let parent = target.rsplit_once('/').map(|(p, _)| p.to_string());
            if let Some(parent) = parent {
                if !state.datasets.contains_key(&parent) {
                    return CommandOutput::failed(format!(
                        "cannot create '{}': parent does not exist",
                        target
                    ));
                }
            }
            let mountpoint = args
                .iter()
                .find_map(|a| a.strip_prefix("mountpoint="))
                .map(String::from);
            state.datasets.insert(
                target,
                SimDataset {
                    mountpoint,
                    origin: None,
                },
            );
            CommandOutput::ok("")
        }
        Some("snapshot") => {
            let Some((dataset, _)) = target.split_once('@') else {
                return CommandOutput::failed("invalid snapshot name");
            };
            if !state.datasets.contains_key(dataset) {
                return missing(dataset);
            }
            if state.snapshots.contains_key(&target) {
                return CommandOutput::failed(format!(
                    "cannot create snapshot '{}': dataset already exists",
                    target
                ));
            }
            let clock = state.clock;
            state.snapshots.insert(target, clock);
            CommandOutput::ok("")
        }
        Some("clone") => {
            let snapshot = args[args.len() - 2].clone();
            if !state.snapshots.contains_key(&snapshot) {
                return CommandOutput::failed(format!(
                    "cannot open '{}': dataset does not exist",
                    snapshot
                ));
            }
            if state.datasets.contains_key(&target) {
                return CommandOutput::failed(format!(
                    "cannot create '{}': dataset already exists",
                    target
                ));
            }
            let mountpoint = args
                .iter()
                .find_map(|a| a.strip_prefix("mountpoint="))
                .map(String::from);
            state.datasets.insert(
                target,
                SimDataset {
                    mountpoint,
                    origin: Some(snapshot),
                },
            );
            CommandOutput::ok("")
        }
        Some("destroy") => zfs_destroy(state, &target),
        Some("rename") => zfs_rename(state, &args[args.len() - 2], &target),
        Some("promote") => zfs_promote(state, &target),
        Some("get") => {
            if !state.datasets.contains_key(&target) {
                return missing(&target);
            }
            let property = args[args.len() - 2].as_str();
            let value = match property {
                "used" => "16777216",
                "available" => "10737418240",
                "referenced" => "8388608",
                "usedbysnapshots" => "4194304",
                "usedbydataset" => "8388608",
                "logicalused" => "25165824",
                "quota" | "reservation" => "0",
                "compressratio" => "1.50x",
                _ => "-",
            };
            CommandOutput::ok(format!("{}\n", value))
        }
        _ => CommandOutput::failed("unrecognized zfs command"),
    }
}

fn clones_of(state: &SimState, snapshot_prefixes: &[String]) -> Vec<String> {
    state
        .datasets
        .iter()
        .filter(|(_, d)| {
            d.origin
                .as_deref()
                .is_some_and(|o| snapshot_prefixes.iter().any(|p| o.starts_with(p.as_str())))
        })
        .map(|(name, _)| name.clone())
        .collect()
}

fn zfs_destroy(state: &mut SimState, target: &str) -> CommandOutput {
    if target.contains('@') {
        if !state.snapshots.contains_key(target) {
            return missing(target);
        }
        let clones = clones_of(state, &[target.to_string()]);
        if !clones.is_empty() {
            return CommandOutput::failed(format!(
                "cannot destroy snapshot {}: snapshot has dependent clones\nuse '-R' to destroy the following datasets:\n{}",
                target,
                clones.join("\n")
            ));
        }
        state.snapshots.remove(target);
        return CommandOutput::ok("");
    }
    if !state.datasets.contains_key(target) {
        return missing(target);
    }
    if state.fail_destroy {
        return CommandOutput::failed(format!("cannot destroy '{}': dataset is busy", target));
    }
    let child_prefix = format!("{}/", target);
    let snap_prefix = format!("{}@", target);
    let in_tree = |name: &str| name == target || name.starts_with(&child_prefix);
    let clones: Vec<String> = clones_of(state, &[snap_prefix.clone(), child_prefix.clone()])
        .into_iter()
        .filter(|name| !in_tree(name))
        .collect();
    if !clones.is_empty() {
        return CommandOutput::failed(format!(
            "cannot destroy '{}': filesystem has dependent clones\nuse '-R' to destroy the following datasets:\n{}",
            target,
            clones.join("\n")
        ));
    }
    state.datasets.retain(|name, _| !in_tree(name));
    state
        .snapshots
        .retain(|path, _| !path.starts_with(&snap_prefix) && !path.starts_with(&child_prefix));
    CommandOutput::ok("")
}

fn zfs_rename(state: &mut SimState, from: &str, to: &str) -> CommandOutput {
    let Some(creation) = state.snapshots.get(from).copied() else {
        return missing(from);
    };
    if state.snapshots.contains_key(to) {
        return CommandOutput::failed(format!(
            "cannot rename to '{}': dataset already exists",
            to
        ));
    }
    state.snapshots.remove(from);
    state.snapshots.insert(to.to_string(), creation);
    for dataset in state.datasets.values_mut() {
        if dataset.origin.as_deref() == Some(from) {
            dataset.origin = Some(to.to_string());
        }
    }
    CommandOutput::ok("")
}

/// The origin's snapshots up to the clone point move to the clone, and the
/// origin becomes a clone of the clone
fn zfs_promote(state: &mut SimState, target: &str) -> CommandOutput {
    let Some(origin) = state.datasets.get(target).map(|d| d.origin.clone()) else {
        return missing(target);
    };
    let Some(origin) = origin else {
        return CommandOutput::failed(format!(
            "cannot promote '{}': not a cloned filesystem",
            target
        ));
    };
    let Some((origin_dataset, origin_name)) = origin.split_once('@') else {
        return CommandOutput::failed("invalid origin");
    };
    let (origin_dataset, origin_name) = (origin_dataset.to_string(), origin_name.to_string());
    let cutoff = state.snapshots.get(&origin).copied().unwrap_or(i64::MIN);
    let moving: Vec<(String, String, i64)> = state
        .snapshots
        .iter()
        .filter_map(|(path, creation)| {
            let (dataset, name) = path.split_once('@')?;
            (dataset == origin_dataset && *creation <= cutoff)
                .then(|| (path.clone(), name.to_string(), *creation))
        })
        .collect();
    for (_, name, _) in &moving {
        if state.snapshots.contains_key(&format!("{}@{}", target, name)) {
            return CommandOutput::failed(format!(
                "cannot promote '{}': snapshot name '{}' from origin conflicts with '{}@{}' from target",
                target, name, target, name
            ));
        }
    }

    for (old, name, creation) in &moving {
        let new = format!("{}@{}", target, name);
        state.snapshots.remove(old);
        state.snapshots.insert(new.clone(), *creation);
        for (dataset_name, dataset) in state.datasets.iter_mut() {
            if dataset_name != target && dataset.origin.as_deref() == Some(old.as_str()) {
                dataset.origin = Some(new.clone());
            }
        }
    }
    let inherited = state
        .datasets
        .get(&origin_dataset)
        .and_then(|d| d.origin.clone());
    if let Some(d) = state.datasets.get_mut(target) {
        d.origin = inherited;
    }
    if let Some(d) = state.datasets.get_mut(&origin_dataset) {
        d.origin = Some(format!("{}@{}", target, origin_name));
    }
    CommandOutput::ok("")
}

fn proc_net_tcp(state: &SimState, path: &str) -> CommandOutput {
    if path != "/proc/net/tcp" {
        return CommandOutput::ok("  sl  local_address rem_address   st\n");
    }
    let mut out = String::from("  sl  local_address rem_address   st tx_queue rx_queue\n");
    for (i, port) in state.listening.iter().enumerate() {
        out.push_str(&format!(
            "   {}: 00000000:{:04X} 00000000:0000 0A 00000000:00000000\n",
            i, port
        ));
    }
    CommandOutput::ok(out)
}

fn no_such_container(name: &str) -> CommandOutput {
    CommandOutput::failed(format!("Error response from daemon: No such container: {}", name))
}

fn docker(state: &mut SimState, args: &[String]) -> CommandOutput {
    let target = args.last().cloned().unwrap_or_default();
    match args.first().map(String::as_str) {
        Some("version") => CommandOutput::ok("24.0.7\n"),
        Some("image") => {
            if state.images.contains(&target) {
                CommandOutput::ok("[]")
            } else {
                CommandOutput::failed(format!("Error: No such image: {}", target))
            }
        }
        Some("pull") => {
            state.images.insert(target);
            CommandOutput::ok("Status: Downloaded newer image\n")
        }
        Some("ps") => {
            let out: String = state
                .containers
                .iter()
                .filter(|(_, c)| c.running)
                .map(|(name, c)| format!("{}\t0.0.0.0:{}->5432/tcp\n", name, c.port))
                .collect();
            CommandOutput::ok(out)
        }
        Some("run") => docker_run(state, args),
        Some("inspect") => match state.containers.get(&target) {
            Some(c) => CommandOutput::ok(format!(
                r#"[{{"Id": "{}", "State": {{"Status": "{}", "Running": {}, "StartedAt": "2024-03-01T10:00:00Z", "ExitCode": 0}}}}]"#,
                c.id,
                if c.running { "running" } else { "exited" },
                c.running
            )),
            None => CommandOutput::failed(format!("Error: No such object: {}", target)),
        },
        Some("start") => match state.containers.get_mut(&target) {
            Some(c) => {
                c.running = true;
                CommandOutput::ok(format!("{}\n", target))
            }
            None => no_such_container(&target),
        },
        Some("stop") | Some("kill") => match state.containers.get_mut(&target) {
            Some(c) => {
                c.running = false;
                CommandOutput::ok(format!("{}\n", target))
            }
            None => no_such_container(&target),
        },
        Some("rm") => match state.containers.remove(&target) {
            Some(_) => CommandOutput::ok(format!("{}\n", target)),
            None => no_such_container(&target),
        },
        Some("exec") => docker_exec(state, args),
        _ => CommandOutput::failed("unrecognized docker command"),
    }
}

fn docker_run(state: &mut SimState, args: &[String]) -> CommandOutput {
    let value_after = |flag: &str| {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .cloned()
            .unwrap_or_default()
    };
    let name = value_after("--name");
    let port: u16 = value_after("-p")
        .split(':')
        .next()
        .and_then(|p| p.parse().ok())
        .unwrap_or(0);
    let mount = value_after("-v")
        .split(':')
        .next()
        .unwrap_or_default()
        .to_string();
    let env: BTreeMap<String, String> = args
        .windows(2)
        .filter(|w| w[0] == "-e")
        .filter_map(|w| w[1].split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    if state.containers.contains_key(&name) {
        return CommandOutput::failed(format!(
            "docker: Error response from daemon: Conflict. The container name \"/{}\" is already in use",
            name
        ));
    }

    state.next_container += 1;
    let id = format!("{:064x}", state.next_container);
    if state.fail_docker_run {
        // Docker keeps the created container when the runtime fails to start it
        state.containers.insert(
            name,
            SimContainer {
                id,
                running: false,
                port,
                mount,
                env,
            },
        );
        return CommandOutput::failed("docker: Error response from daemon: OCI runtime create failed");
    }
    let taken = state.conflicting_ports.remove(&port)
        || state.listening.contains(&port)
        || state.containers.values().any(|c| c.running && c.port == port);
    state.containers.insert(
        name,
        SimContainer {
            id: id.clone(),
            running: !taken,
            port,
            mount,
            env,
        },
    );

    if taken {
        return CommandOutput::failed(format!(
            "docker: Error response from daemon: driver failed programming external connectivity: Bind for 0.0.0.0:{} failed: port is already allocated.",
            port
        ));
    }
    CommandOutput::ok(format!("{}\n", id))
}

fn docker_exec(state: &mut SimState, args: &[String]) -> CommandOutput {
    let name = args.get(1).cloned().unwrap_or_default();
    let running = state.containers.get(&name).map(|c| c.running).unwrap_or(false);
    if !running {
        return CommandOutput::failed(format!(
            "Error response from daemon: container {} is not running",
            name
        ));
    }

    match args.get(2).map(String::as_str) {
        Some("pg_isready") => {
            if state.never_ready {
                CommandOutput::failed("/var/run/postgresql:5432 - no response")
            } else {
                CommandOutput::ok("/var/run/postgresql:5432 - accepting connections\n")
            }
        }
        Some("psql") => {
            let sql = args.last().cloned().unwrap_or_default();
            if sql.starts_with("ALTER DATABASE") {
                if state.fail_rename {
                    CommandOutput::failed("ERROR:  database is being accessed by other users")
                } else {
                    CommandOutput::ok("ALTER DATABASE\n")
                }
            } else if sql.starts_with("ALTER USER") {
                CommandOutput::ok("ALTER ROLE\n")
            } else {
                CommandOutput::ok(" pg_terminate_backend \n(0 rows)\n")
            }
        }
        _ => CommandOutput::failed("exec: executable file not found"),
    }
}

/// Every port is bindable unless listed
#[derive(Debug, Default, Clone)]
pub struct FakeBindProbe {
    pub unbindable: BTreeSet<u16>,
}

#[async_trait]
impl BindProbe for FakeBindProbe {
    async fn is_bindable(&self, port: u16) -> bool {
        !self.unbindable.contains(&port)
    }
}

/// Settings with zero waits so readiness and restart loops finish instantly
pub fn fast_settings() -> Settings {
    let mut settings = Settings::default();
    settings.databases.readiness_interval_secs = 0;
    settings.databases.readiness_timeout_secs = 0;
    settings.databases.restart_delay_secs = 0;
    settings
}

pub fn valid_host(id: u64, name: &str) -> Host {
    Host {
        id,
        name: name.to_string(),
        address: "10.0.0.5".to_string(),
        zfs_pool: POOL.to_string(),
        is_active: true,
        is_docker_host: false,
        validation_status: ValidationStatus::Valid,
        last_validated: None,
        zfs_version: None,
        docker_version: None,
    }
}

/// Manager for a fresh simulated host with an in-memory store
pub fn setup() -> (DatabaseManager, SimulatedHost, StateStore) {
    let sim = SimulatedHost::new();
    let store = StateStore::in_memory();
    let host = store.upsert_host(valid_host(0, "local")).unwrap();
    let manager = DatabaseManager::new(host, Arc::new(sim.clone()), store.clone(), &fast_settings())
        .unwrap()
        .with_bind_probe(Arc::new(FakeBindProbe::default()));
    (manager, sim, store)
}
