// command.rs
// Structured host commands: every zfs/docker/coreutils invocation is built here

use std::collections::BTreeMap;
use std::fmt;

/// Uid/gid the postgres image runs as
pub const POSTGRES_UID: u32 = 999;

/// Data directory inside the postgres container
pub const POSTGRES_DATA_DIR: &str = "/var/lib/postgresql/data";

/// Port the engine listens on inside the container
pub const POSTGRES_CONTAINER_PORT: u16 = 5432;

/// One argv element. Secret arguments are masked when rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arg {
    value: String,
    secret: bool,
}

impl Arg {
    pub fn value(&self) -> &str {
        &self.value
    }
}

/// A command executed as an argv vector, never through a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostCommand {
    program: String,
    args: Vec<Arg>,
}

impl HostCommand {
    pub fn new(program: impl Into<String>) -> Self {
        HostCommand {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, value: impl Into<String>) -> Self {
        self.args.push(Arg {
            value: value.into(),
            secret: false,
        });
        self
    }

    pub fn args<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for value in values {
            self = self.arg(value);
        }
        self
    }

    /// Add an argument whose value must not appear in logs or the ledger
    pub fn secret_arg(mut self, value: impl Into<String>) -> Self {
        self.args.push(Arg {
            value: value.into(),
            secret: true,
        });
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Raw argv values (excluding the program)
    pub fn argv(&self) -> Vec<&str> {
        self.args.iter().map(|a| a.value.as_str()).collect()
    }

    /// Prefix this command with a wrapper program (e.g. nsenter)
    pub fn wrapped_in(&self, program: &str, prefix_args: &[String]) -> HostCommand {
        let mut wrapped = HostCommand::new(program).args(prefix_args.iter().cloned());
        wrapped = wrapped.arg(self.program.clone());
        wrapped.args.extend(self.args.iter().cloned());
        wrapped
    }
}

impl fmt::Display for HostCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", shell_quote(&self.program))?;
        for arg in &self.args {
            if arg.secret {
                // keep the KEY= part of env assignments readable
                match arg.value.split_once('=') {
                    Some((key, _)) => write!(f, " {}=***", shell_quote(key))?,
                    None => write!(f, " ***")?,
                }
            } else {
                write!(f, " {}", shell_quote(&arg.value))?;
            }
        }
        Ok(())
    }
}

/// Quote a value for display as a POSIX shell word
pub fn shell_quote(value: &str) -> String {
    if value.is_empty() {
        return "''".to_string();
    }
    let plain = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "_-./:=@,+%".contains(c));
    if plain {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}

/// Quote a SQL string literal
pub fn sql_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Quote a SQL identifier
pub fn sql_identifier(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

//-----------------------------------------------------
// ZFS
//-----------------------------------------------------

pub fn zfs_exists(dataset: &str) -> HostCommand {
    HostCommand::new("zfs").args(["list", "-H", "-o", "name"]).arg(dataset)
}

/// `zfs create [-o k=v]... dataset`. Properties are emitted in a fixed order.
pub fn zfs_create(dataset: &str, properties: &[(&str, String)]) -> HostCommand {
    let mut cmd = HostCommand::new("zfs").arg("create");
    for (key, value) in properties {
        cmd = cmd.arg("-o").arg(format!("{}={}", key, value));
    }
    cmd.arg(dataset)
}

pub fn zfs_destroy_recursive(dataset: &str) -> HostCommand {
    HostCommand::new("zfs").args(["destroy", "-r"]).arg(dataset)
}

/// Make a clone independent of its origin; the origin's snapshots up to the
/// clone point move to the clone
pub fn zfs_promote(dataset: &str) -> HostCommand {
    HostCommand::new("zfs").arg("promote").arg(dataset)
}

pub fn zfs_rename(from: &str, to: &str) -> HostCommand {
    HostCommand::new("zfs").arg("rename").arg(from).arg(to)
}

pub fn zfs_snapshot(snapshot_path: &str) -> HostCommand {
    HostCommand::new("zfs").arg("snapshot").arg(snapshot_path)
}

pub fn zfs_clone(snapshot_path: &str, target: &str, mount_path: &str) -> HostCommand {
    HostCommand::new("zfs")
        .arg("clone")
        .arg("-o")
        .arg(format!("mountpoint={}", mount_path))
        .arg(snapshot_path)
        .arg(target)
}

pub fn zfs_get_value(property: &str, dataset: &str) -> HostCommand {
    HostCommand::new("zfs")
        .args(["get", "-H", "-p", "-o", "value"])
        .arg(property)
        .arg(dataset)
}

/// Snapshots of exactly one dataset, oldest first
pub fn zfs_list_own_snapshots(dataset: &str) -> HostCommand {
    HostCommand::new("zfs")
        .args([
            "list",
            "-H",
            "-p",
            "-t",
            "snapshot",
            "-o",
            "name,creation,used,referenced",
            "-s",
            "creation",
            "-d",
            "1",
        ])
        .arg(dataset)
}

/// Snapshots below a dataset (all when `root` is None), oldest first
pub fn zfs_list_snapshots_recursive(root: Option<&str>) -> HostCommand {
    let cmd = HostCommand::new("zfs").args([
        "list",
        "-H",
        "-p",
        "-t",
        "snapshot",
        "-o",
        "name,creation,used,referenced",
        "-s",
        "creation",
    ]);
    match root {
        Some(root) => cmd.arg("-r").arg(root),
        None => cmd,
    }
}

pub fn zfs_version() -> HostCommand {
    HostCommand::new("zfs").arg("version")
}

pub fn zpool_health(pool: &str) -> HostCommand {
    HostCommand::new("zpool")
        .args(["list", "-H", "-o", "name,health"])
        .arg(pool)
}

pub fn chown_recursive(path: &str) -> HostCommand {
    HostCommand::new("chown")
        .arg("-R")
        .arg(format!("{}:{}", POSTGRES_UID, POSTGRES_UID))
        .arg(path)
}

pub fn chmod_private(path: &str) -> HostCommand {
    HostCommand::new("chmod").arg("700").arg(path)
}

//-----------------------------------------------------
// Docker
//-----------------------------------------------------

/// Parameters of `docker run` for a database container
#[derive(Debug, Clone)]
pub struct RunSpec {
    pub name: String,
    pub image: String,
    pub host_port: u16,
    pub volume_mount: String,
    pub env: BTreeMap<String, String>,
    /// Env keys whose values are masked when the command is rendered
    pub secret_env: Vec<String>,
}

pub fn docker_run(spec: &RunSpec) -> HostCommand {
    let mut cmd = HostCommand::new("docker")
        .args(["run", "-d", "--name"])
        .arg(spec.name.clone())
        .args(["--restart", "unless-stopped", "-p"])
        .arg(format!("{}:{}", spec.host_port, POSTGRES_CONTAINER_PORT))
        .arg("-v")
        .arg(format!("{}:{}", spec.volume_mount, POSTGRES_DATA_DIR));
    for (key, value) in &spec.env {
        cmd = cmd.arg("-e");
        let assignment = format!("{}={}", key, value);
        cmd = if spec.secret_env.iter().any(|k| k == key) {
            cmd.secret_arg(assignment)
        } else {
            cmd.arg(assignment)
        };
    }
    cmd.arg(spec.image.clone())
}

pub fn docker_version() -> HostCommand {
    HostCommand::new("docker").args(["version", "--format", "{{.Server.Version}}"])
}

pub fn docker_image_inspect(image: &str) -> HostCommand {
    HostCommand::new("docker").args(["image", "inspect"]).arg(image)
}

pub fn docker_pull(image: &str) -> HostCommand {
    HostCommand::new("docker").arg("pull").arg(image)
}

pub fn docker_inspect(name: &str) -> HostCommand {
    HostCommand::new("docker").arg("inspect").arg(name)
}

pub fn docker_start(name: &str) -> HostCommand {
    HostCommand::new("docker").arg("start").arg(name)
}

pub fn docker_stop(name: &str, grace_secs: u64) -> HostCommand {
    HostCommand::new("docker")
        .args(["stop", "-t"])
        .arg(grace_secs.to_string())
        .arg(name)
}

pub fn docker_kill(name: &str) -> HostCommand {
    HostCommand::new("docker").arg("kill").arg(name)
}

pub fn docker_rm(name: &str, force: bool) -> HostCommand {
    let cmd = HostCommand::new("docker").arg("rm");
    let cmd = if force { cmd.arg("-f") } else { cmd };
    cmd.arg(name)
}

pub fn docker_exec(name: &str, command: &HostCommand) -> HostCommand {
    let mut cmd = HostCommand::new("docker")
        .arg("exec")
        .arg(name)
        .arg(command.program.clone());
    cmd.args.extend(command.args.iter().cloned());
    cmd
}

pub fn docker_published_ports() -> HostCommand {
    HostCommand::new("docker").args(["ps", "--format", "{{.Names}}\t{{.Ports}}"])
}

pub fn read_file(path: &str) -> HostCommand {
    HostCommand::new("cat").arg(path)
}

//-----------------------------------------------------
// PostgreSQL (run inside the container)
//-----------------------------------------------------

pub fn pg_isready() -> HostCommand {
    HostCommand::new("pg_isready").args(["-U", "postgres"])
}

pub fn psql(sql: &str) -> HostCommand {
    HostCommand::new("psql")
        .args(["-U", "postgres", "-d", "postgres", "-c"])
        .arg(sql)
}

/// Same as `psql` but the statement is masked when rendered
pub fn psql_secret(sql: &str) -> HostCommand {
    HostCommand::new("psql")
        .args(["-U", "postgres", "-d", "postgres", "-c"])
        .secret_arg(sql)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zfs_create_renders_expected_shape() {
        let cmd = zfs_create(
            "tank/stagdb/databases/orders_db",
            &[
                ("compression", "lz4".to_string()),
                ("recordsize", "8K".to_string()),
                ("mountpoint", "/stagdb/data/orders_db".to_string()),
            ],
        );
        assert_eq!(
            cmd.to_string(),
            "zfs create -o compression=lz4 -o recordsize=8K -o mountpoint=/stagdb/data/orders_db tank/stagdb/databases/orders_db"
        );
    }

    #[test]
    fn test_zfs_clone_and_destroy_shapes() {
        let clone = zfs_clone("tank/a@s1", "tank/b", "/stagdb/data/b");
        assert_eq!(clone.to_string(), "zfs clone -o mountpoint=/stagdb/data/b tank/a@s1 tank/b");
        assert_eq!(zfs_destroy_recursive("tank/b").to_string(), "zfs destroy -r tank/b");
        assert_eq!(zfs_snapshot("tank/b@root").to_string(), "zfs snapshot tank/b@root");
        assert_eq!(zfs_promote("tank/b").to_string(), "zfs promote tank/b");
        assert_eq!(
            zfs_rename("tank/a@root", "tank/a@root-a").argv(),
            vec!["rename", "tank/a@root", "tank/a@root-a"]
        );
    }

    #[test]
    fn test_hostile_values_stay_single_argv_elements() {
        let cmd = zfs_snapshot("tank/x@a; rm -rf /");
        assert_eq!(cmd.argv(), vec!["snapshot", "tank/x@a; rm -rf /"]);
        assert_eq!(cmd.to_string(), "zfs snapshot 'tank/x@a; rm -rf /'");
    }

    #[test]
    fn test_shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("plain-value_1.0"), "plain-value_1.0");
    }

    #[test]
    fn test_docker_run_masks_password() {
        let mut env = BTreeMap::new();
        env.insert("POSTGRES_DB".to_string(), "orders_db".to_string());
        env.insert("POSTGRES_PASSWORD".to_string(), "s3cret".to_string());
        let spec = RunSpec {
            name: "stagdb_db_orders_db".to_string(),
            image: "postgres:15-alpine".to_string(),
            host_port: 5433,
            volume_mount: "/stagdb/data/orders_db".to_string(),
            env,
            secret_env: vec!["POSTGRES_PASSWORD".to_string()],
        };
        let cmd = docker_run(&spec);
        let rendered = cmd.to_string();
        assert!(rendered.contains("-p 5433:5432"));
        assert!(rendered.contains("-v /stagdb/data/orders_db:/var/lib/postgresql/data"));
        assert!(rendered.contains("POSTGRES_PASSWORD=***"));
        assert!(!rendered.contains("s3cret"));
        assert!(cmd.argv().contains(&"POSTGRES_PASSWORD=s3cret"));
    }

    #[test]
    fn test_wrapped_in_prefixes_program() {
        let cmd = zfs_snapshot("tank/a@b")
            .wrapped_in("nsenter", &["-t".to_string(), "1".to_string(), "--".to_string()]);
        assert_eq!(cmd.program(), "nsenter");
        assert_eq!(cmd.argv(), vec!["-t", "1", "--", "zfs", "snapshot", "tank/a@b"]);
    }

    #[test]
    fn test_sql_quoting() {
        assert_eq!(sql_literal("o'neil"), "'o''neil'");
        assert_eq!(sql_identifier("orders_db"), "\"orders_db\"");
    }
}
