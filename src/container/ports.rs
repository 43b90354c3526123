// container/ports.rs
// Host port allocation cross-checked against three independent signals

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::ops::RangeInclusive;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use super::manager::ContainerManager;
use crate::command;
use crate::error::ContainerError;

const TCP_LISTEN_STATE: &str = "0A";

/// Last-resort check: can this process bind the port right now?
#[async_trait]
pub trait BindProbe: Send + Sync {
    async fn is_bindable(&self, port: u16) -> bool;
}

/// Binds 0.0.0.0:port the way the container runtime would
#[derive(Debug, Clone, Default)]
pub struct TcpBindProbe;

#[async_trait]
impl BindProbe for TcpBindProbe {
    async fn is_bindable(&self, port: u16) -> bool {
        TcpListener::bind(("0.0.0.0", port)).await.is_ok()
    }
}

/// Ports in use according to each signal
#[derive(Debug, Clone, Default)]
pub struct PortUsage {
    pub listening: BTreeSet<u16>,
    pub published: BTreeSet<u16>,
}

impl PortUsage {
    pub fn contains(&self, port: u16) -> bool {
        self.listening.contains(&port) || self.published.contains(&port)
    }
}

/// Listening ports from /proc/net/tcp or /proc/net/tcp6 within [start, end]
pub fn parse_proc_net_tcp(contents: &str, start: u16, end: u16) -> BTreeSet<u16> {
    contents
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() <= 3 || fields[3] != TCP_LISTEN_STATE {
                return None;
            }
            let (_, port_hex) = fields[1].rsplit_once(':')?;
            u16::from_str_radix(port_hex, 16).ok()
        })
        .filter(|port| (start..=end).contains(port))
        .collect()
}

/// Host ports from `docker ps --format "{{.Names}}\t{{.Ports}}"`, e.g.
/// `db  0.0.0.0:5433->5432/tcp, :::5433->5432/tcp`. Published ranges such as
/// `0.0.0.0:6000-6002->6000-6002/tcp` count every port in them.
pub fn parse_docker_ports(output: &str, start: u16, end: u16) -> BTreeSet<u16> {
    output
        .lines()
        .flat_map(|line| line.split(','))
        .filter_map(published_host_ports)
        .flatten()
        .filter(|port| (start..=end).contains(port))
        .collect()
}

fn published_host_ports(mapping: &str) -> Option<RangeInclusive<u16>> {
    let (host_part, _) = mapping.split_once("->")?;
    let (_, ports) = host_part.trim().rsplit_once(':')?;
    match ports.trim().split_once('-') {
        Some((first, last)) => Some(first.parse().ok()?..=last.parse().ok()?),
        None => {
            let port = ports.trim().parse().ok()?;
            Some(port..=port)
        }
    }
}

impl ContainerManager {
    /// Collect the socket-table and container-mapping signals for a range
    pub async fn used_ports(&self, start: u16, end: u16) -> PortUsage {
        let mut usage = PortUsage::default();
        let timeout = self.timeouts.probe();

        for table in ["/proc/net/tcp", "/proc/net/tcp6"] {
            let output = self.executor.execute(&command::read_file(table), timeout).await;
            if output.success {
                usage.listening.extend(parse_proc_net_tcp(&output.stdout, start, end));
            } else {
                debug!(table, stderr = %output.stderr.trim(), "socket table unavailable");
            }
        }

        let output = self
            .executor
            .execute(&command::docker_published_ports(), timeout)
            .await;
        if output.success {
            usage.published = parse_docker_ports(&output.stdout, start, end);
        } else {
            warn!(stderr = %output.stderr.trim(), "could not list published container ports");
        }

        debug!(
            listening = ?usage.listening,
            published = ?usage.published,
            "port usage"
        );
        usage
    }

    /// First port in [start, end] not in `exclude`, not listening, not
    /// published by a container, and bindable right now
    pub async fn find_available_port(
        &self,
        start: u16,
        end: u16,
        exclude: &[u16],
    ) -> Result<u16, ContainerError> {
        let usage = self.used_ports(start, end).await;

        for port in start..=end {
            if exclude.contains(&port) || usage.contains(port) {
                continue;
            }
            if self.bind_probe.is_bindable(port).await {
                info!(port, "allocated port");
                return Ok(port);
            }
            debug!(port, "port looked free but bind failed");
        }

        warn!(start, end, "no available ports");
        Err(ContainerError::NoAvailablePorts { start, end })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROC_NET_TCP: &str = "  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode
   0: 0100007F:1538 00000000:0000 0A 00000000:00000000 00:00000000 00000000   999        0 1 1 0000000000000000 100 0 0 10 0
   1: 00000000:1539 00000000:0000 0A 00000000:00000000 00:00000000 00000000     0        0 2 1 0000000000000000 100 0 0 10 0
   2: 0100007F:153A 0100007F:D2F0 01 00000000:00000000 00:00000000 00000000     0        0 3 1 0000000000000000 100 0 0 10 0
   3: 00000000:0016 00000000:0000 0A 00000000:00000000 00:00000000 00000000     0        0 4 1 0000000000000000 100 0 0 10 0
";

    #[test]
    fn test_parse_proc_net_tcp_listen_only() {
        // 0x1538 = 5432, 0x1539 = 5433, 0x153A = 5434 (established), 0x16 = 22
        let ports = parse_proc_net_tcp(PROC_NET_TCP, 5432, 5500);
        assert_eq!(ports.into_iter().collect::<Vec<_>>(), vec![5432, 5433]);
    }

    #[test]
    fn test_parse_proc_net_tcp6_address() {
        let tcp6 = "  sl  local_address                         remote_address                        st
   0: 00000000000000000000000000000000:153B 00000000000000000000000000000000:0000 0A 00000000:00000000
";
        assert!(parse_proc_net_tcp(tcp6, 5432, 5500).contains(&5435));
    }

    #[test]
    fn test_parse_docker_ports() {
        let output = "stagdb_db_a\t0.0.0.0:5433->5432/tcp, :::5433->5432/tcp\n\
                      web\t0.0.0.0:8080->80/tcp\n\
                      stagdb_db_b\t0.0.0.0:5440->5432/tcp\n\
                      idle\t5432/tcp\n";
        let ports = parse_docker_ports(output, 5432, 5500);
        assert_eq!(ports.into_iter().collect::<Vec<_>>(), vec![5433, 5440]);
    }

    #[test]
    fn test_parse_docker_port_ranges() {
        let output = "batch\t0.0.0.0:5450-5452->5450-5452/tcp, :::5450-5452->5450-5452/tcp\n\
                      edge\t0.0.0.0:5498-5503->8000-8005/tcp\n";
        let ports = parse_docker_ports(output, 5432, 5500);
        assert_eq!(
            ports.into_iter().collect::<Vec<_>>(),
            vec![5450, 5451, 5452, 5498, 5499, 5500]
        );
    }

    #[tokio::test]
    async fn test_tcp_bind_sees_held_port() {
        let held = TcpListener::bind(("0.0.0.0", 0)).await.unwrap();
        let port = held.local_addr().unwrap().port();
        assert!(!TcpBindProbe.is_bindable(port).await);
        drop(held);
    }

    #[test]
    fn test_port_usage_contains_either_signal() {
        let mut usage = PortUsage::default();
        usage.listening.insert(5432);
        usage.published.insert(5433);
        assert!(usage.contains(5432));
        assert!(usage.contains(5433));
        assert!(!usage.contains(5434));
    }
}
