// container/mod.rs
// Container lifecycle: run, inspect, stop/kill/remove, health, port allocation

mod manager;
mod ports;
mod types;

pub use manager::ContainerManager;
pub use ports::{parse_docker_ports, parse_proc_net_tcp, BindProbe, PortUsage, TcpBindProbe};
pub use types::{
    ContainerConfig, ContainerStatusReport, HealthCheckReport, HealthChecks, RemovalReport,
};
