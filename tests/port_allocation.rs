//! # Integration Tests: Port Allocation
//!
//! ## What is tested
//! - A port reported busy by any of the three signals (listening socket,
//!   published container mapping, failed bind) is never returned
//! - Explicit exclusions are honored
//! - Exhaustion reports the scanned range

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use common::{FakeBindProbe, SimContainer, SimulatedHost};
use stagdb_agent::container::ContainerManager;
use stagdb_agent::error::ContainerError;
use stagdb_agent::settings::TimeoutSettings;

fn containers(sim: &SimulatedHost, unbindable: &[u16]) -> ContainerManager {
    let probe = FakeBindProbe {
        unbindable: unbindable.iter().copied().collect(),
    };
    ContainerManager::new(Arc::new(sim.clone()), TimeoutSettings::default())
        .with_bind_probe(Arc::new(probe))
}

fn publish(sim: &SimulatedHost, name: &str, port: u16) {
    sim.with(|s| {
        s.containers.insert(
            name.to_string(),
            SimContainer {
                id: "f".repeat(64),
                running: true,
                port,
                mount: String::new(),
                env: BTreeMap::new(),
            },
        );
    });
}

/// Test: Each signal independently marks a port as taken
#[tokio::test]
async fn test_skips_ports_busy_on_any_signal() {
    let sim = SimulatedHost::new();
    sim.with(|s| {
        s.listening.insert(5432);
    });
    publish(&sim, "web", 5433);
    let mgr = containers(&sim, &[5434]);

    let usage = mgr.used_ports(5432, 5500).await;
    assert!(usage.listening.contains(&5432));
    assert!(usage.published.contains(&5433));

    assert_eq!(mgr.find_available_port(5432, 5500, &[]).await.unwrap(), 5435);
    assert_eq!(
        mgr.find_available_port(5432, 5500, &[5435, 5436]).await.unwrap(),
        5437
    );
}

/// Test: Nothing free in the range
#[tokio::test]
async fn test_exhausted_range() {
    let sim = SimulatedHost::new();
    sim.with(|s| {
        s.listening.insert(5432);
    });
    publish(&sim, "web", 5433);
    let mgr = containers(&sim, &[5434]);

    let err = mgr.find_available_port(5432, 5435, &[5435]).await.unwrap_err();
    assert!(matches!(
        err,
        ContainerError::NoAvailablePorts {
            start: 5432,
            end: 5435
        }
    ));
}

/// Test: Ports outside the range are ignored by every signal
#[tokio::test]
async fn test_out_of_range_ports_ignored() {
    let sim = SimulatedHost::new();
    sim.with(|s| {
        s.listening.insert(22);
        s.listening.insert(8080);
    });
    let mgr = containers(&sim, &[]);

    let usage = mgr.used_ports(5432, 5500).await;
    assert!(usage.listening.is_empty());
    assert_eq!(mgr.find_available_port(5432, 5500, &[]).await.unwrap(), 5432);
}
