//! StagDB agent
//!
//! Provisions PostgreSQL databases on a single host, each backed by its own
//! ZFS dataset and Docker container. Databases can be created empty, cloned
//! from another database (copy-on-write) or restored from any snapshot. Every
//! mutating ZFS command is recorded in an append-only ledger.

pub mod auth;
pub mod command;
pub mod container;
pub mod error;
pub mod executor;
pub mod handlers;
pub mod host;
pub mod ledger;
pub mod models;
pub mod naming;
pub mod orchestrator;
pub mod routes;
pub mod settings;
pub mod store;
pub mod utils;
pub mod zfs_management;
