// zfs_management/mod.rs
// Dataset manager split per concern; re-exports the public surface

mod datasets;
mod helpers;
mod manager;
mod metrics;
mod snapshots;
mod types;


pub use helpers::format_size;
pub use manager::ZfsDatasetManager;
pub use types::{
    CloneResult, CreateResult, DatasetMetrics, DestroyResult, HierarchyEntry, PromoteResult,
    SizeMetric, SnapshotEntry, SnapshotResult, SnapshotSource, ZfsError,
};
