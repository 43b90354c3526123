// zfs_management/types.rs
// Public types for ZFS dataset operations

use serde::Serialize;
use std::collections::BTreeMap;

pub use crate::error::ZfsError;

/// A dataset created from nothing or from a caller-supplied snapshot
#[derive(Debug, Clone)]
pub struct CreateResult {
    pub dataset_path: String,
    pub mount_path: String,
    /// Ledger entry of the `zfs create` / `zfs clone`
    pub operation_id: u64,
}

/// A dataset cloned from a live dataset through a throwaway snapshot
#[derive(Debug, Clone)]
pub struct CloneResult {
    pub dataset_path: String,
    pub mount_path: String,
    /// Full path of the throwaway snapshot
    pub source_snapshot: String,
    pub snapshot_operation_id: u64,
    pub clone_operation_id: u64,
}

#[derive(Debug, Clone)]
pub struct SnapshotResult {
    pub snapshot_path: String,
    pub operation_id: u64,
}

#[derive(Debug, Clone)]
pub struct DestroyResult {
    pub dataset_path: String,
    /// The dataset was already gone; still recorded as a successful destroy
    pub already_absent: bool,
    pub operation_id: u64,
}

/// A clone that took over its origin's snapshots
#[derive(Debug, Clone)]
pub struct PromoteResult {
    pub dataset_path: String,
    /// Old full snapshot path -> where it lives after the promote
    pub moved: BTreeMap<String, String>,
    pub operation_id: u64,
}

/// One line of `zfs list -t snapshot`
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SnapshotEntry {
    pub name: String,
    pub dataset: String,
    pub snapshot_name: String,
    /// Unix seconds
    pub creation: i64,
    pub used_bytes: u64,
    pub referenced_bytes: u64,
    pub used: String,
    pub referenced: String,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotSource {
    CurrentDataset,
    ParentDataset,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct HierarchyEntry {
    #[serde(flatten)]
    pub snapshot: SnapshotEntry,
    pub source: SnapshotSource,
    /// 0 for the dataset itself, 1 for its parent, ...
    pub parent_level: u32,
}

/// A byte count with its human-readable rendering
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SizeMetric {
    pub bytes: u64,
    pub human: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatasetMetrics {
    pub dataset: String,
    pub used: SizeMetric,
    pub available: SizeMetric,
    pub referenced: SizeMetric,
    pub used_by_snapshots: SizeMetric,
    pub used_by_dataset: SizeMetric,
    pub logical_used: SizeMetric,
    /// None when unset (zfs reports 0)
    pub quota: Option<SizeMetric>,
    pub reservation: Option<SizeMetric>,
    pub compress_ratio: f64,
}
