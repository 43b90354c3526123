// zfs_management/helpers.rs
// Parsing and formatting helpers for machine-readable zfs output

use super::types::{SizeMetric, SnapshotEntry};

/// Format bytes with a binary prefix (1024 base): "512B", "1.50K", "10.00G"
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["K", "M", "G", "T", "P"];

    if bytes < 1024 {
        return format!("{}B", bytes);
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.2}{}", value, UNITS[unit])
}

pub fn size_metric(bytes: u64) -> SizeMetric {
    SizeMetric {
        bytes,
        human: format_size(bytes),
    }
}

/// Parse a `-p` size value. "-" and "none" mean unset.
pub fn parse_bytes(value: &str) -> Option<u64> {
    match value.trim() {
        "" | "-" | "none" => None,
        v => v.parse().ok(),
    }
}

/// compressratio comes back as "1.00" with -p, "1.00x" without
pub fn parse_ratio(value: &str) -> Option<f64> {
    value.trim().trim_end_matches('x').parse().ok()
}

/// Parse one tab-separated `name,creation,used,referenced` line
pub fn parse_snapshot_line(line: &str) -> Option<SnapshotEntry> {
    let mut parts = line.split('\t');
    let name = parts.next()?.trim();
    let creation = parts.next()?.trim().parse().ok()?;
    let used_bytes = parse_bytes(parts.next()?).unwrap_or(0);
    let referenced_bytes = parse_bytes(parts.next()?).unwrap_or(0);
    let (dataset, snapshot_name) = name.split_once('@')?;

    Some(SnapshotEntry {
        name: name.to_string(),
        dataset: dataset.to_string(),
        snapshot_name: snapshot_name.to_string(),
        creation,
        used_bytes,
        referenced_bytes,
        used: format_size(used_bytes),
        referenced: format_size(referenced_bytes),
    })
}

/// Parse `zfs list -H -p -t snapshot` output, skipping malformed lines
pub fn parse_snapshot_list(output: &str) -> Vec<SnapshotEntry> {
    output
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(parse_snapshot_line)
        .collect()
}

/// stderr of a zfs command that targeted a dataset which is not there
pub fn is_missing_dataset(stderr: &str) -> bool {
    stderr.contains("does not exist")
}
