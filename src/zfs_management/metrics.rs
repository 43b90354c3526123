// zfs_management/metrics.rs
// Usage metrics via `zfs get -p`, formatted locally

use super::helpers::{parse_bytes, parse_ratio, size_metric};
use super::manager::ZfsDatasetManager;
use super::types::{DatasetMetrics, ZfsError};
use crate::command;

impl ZfsDatasetManager {
    /// Fetch one property in machine units
    async fn get_property(&self, dataset: &str, property: &str) -> Result<String, ZfsError> {
        let stdout = self
            .query(
                "zfs get",
                dataset,
                &command::zfs_get_value(property, dataset),
            )
            .await?;
        Ok(stdout.trim().to_string())
    }

    async fn get_size(&self, dataset: &str, property: &str) -> Result<u64, ZfsError> {
        let raw = self.get_property(dataset, property).await?;
        parse_bytes(&raw)
            .ok_or_else(|| ZfsError::Parse(format!("{} of {} is '{}'", property, dataset, raw)))
    }

    /// Quota-like properties: 0 or "none" means unset
    async fn get_limit(&self, dataset: &str, property: &str) -> Result<Option<u64>, ZfsError> {
        let raw = self.get_property(dataset, property).await?;
        Ok(parse_bytes(&raw).filter(|v| *v > 0))
    }

    pub async fn get_metrics(&self, dataset: &str) -> Result<DatasetMetrics, ZfsError> {
        let ratio_raw = self.get_property(dataset, "compressratio").await?;
        let compress_ratio = parse_ratio(&ratio_raw)
            .ok_or_else(|| ZfsError::Parse(format!("compressratio of {} is '{}'", dataset, ratio_raw)))?;

        Ok(DatasetMetrics {
            dataset: dataset.to_string(),
            used: size_metric(self.get_size(dataset, "used").await?),
            available: size_metric(self.get_size(dataset, "available").await?),
            referenced: size_metric(self.get_size(dataset, "referenced").await?),
            used_by_snapshots: size_metric(self.get_size(dataset, "usedbysnapshots").await?),
            used_by_dataset: size_metric(self.get_size(dataset, "usedbydataset").await?),
            logical_used: size_metric(self.get_size(dataset, "logicalused").await?),
            quota: self.get_limit(dataset, "quota").await?.map(size_metric),
            reservation: self.get_limit(dataset, "reservation").await?.map(size_metric),
            compress_ratio,
        })
    }
}
