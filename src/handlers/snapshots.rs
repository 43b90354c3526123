// handlers/snapshots.rs
// Snapshot handlers: manual snapshot of a database, snapshot inventory

use serde::Deserialize;
use warp::http::StatusCode;
use warp::{Rejection, Reply};

use crate::models::{CreateSnapshotRequest, SnapshotCreatedResponse, SnapshotListResponse};
use crate::naming::validate_snapshot_name;
use crate::orchestrator::DatabaseManager;
use crate::utils::{created_response, error_response, lifecycle_error_response, success_response};

#[derive(Debug, Default, Deserialize)]
pub struct PoolQuery {
    pub pool: Option<String>,
}

pub async fn create_snapshot_handler(
    id: u64,
    body: CreateSnapshotRequest,
    manager: DatabaseManager,
) -> Result<impl Reply, Rejection> {
    // Validate snapshot name before attempting creation
    if !validate_snapshot_name(&body.snapshot_name) {
        return Ok(error_response(
            StatusCode::BAD_REQUEST,
            &format!("Invalid snapshot name: '{}'", body.snapshot_name),
        ));
    }

    match manager.create_manual_snapshot(id, &body.snapshot_name).await {
        Ok(result) => Ok(created_response(SnapshotCreatedResponse {
            status: "success".to_string(),
            message: format!("Snapshot '{}' created successfully", result.snapshot_path),
            snapshot: result.snapshot_path,
            operation_id: result.operation_id,
        })),
        Err(e) => Ok(lifecycle_error_response(&e)),
    }
}

/// GET /v1/snapshots?pool=...
pub async fn list_snapshots_handler(
    query: PoolQuery,
    manager: DatabaseManager,
) -> Result<impl Reply, Rejection> {
    match manager.list_snapshots(query.pool.as_deref()).await {
        Ok(snapshots) => Ok(success_response(SnapshotListResponse {
            status: "success".to_string(),
            snapshots,
        })),
        Err(e) => Ok(lifecycle_error_response(&e)),
    }
}
