// handlers/databases.rs
// Database handlers: create, list, get, delete, start/stop/restart, status, health

use serde::Deserialize;
use warp::http::StatusCode;
use warp::{Rejection, Reply};

use crate::models::{
    CreateDatabaseRequest, DatabaseListResponse, DatabaseResponse, DatabaseStatusResponse,
    DeleteResponse, LineageResponse, MetricsResponse, NameValidationResponse,
};
use crate::orchestrator::DatabaseManager;
use crate::utils::{
    created_response, error_response, lifecycle_error_response, message_response,
    success_response,
};

#[derive(Debug, Default, Deserialize)]
pub struct DeleteQuery {
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Deserialize)]
pub struct NameQuery {
    pub name: String,
}

pub async fn create_database_handler(
    body: CreateDatabaseRequest,
    manager: DatabaseManager,
) -> Result<impl Reply, Rejection> {
    let address = manager.host().address.clone();
    match manager.create_database(body).await {
        Ok(outcome) => Ok(created_response(DatabaseResponse {
            status: "success".to_string(),
            message: format!("Database \"{}\" created successfully", outcome.database.name),
            database: outcome.database.summary(&address),
            warnings: outcome.warnings,
        })),
        Err(e) => Ok(lifecycle_error_response(&e)),
    }
}

pub async fn list_databases_handler(manager: DatabaseManager) -> Result<impl Reply, Rejection> {
    let address = manager.host().address.clone();
    match manager.list_databases() {
        Ok(databases) => Ok(success_response(DatabaseListResponse {
            status: "success".to_string(),
            databases: databases.iter().map(|d| d.summary(&address)).collect(),
        })),
        Err(e) => Ok(lifecycle_error_response(&e)),
    }
}

/// Active, running databases that can be cloned
pub async fn list_clone_sources_handler(
    manager: DatabaseManager,
) -> Result<impl Reply, Rejection> {
    let address = manager.host().address.clone();
    match manager.list_clone_sources() {
        Ok(databases) => Ok(success_response(DatabaseListResponse {
            status: "success".to_string(),
            databases: databases.iter().map(|d| d.summary(&address)).collect(),
        })),
        Err(e) => Ok(lifecycle_error_response(&e)),
    }
}

pub async fn get_database_handler(
    id: u64,
    manager: DatabaseManager,
) -> Result<impl Reply, Rejection> {
    let address = manager.host().address.clone();
    match manager.get_database(id) {
        Ok(database) => Ok(success_response(DatabaseResponse {
            status: "success".to_string(),
            message: String::new(),
            database: database.summary(&address),
            warnings: Vec::new(),
        })),
        Err(e) => Ok(lifecycle_error_response(&e)),
    }
}

/// DELETE /v1/databases/{id}?force=true
pub async fn delete_database_handler(
    id: u64,
    query: DeleteQuery,
    manager: DatabaseManager,
) -> Result<impl Reply, Rejection> {
    match manager.delete_database(id, query.force).await {
        Ok(outcome) => {
            let code = if outcome.success {
                StatusCode::OK
            } else if !outcome.dependencies.is_empty() {
                StatusCode::CONFLICT
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            let body = DeleteResponse {
                status: if outcome.success { "success" } else { "error" }.to_string(),
                message: outcome.message,
                dependencies: outcome.dependencies,
                cleanup_summary: outcome.cleanup_summary,
            };
            Ok(warp::reply::with_status(warp::reply::json(&body), code))
        }
        Err(e) => Ok(lifecycle_error_response(&e)),
    }
}

pub async fn start_database_handler(
    id: u64,
    manager: DatabaseManager,
) -> Result<impl Reply, Rejection> {
    match manager.start_database(id).await {
        Ok(message) => Ok(message_response(&message)),
        Err(e) => Ok(lifecycle_error_response(&e)),
    }
}

pub async fn stop_database_handler(
    id: u64,
    manager: DatabaseManager,
) -> Result<impl Reply, Rejection> {
    match manager.stop_database(id).await {
        Ok(message) => Ok(message_response(&message)),
        Err(e) => Ok(lifecycle_error_response(&e)),
    }
}

pub async fn restart_database_handler(
    id: u64,
    manager: DatabaseManager,
) -> Result<impl Reply, Rejection> {
    match manager.restart_database(id).await {
        Ok(message) => Ok(message_response(&message)),
        Err(e) => Ok(lifecycle_error_response(&e)),
    }
}

pub async fn database_status_handler(
    id: u64,
    manager: DatabaseManager,
) -> Result<impl Reply, Rejection> {
    match manager.get_status(id).await {
        Ok((database, report)) => Ok(success_response(DatabaseStatusResponse::new(
            &database, &report,
        ))),
        Err(e) => Ok(lifecycle_error_response(&e)),
    }
}

pub async fn database_health_handler(
    id: u64,
    manager: DatabaseManager,
) -> Result<impl Reply, Rejection> {
    match manager.check_health(id).await {
        Ok(report) => Ok(success_response(report)),
        Err(e) => Ok(lifecycle_error_response(&e)),
    }
}

pub async fn database_lineage_handler(
    id: u64,
    manager: DatabaseManager,
) -> Result<impl Reply, Rejection> {
    match manager.lineage(id) {
        Ok((dataset, operations)) => Ok(success_response(LineageResponse {
            status: "success".to_string(),
            dataset,
            operations,
        })),
        Err(e) => Ok(lifecycle_error_response(&e)),
    }
}

pub async fn database_metrics_handler(
    id: u64,
    manager: DatabaseManager,
) -> Result<impl Reply, Rejection> {
    match manager.refresh_storage(id).await {
        Ok(metrics) => Ok(success_response(MetricsResponse {
            status: "success".to_string(),
            metrics,
        })),
        Err(e) => Ok(lifecycle_error_response(&e)),
    }
}

/// GET /v1/validate-name?name=...
pub async fn validate_name_handler(
    query: NameQuery,
    manager: DatabaseManager,
) -> Result<impl Reply, Rejection> {
    if query.name.is_empty() {
        return Ok(error_response(StatusCode::BAD_REQUEST, "name is required"));
    }
    let (valid, message) = match manager.validate_name(&query.name) {
        Ok(()) => (true, "Name is available".to_string()),
        Err(reason) => (false, reason),
    };
    Ok(success_response(NameValidationResponse {
        status: "success".to_string(),
        valid,
        message,
    }))
}
