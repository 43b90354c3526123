//-----------------------------------------------------
// ROUTES
//-----------------------------------------------------

use std::convert::Infallible;
use std::sync::{Arc, RwLock};
use warp::{Filter, Rejection, Reply};

use crate::auth::{check_api_key, handle_rejection};
use crate::handlers::*;
use crate::models::{CreateDatabaseRequest, CreateSnapshotRequest, LastAction};
use crate::orchestrator::DatabaseManager;
use crate::utils::with_action_tracking;

// /v1/databases/{id}/{action}
fn database_subpath(
    action: &'static str,
) -> impl Filter<Extract = (u64,), Error = Rejection> + Clone {
    warp::path("v1")
        .and(warp::path("databases"))
        .and(warp::path::param::<u64>())
        .and(warp::path(action))
        .and(warp::path::end())
}

/// Every endpoint of the agent. Everything except /health requires X-API-Key.
pub fn routes(
    manager: DatabaseManager,
    api_key: String,
    last_action: Arc<RwLock<Option<LastAction>>>,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let host_name = manager.host().name.clone();
    let manager = warp::any().map(move || manager.clone());

    // API key check filter - reusable middleware for authentication
    let api_key_check = warp::header::headers_cloned()
        .and(warp::any().map(move || api_key.clone()))
        .and_then(check_api_key)
        .untuple_one();

    let health_routes = {
        let last_action_clone = last_action.clone();
        // GET /health - no authentication
        warp::get()
            .and(warp::path("health"))
            .and(warp::path::end())
            .and(warp::any().map(move || host_name.clone()))
            .and(warp::any().map(move || last_action_clone.clone()))
            .and_then(health_check_handler)
    };

    let database_routes = {
        // GET /v1/databases
        let list = warp::get()
            .and(warp::path("v1"))
            .and(warp::path("databases"))
            .and(warp::path::end())
            .and(api_key_check.clone())
            .and(with_action_tracking("list_databases", last_action.clone()))
            .and(manager.clone())
            .and_then(list_databases_handler);

        // POST /v1/databases
        let create = warp::post()
            .and(warp::path("v1"))
            .and(warp::path("databases"))
            .and(warp::path::end())
            .and(api_key_check.clone())
            .and(with_action_tracking("create_database", last_action.clone()))
            .and(warp::body::json::<CreateDatabaseRequest>())
            .and(manager.clone())
            .and_then(create_database_handler);

        // GET /v1/databases/{id}
        let get = warp::get()
            .and(warp::path("v1"))
            .and(warp::path("databases"))
            .and(warp::path::param::<u64>())
            .and(warp::path::end())
            .and(api_key_check.clone())
            .and(with_action_tracking("get_database", last_action.clone()))
            .and(manager.clone())
            .and_then(get_database_handler);

        // DELETE /v1/databases/{id}?force=true
        let delete = warp::delete()
            .and(warp::path("v1"))
            .and(warp::path("databases"))
            .and(warp::path::param::<u64>())
            .and(warp::path::end())
            .and(api_key_check.clone())
            .and(with_action_tracking("delete_database", last_action.clone()))
            .and(warp::query::<DeleteQuery>())
            .and(manager.clone())
            .and_then(delete_database_handler);

        list.or(create).or(get).or(delete)
    };

    let control_routes = {
        // POST /v1/databases/{id}/start
        let start = warp::post()
            .and(database_subpath("start"))
            .and(api_key_check.clone())
            .and(with_action_tracking("start_database", last_action.clone()))
            .and(manager.clone())
            .and_then(start_database_handler);

        // POST /v1/databases/{id}/stop
        let stop = warp::post()
            .and(database_subpath("stop"))
            .and(api_key_check.clone())
            .and(with_action_tracking("stop_database", last_action.clone()))
            .and(manager.clone())
            .and_then(stop_database_handler);

        // POST /v1/databases/{id}/restart
        let restart = warp::post()
            .and(database_subpath("restart"))
            .and(api_key_check.clone())
            .and(with_action_tracking("restart_database", last_action.clone()))
            .and(manager.clone())
            .and_then(restart_database_handler);

        start.or(stop).or(restart)
    };

    let inspect_routes = {
        // GET /v1/databases/{id}/status
        let status = warp::get()
            .and(database_subpath("status"))
            .and(api_key_check.clone())
            .and(with_action_tracking("database_status", last_action.clone()))
            .and(manager.clone())
            .and_then(database_status_handler);

        // GET /v1/databases/{id}/health
        let health = warp::get()
            .and(database_subpath("health"))
            .and(api_key_check.clone())
            .and(with_action_tracking("database_health", last_action.clone()))
            .and(manager.clone())
            .and_then(database_health_handler);

        // GET /v1/databases/{id}/lineage
        let lineage = warp::get()
            .and(database_subpath("lineage"))
            .and(api_key_check.clone())
            .and(with_action_tracking("database_lineage", last_action.clone()))
            .and(manager.clone())
            .and_then(database_lineage_handler);

        // GET /v1/databases/{id}/metrics
        let metrics = warp::get()
            .and(database_subpath("metrics"))
            .and(api_key_check.clone())
            .and(with_action_tracking("database_metrics", last_action.clone()))
            .and(manager.clone())
            .and_then(database_metrics_handler);

        status.or(health).or(lineage).or(metrics)
    };

    let snapshot_routes = {
        // POST /v1/databases/{id}/snapshots
        let create = warp::post()
            .and(database_subpath("snapshots"))
            .and(api_key_check.clone())
            .and(with_action_tracking("create_snapshot", last_action.clone()))
            .and(warp::body::json::<CreateSnapshotRequest>())
            .and(manager.clone())
            .and_then(create_snapshot_handler);

        // GET /v1/snapshots?pool=tank
        let list = warp::get()
            .and(warp::path("v1"))
            .and(warp::path("snapshots"))
            .and(warp::path::end())
            .and(api_key_check.clone())
            .and(with_action_tracking("list_snapshots", last_action.clone()))
            .and(warp::query::<PoolQuery>())
            .and(manager.clone())
            .and_then(list_snapshots_handler);

        create.or(list)
    };

    let utility_routes = {
        // GET /v1/validate-name?name=orders_db
        let validate = warp::get()
            .and(warp::path("v1"))
            .and(warp::path("validate-name"))
            .and(warp::path::end())
            .and(api_key_check.clone())
            .and(warp::query::<NameQuery>())
            .and(manager.clone())
            .and_then(validate_name_handler);

        // GET /v1/clone-sources
        let clone_sources = warp::get()
            .and(warp::path("v1"))
            .and(warp::path("clone-sources"))
            .and(warp::path::end())
            .and(api_key_check.clone())
            .and(manager.clone())
            .and_then(list_clone_sources_handler);

        validate.or(clone_sources)
    };

    health_routes
        .or(database_routes)
        .or(control_routes)
        .or(inspect_routes)
        .or(snapshot_routes)
        .or(utility_routes)
        .recover(handle_rejection)
}
