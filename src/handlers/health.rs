// handlers/health.rs
// Agent health: version, host and the last action performed

use std::sync::{Arc, RwLock};
use warp::{Rejection, Reply};

use crate::models::{HealthResponse, LastAction};
use crate::utils::success_response;

pub async fn health_check_handler(
    host_name: String,
    last_action: Arc<RwLock<Option<LastAction>>>,
) -> Result<impl Reply, Rejection> {
    let last_action = last_action.read().ok().and_then(|guard| guard.clone());

    Ok(success_response(HealthResponse {
        status: "success".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        host: host_name,
        last_action,
    }))
}
