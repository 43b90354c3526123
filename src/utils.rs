//-----------------------------------------------------
// HELPER FUNCTIONS
//-----------------------------------------------------

use serde::Serialize;
use std::convert::Infallible;
use std::sync::{Arc, RwLock};
use warp::http::StatusCode;
use warp::reply::{Json, WithStatus};
use warp::Filter;

use crate::error::LifecycleError;
use crate::models::{ActionResponse, LastAction};

// Helper functions for response generation
pub fn success_response<T: Serialize>(body: T) -> WithStatus<Json> {
    warp::reply::with_status(warp::reply::json(&body), StatusCode::OK)
}

pub fn created_response<T: Serialize>(body: T) -> WithStatus<Json> {
    warp::reply::with_status(warp::reply::json(&body), StatusCode::CREATED)
}

pub fn message_response(message: &str) -> WithStatus<Json> {
    success_response(ActionResponse {
        status: "success".to_string(),
        message: message.to_string(),
    })
}

pub fn error_response(code: StatusCode, message: &str) -> WithStatus<Json> {
    warp::reply::with_status(
        warp::reply::json(&ActionResponse {
            status: "error".to_string(),
            message: message.to_string(),
        }),
        code,
    )
}

/// Status code for each kind of lifecycle failure
pub fn lifecycle_error_response(error: &LifecycleError) -> WithStatus<Json> {
    let code = match error {
        LifecycleError::Validation(_) => StatusCode::BAD_REQUEST,
        LifecycleError::NotFound(_) => StatusCode::NOT_FOUND,
        LifecycleError::ResourceExhausted(_) | LifecycleError::HostUnavailable(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        LifecycleError::ReadinessTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        LifecycleError::Zfs(_)
        | LifecycleError::Container(_)
        | LifecycleError::Ledger(_)
        | LifecycleError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(code, &error.to_string())
}

// Create a middleware filter that tracks actions
pub fn with_action_tracking(
    action_name: &'static str,
    action_tracker: Arc<RwLock<Option<LastAction>>>,
) -> impl Filter<Extract = (), Error = Infallible> + Clone {
    warp::any()
        .map(move || {
            if let Ok(mut last_action) = action_tracker.write() {
                *last_action = Some(LastAction::new(action_name.to_string()));
            }
        })
        .untuple_one()
}

#[cfg(test)]
mod tests {
    use super::*;
    use warp::Reply;

    #[test]
    fn test_lifecycle_error_status_codes() {
        let resp = lifecycle_error_response(&LifecycleError::NotFound(3)).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = lifecycle_error_response(&LifecycleError::Validation("bad".into()))
            .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = lifecycle_error_response(&LifecycleError::ResourceExhausted(
            "No available ports in range 5432-5500".into(),
        ))
        .into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
