//-----------------------------------------------------
// AUTHENTICATION
//-----------------------------------------------------

use rand::distr::Alphanumeric;
use rand::Rng;
use std::convert::Infallible;
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::info;
use warp::http::{HeaderMap, StatusCode};
use warp::{Rejection, Reply};

use crate::models::ActionResponse;

const API_KEY_LENGTH: usize = 32;

// Rejection raised when the X-API-Key header is missing or wrong
#[derive(Debug)]
pub struct ApiKeyError;
impl warp::reject::Reject for ApiKeyError {}

/// Read the API key from `path`, or generate one and store it there
pub fn get_or_create_api_key(path: &Path) -> std::io::Result<String> {
    if let Ok(api_key) = fs::read_to_string(path) {
        let api_key = api_key.trim().to_string();
        if !api_key.is_empty() {
            return Ok(api_key);
        }
    }

    let api_key: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(API_KEY_LENGTH)
        .map(char::from)
        .collect();
    let mut file = fs::File::create(path)?;
    file.write_all(api_key.as_bytes())?;
    info!(path = %path.display(), "generated new API key");
    Ok(api_key)
}

// Check if the API key is valid
pub async fn check_api_key(headers: HeaderMap, our_api_key: String) -> Result<(), Rejection> {
    match headers.get("X-API-Key") {
        Some(key) if key.to_str().map(|s| s == our_api_key).unwrap_or(false) => Ok(()),
        _ => Err(warp::reject::custom(ApiKeyError)),
    }
}

/// Turn rejections into the same JSON shape as every other response
pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (code, message) = if err.find::<ApiKeyError>().is_some() {
        (StatusCode::UNAUTHORIZED, "Invalid or missing API key".to_string())
    } else if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not found".to_string())
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, format!("Invalid request body: {}", e))
    } else if err.find::<warp::reject::InvalidQuery>().is_some() {
        (StatusCode::BAD_REQUEST, "Invalid query string".to_string())
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed".to_string())
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, format!("Unhandled rejection: {:?}", err))
    };

    Ok(warp::reply::with_status(
        warp::reply::json(&ActionResponse {
            status: "error".to_string(),
            message,
        }),
        code,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_key_created_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".stagdb_api");

        let first = get_or_create_api_key(&path).unwrap();
        assert_eq!(first.len(), 32);
        assert!(first.chars().all(|c| c.is_ascii_alphanumeric()));

        let second = get_or_create_api_key(&path).unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_check_api_key() {
        let mut headers = HeaderMap::new();
        assert!(check_api_key(headers.clone(), "secret".into()).await.is_err());

        headers.insert("X-API-Key", "secret".parse().unwrap());
        assert!(check_api_key(headers.clone(), "secret".into()).await.is_ok());
        assert!(check_api_key(headers, "other".into()).await.is_err());
    }
}
