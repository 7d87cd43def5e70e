//! Middleware Components
//!
//! CORS, request tracking and principal extraction.

use super::errors::ApiError;
use crate::games::types::{Principal, Role};
use axum::{
    extract::Request,
    http::{HeaderMap, HeaderName, HeaderValue, Method},
    middleware::Next,
    response::Response,
};
use tower_http::cors::{Any, CorsLayer, ExposeHeaders};
use uuid::Uuid;

/// Request ID header key
pub const REQUEST_ID_HEADER: &str = "x-request-id";
/// Authenticated user, set by the upstream gateway
pub const USER_ID_HEADER: &str = "x-user-id";
/// `player` or `operator`; defaults to player
pub const USER_ROLE_HEADER: &str = "x-user-role";

/// Create CORS middleware with configurable origins
pub fn create_cors_layer(allowed_origins: Vec<String>) -> CorsLayer {
    let expose = ExposeHeaders::list([HeaderName::from_static(REQUEST_ID_HEADER)]);
    if allowed_origins.is_empty() || allowed_origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
            .expose_headers(expose)
    } else {
        CorsLayer::new()
            .allow_origin(
                allowed_origins
                    .into_iter()
                    .filter_map(|o| o.parse().ok())
                    .collect::<Vec<HeaderValue>>(),
            )
            .allow_methods([Method::GET, Method::POST])
            .allow_headers(Any)
            .expose_headers(expose)
    }
}

/// Middleware to add a request ID to every request and response
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    request.extensions_mut().insert(RequestId(request_id.clone()));
    let mut response = next.run(request).await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Request ID wrapper for extracting in handlers
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// Caller identity from the gateway headers
pub fn principal_from_headers(headers: &HeaderMap, request_id: &str) -> Result<Principal, ApiError> {
    let user_id = headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            ApiError::unauthorized(request_id.to_string(), format!("Missing {} header", USER_ID_HEADER))
        })?;
    let role = match headers.get(USER_ROLE_HEADER).and_then(|v| v.to_str().ok()) {
        Some(raw) => raw
            .parse::<Role>()
            .map_err(|e| ApiError::bad_request(request_id.to_string(), e))?,
        None => Role::Player,
    };
    Ok(Principal {
        user_id: user_id.to_string(),
        role,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_principal_defaults_to_player() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from_static("alice"));
        let principal = principal_from_headers(&headers, "req").unwrap();
        assert_eq!(principal, Principal::player("alice"));

        headers.insert(USER_ROLE_HEADER, HeaderValue::from_static("operator"));
        assert!(principal_from_headers(&headers, "req").unwrap().is_operator());
    }

    #[test]
    fn test_missing_user_is_unauthorized() {
        let err = principal_from_headers(&HeaderMap::new(), "req").unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_unknown_role_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from_static("alice"));
        headers.insert(USER_ROLE_HEADER, HeaderValue::from_static("croupier"));
        assert!(principal_from_headers(&headers, "req").is_err());
    }
}
