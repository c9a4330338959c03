use axum::{
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

/// Bearer-token authentication middleware
///
/// Every protected route requires `Authorization: Bearer <token>` to
/// match the configured API token exactly. Missing or mismatched tokens
/// are rejected with 401 before the handler runs.
pub async fn bearer_auth_middleware(
    expected_token: Arc<String>,
    request: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    match extract_bearer_token(&request) {
        Some(token) if token == expected_token.as_str() => next.run(request).await,
        Some(_) => {
            debug!("rejected request with invalid bearer token");
            unauthorized("invalid bearer token")
        }
        None => {
            debug!("rejected request without bearer token");
            unauthorized("missing bearer token")
        }
    }
}

fn unauthorized(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": message })),
    )
        .into_response()
}

/// Extract the bearer token from the Authorization header
fn extract_bearer_token(request: &axum::http::Request<axum::body::Body>) -> Option<&str> {
    let auth_header = request.headers().get("authorization")?;
    let auth_str = auth_header.to_str().ok()?;
    // Handle both "Bearer <token>" and a raw token
    Some(auth_str.strip_prefix("Bearer ").unwrap_or(auth_str))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_with_header(value: Option<&str>) -> axum::http::Request<axum::body::Body> {
        let mut builder = axum::http::Request::builder();
        if let Some(value) = value {
            builder = builder.header("authorization", value);
        }
        builder.body(axum::body::Body::empty()).unwrap()
    }

    #[test]
    fn extracts_token_with_bearer_prefix() {
        let request = request_with_header(Some("Bearer sekrit"));
        assert_eq!(extract_bearer_token(&request), Some("sekrit"));
    }

    #[test]
    fn extracts_raw_token() {
        let request = request_with_header(Some("sekrit"));
        assert_eq!(extract_bearer_token(&request), Some("sekrit"));
    }

    #[test]
    fn no_header_yields_none() {
        let request = request_with_header(None);
        assert_eq!(extract_bearer_token(&request), None);
    }
}
