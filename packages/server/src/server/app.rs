//! Application setup and server configuration.

use std::sync::Arc;

use axum::{
    extract::Extension,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        Method,
    },
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::kernel::ServerDeps;
use crate::server::controller::RequestController;
use crate::server::middleware::bearer_auth_middleware;
use crate::server::routes::{harvest_handler, health_handler};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub deps: ServerDeps,
    pub controller: Arc<RequestController>,
}

/// Build the Axum application router
///
/// `/harvest` sits behind the bearer-token check; `/health` stays open
/// so liveness probes don't need credentials.
pub fn build_app(state: AppState, api_bearer_token: String) -> Router {
    let token = Arc::new(api_bearer_token);

    // CORS configuration - allow any origin for development
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE]);

    let protected = Router::new()
        .route("/harvest", post(harvest_handler))
        .layer(middleware::from_fn(move |req, next| {
            bearer_auth_middleware(token.clone(), req, next)
        }));

    Router::new()
        .route("/health", get(health_handler))
        .merge(protected)
        // Middleware layers (applied in reverse order - last added runs first)
        .layer(Extension(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{
        DevCollector, DevDriverFactory, InMemoryCheckpointStore, InMemoryDedupStore,
        StaticCredentialResolver,
    };
    use anyhow::Result;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use harvester::{HarvestConfig, RestartLauncher, WorkflowState};
    use tower::ServiceExt;

    struct NullLauncher;

    #[async_trait]
    impl RestartLauncher for NullLauncher {
        async fn launch(&self, _state: WorkflowState) -> Result<()> {
            Ok(())
        }
    }

    fn test_app() -> Router {
        let deps = ServerDeps::new(
            Arc::new(DevCollector::new(10)),
            Arc::new(InMemoryDedupStore::new()),
            Arc::new(InMemoryCheckpointStore::new()),
            Arc::new(StaticCredentialResolver),
            Arc::new(NullLauncher),
            Arc::new(DevDriverFactory),
            HarvestConfig::default(),
        );
        let controller = Arc::new(RequestController::new(deps.clone()));
        build_app(AppState { deps, controller }, "sekrit".to_string())
    }

    #[tokio::test]
    async fn health_needs_no_token() {
        let response = test_app()
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn harvest_without_token_is_unauthorized() {
        let response = test_app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/harvest")
                    .header("content-type", "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn harvest_with_wrong_token_is_unauthorized() {
        let response = test_app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/harvest")
                    .header("authorization", "Bearer wrong")
                    .header("content-type", "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn harvest_with_token_but_no_credentials_is_bad_request() {
        let response = test_app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/harvest")
                    .header("authorization", "Bearer sekrit")
                    .header("content-type", "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn harvest_with_token_and_credentials_succeeds() {
        let body = r#"{"identity":"acct-1","secret":"hunter2"}"#;
        let response = test_app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/harvest")
                    .header("authorization", "Bearer sekrit")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
