use axum::{extract::Extension, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;

use harvester::SessionHealth;

use crate::server::app::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    session: Option<SessionHealth>,
    timestamp: DateTime<Utc>,
}

/// Health check endpoint
///
/// Always reports liveness; additionally includes the browser session
/// of the most recently started worker when one exists. Session health
/// is informational only, the endpoint never returns an error status.
pub async fn health_handler(Extension(state): Extension<AppState>) -> Json<HealthResponse> {
    let session = state.deps.session_health().await;
    Json(HealthResponse {
        status: "ok".to_string(),
        session,
        timestamp: Utc::now(),
    })
}
