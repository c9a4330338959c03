use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde_json::json;

use crate::server::app::AppState;
use crate::server::controller::{HarvestRequest, HarvestResponse};

/// POST /harvest
///
/// Maps controller verdicts onto HTTP statuses:
/// - 200: the run completed and the report is in `data`
/// - 202: a recoverable failure interrupted the run; a replacement
///   worker is resuming it under the same request id
/// - 400: the request body failed validation
/// - 500: the run failed fatally
pub async fn harvest_handler(
    Extension(state): Extension<AppState>,
    Json(request): Json<HarvestRequest>,
) -> Response {
    match state.controller.handle(request).await {
        HarvestResponse::Success { request_id, data } => (
            StatusCode::OK,
            Json(json!({
                "status": "success",
                "data": data,
                "requestId": request_id,
                "timestamp": Utc::now(),
            })),
        )
            .into_response(),
        HarvestResponse::Healing { request_id } => (
            StatusCode::ACCEPTED,
            Json(json!({
                "status": "healing",
                "message": "a recoverable failure interrupted the run; a replacement worker is resuming it",
                "requestId": request_id,
            })),
        )
            .into_response(),
        HarvestResponse::Invalid { message } => {
            (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
        }
        HarvestResponse::Fatal {
            request_id,
            category,
            message,
        } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "error": message,
                "errorType": category.to_string(),
                "requestId": request_id,
            })),
        )
            .into_response(),
    }
}
