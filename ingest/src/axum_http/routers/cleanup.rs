use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, header::AUTHORIZATION},
    routing::post,
};
use serde::Deserialize;

use crate::{
    axum_http::error_responses::AppError,
    usecases::cleanup::{CleanupError, CleanupOutcome, CleanupUseCase},
};

// Run example
//   curl -X POST "http://localhost:$SERVER_PORT/stream/cleanup" \
//     -H "Authorization: Bearer $INTERNAL_CLEANUP_TOKEN" \
//     -H "Content-Type: application/json" \
//     -d '{"stream_id":"abc","action":"cleanup_folder"}'

#[derive(Clone)]
pub struct CleanupRouteState {
    token: Option<String>,
    usecase: Arc<CleanupUseCase>,
}

pub fn routes(token: Option<String>, usecase: Arc<CleanupUseCase>) -> Router {
    Router::new()
        .route("/cleanup", post(cleanup))
        .with_state(CleanupRouteState { token, usecase })
}

#[derive(Debug, Deserialize)]
pub struct CleanupRequest {
    pub stream_id: String,
    pub action: String,
}

pub async fn cleanup(
    State(state): State<CleanupRouteState>,
    headers: HeaderMap,
    Json(payload): Json<CleanupRequest>,
) -> Result<Json<CleanupOutcome>, AppError> {
    if let Some(expected) = state.token.as_deref() {
        authorize_bearer(&headers, expected)?;
    }

    state
        .usecase
        .cleanup(&payload.stream_id, &payload.action)
        .await
        .map(Json)
        .map_err(|err| match err {
            CleanupError::InvalidStreamId(_) | CleanupError::UnsupportedAction(_) => {
                AppError::BadRequest(err.to_string())
            }
            CleanupError::StreamActive(_) => AppError::Conflict(err.to_string()),
            CleanupError::Io(io) => AppError::Internal(io.into()),
        })
}

fn authorize_bearer(headers: &HeaderMap, expected_token: &str) -> Result<(), AppError> {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(AppError::Unauthorized)?;

    if token == expected_token {
        Ok(())
    } else {
        Err(AppError::Unauthorized)
    }
}
