use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use crates::domain::{
    repositories::{
        storage::SegmentStorage, task_queue::TaskQueueProducer, task_service::TaskServiceClient,
    },
    value_objects::{enums::stream_statuses::StreamStatus, owner::OwnerIdentity},
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use super::IngestState;
use crate::{
    axum_http::error_responses::AppError,
    ports::PortExhausted,
    registry::validate_stream_id,
    usecases::stream_lifecycle::StreamNotification,
};

// Run example
//   curl -X POST "http://localhost:$SERVER_PORT/stream/notify" \
//     -H "Content-Type: application/json" \
//     -d '{"stream_id":"abc","status":"waiting","user_id":7,"username":"alice","title":"Morning"}'

pub fn routes<Q, T, S>(state: Arc<IngestState<Q, T, S>>) -> Router
where
    Q: TaskQueueProducer + Send + Sync + 'static,
    T: TaskServiceClient + Send + Sync + 'static,
    S: SegmentStorage + Send + Sync + 'static,
{
    Router::new()
        .route("/notify", post(notify::<Q, T, S>))
        .route("/status", get(status::<Q, T, S>))
        .route("/recover", post(recover::<Q, T, S>))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct NotifyRequest {
    pub stream_id: String,
    pub status: String,
    pub task_id: Option<i64>,
    pub user_id: Option<i32>,
    pub username: Option<String>,
    pub title: Option<String>,
}

impl NotifyRequest {
    fn owner(&self) -> Option<OwnerIdentity> {
        if self.user_id.is_none() && self.username.is_none() && self.title.is_none() {
            return None;
        }
        Some(OwnerIdentity {
            user_id: self.user_id.unwrap_or_default(),
            username: self.username.clone().unwrap_or_default(),
            title: self.title.clone().unwrap_or_default(),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct NotifyResponse {
    pub message: String,
    pub stream_id: String,
    pub status: StreamStatus,
    pub port: Option<u16>,
}

#[derive(Debug, Serialize)]
pub struct StreamStatusView {
    pub stream_id: String,
    pub port: u16,
    pub listen_address: String,
    pub status: StreamStatus,
    pub connected: bool,
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub user_id: i32,
    pub username: String,
    pub title: String,
    pub task_id: Option<i64>,
}

pub async fn notify<Q, T, S>(
    State(state): State<Arc<IngestState<Q, T, S>>>,
    Json(payload): Json<NotifyRequest>,
) -> Result<Json<NotifyResponse>, AppError>
where
    Q: TaskQueueProducer + Send + Sync + 'static,
    T: TaskServiceClient + Send + Sync + 'static,
    S: SegmentStorage + Send + Sync + 'static,
{
    validate_stream_id(&payload.stream_id).map_err(|err| AppError::BadRequest(err.to_string()))?;
    let status: StreamStatus = payload
        .status
        .parse()
        .map_err(|_| AppError::BadRequest(format!("unknown status: {}", payload.status)))?;

    let notification = StreamNotification {
        stream_id: payload.stream_id.clone(),
        status,
        task_id: payload.task_id,
        owner: payload.owner(),
    };

    match state.lifecycle.handle_notification(notification).await {
        Ok(outcome) => Ok(Json(NotifyResponse {
            message: "processed".to_string(),
            stream_id: payload.stream_id,
            status,
            port: outcome.port(),
        })),
        Err(err) => {
            if let Some(exhausted) = err.downcast_ref::<PortExhausted>() {
                return Err(AppError::ServiceUnavailable(exhausted.to_string()));
            }
            error!(stream_id = %payload.stream_id, error = ?err, "notify: failed");
            Err(AppError::Internal(err))
        }
    }
}

pub async fn status<Q, T, S>(
    State(state): State<Arc<IngestState<Q, T, S>>>,
) -> Json<Vec<StreamStatusView>>
where
    Q: TaskQueueProducer + Send + Sync + 'static,
    T: TaskServiceClient + Send + Sync + 'static,
    S: SegmentStorage + Send + Sync + 'static,
{
    let supervisor = state.lifecycle.supervisor();
    let views = state
        .lifecycle
        .snapshots()
        .into_iter()
        .map(|snapshot| {
            let process = supervisor.snapshot(&snapshot.stream_id);
            StreamStatusView {
                connected: process.map(|p| p.connected).unwrap_or(false),
                pid: process.and_then(|p| p.pid),
                stream_id: snapshot.stream_id,
                port: snapshot.port,
                listen_address: snapshot.listen_address,
                status: snapshot.status,
                started_at: snapshot.started_at,
                user_id: snapshot.user_id,
                username: snapshot.username,
                title: snapshot.title,
                task_id: snapshot.task_id,
            }
        })
        .collect();
    Json(views)
}

pub async fn recover<Q, T, S>(
    State(state): State<Arc<IngestState<Q, T, S>>>,
) -> impl IntoResponse
where
    Q: TaskQueueProducer + Send + Sync + 'static,
    T: TaskServiceClient + Send + Sync + 'static,
    S: SegmentStorage + Send + Sync + 'static,
{
    let recovery = Arc::clone(&state.recovery);
    state.lifecycle.tracker().spawn(async move {
        if let Err(err) = recovery.recover().await {
            error!(error = %err, "recover: recovery failed");
        }
    });
    info!("recover: recovery started");

    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "message": "recovery started" })),
    )
}
