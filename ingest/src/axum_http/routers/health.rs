use std::sync::Arc;
use std::time::Duration;

use axum::{Json, Router, extract::State, routing::get};
use chrono::{DateTime, Utc};
use crates::domain::repositories::{
    storage::SegmentStorage, task_queue::TaskQueueProducer, task_service::TaskServiceClient,
};
use serde::Serialize;
use tracing::warn;

use super::IngestState;

const QUEUE_CHECK_TIMEOUT: Duration = Duration::from_secs(3);

pub fn routes<Q, T, S>(state: Arc<IngestState<Q, T, S>>) -> Router
where
    Q: TaskQueueProducer + Send + Sync + 'static,
    T: TaskServiceClient + Send + Sync + 'static,
    S: SegmentStorage + Send + Sync + 'static,
{
    Router::new()
        .route("/health-check", get(health_check::<Q, T, S>))
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub active_streams: usize,
    pub queue_status: &'static str,
    pub timestamp: DateTime<Utc>,
}

pub async fn health_check<Q, T, S>(
    State(state): State<Arc<IngestState<Q, T, S>>>,
) -> Json<HealthResponse>
where
    Q: TaskQueueProducer + Send + Sync + 'static,
    T: TaskServiceClient + Send + Sync + 'static,
    S: SegmentStorage + Send + Sync + 'static,
{
    let queue_status =
        match tokio::time::timeout(QUEUE_CHECK_TIMEOUT, state.lifecycle.producer().health_check())
            .await
        {
            Ok(Ok(())) => "connected",
            Ok(Err(err)) => {
                warn!(error = %err, "health_check: queue unavailable");
                "disconnected"
            }
            Err(_) => {
                warn!("health_check: queue check timed out");
                "disconnected"
            }
        };

    Json(HealthResponse {
        status: "ok",
        active_streams: state.lifecycle.registry().len(),
        queue_status,
        timestamp: Utc::now(),
    })
}
