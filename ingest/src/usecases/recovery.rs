use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use crates::domain::{
    repositories::{
        storage::SegmentStorage, task_queue::TaskQueueProducer, task_service::TaskServiceClient,
    },
    value_objects::{enums::stream_statuses::StreamStatus, task_service::ActiveTask},
};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::usecases::stream_lifecycle::{ActivationRequest, NotifyOutcome, StreamLifecycle};

#[derive(Debug, Clone)]
pub struct RecoverySettings {
    pub max_attempts: u32,
    pub retry_delay: Duration,
    /// Pause between two recovered streams.
    pub pause: Duration,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    pub discovered: usize,
    pub recovered: usize,
    pub already_active: usize,
    pub failed: usize,
}

/// Re-adopts streams the task service still considers live after a restart.
pub struct RecoveryUseCase<Q, T, S>
where
    Q: TaskQueueProducer + Send + Sync + 'static,
    T: TaskServiceClient + Send + Sync + 'static,
    S: SegmentStorage + Send + Sync + 'static,
{
    lifecycle: Arc<StreamLifecycle<Q, T, S>>,
    settings: RecoverySettings,
}

impl<Q, T, S> RecoveryUseCase<Q, T, S>
where
    Q: TaskQueueProducer + Send + Sync + 'static,
    T: TaskServiceClient + Send + Sync + 'static,
    S: SegmentStorage + Send + Sync + 'static,
{
    pub fn new(lifecycle: Arc<StreamLifecycle<Q, T, S>>, settings: RecoverySettings) -> Self {
        Self {
            lifecycle,
            settings,
        }
    }

    pub async fn recover(&self) -> Result<RecoveryReport> {
        info!("recovery: started");
        self.wait_for_task_service().await?;

        let tasks: Vec<ActiveTask> = self
            .lifecycle
            .task_service()
            .list_active_tasks()
            .await
            .map_err(|err| {
                error!(error = %err, "recovery: failed to list active tasks");
                err
            })?
            .into_iter()
            .filter(|task| {
                matches!(
                    task.stream_status(),
                    Some(StreamStatus::Waiting | StreamStatus::Running)
                )
            })
            .collect();

        let mut report = RecoveryReport {
            discovered: tasks.len(),
            ..RecoveryReport::default()
        };
        if tasks.is_empty() {
            info!("recovery: no active tasks to recover");
            return Ok(report);
        }
        info!(count = tasks.len(), "recovery: active tasks found");

        for (index, task) in tasks.into_iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(self.settings.pause).await;
            }

            match self.recover_one(&task).await {
                Ok(NotifyOutcome::AlreadyActive { .. }) => report.already_active += 1,
                Ok(outcome) => {
                    report.recovered += 1;
                    info!(
                        stream_id = %task.stream_id,
                        prior_status = %task.status,
                        port = ?outcome.port(),
                        "recovery: stream recovered"
                    );
                }
                Err(err) => {
                    report.failed += 1;
                    warn!(stream_id = %task.stream_id, error = %err, "recovery: failed to recover stream");
                }
            }
        }

        info!(
            recovered = report.recovered,
            already_active = report.already_active,
            failed = report.failed,
            "recovery: finished"
        );
        Ok(report)
    }

    async fn wait_for_task_service(&self) -> Result<()> {
        let attempts = self.settings.max_attempts.max(1);
        for attempt in 1..=attempts {
            match self.lifecycle.task_service().ping().await {
                Ok(()) => {
                    info!(attempt, "recovery: task service reachable");
                    return Ok(());
                }
                Err(err) => {
                    warn!(attempt, max_attempts = attempts, error = %err, "recovery: waiting for task service");
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.settings.retry_delay).await;
            }
        }
        bail!("task service unreachable after {attempts} attempts")
    }

    /// The transcoder is not connected yet, so the stream starts as waiting
    /// whatever the task service last saw.
    async fn recover_one(&self, task: &ActiveTask) -> Result<NotifyOutcome> {
        let outcome = self
            .lifecycle
            .activate(ActivationRequest {
                stream_id: task.stream_id.clone(),
                owner: task.owner(),
                task_id: Some(task.id),
                started_at: None,
            })
            .await?;

        if matches!(outcome, NotifyOutcome::Activated { .. })
            && task.stream_status() == Some(StreamStatus::Running)
        {
            self.lifecycle
                .status_sender()
                .notify(&task.stream_id, StreamStatus::Waiting);
        }
        Ok(outcome)
    }
}
