use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use crates::domain::{
    entities::jobs::JobEntity,
    repositories::task_queue::TaskQueueConsumer,
    value_objects::{
        enums::{job_statuses::JobStatus, task_actions::TaskAction},
        recording_task::RecordingTask,
    },
};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub topic: String,
    /// Consumer group plus a per-process instance id.
    pub consumer_id: String,
    pub poll_interval: Duration,
    pub stale_lock_secs: i64,
    /// Delay before a message refused by a full pool is offered again.
    pub requeue_delay_secs: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Idle,
    Skipped,
    Dispatched,
    Deferred,
    Dead,
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum TaskDecodeError {
    #[error("payload is not a recording task: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("invalid recording task: {0}")]
    Invalid(String),
}

pub fn decode_task(job: &JobEntity) -> Result<RecordingTask, TaskDecodeError> {
    let task: RecordingTask = serde_json::from_value(job.payload.clone())?;
    task.validate()
        .map_err(|err| TaskDecodeError::Invalid(err.to_string()))?;
    Ok(task)
}

/// Moves finalize messages from the durable queue into the worker pool.
/// A message is acknowledged only once the pool has accepted it.
pub struct TaskConsumer<C>
where
    C: TaskQueueConsumer + Send + Sync + 'static,
{
    queue: Arc<C>,
    sender: mpsc::Sender<RecordingTask>,
    settings: ConsumerSettings,
}

impl<C> TaskConsumer<C>
where
    C: TaskQueueConsumer + Send + Sync + 'static,
{
    pub fn new(queue: Arc<C>, sender: mpsc::Sender<RecordingTask>, settings: ConsumerSettings) -> Self {
        Self {
            queue,
            sender,
            settings,
        }
    }

    /// Consumes until `shutdown` fires or the pool goes away. The sender is
    /// dropped on return, which lets the pool drain and stop.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            topic = %self.settings.topic,
            consumer = %self.settings.consumer_id,
            "task_consumer: starting"
        );
        match self
            .queue
            .release_stale(self.settings.topic.clone(), self.settings.stale_lock_secs)
            .await
        {
            Ok(0) => {}
            Ok(released) => warn!(released, "task_consumer: released stale claims"),
            Err(err) => error!(error = %err, "task_consumer: failed to release stale claims"),
        }

        loop {
            if shutdown.is_cancelled() {
                break;
            }
            match self.poll_once().await {
                Ok(PollOutcome::Idle) | Ok(PollOutcome::Deferred) => {}
                Ok(PollOutcome::Closed) => {
                    warn!("task_consumer: worker pool closed");
                    break;
                }
                Ok(_) => continue,
                Err(err) => error!(error = %err, "task_consumer: poll failed"),
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
            }
        }
        info!("task_consumer: stopped");
    }

    pub async fn poll_once(&self) -> Result<PollOutcome> {
        let Some(job) = self
            .queue
            .lock_next(self.settings.topic.clone(), self.settings.consumer_id.clone())
            .await?
        else {
            return Ok(PollOutcome::Idle);
        };

        if !TaskAction::from(job.action.as_str()).is_finalize() {
            debug!(job_id = %job.id, action = %job.action, "task_consumer: ignoring action");
            self.queue.ack(job.id, JobStatus::Skipped).await?;
            return Ok(PollOutcome::Skipped);
        }

        let task = match decode_task(&job) {
            Ok(task) => task,
            Err(err) => {
                error!(job_id = %job.id, error = %err, "task_consumer: undeliverable message");
                self.queue.mark_dead(job.id, err.to_string()).await?;
                return Ok(PollOutcome::Dead);
            }
        };

        let stream_id = task.stream_id.clone();
        match self.sender.try_send(task) {
            Ok(()) => {
                self.queue.ack(job.id, JobStatus::Done).await?;
                info!(job_id = %job.id, stream_id = %stream_id, "task_consumer: task handed to worker pool");
                Ok(PollOutcome::Dispatched)
            }
            Err(TrySendError::Full(_)) => {
                warn!(job_id = %job.id, stream_id = %stream_id, "task_consumer: worker queue full, deferring");
                self.queue
                    .requeue(
                        job.id,
                        self.settings.requeue_delay_secs,
                        "worker queue full".to_string(),
                    )
                    .await?;
                Ok(PollOutcome::Deferred)
            }
            Err(TrySendError::Closed(_)) => {
                self.queue
                    .requeue(job.id, 0, "worker pool stopped".to_string())
                    .await?;
                Ok(PollOutcome::Closed)
            }
        }
    }
}
