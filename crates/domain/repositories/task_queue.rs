use anyhow::Result;
use async_trait::async_trait;
use mockall::automock;
use uuid::Uuid;

use crate::domain::{
    entities::jobs::JobEntity,
    value_objects::{enums::job_statuses::JobStatus, queue_message::QueueMessage},
};

#[async_trait]
#[automock]
pub trait TaskQueueProducer {
    /// Returns once the message is durably stored.
    async fn publish(&self, message: QueueMessage) -> Result<Uuid>;
    async fn health_check(&self) -> Result<()>;
}

#[async_trait]
#[automock]
pub trait TaskQueueConsumer {
    /// Claims the oldest deliverable message of `topic`. A key with a claimed
    /// message is held back until that message is settled.
    async fn lock_next(&self, topic: String, consumer: String) -> Result<Option<JobEntity>>;
    async fn ack(&self, job_id: Uuid, status: JobStatus) -> Result<()>;
    async fn requeue(&self, job_id: Uuid, delay_secs: i64, reason: String) -> Result<()>;
    async fn mark_dead(&self, job_id: Uuid, reason: String) -> Result<()>;
    async fn release_stale(&self, topic: String, older_than_secs: i64) -> Result<usize>;
}
