use anyhow::Result;
use async_trait::async_trait;
use mockall::automock;

use crate::domain::value_objects::{enums::stream_statuses::StreamStatus, task_service::ActiveTask};

#[async_trait]
#[automock]
pub trait TaskServiceClient {
    async fn ping(&self) -> Result<()>;
    async fn list_active_tasks(&self) -> Result<Vec<ActiveTask>>;
    async fn find_task_by_stream(&self, stream_id: String) -> Result<Option<ActiveTask>>;
    async fn update_stream_status(&self, stream_id: String, status: StreamStatus) -> Result<()>;
}
