use anyhow::Result;
use async_trait::async_trait;
use mockall::automock;
use uuid::Uuid;

use crate::domain::{
    entities::recordings::RecordingEntity,
    value_objects::recordings::{ProcessingRecordingModel, ReadyRecordingModel},
};

/// Recording rows are keyed by stream id; every write is an upsert or an
/// update of that single row, so redelivered tasks never duplicate it.
#[async_trait]
#[automock]
pub trait RecordingRepository {
    async fn upsert_processing(&self, model: ProcessingRecordingModel) -> Result<Uuid>;
    async fn mark_failed(&self, stream_id: String) -> Result<()>;
    async fn mark_ready(&self, stream_id: String, model: ReadyRecordingModel) -> Result<()>;
    async fn find_by_stream_id(&self, stream_id: String) -> Result<Option<RecordingEntity>>;
}
