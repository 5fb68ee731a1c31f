pub mod cleanup;
pub mod health;
pub mod streams;

use std::sync::Arc;

use crates::domain::repositories::{
    storage::SegmentStorage, task_queue::TaskQueueProducer, task_service::TaskServiceClient,
};

use crate::usecases::{recovery::RecoveryUseCase, stream_lifecycle::StreamLifecycle};

/// Shared by the stream and health routes.
pub struct IngestState<Q, T, S>
where
    Q: TaskQueueProducer + Send + Sync + 'static,
    T: TaskServiceClient + Send + Sync + 'static,
    S: SegmentStorage + Send + Sync + 'static,
{
    pub lifecycle: Arc<StreamLifecycle<Q, T, S>>,
    pub recovery: Arc<RecoveryUseCase<Q, T, S>>,
}
