use std::sync::Arc;

use crates::domain::{
    repositories::task_service::TaskServiceClient,
    value_objects::enums::stream_statuses::StreamStatus,
};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::registry::StreamRegistry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub stream_id: String,
    pub status: StreamStatus,
}

/// Cloneable handle used by detection and recovery to report transitions.
#[derive(Clone)]
pub struct StatusSender {
    tx: mpsc::Sender<StatusChange>,
}

pub fn channel(capacity: usize) -> (StatusSender, mpsc::Receiver<StatusChange>) {
    let (tx, rx) = mpsc::channel(capacity);
    (StatusSender { tx }, rx)
}

impl StatusSender {
    /// Never blocks the caller; a full channel drops the change with a warning.
    pub fn notify(&self, stream_id: &str, status: StreamStatus) {
        let change = StatusChange {
            stream_id: stream_id.to_string(),
            status,
        };
        match self.tx.try_send(change) {
            Ok(()) => {}
            Err(TrySendError::Full(change)) => {
                warn!(
                    stream_id = %change.stream_id,
                    status = %change.status,
                    "status_dispatch: channel full, dropping status change"
                );
            }
            Err(TrySendError::Closed(change)) => {
                debug!(
                    stream_id = %change.stream_id,
                    status = %change.status,
                    "status_dispatch: dispatcher stopped, dropping status change"
                );
            }
        }
    }
}

/// Applies each change to the registry and pushes it to the task service,
/// in arrival order. Changes for streams that already left the registry are
/// dropped. Pending changes are still delivered after `shutdown`.
pub async fn run(
    mut rx: mpsc::Receiver<StatusChange>,
    registry: Arc<StreamRegistry>,
    task_service: Arc<dyn TaskServiceClient + Send + Sync>,
    shutdown: CancellationToken,
) {
    info!("status_dispatch: started");
    loop {
        let change = tokio::select! {
            change = rx.recv() => match change {
                Some(change) => change,
                None => break,
            },
            _ = shutdown.cancelled() => {
                rx.close();
                while let Some(change) = rx.recv().await {
                    dispatch(&registry, &task_service, change).await;
                }
                break;
            }
        };
        dispatch(&registry, &task_service, change).await;
    }
    info!("status_dispatch: stopped");
}

async fn dispatch(
    registry: &StreamRegistry,
    task_service: &Arc<dyn TaskServiceClient + Send + Sync>,
    change: StatusChange,
) {
    if !registry.set_status(&change.stream_id, change.status) {
        debug!(
            stream_id = %change.stream_id,
            status = %change.status,
            "status_dispatch: stream no longer active, change skipped"
        );
        return;
    }

    match task_service
        .update_stream_status(change.stream_id.clone(), change.status)
        .await
    {
        Ok(()) => info!(
            stream_id = %change.stream_id,
            status = %change.status,
            "status_dispatch: task service updated"
        ),
        Err(err) => warn!(
            stream_id = %change.stream_id,
            status = %change.status,
            error = %err,
            "status_dispatch: failed to update task service"
        ),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::registry::tests::state;
    use anyhow::Result;
    use async_trait::async_trait;
    use crates::domain::value_objects::task_service::ActiveTask;
    use std::sync::Mutex;

    /// In-memory task service that records status pushes.
    #[derive(Default)]
    pub(crate) struct FakeTaskService {
        pub(crate) updates: Mutex<Vec<StatusChange>>,
        pub(crate) tasks: Mutex<Vec<ActiveTask>>,
        pub(crate) unreachable_pings: Mutex<u32>,
        pub(crate) pings: Mutex<u32>,
    }

    impl FakeTaskService {
        pub(crate) fn updates(&self) -> Vec<StatusChange> {
            self.updates.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TaskServiceClient for FakeTaskService {
        async fn ping(&self) -> Result<()> {
            *self.pings.lock().unwrap() += 1;
            let mut remaining = self.unreachable_pings.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                anyhow::bail!("connection refused");
            }
            Ok(())
        }

        async fn list_active_tasks(&self) -> Result<Vec<ActiveTask>> {
            Ok(self.tasks.lock().unwrap().clone())
        }

        async fn find_task_by_stream(&self, stream_id: String) -> Result<Option<ActiveTask>> {
            Ok(self
                .tasks
                .lock()
                .unwrap()
                .iter()
                .find(|task| task.stream_id == stream_id)
                .cloned())
        }

        async fn update_stream_status(&self, stream_id: String, status: StreamStatus) -> Result<()> {
            self.updates
                .lock()
                .unwrap()
                .push(StatusChange { stream_id, status });
            Ok(())
        }
    }

    #[tokio::test]
    async fn drains_pending_changes_on_shutdown() {
        let registry = Arc::new(StreamRegistry::new());
        registry.insert_if_absent(state("s1", 10000)).ok();
        let task_service = Arc::new(FakeTaskService::default());
        let (sender, rx) = channel(8);
        let shutdown = CancellationToken::new();

        sender.notify("s1", StreamStatus::Running);
        sender.notify("s1", StreamStatus::Waiting);
        shutdown.cancel();

        run(rx, Arc::clone(&registry), task_service.clone(), shutdown).await;

        assert_eq!(
            task_service.updates(),
            vec![
                StatusChange { stream_id: "s1".into(), status: StreamStatus::Running },
                StatusChange { stream_id: "s1".into(), status: StreamStatus::Waiting },
            ]
        );
        assert_eq!(registry.get("s1").unwrap().status, StreamStatus::Waiting);
    }

    #[tokio::test]
    async fn changes_for_removed_streams_are_not_pushed() {
        let registry = Arc::new(StreamRegistry::new());
        let task_service = Arc::new(FakeTaskService::default());
        let (sender, rx) = channel(8);
        let shutdown = CancellationToken::new();

        sender.notify("gone", StreamStatus::Waiting);
        shutdown.cancel();
        run(rx, registry, task_service.clone(), shutdown).await;

        assert!(task_service.updates().is_empty());
    }

    #[tokio::test]
    async fn failed_push_does_not_stop_dispatch() {
        use crates::domain::repositories::task_service::MockTaskServiceClient;
        use mockall::Sequence;

        let registry = Arc::new(StreamRegistry::new());
        registry.insert_if_absent(state("s1", 10000)).ok();
        let mut task_service = MockTaskServiceClient::new();
        let mut sequence = Sequence::new();
        task_service
            .expect_update_stream_status()
            .withf(|stream_id, status| stream_id == "s1" && *status == StreamStatus::Running)
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_, _| Box::pin(async { Err(anyhow::anyhow!("task service down")) }));
        task_service
            .expect_update_stream_status()
            .withf(|_, status| *status == StreamStatus::Waiting)
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_, _| Box::pin(async { Ok(()) }));

        let (sender, rx) = channel(8);
        let shutdown = CancellationToken::new();
        sender.notify("s1", StreamStatus::Running);
        sender.notify("s1", StreamStatus::Waiting);
        shutdown.cancel();

        run(rx, Arc::clone(&registry), Arc::new(task_service), shutdown).await;

        assert_eq!(registry.get("s1").unwrap().status, StreamStatus::Waiting);
    }

    #[tokio::test]
    async fn full_channel_drops_instead_of_blocking() {
        let (sender, mut rx) = channel(1);
        sender.notify("s1", StreamStatus::Running);
        sender.notify("s1", StreamStatus::Waiting);

        assert_eq!(rx.recv().await.unwrap().status, StreamStatus::Running);
        assert!(rx.try_recv().is_err());
    }
}
