use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use crates::domain::{
    repositories::{
        storage::SegmentStorage, task_queue::TaskQueueProducer, task_service::TaskServiceClient,
    },
    value_objects::{
        enums::stream_statuses::StreamStatus, owner::OwnerIdentity,
        recording_task::RecordingTask,
    },
};
use serde::Serialize;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::{
    ports::PortAllocator,
    registry::{FlushGuard, StreamRegistry, StreamSnapshot, StreamState, UploadHandle, validate_stream_id},
    segment_upload::{SegmentUploader, UploadSettings},
    status_dispatch::StatusSender,
    supervisor::{IngestSupervisor, command::srt_listen_address},
};

const PUBLISH_SOURCE: &str = "ingest";

#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    pub listen_host: String,
    pub hls_root: PathBuf,
    pub upload: UploadSettings,
    pub default_duration_secs: i64,
    pub publish_timeout: Duration,
}

/// An inbound "the task service says this stream is now X" event.
#[derive(Debug, Clone)]
pub struct StreamNotification {
    pub stream_id: String,
    pub status: StreamStatus,
    pub task_id: Option<i64>,
    pub owner: Option<OwnerIdentity>,
}

#[derive(Debug, Clone)]
pub struct ActivationRequest {
    pub stream_id: String,
    pub owner: OwnerIdentity,
    pub task_id: Option<i64>,
    pub started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum NotifyOutcome {
    Activated { port: u16 },
    AlreadyActive { port: u16 },
    StatusUpdated,
    Stopped { port: u16 },
    NotActive,
}

impl NotifyOutcome {
    pub fn port(&self) -> Option<u16> {
        match self {
            Self::Activated { port } | Self::AlreadyActive { port } | Self::Stopped { port } => {
                Some(*port)
            }
            Self::StatusUpdated | Self::NotActive => None,
        }
    }
}

/// Owns every active stream: its port, transcoder, upload loop and the
/// recording task published when it ends.
pub struct StreamLifecycle<Q, T, S>
where
    Q: TaskQueueProducer + Send + Sync + 'static,
    T: TaskServiceClient + Send + Sync + 'static,
    S: SegmentStorage + Send + Sync + 'static,
{
    registry: Arc<StreamRegistry>,
    ports: Arc<PortAllocator>,
    supervisor: Arc<IngestSupervisor>,
    segment_storage: Arc<S>,
    producer: Arc<Q>,
    task_service: Arc<T>,
    status: StatusSender,
    tracker: TaskTracker,
    settings: LifecycleSettings,
    // Serializes activate/stop so a stream is never half started.
    transitions: tokio::sync::Mutex<()>,
}

impl<Q, T, S> StreamLifecycle<Q, T, S>
where
    Q: TaskQueueProducer + Send + Sync + 'static,
    T: TaskServiceClient + Send + Sync + 'static,
    S: SegmentStorage + Send + Sync + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<StreamRegistry>,
        ports: Arc<PortAllocator>,
        supervisor: Arc<IngestSupervisor>,
        segment_storage: Arc<S>,
        producer: Arc<Q>,
        task_service: Arc<T>,
        status: StatusSender,
        tracker: TaskTracker,
        settings: LifecycleSettings,
    ) -> Self {
        Self {
            registry,
            ports,
            supervisor,
            segment_storage,
            producer,
            task_service,
            status,
            tracker,
            settings,
            transitions: tokio::sync::Mutex::new(()),
        }
    }

    pub fn registry(&self) -> &Arc<StreamRegistry> {
        &self.registry
    }

    pub fn supervisor(&self) -> &Arc<IngestSupervisor> {
        &self.supervisor
    }

    pub fn status_sender(&self) -> &StatusSender {
        &self.status
    }

    pub fn task_service(&self) -> &Arc<T> {
        &self.task_service
    }

    pub fn producer(&self) -> &Arc<Q> {
        &self.producer
    }

    /// Background work joined by `shutdown`.
    pub fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }

    pub fn snapshots(&self) -> Vec<StreamSnapshot> {
        self.registry.snapshots()
    }

    pub async fn handle_notification(&self, notification: StreamNotification) -> Result<NotifyOutcome> {
        validate_stream_id(&notification.stream_id)?;
        info!(
            stream_id = %notification.stream_id,
            status = %notification.status,
            "stream_lifecycle: notification received"
        );

        match notification.status {
            StreamStatus::Waiting => {
                self.activate(ActivationRequest {
                    stream_id: notification.stream_id,
                    owner: notification.owner.unwrap_or_default(),
                    task_id: notification.task_id,
                    started_at: Some(Utc::now()),
                })
                .await
            }
            StreamStatus::Running => {
                if self.registry.set_status(&notification.stream_id, StreamStatus::Running) {
                    Ok(NotifyOutcome::StatusUpdated)
                } else {
                    debug!(stream_id = %notification.stream_id, "stream_lifecycle: running for inactive stream ignored");
                    Ok(NotifyOutcome::NotActive)
                }
            }
            StreamStatus::Stopped | StreamStatus::Error => {
                self.stop_stream(&notification.stream_id, notification.owner).await
            }
        }
    }

    /// Allocates a port, starts the transcoder and the upload loop.
    /// Starting an active stream is a no-op.
    pub async fn activate(&self, request: ActivationRequest) -> Result<NotifyOutcome> {
        validate_stream_id(&request.stream_id)?;
        let _transition = self.transitions.lock().await;

        if let Some(existing) = self.registry.get(&request.stream_id) {
            info!(
                stream_id = %request.stream_id,
                port = existing.port,
                "stream_lifecycle: stream already active"
            );
            return Ok(NotifyOutcome::AlreadyActive { port: existing.port });
        }

        let port = self.ports.acquire().map_err(|err| {
            error!(stream_id = %request.stream_id, error = %err, "stream_lifecycle: no port available");
            err
        })?;

        let listen_address = srt_listen_address(&self.settings.listen_host, port, &request.stream_id);
        let segment_dir = self.settings.hls_root.join(&request.stream_id);

        if let Err(err) = self
            .supervisor
            .start(&request.stream_id, &listen_address, &segment_dir)
            .await
        {
            self.ports.release(port);
            error!(stream_id = %request.stream_id, error = %err, "stream_lifecycle: failed to start transcoder");
            return Err(err).context("failed to start transcoder");
        }

        let state = StreamState {
            stream_id: request.stream_id.clone(),
            port,
            listen_address: listen_address.clone(),
            segment_dir: segment_dir.clone(),
            status: StreamStatus::Waiting,
            started_at: request.started_at,
            owner: request.owner,
            task_id: request.task_id,
            upload: None,
        };
        if self.registry.insert_if_absent(state).is_err() {
            // Unreachable while transitions are serialized; undo to stay consistent.
            self.supervisor.stop(&request.stream_id).await;
            self.ports.release(port);
            anyhow::bail!("stream {} was registered concurrently", request.stream_id);
        }

        let storage: Arc<dyn SegmentStorage + Send + Sync> = self.segment_storage.clone();
        let upload = SegmentUploader::new(
            request.stream_id.clone(),
            segment_dir,
            storage,
            self.settings.upload.clone(),
        )
        .spawn(&self.tracker);
        if let Err(orphan) = self.registry.attach_upload(&request.stream_id, upload) {
            orphan.cancel.cancel();
        }

        info!(
            stream_id = %request.stream_id,
            port,
            listen_address = %listen_address,
            "stream_lifecycle: stream activated"
        );
        Ok(NotifyOutcome::Activated { port })
    }

    /// Tears the stream down and publishes its recording task in the
    /// background. Local files are left for the final flush and cleanup.
    pub async fn stop_stream(
        &self,
        stream_id: &str,
        owner_hint: Option<OwnerIdentity>,
    ) -> Result<NotifyOutcome> {
        validate_stream_id(stream_id)?;
        let _transition = self.transitions.lock().await;

        let Some((mut state, flush_guard)) = self.registry.remove_for_flush(stream_id) else {
            info!(stream_id = %stream_id, "stream_lifecycle: stop for inactive stream ignored");
            return Ok(NotifyOutcome::NotActive);
        };

        self.supervisor.stop(stream_id).await;
        self.ports.release(state.port);
        let ended_at = Utc::now();

        let upload = state.upload.take();
        if let Some(upload) = &upload {
            upload.cancel.cancel();
        }

        let owner = match owner_hint {
            Some(hint) if !state.owner.is_resolved() && hint.is_resolved() => hint,
            _ => state.owner.clone(),
        };

        self.tracker.spawn(publish_stop(
            Arc::clone(&self.producer),
            Arc::clone(&self.task_service),
            PendingStop {
                stream_id: stream_id.to_string(),
                owner,
                started_at: state.started_at,
                ended_at,
                upload,
                flush_guard,
            },
            self.settings.default_duration_secs,
            self.settings.publish_timeout,
        ));

        info!(stream_id = %stream_id, port = state.port, "stream_lifecycle: stream stopped");
        Ok(NotifyOutcome::Stopped { port: state.port })
    }

    /// Stops every transcoder and upload loop. Recording tasks are not
    /// published for streams that are still active: recovery adopts them on
    /// the next start.
    pub async fn shutdown(&self) {
        let _transition = self.transitions.lock().await;
        self.supervisor.stop_all().await;

        for stream_id in self.registry.stream_ids() {
            if let Some(mut state) = self.registry.remove(&stream_id) {
                self.ports.release(state.port);
                if let Some(upload) = state.upload.take() {
                    upload.cancel.cancel();
                }
            }
        }

        self.tracker.close();
        self.tracker.wait().await;
        info!("stream_lifecycle: shutdown complete");
    }
}

struct PendingStop {
    stream_id: String,
    owner: OwnerIdentity,
    started_at: Option<DateTime<Utc>>,
    ended_at: DateTime<Utc>,
    upload: Option<UploadHandle>,
    flush_guard: FlushGuard,
}

async fn publish_stop<Q, T>(
    producer: Arc<Q>,
    task_service: Arc<T>,
    pending: PendingStop,
    default_duration_secs: i64,
    publish_timeout: Duration,
) where
    Q: TaskQueueProducer + Send + Sync + 'static,
    T: TaskServiceClient + Send + Sync + 'static,
{
    if let Some(upload) = pending.upload {
        if let Err(err) = upload.join.await {
            warn!(stream_id = %pending.stream_id, error = %err, "stream_lifecycle: upload loop did not finish cleanly");
        }
    }
    drop(pending.flush_guard);

    let owner = resolve_owner(
        task_service.as_ref(),
        &pending.stream_id,
        pending.owner,
        publish_timeout,
    )
    .await;

    let task = RecordingTask::stop_recording(
        &pending.stream_id,
        owner,
        pending.started_at,
        pending.ended_at,
        default_duration_secs,
    );
    let message = match task.to_queue_message(PUBLISH_SOURCE) {
        Ok(message) => message,
        Err(err) => {
            error!(stream_id = %pending.stream_id, error = %err, "stream_lifecycle: invalid recording task");
            return;
        }
    };

    match tokio::time::timeout(publish_timeout, producer.publish(message)).await {
        Ok(Ok(message_id)) => info!(
            stream_id = %task.stream_id,
            %message_id,
            user_id = task.user_id,
            username = %task.username,
            duration_seconds = task.duration_seconds,
            "stream_lifecycle: recording task published"
        ),
        Ok(Err(err)) => error!(
            stream_id = %task.stream_id,
            error = %err,
            "stream_lifecycle: failed to publish recording task"
        ),
        Err(_) => error!(
            stream_id = %task.stream_id,
            timeout_secs = publish_timeout.as_secs(),
            "stream_lifecycle: publishing recording task timed out"
        ),
    }
}

/// Known owner, else the task service's record, else the sentinel.
async fn resolve_owner<T>(
    task_service: &T,
    stream_id: &str,
    known: OwnerIdentity,
    timeout: Duration,
) -> OwnerIdentity
where
    T: TaskServiceClient + Send + Sync,
{
    if known.is_resolved() {
        return known;
    }

    match tokio::time::timeout(timeout, task_service.find_task_by_stream(stream_id.to_string())).await {
        Ok(Ok(Some(task))) => {
            let owner = task.owner();
            debug!(stream_id = %stream_id, user_id = owner.user_id, "stream_lifecycle: owner resolved from task service");
            owner
        }
        Ok(Ok(None)) => {
            warn!(stream_id = %stream_id, "stream_lifecycle: no task found for stream, owner unknown");
            OwnerIdentity::unknown(stream_id)
        }
        Ok(Err(err)) => {
            warn!(stream_id = %stream_id, error = %err, "stream_lifecycle: owner lookup failed");
            OwnerIdentity::unknown(stream_id)
        }
        Err(_) => {
            warn!(stream_id = %stream_id, "stream_lifecycle: owner lookup timed out");
            OwnerIdentity::unknown(stream_id)
        }
    }
}

#[cfg(all(test, unix))]
pub(crate) mod tests {
    use super::*;
    use crate::{
        ports::PortExhausted,
        segment_upload::tests::RecordingSegmentStorage,
        status_dispatch::{self, tests::FakeTaskService},
        supervisor::tests::ShellCommand,
    };
    use async_trait::async_trait;
    use crates::domain::value_objects::{queue_message::QueueMessage, task_service::ActiveTask};
    use std::sync::Mutex;
    use uuid::Uuid;

    #[derive(Default)]
    pub(crate) struct FakeProducer {
        pub(crate) messages: Mutex<Vec<QueueMessage>>,
    }

    impl FakeProducer {
        pub(crate) fn tasks(&self) -> Vec<RecordingTask> {
            self.messages
                .lock()
                .unwrap()
                .iter()
                .map(|message| serde_json::from_value(message.payload.clone()).unwrap())
                .collect()
        }
    }

    #[async_trait]
    impl TaskQueueProducer for FakeProducer {
        async fn publish(&self, message: QueueMessage) -> Result<Uuid> {
            self.messages.lock().unwrap().push(message);
            Ok(Uuid::new_v4())
        }

        async fn health_check(&self) -> Result<()> {
            Ok(())
        }
    }

    pub(crate) type TestLifecycle =
        StreamLifecycle<FakeProducer, FakeTaskService, RecordingSegmentStorage>;

    pub(crate) struct Harness {
        pub(crate) lifecycle: Arc<TestLifecycle>,
        pub(crate) producer: Arc<FakeProducer>,
        pub(crate) task_service: Arc<FakeTaskService>,
        pub(crate) ports: Arc<PortAllocator>,
        pub(crate) status_rx: tokio::sync::mpsc::Receiver<status_dispatch::StatusChange>,
        pub(crate) hls_root: tempfile::TempDir,
    }

    pub(crate) fn harness(port_start: u16, port_end: u16) -> Harness {
        let hls_root = tempfile::tempdir().unwrap();
        let (status, status_rx) = status_dispatch::channel(32);
        let registry = Arc::new(StreamRegistry::new());
        let ports = Arc::new(PortAllocator::new(port_start, port_end).unwrap());
        let supervisor = Arc::new(IngestSupervisor::new(
            Arc::new(ShellCommand("exec sleep 30".to_string())),
            Duration::from_millis(50),
            status.clone(),
        ));
        let producer = Arc::new(FakeProducer::default());
        let task_service = Arc::new(FakeTaskService::default());

        let lifecycle = StreamLifecycle::new(
            registry,
            Arc::clone(&ports),
            supervisor,
            Arc::new(RecordingSegmentStorage::default()),
            Arc::clone(&producer),
            Arc::clone(&task_service),
            status,
            TaskTracker::new(),
            LifecycleSettings {
                listen_host: "127.0.0.1".to_string(),
                hls_root: hls_root.path().to_path_buf(),
                upload: UploadSettings {
                    interval: Duration::from_millis(20),
                    ..UploadSettings::default()
                },
                default_duration_secs: 60,
                publish_timeout: Duration::from_secs(2),
            },
        );

        Harness {
            lifecycle: Arc::new(lifecycle),
            producer,
            task_service,
            ports,
            status_rx,
            hls_root,
        }
    }

    fn notification(stream_id: &str, status: StreamStatus) -> StreamNotification {
        StreamNotification {
            stream_id: stream_id.to_string(),
            status,
            task_id: None,
            owner: None,
        }
    }

    fn alice() -> OwnerIdentity {
        OwnerIdentity {
            user_id: 7,
            username: "alice".to_string(),
            title: "Morning show".to_string(),
        }
    }

    #[tokio::test]
    async fn waiting_notification_activates_stream() {
        let h = harness(10000, 10001);

        let outcome = h
            .lifecycle
            .handle_notification(notification("s1", StreamStatus::Waiting))
            .await
            .unwrap();

        assert_eq!(outcome, NotifyOutcome::Activated { port: 10000 });
        assert_eq!(h.ports.in_use(), 1);
        let snapshot = h.lifecycle.registry().get("s1").unwrap();
        assert_eq!(snapshot.status, StreamStatus::Waiting);
        assert!(snapshot.listen_address.contains(":10000?mode=listener&streamid=s1"));
        assert!(h.lifecycle.supervisor().is_running("s1"));
        assert!(h.hls_root.path().join("s1").is_dir());

        h.lifecycle.shutdown().await;
        assert_eq!(h.ports.in_use(), 0);
    }

    #[tokio::test]
    async fn repeated_waiting_and_unknown_stop_are_no_ops() {
        let h = harness(10000, 10001);

        h.lifecycle
            .handle_notification(notification("s1", StreamStatus::Waiting))
            .await
            .unwrap();
        let again = h
            .lifecycle
            .handle_notification(notification("s1", StreamStatus::Waiting))
            .await
            .unwrap();
        assert_eq!(again, NotifyOutcome::AlreadyActive { port: 10000 });
        assert_eq!(h.ports.in_use(), 1);

        let stop = h
            .lifecycle
            .handle_notification(notification("never", StreamStatus::Stopped))
            .await
            .unwrap();
        assert_eq!(stop, NotifyOutcome::NotActive);
        assert!(h.producer.messages.lock().unwrap().is_empty());

        h.lifecycle.shutdown().await;
    }

    #[tokio::test]
    async fn running_only_updates_displayed_status() {
        let h = harness(10000, 10001);
        h.lifecycle
            .handle_notification(notification("s1", StreamStatus::Waiting))
            .await
            .unwrap();

        let outcome = h
            .lifecycle
            .handle_notification(notification("s1", StreamStatus::Running))
            .await
            .unwrap();
        assert_eq!(outcome, NotifyOutcome::StatusUpdated);
        assert_eq!(h.lifecycle.registry().get("s1").unwrap().status, StreamStatus::Running);
        assert_eq!(h.ports.in_use(), 1);

        h.lifecycle.shutdown().await;
    }

    #[tokio::test]
    async fn exhausted_ports_surface_as_error() {
        let h = harness(10000, 10000);
        h.lifecycle
            .handle_notification(notification("s1", StreamStatus::Waiting))
            .await
            .unwrap();

        let err = h
            .lifecycle
            .handle_notification(notification("s2", StreamStatus::Waiting))
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<PortExhausted>().is_some());
        assert!(h.lifecycle.registry().get("s2").is_none());
        assert!(!h.lifecycle.supervisor().is_running("s2"));

        h.lifecycle.shutdown().await;
    }

    #[tokio::test]
    async fn stop_publishes_task_with_owner_from_notification() {
        let h = harness(10000, 10001);
        h.lifecycle
            .handle_notification(StreamNotification {
                owner: Some(alice()),
                task_id: Some(42),
                ..notification("s1", StreamStatus::Waiting)
            })
            .await
            .unwrap();

        let outcome = h
            .lifecycle
            .handle_notification(notification("s1", StreamStatus::Stopped))
            .await
            .unwrap();
        assert_eq!(outcome, NotifyOutcome::Stopped { port: 10000 });
        assert_eq!(h.ports.in_use(), 0);
        assert!(h.lifecycle.registry().get("s1").is_none());
        assert!(!h.lifecycle.supervisor().is_running("s1"));

        h.lifecycle.shutdown().await;
        // flush finished, so cleanup may remove the directory now
        assert!(!h.lifecycle.registry().is_busy("s1"));

        let messages = h.producer.messages.lock().unwrap().clone();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].key, "s1");
        assert_eq!(messages[0].action, "stop_recording");
        assert_eq!(messages[0].source, "ingest");

        let task = &h.producer.tasks()[0];
        assert_eq!(task.user_id, 7);
        assert_eq!(task.username, "alice");
        assert_eq!(task.hls_path, "/hls/s1/");
        assert_eq!(task.status, "completed");
        assert!(task.duration_seconds >= 0);
        assert!(task.start_time <= task.end_time);
        // local files survive the stop
        assert!(h.hls_root.path().join("s1").is_dir());
    }

    #[tokio::test]
    async fn stop_resolves_owner_from_task_service() {
        let h = harness(10000, 10001);
        h.task_service.tasks.lock().unwrap().push(ActiveTask {
            id: 3,
            stream_id: "s1".to_string(),
            name: "Evening".to_string(),
            user_id: 9,
            username: "bob".to_string(),
            status: "running".to_string(),
        });

        h.lifecycle
            .handle_notification(notification("s1", StreamStatus::Waiting))
            .await
            .unwrap();
        h.lifecycle
            .handle_notification(notification("s1", StreamStatus::Error))
            .await
            .unwrap();
        h.lifecycle.shutdown().await;

        let task = &h.producer.tasks()[0];
        assert_eq!((task.user_id, task.username.as_str(), task.title.as_str()), (9, "bob", "Evening"));
    }

    #[tokio::test]
    async fn unknown_owner_falls_back_to_sentinel() {
        let h = harness(10000, 10001);
        h.lifecycle
            .handle_notification(notification("s1", StreamStatus::Waiting))
            .await
            .unwrap();
        h.lifecycle
            .handle_notification(notification("s1", StreamStatus::Stopped))
            .await
            .unwrap();
        h.lifecycle.shutdown().await;

        let task = &h.producer.tasks()[0];
        assert_eq!(task.user_id, 0);
        assert_eq!(task.username, "unknown");
        assert_eq!(task.title, "Stream s1");
    }

    #[tokio::test]
    async fn recovered_stream_uses_default_duration() {
        let h = harness(10000, 10001);
        h.lifecycle
            .activate(ActivationRequest {
                stream_id: "s1".to_string(),
                owner: alice(),
                task_id: Some(1),
                started_at: None,
            })
            .await
            .unwrap();
        h.lifecycle.stop_stream("s1", None).await.unwrap();
        h.lifecycle.shutdown().await;

        assert_eq!(h.producer.tasks()[0].duration_seconds, 60);
    }

    #[tokio::test]
    async fn rejects_path_like_stream_ids() {
        let h = harness(10000, 10001);
        assert!(
            h.lifecycle
                .handle_notification(notification("../x", StreamStatus::Waiting))
                .await
                .is_err()
        );
        assert_eq!(h.ports.in_use(), 0);
    }
}
