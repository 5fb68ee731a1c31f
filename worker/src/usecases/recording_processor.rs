use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use crates::domain::{
    repositories::{
        recording::RecordingRepository,
        storage::{SegmentStorage, VodStorage},
    },
    value_objects::{
        recording_task::RecordingTask,
        recordings::{ProcessingRecordingModel, ReadyRecordingModel},
        storage::VodPaths,
    },
};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::converter::{ConversionOutput, Converter, toolkit::MediaToolkit};
use crate::segment_fetch::SegmentFetchService;

/// Something that consumes recording tasks one at a time.
#[async_trait]
pub trait TaskHandler {
    async fn handle(&self, task: RecordingTask);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailedStage {
    Fetch,
    Convert,
    Upload,
}

impl Display for FailedStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stage = match self {
            FailedStage::Fetch => "segment fetch",
            FailedStage::Convert => "conversion",
            FailedStage::Upload => "vod upload",
        };
        write!(f, "{}", stage)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordingOutcome {
    /// `persisted` is false when the media is published but the final row
    /// update failed.
    Ready {
        file_path: String,
        file_size_bytes: u64,
        persisted: bool,
    },
    Failed {
        stage: FailedStage,
    },
}

pub struct RecordingProcessor<R, S, V, M>
where
    R: RecordingRepository + Send + Sync + 'static,
    S: SegmentStorage + Send + Sync + 'static,
    V: VodStorage + Send + Sync + 'static,
    M: MediaToolkit + Send + Sync + 'static,
{
    repository: Arc<R>,
    fetcher: SegmentFetchService<S>,
    converter: Converter<M>,
    vod_storage: Arc<V>,
    work_root: PathBuf,
}

impl<R, S, V, M> RecordingProcessor<R, S, V, M>
where
    R: RecordingRepository + Send + Sync + 'static,
    S: SegmentStorage + Send + Sync + 'static,
    V: VodStorage + Send + Sync + 'static,
    M: MediaToolkit + Send + Sync + 'static,
{
    pub fn new(
        repository: Arc<R>,
        fetcher: SegmentFetchService<S>,
        converter: Converter<M>,
        vod_storage: Arc<V>,
        work_root: PathBuf,
    ) -> Self {
        Self {
            repository,
            fetcher,
            converter,
            vod_storage,
            work_root,
        }
    }

    /// Runs one task to a terminal state. An `Err` means the recording row
    /// could not even be opened; every later failure is recorded as `failed`.
    pub async fn process(&self, task: &RecordingTask) -> Result<RecordingOutcome> {
        let stream_id = task.stream_id.as_str();
        let owner = task.owner().normalized(stream_id);
        info!(
            stream_id = %stream_id,
            user_id = owner.user_id,
            username = %owner.username,
            "recording_processor: task started"
        );

        self.repository
            .upsert_processing(ProcessingRecordingModel {
                stream_id: stream_id.to_string(),
                owner,
                duration_seconds: clamp_i32(task.duration_seconds.max(0)),
            })
            .await
            .map_err(|err| {
                error!(stream_id = %stream_id, error = %err, "recording_processor: failed to open recording row");
                err
            })?;

        let workspace = match TaskWorkspace::create(&self.work_root, stream_id).await {
            Ok(workspace) => workspace,
            Err(err) => return Ok(self.fail(stream_id, FailedStage::Fetch, err).await),
        };

        let produced = self.produce(stream_id, workspace.path()).await;
        workspace.remove().await;
        let (output, paths) = match produced {
            Ok(produced) => produced,
            Err((stage, err)) => return Ok(self.fail(stream_id, stage, err).await),
        };

        let duration_seconds = if task.duration_seconds > 0 {
            clamp_i32(task.duration_seconds)
        } else {
            clamp_i32(output.duration_secs as i64)
        };

        let persisted = match self
            .repository
            .mark_ready(
                stream_id.to_string(),
                ReadyRecordingModel {
                    duration_seconds,
                    file_path: paths.video_path.clone(),
                    thumbnail_path: paths.thumbnail_path.clone(),
                    file_size_bytes: i64::try_from(output.file_size_bytes).unwrap_or(i64::MAX),
                },
            )
            .await
        {
            Ok(()) => true,
            Err(err) => {
                error!(
                    stream_id = %stream_id,
                    file_path = %paths.video_path,
                    error = %err,
                    "recording_processor: recording uploaded but row not marked ready"
                );
                false
            }
        };

        info!(
            stream_id = %stream_id,
            file_path = %paths.video_path,
            file_size_bytes = output.file_size_bytes,
            duration_seconds,
            "recording_processor: recording ready"
        );
        Ok(RecordingOutcome::Ready {
            file_path: paths.video_path,
            file_size_bytes: output.file_size_bytes,
            persisted,
        })
    }

    /// Fetches, converts and uploads inside `workspace`.
    async fn produce(
        &self,
        stream_id: &str,
        workspace: &Path,
    ) -> Result<(ConversionOutput, VodPaths), (FailedStage, anyhow::Error)> {
        let fetched = self
            .fetcher
            .fetch(stream_id, workspace)
            .await
            .map_err(|err| (FailedStage::Fetch, err))?;

        let output = self
            .converter
            .convert(&fetched.playlist, workspace)
            .await
            .map_err(|err| (FailedStage::Convert, err))?;

        let paths = self
            .vod_storage
            .upload_vod(
                stream_id.to_string(),
                output.video_path.clone(),
                output.thumbnail_path.clone(),
            )
            .await
            .map_err(|err| (FailedStage::Upload, err))?;

        Ok((output, paths))
    }

    async fn fail(&self, stream_id: &str, stage: FailedStage, err: anyhow::Error) -> RecordingOutcome {
        error!(stream_id = %stream_id, stage = %stage, error = %format!("{err:#}"), "recording_processor: task failed");
        if let Err(err) = self.repository.mark_failed(stream_id.to_string()).await {
            error!(stream_id = %stream_id, error = %err, "recording_processor: failed to mark recording failed");
        }
        RecordingOutcome::Failed { stage }
    }
}

#[async_trait]
impl<R, S, V, M> TaskHandler for RecordingProcessor<R, S, V, M>
where
    R: RecordingRepository + Send + Sync + 'static,
    S: SegmentStorage + Send + Sync + 'static,
    V: VodStorage + Send + Sync + 'static,
    M: MediaToolkit + Send + Sync + 'static,
{
    async fn handle(&self, task: RecordingTask) {
        if let Err(err) = self.process(&task).await {
            error!(stream_id = %task.stream_id, error = %err, "recording_processor: task abandoned");
        }
    }
}

fn clamp_i32(value: i64) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

/// Per-task scratch directory. `remove` deletes it off the blocking path;
/// dropping it without `remove` falls back to a synchronous delete.
struct TaskWorkspace {
    path: PathBuf,
    removed: bool,
}

impl TaskWorkspace {
    async fn create(root: &Path, stream_id: &str) -> Result<Self> {
        let path = root.join(format!("{}-{}", path_safe(stream_id), Uuid::new_v4()));
        tokio::fs::create_dir_all(&path)
            .await
            .with_context(|| format!("failed to create workspace {}", path.display()))?;
        Ok(Self {
            path,
            removed: false,
        })
    }

    fn path(&self) -> &Path {
        &self.path
    }

    async fn remove(mut self) {
        self.removed = true;
        if let Err(err) = tokio::fs::remove_dir_all(&self.path).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %err, "recording_processor: failed to remove workspace");
            }
        }
    }
}

impl Drop for TaskWorkspace {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        if let Err(err) = std::fs::remove_dir_all(&self.path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %err, "recording_processor: failed to remove workspace");
            }
        }
    }
}

fn path_safe(stream_id: &str) -> String {
    stream_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
