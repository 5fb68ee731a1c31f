use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::registry::{StreamRegistry, validate_stream_id};

pub const CLEANUP_FOLDER_ACTION: &str = "cleanup_folder";

#[derive(Debug, Error)]
pub enum CleanupError {
    #[error("invalid stream id: {0}")]
    InvalidStreamId(String),

    #[error("unsupported cleanup action: {0}")]
    UnsupportedAction(String),

    #[error("stream {0} is still active")]
    StreamActive(String),

    #[error("failed to remove segment directory: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CleanupOutcome {
    Removed { path: String },
    NothingToRemove { path: String },
}

/// Removes the local segment directory of a stream deleted upstream.
pub struct CleanupUseCase {
    registry: Arc<StreamRegistry>,
    hls_root: PathBuf,
}

impl CleanupUseCase {
    pub fn new(registry: Arc<StreamRegistry>, hls_root: PathBuf) -> Self {
        Self { registry, hls_root }
    }

    pub async fn cleanup(&self, stream_id: &str, action: &str) -> Result<CleanupOutcome, CleanupError> {
        if action != CLEANUP_FOLDER_ACTION {
            return Err(CleanupError::UnsupportedAction(action.to_string()));
        }
        validate_stream_id(stream_id)
            .map_err(|err| CleanupError::InvalidStreamId(err.to_string()))?;

        if self.registry.is_busy(stream_id) {
            warn!(stream_id = %stream_id, "cleanup: refused, stream still active");
            return Err(CleanupError::StreamActive(stream_id.to_string()));
        }

        let dir = self.hls_root.join(stream_id);
        let path = dir.to_string_lossy().into_owned();
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                info!(stream_id = %stream_id, path = %path, "cleanup: segment directory removed");
                Ok(CleanupOutcome::Removed { path })
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(stream_id = %stream_id, path = %path, "cleanup: nothing to remove");
                Ok(CleanupOutcome::NothingToRemove { path })
            }
            Err(err) => {
                warn!(stream_id = %stream_id, path = %path, error = %err, "cleanup: failed");
                Err(err.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::tests::state;

    fn usecase(root: &std::path::Path) -> (CleanupUseCase, Arc<StreamRegistry>) {
        let registry = Arc::new(StreamRegistry::new());
        (CleanupUseCase::new(Arc::clone(&registry), root.to_path_buf()), registry)
    }

    #[tokio::test]
    async fn removes_segment_directory() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("s1");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("segment_000.ts"), b"data").unwrap();
        let (usecase, _) = usecase(root.path());

        let outcome = usecase.cleanup("s1", CLEANUP_FOLDER_ACTION).await.unwrap();
        assert!(matches!(outcome, CleanupOutcome::Removed { .. }));
        assert!(!dir.exists());

        let again = usecase.cleanup("s1", CLEANUP_FOLDER_ACTION).await.unwrap();
        assert!(matches!(again, CleanupOutcome::NothingToRemove { .. }));
    }

    #[tokio::test]
    async fn refuses_streams_still_flushing_after_stop() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("s1")).unwrap();
        std::fs::write(root.path().join("s1").join("segment_007.ts"), b"data").unwrap();
        let (usecase, registry) = usecase(root.path());
        registry.insert_if_absent(state("s1", 10000)).ok();

        let (_, guard) = registry.remove_for_flush("s1").unwrap();
        assert!(matches!(
            usecase.cleanup("s1", CLEANUP_FOLDER_ACTION).await,
            Err(CleanupError::StreamActive(_))
        ));
        assert!(root.path().join("s1").join("segment_007.ts").exists());

        drop(guard);
        let outcome = usecase.cleanup("s1", CLEANUP_FOLDER_ACTION).await.unwrap();
        assert!(matches!(outcome, CleanupOutcome::Removed { .. }));
    }

    #[tokio::test]
    async fn refuses_active_streams_and_bad_input() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("s1")).unwrap();
        let (usecase, registry) = usecase(root.path());
        registry.insert_if_absent(state("s1", 10000)).ok();

        assert!(matches!(
            usecase.cleanup("s1", CLEANUP_FOLDER_ACTION).await,
            Err(CleanupError::StreamActive(_))
        ));
        assert!(root.path().join("s1").exists());

        assert!(matches!(
            usecase.cleanup("..", CLEANUP_FOLDER_ACTION).await,
            Err(CleanupError::InvalidStreamId(_))
        ));
        assert!(matches!(
            usecase.cleanup("s2", "delete_everything").await,
            Err(CleanupError::UnsupportedAction(_))
        ));
    }
}
