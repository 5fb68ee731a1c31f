use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use crates::domain::{
    repositories::storage::SegmentStorage,
    value_objects::storage::{PLAYLIST_FILE_NAME, is_media_name, is_playlist_name},
};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub max_attempts: u32,
    /// Attempt `n` is followed by a `n * backoff` pause.
    pub backoff: Duration,
    /// Shared mounts searched in order as `<root>/<stream_id>`.
    pub fallback_roots: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchSource {
    ObjectStorage { attempt: u32 },
    SharedFilesystem { root: PathBuf },
}

#[derive(Debug, Clone)]
pub struct FetchedSegments {
    pub dir: PathBuf,
    pub playlist: PathBuf,
    pub file_count: usize,
    pub source: FetchSource,
}

/// Brings a finished stream's segments into a local directory.
pub struct SegmentFetchService<S>
where
    S: SegmentStorage + Send + Sync + 'static,
{
    storage: Arc<S>,
    settings: FetchSettings,
}

impl<S> SegmentFetchService<S>
where
    S: SegmentStorage + Send + Sync + 'static,
{
    pub fn new(storage: Arc<S>, settings: FetchSettings) -> Self {
        Self { storage, settings }
    }

    /// Object storage first, with bounded retries; then one pass over the
    /// shared mounts. Every directory it creates lives under `work_dir`.
    pub async fn fetch(&self, stream_id: &str, work_dir: &Path) -> Result<FetchedSegments> {
        let attempts = self.settings.max_attempts.max(1);

        for attempt in 1..=attempts {
            let dir = work_dir.join(format!("hls_{stream_id}_{attempt}"));
            match self.download_attempt(stream_id, &dir).await {
                Ok(Some((playlist, file_count))) => {
                    info!(stream_id = %stream_id, attempt, file_count, "segment_fetch: downloaded from object storage");
                    return Ok(FetchedSegments {
                        dir,
                        playlist,
                        file_count,
                        source: FetchSource::ObjectStorage { attempt },
                    });
                }
                Ok(None) => {
                    warn!(stream_id = %stream_id, attempt, max_attempts = attempts, "segment_fetch: no usable segments yet");
                }
                Err(err) => {
                    warn!(stream_id = %stream_id, attempt, max_attempts = attempts, error = %err, "segment_fetch: download attempt failed");
                }
            }
            remove_dir_quietly(&dir).await;

            if attempt < attempts {
                let wait = self.settings.backoff * attempt;
                debug!(stream_id = %stream_id, wait_ms = wait.as_millis() as u64, "segment_fetch: backing off");
                tokio::time::sleep(wait).await;
            }
        }

        warn!(stream_id = %stream_id, "segment_fetch: object storage exhausted, trying shared filesystem");
        let dir = work_dir.join(format!("hls_{stream_id}_fallback"));
        match self.copy_from_fallback(stream_id, &dir).await {
            Ok(fetched) => Ok(fetched),
            Err(err) => {
                remove_dir_quietly(&dir).await;
                Err(err.context(format!(
                    "no segments for stream {stream_id} after {attempts} attempts and fallback"
                )))
            }
        }
    }

    async fn download_attempt(&self, stream_id: &str, dir: &Path) -> Result<Option<(PathBuf, usize)>> {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("failed to create {}", dir.display()))?;

        let objects = self.storage.list_segments(stream_id.to_string()).await?;
        let mut names = Vec::new();
        for object in objects.into_iter().filter(|object| is_media_name(&object.file_name)) {
            let destination = dir.join(&object.file_name);
            self.storage
                .download_segment(object.key.clone(), destination)
                .await
                .with_context(|| format!("failed to download {}", object.key))?;
            names.push(object.file_name);
        }

        Ok(pick_playlist(dir, &names).map(|playlist| (playlist, names.len())))
    }

    async fn copy_from_fallback(&self, stream_id: &str, dir: &Path) -> Result<FetchedSegments> {
        let Some(root) = self.first_existing_root(stream_id).await else {
            bail!("no fallback directory exists for stream {stream_id}");
        };
        let source_dir = root.join(stream_id);

        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("failed to create {}", dir.display()))?;

        let mut entries = tokio::fs::read_dir(&source_dir)
            .await
            .with_context(|| format!("failed to read {}", source_dir.display()))?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if !is_media_name(&name) || !entry.file_type().await?.is_file() {
                continue;
            }
            tokio::fs::copy(entry.path(), dir.join(&name))
                .await
                .with_context(|| format!("failed to copy {}", entry.path().display()))?;
            names.push(name);
        }

        let Some(playlist) = pick_playlist(dir, &names) else {
            bail!(
                "fallback {} has {} media files but no playlist",
                source_dir.display(),
                names.len()
            );
        };

        info!(stream_id = %stream_id, root = %root.display(), file_count = names.len(), "segment_fetch: copied from shared filesystem");
        Ok(FetchedSegments {
            dir: dir.to_path_buf(),
            playlist,
            file_count: names.len(),
            source: FetchSource::SharedFilesystem { root },
        })
    }

    async fn first_existing_root(&self, stream_id: &str) -> Option<PathBuf> {
        for root in &self.settings.fallback_roots {
            let candidate = root.join(stream_id);
            if tokio::fs::metadata(&candidate)
                .await
                .map(|meta| meta.is_dir())
                .unwrap_or(false)
            {
                return Some(root.clone());
            }
        }
        None
    }
}

/// `stream.m3u8` when present, else any playlist.
fn pick_playlist(dir: &Path, names: &[String]) -> Option<PathBuf> {
    names
        .iter()
        .find(|name| name.as_str() == PLAYLIST_FILE_NAME)
        .or_else(|| names.iter().find(|name| is_playlist_name(name)))
        .map(|name| dir.join(name))
}

async fn remove_dir_quietly(dir: &Path) {
    if let Err(err) = tokio::fs::remove_dir_all(dir).await {
        if err.kind() != std::io::ErrorKind::NotFound {
            warn!(dir = %dir.display(), error = %err, "segment_fetch: failed to remove directory");
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use crates::domain::value_objects::storage::SegmentObject;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// Serves objects from memory and counts how often it was listed.
    #[derive(Default)]
    pub(crate) struct InMemorySegmentStorage {
        pub(crate) objects: Mutex<BTreeMap<String, Vec<u8>>>,
        pub(crate) list_calls: Mutex<u32>,
        /// The first `n` listings return nothing.
        pub(crate) empty_listings: Mutex<u32>,
    }

    impl InMemorySegmentStorage {
        pub(crate) fn with_stream(stream_id: &str, files: &[(&str, &[u8])]) -> Self {
            let storage = Self::default();
            {
                let mut objects = storage.objects.lock().unwrap();
                for (name, body) in files {
                    objects.insert(format!("{stream_id}/{name}"), body.to_vec());
                }
            }
            storage
        }

        pub(crate) fn list_calls(&self) -> u32 {
            *self.list_calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl SegmentStorage for InMemorySegmentStorage {
        async fn upload_segment(&self, _stream_id: String, _local_path: PathBuf) -> Result<()> {
            Ok(())
        }

        async fn list_segments(&self, stream_id: String) -> Result<Vec<SegmentObject>> {
            *self.list_calls.lock().unwrap() += 1;
            {
                let mut empty = self.empty_listings.lock().unwrap();
                if *empty > 0 {
                    *empty -= 1;
                    return Ok(Vec::new());
                }
            }
            let prefix = format!("{stream_id}/");
            Ok(self
                .objects
                .lock()
                .unwrap()
                .iter()
                .filter_map(|(key, body)| {
                    key.strip_prefix(&prefix).map(|name| SegmentObject {
                        key: key.clone(),
                        file_name: name.to_string(),
                        size_bytes: body.len() as i64,
                    })
                })
                .collect())
        }

        async fn download_segment(&self, key: String, destination: PathBuf) -> Result<u64> {
            let body = self
                .objects
                .lock()
                .unwrap()
                .get(&key)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("no such key: {key}"))?;
            tokio::fs::write(&destination, &body).await?;
            Ok(body.len() as u64)
        }
    }

    pub(crate) const PLAYLIST: &[u8] = b"#EXTM3U\n#EXT-X-VERSION:3\n#EXTINF:4.0,\nsegment_000.ts\n#EXT-X-ENDLIST\n";

    fn settings(max_attempts: u32, roots: Vec<PathBuf>) -> FetchSettings {
        FetchSettings {
            max_attempts,
            backoff: Duration::ZERO,
            fallback_roots: roots,
        }
    }

    #[tokio::test]
    async fn downloads_from_object_storage() {
        let work = tempfile::tempdir().unwrap();
        let storage = Arc::new(InMemorySegmentStorage::with_stream(
            "s1",
            &[("stream.m3u8", PLAYLIST), ("segment_000.ts", b"video"), ("notes.txt", b"x")],
        ));
        let service = SegmentFetchService::new(Arc::clone(&storage), settings(4, vec![]));

        let fetched = service.fetch("s1", work.path()).await.unwrap();

        assert_eq!(fetched.source, FetchSource::ObjectStorage { attempt: 1 });
        assert_eq!(fetched.file_count, 2);
        assert_eq!(fetched.playlist, work.path().join("hls_s1_1").join("stream.m3u8"));
        assert!(fetched.dir.join("segment_000.ts").is_file());
        assert!(!fetched.dir.join("notes.txt").exists());
        assert_eq!(storage.list_calls(), 1);
    }

    #[tokio::test]
    async fn retries_until_segments_appear() {
        let work = tempfile::tempdir().unwrap();
        let storage = Arc::new(InMemorySegmentStorage::with_stream(
            "s1",
            &[("stream.m3u8", PLAYLIST), ("segment_000.ts", b"video")],
        ));
        *storage.empty_listings.lock().unwrap() = 2;
        let service = SegmentFetchService::new(Arc::clone(&storage), settings(4, vec![]));

        let fetched = service.fetch("s1", work.path()).await.unwrap();

        assert_eq!(fetched.source, FetchSource::ObjectStorage { attempt: 3 });
        assert_eq!(storage.list_calls(), 3);
        assert!(!work.path().join("hls_s1_1").exists());
    }

    #[tokio::test]
    async fn segments_without_playlist_do_not_count() {
        let work = tempfile::tempdir().unwrap();
        let storage = Arc::new(InMemorySegmentStorage::with_stream(
            "s1",
            &[("segment_000.ts", b"video")],
        ));
        let service = SegmentFetchService::new(Arc::clone(&storage), settings(2, vec![]));

        assert!(service.fetch("s1", work.path()).await.is_err());
        assert_eq!(storage.list_calls(), 2);
    }

    #[tokio::test]
    async fn falls_back_to_first_existing_shared_root() {
        let work = tempfile::tempdir().unwrap();
        let missing = tempfile::tempdir().unwrap();
        let shared = tempfile::tempdir().unwrap();
        let later = tempfile::tempdir().unwrap();
        let stream_dir = shared.path().join("s1");
        std::fs::create_dir_all(&stream_dir).unwrap();
        std::fs::write(stream_dir.join("stream.m3u8"), PLAYLIST).unwrap();
        std::fs::write(stream_dir.join("segment_000.ts"), b"video").unwrap();
        std::fs::write(stream_dir.join("segment_001.ts.tmp"), b"partial").unwrap();
        std::fs::create_dir_all(later.path().join("s1")).unwrap();

        let storage = Arc::new(InMemorySegmentStorage::default());
        let service = SegmentFetchService::new(
            Arc::clone(&storage),
            settings(
                3,
                vec![
                    missing.path().to_path_buf(),
                    shared.path().to_path_buf(),
                    later.path().to_path_buf(),
                ],
            ),
        );

        let fetched = service.fetch("s1", work.path()).await.unwrap();

        assert_eq!(
            fetched.source,
            FetchSource::SharedFilesystem { root: shared.path().to_path_buf() }
        );
        assert_eq!(fetched.file_count, 2);
        assert!(fetched.playlist.starts_with(work.path()));
        assert!(!fetched.dir.join("segment_001.ts.tmp").exists());
        assert_eq!(storage.list_calls(), 3);
    }

    #[tokio::test]
    async fn fails_after_exact_attempt_budget_when_nothing_anywhere() {
        let work = tempfile::tempdir().unwrap();
        let empty_root = tempfile::tempdir().unwrap();
        let storage = Arc::new(InMemorySegmentStorage::default());
        let service = SegmentFetchService::new(
            Arc::clone(&storage),
            settings(4, vec![empty_root.path().to_path_buf()]),
        );

        assert!(service.fetch("s1", work.path()).await.is_err());
        assert_eq!(storage.list_calls(), 4);
        assert_eq!(std::fs::read_dir(work.path()).unwrap().count(), 0);
    }
}
