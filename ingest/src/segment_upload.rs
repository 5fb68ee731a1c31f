use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use anyhow::{Context, Result};
use crates::domain::{
    repositories::storage::SegmentStorage,
    value_objects::storage::{is_media_name, is_playlist_name, is_segment_name},
};
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, info, warn};

use crate::registry::UploadHandle;

const PLAYLIST_HASH_PREFIX_BYTES: usize = 512;

#[derive(Debug, Clone)]
pub struct UploadSettings {
    pub interval: Duration,
    pub prune_every_cycles: u64,
    /// Most recent local segments kept on disk when pruning.
    pub retain_segments: usize,
    /// Tracked uploads older than this are forgotten.
    pub tracker_ttl: Duration,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            prune_every_cycles: 10,
            retain_segments: 8,
            tracker_ttl: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub uploaded: usize,
    pub failed: usize,
    pub pruned: usize,
}

#[derive(Debug, Clone)]
struct LocalFile {
    path: PathBuf,
    name: String,
    len: u64,
    modified: SystemTime,
}

/// What a successful upload should record.
#[derive(Debug, Clone, PartialEq, Eq)]
enum UploadKind {
    Segment,
    /// Fingerprint taken before the upload; `None` when hashing failed.
    Playlist { fingerprint: Option<String> },
}

#[derive(Debug, Clone, Copy)]
struct UploadedSegment {
    modified: SystemTime,
    uploaded_at: Instant,
}

/// Mirrors one stream's segment directory into the live bucket.
pub struct SegmentUploader {
    stream_id: String,
    segment_dir: PathBuf,
    storage: Arc<dyn SegmentStorage + Send + Sync>,
    settings: UploadSettings,
    uploaded: HashMap<String, UploadedSegment>,
    playlist_fingerprints: HashMap<String, String>,
    cycles: u64,
}

impl SegmentUploader {
    pub fn new(
        stream_id: String,
        segment_dir: PathBuf,
        storage: Arc<dyn SegmentStorage + Send + Sync>,
        settings: UploadSettings,
    ) -> Self {
        Self {
            stream_id,
            segment_dir,
            storage,
            settings,
            uploaded: HashMap::new(),
            playlist_fingerprints: HashMap::new(),
            cycles: 0,
        }
    }

    pub fn spawn(self, tracker: &TaskTracker) -> UploadHandle {
        let cancel = CancellationToken::new();
        let join = tracker.spawn(self.run(cancel.clone()));
        UploadHandle { cancel, join }
    }

    /// Cycles until `cancel` fires, then does one unconditional flush.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(stream_id = %self.stream_id, dir = %self.segment_dir.display(), "segment_upload: loop started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.settings.interval) => {}
            }

            match self.run_cycle().await {
                Ok(report) if report.uploaded > 0 || report.failed > 0 => debug!(
                    stream_id = %self.stream_id,
                    uploaded = report.uploaded,
                    failed = report.failed,
                    pruned = report.pruned,
                    "segment_upload: cycle finished"
                ),
                Ok(_) => {}
                Err(err) => warn!(
                    stream_id = %self.stream_id,
                    error = %err,
                    "segment_upload: cycle failed"
                ),
            }
        }

        let report = self.final_flush().await;
        info!(
            stream_id = %self.stream_id,
            uploaded = report.uploaded,
            failed = report.failed,
            "segment_upload: final flush finished"
        );
    }

    pub async fn run_cycle(&mut self) -> Result<CycleReport> {
        self.cycles += 1;
        let mut report = CycleReport::default();

        let files = self.list_media_files().await?;
        for file in &files {
            let Some(kind) = self.pending_upload(file).await else {
                continue;
            };
            if self.upload(file, kind).await {
                report.uploaded += 1;
            } else {
                report.failed += 1;
            }
        }

        if self.settings.prune_every_cycles > 0
            && self.cycles % self.settings.prune_every_cycles == 0
        {
            report.pruned = self.prune_local_segments().await;
        }

        let present: HashSet<&str> = files.iter().map(|file| file.name.as_str()).collect();
        self.prune_tracker(&present);

        Ok(report)
    }

    /// Uploads every remaining media file regardless of what was tracked.
    pub async fn final_flush(&mut self) -> CycleReport {
        let mut report = CycleReport::default();
        let files = match self.list_media_files().await {
            Ok(files) => files,
            Err(err) => {
                warn!(stream_id = %self.stream_id, error = %err, "segment_upload: final flush listing failed");
                return report;
            }
        };

        for file in files {
            let kind = if is_playlist_name(&file.name) {
                UploadKind::Playlist {
                    fingerprint: playlist_fingerprint(&file).await.ok(),
                }
            } else {
                UploadKind::Segment
            };
            if self.upload(&file, kind).await {
                report.uploaded += 1;
            } else {
                report.failed += 1;
            }
        }
        report
    }

    /// Drops the record of an uploaded segment so it is considered new again.
    #[cfg(test)]
    pub(crate) fn forget(&mut self, file_name: &str) -> bool {
        self.uploaded.remove(file_name).is_some()
    }

    #[cfg(test)]
    pub(crate) fn tracked_segments(&self) -> usize {
        self.uploaded.len()
    }

    async fn pending_upload(&self, file: &LocalFile) -> Option<UploadKind> {
        if is_segment_name(&file.name) {
            let changed = match self.uploaded.get(&file.name) {
                Some(previous) => file.modified > previous.modified,
                None => true,
            };
            return changed.then_some(UploadKind::Segment);
        }

        if is_playlist_name(&file.name) {
            return match playlist_fingerprint(file).await {
                Ok(fingerprint) => {
                    let changed = self.playlist_fingerprints.get(&file.name) != Some(&fingerprint);
                    changed.then_some(UploadKind::Playlist {
                        fingerprint: Some(fingerprint),
                    })
                }
                Err(err) => {
                    warn!(stream_id = %self.stream_id, file = %file.name, error = %err, "segment_upload: playlist hash failed");
                    Some(UploadKind::Playlist { fingerprint: None })
                }
            };
        }

        None
    }

    async fn upload(&mut self, file: &LocalFile, kind: UploadKind) -> bool {
        let result = self
            .storage
            .upload_segment(self.stream_id.clone(), file.path.clone())
            .await;

        match result {
            Ok(()) => {
                match kind {
                    UploadKind::Segment => {
                        self.uploaded.insert(
                            file.name.clone(),
                            UploadedSegment {
                                modified: file.modified,
                                uploaded_at: Instant::now(),
                            },
                        );
                    }
                    UploadKind::Playlist {
                        fingerprint: Some(fingerprint),
                    } => {
                        self.playlist_fingerprints.insert(file.name.clone(), fingerprint);
                    }
                    UploadKind::Playlist { fingerprint: None } => {}
                }
                true
            }
            Err(err) => {
                warn!(
                    stream_id = %self.stream_id,
                    file = %file.name,
                    error = %err,
                    "segment_upload: upload failed, will retry next cycle"
                );
                false
            }
        }
    }

    /// Non-empty, finished segment and playlist files.
    async fn list_media_files(&self) -> Result<Vec<LocalFile>> {
        let mut entries = match tokio::fs::read_dir(&self.segment_dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("failed to read segment dir {}", self.segment_dir.display())
                });
            }
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if !is_media_name(&name) {
                continue;
            }
            let metadata = match entry.metadata().await {
                Ok(metadata) if metadata.is_file() => metadata,
                _ => continue,
            };
            if metadata.len() == 0 {
                continue;
            }
            files.push(LocalFile {
                path: entry.path(),
                name,
                len: metadata.len(),
                modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            });
        }

        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    /// Keeps the newest `retain_segments` segments; older ones are deleted
    /// only once their current content has been uploaded.
    async fn prune_local_segments(&mut self) -> usize {
        let mut segments: Vec<LocalFile> = match self.list_media_files().await {
            Ok(files) => files
                .into_iter()
                .filter(|file| is_segment_name(&file.name))
                .collect(),
            Err(err) => {
                warn!(stream_id = %self.stream_id, error = %err, "segment_upload: prune listing failed");
                return 0;
            }
        };

        if segments.len() <= self.settings.retain_segments {
            return 0;
        }

        segments.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| b.name.cmp(&a.name)));

        let mut pruned = 0;
        for file in segments.iter().skip(self.settings.retain_segments) {
            let uploaded = self
                .uploaded
                .get(&file.name)
                .map(|entry| entry.modified >= file.modified)
                .unwrap_or(false);
            if !uploaded {
                continue;
            }
            match tokio::fs::remove_file(&file.path).await {
                Ok(()) => pruned += 1,
                Err(err) => warn!(
                    stream_id = %self.stream_id,
                    file = %file.name,
                    error = %err,
                    "segment_upload: failed to prune local segment"
                ),
            }
        }

        if pruned > 0 {
            debug!(stream_id = %self.stream_id, pruned, "segment_upload: pruned local segments");
        }
        pruned
    }

    /// Forgets uploads older than the TTL once their file is gone locally.
    /// Entries for files still on disk stay so they are not uploaded again.
    fn prune_tracker(&mut self, present: &HashSet<&str>) {
        let ttl = self.settings.tracker_ttl;
        self.uploaded.retain(|name, entry| {
            present.contains(name.as_str()) || entry.uploaded_at.elapsed() < ttl
        });
        self.playlist_fingerprints
            .retain(|name, _| present.contains(name.as_str()));
    }
}

/// SHA-256 over the file size and its first bytes. Good enough to notice
/// a rolling playlist changing between cycles.
async fn playlist_fingerprint(file: &LocalFile) -> Result<String> {
    let mut handle = tokio::fs::File::open(&file.path)
        .await
        .with_context(|| format!("failed to open {}", file.path.display()))?;
    let mut head = vec![0u8; PLAYLIST_HASH_PREFIX_BYTES];
    let mut filled = 0;
    while filled < head.len() {
        let read = handle.read(&mut head[filled..]).await?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    head.truncate(filled);

    let mut hasher = Sha256::new();
    hasher.update(file.len.to_le_bytes());
    hasher.update(&head);
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use crates::domain::value_objects::storage::SegmentObject;
    use std::path::Path;
    use std::sync::Mutex;

    /// Records upload calls by file name; can be told to fail.
    #[derive(Default)]
    pub(crate) struct RecordingSegmentStorage {
        pub(crate) uploads: Mutex<Vec<String>>,
        pub(crate) fail: Mutex<bool>,
        /// Contents written over the uploaded file once it has been sent.
        pub(crate) rewrite_after_upload: Mutex<Option<String>>,
    }

    impl RecordingSegmentStorage {
        pub(crate) fn uploads(&self) -> Vec<String> {
            self.uploads.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SegmentStorage for RecordingSegmentStorage {
        async fn upload_segment(&self, _stream_id: String, local_path: PathBuf) -> Result<()> {
            if *self.fail.lock().unwrap() {
                anyhow::bail!("storage unavailable");
            }
            let name = local_path.file_name().unwrap().to_string_lossy().into_owned();
            self.uploads.lock().unwrap().push(name);
            if let Some(contents) = self.rewrite_after_upload.lock().unwrap().take() {
                std::fs::write(&local_path, contents).unwrap();
            }
            Ok(())
        }

        async fn list_segments(&self, _stream_id: String) -> Result<Vec<SegmentObject>> {
            Ok(Vec::new())
        }

        async fn download_segment(&self, _key: String, _destination: PathBuf) -> Result<u64> {
            anyhow::bail!("not used")
        }
    }

    fn write(dir: &Path, name: &str, contents: &str) {
        std::fs::write(dir.join(name), contents).unwrap();
    }

    fn uploader(dir: &Path, storage: Arc<RecordingSegmentStorage>) -> SegmentUploader {
        SegmentUploader::new(
            "s1".to_string(),
            dir.to_path_buf(),
            storage,
            UploadSettings {
                interval: Duration::from_millis(20),
                prune_every_cycles: 0,
                ..UploadSettings::default()
            },
        )
    }

    #[tokio::test]
    async fn unchanged_directory_uploads_nothing_twice() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "segment_000.ts", "aaaa");
        write(dir.path(), "segment_001.ts", "bbbb");
        write(dir.path(), "stream.m3u8", "#EXTM3U\nsegment_000.ts\nsegment_001.ts\n");
        write(dir.path(), "stream.m3u8.tmp", "#EXTM3U\n");
        write(dir.path(), "segment_002.ts", "");

        let storage = Arc::new(RecordingSegmentStorage::default());
        let mut uploader = uploader(dir.path(), storage.clone());

        let first = uploader.run_cycle().await.unwrap();
        assert_eq!(first.uploaded, 3);
        assert_eq!(
            storage.uploads(),
            vec!["segment_000.ts", "segment_001.ts", "stream.m3u8"]
        );

        let second = uploader.run_cycle().await.unwrap();
        assert_eq!(second, CycleReport::default());
        assert_eq!(storage.uploads().len(), 3);
    }

    #[tokio::test]
    async fn forgotten_segment_is_uploaded_exactly_once_more() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "segment_000.ts", "aaaa");
        write(dir.path(), "stream.m3u8", "#EXTM3U\nsegment_000.ts\n");

        let storage = Arc::new(RecordingSegmentStorage::default());
        let mut uploader = uploader(dir.path(), storage.clone());
        uploader.run_cycle().await.unwrap();

        assert!(uploader.forget("segment_000.ts"));
        std::fs::remove_file(dir.path().join("segment_000.ts")).unwrap();
        write(dir.path(), "segment_000.ts", "aaaa");

        let report = uploader.run_cycle().await.unwrap();
        assert_eq!(report.uploaded, 1);
        assert_eq!(uploader.run_cycle().await.unwrap().uploaded, 0);
        assert_eq!(
            storage.uploads(),
            vec!["segment_000.ts", "stream.m3u8", "segment_000.ts"]
        );
    }

    #[tokio::test]
    async fn playlist_is_reuploaded_when_it_changes() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "stream.m3u8", "#EXTM3U\nsegment_000.ts\n");

        let storage = Arc::new(RecordingSegmentStorage::default());
        let mut uploader = uploader(dir.path(), storage.clone());
        uploader.run_cycle().await.unwrap();

        write(dir.path(), "stream.m3u8", "#EXTM3U\nsegment_000.ts\nsegment_001.ts\n");
        assert_eq!(uploader.run_cycle().await.unwrap().uploaded, 1);
        assert_eq!(storage.uploads(), vec!["stream.m3u8", "stream.m3u8"]);
    }

    #[tokio::test]
    async fn playlist_rewritten_during_upload_is_sent_again() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "stream.m3u8", "#EXTM3U\nsegment_000.ts\n");

        let storage = Arc::new(RecordingSegmentStorage::default());
        *storage.rewrite_after_upload.lock().unwrap() =
            Some("#EXTM3U\nsegment_000.ts\nsegment_001.ts\n".to_string());
        let mut uploader = uploader(dir.path(), storage.clone());

        assert_eq!(uploader.run_cycle().await.unwrap().uploaded, 1);
        assert_eq!(uploader.run_cycle().await.unwrap().uploaded, 1);
        assert_eq!(uploader.run_cycle().await.unwrap().uploaded, 0);
    }

    #[tokio::test]
    async fn tracker_forgets_expired_uploads_without_local_pruning() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..50 {
            write(dir.path(), &format!("segment_{i:03}.ts"), "data");
        }

        let storage = Arc::new(RecordingSegmentStorage::default());
        let mut uploader = SegmentUploader::new(
            "s1".to_string(),
            dir.path().to_path_buf(),
            storage.clone(),
            UploadSettings {
                interval: Duration::from_millis(20),
                prune_every_cycles: 0,
                retain_segments: 8,
                tracker_ttl: Duration::ZERO,
            },
        );

        assert_eq!(uploader.run_cycle().await.unwrap().uploaded, 50);
        assert_eq!(uploader.tracked_segments(), 50);

        // Still on disk: kept, and not uploaded again.
        assert_eq!(uploader.run_cycle().await.unwrap().uploaded, 0);
        assert_eq!(uploader.tracked_segments(), 50);

        for i in 0..50 {
            std::fs::remove_file(dir.path().join(format!("segment_{i:03}.ts"))).unwrap();
        }
        uploader.run_cycle().await.unwrap();
        assert_eq!(uploader.tracked_segments(), 0);
        assert_eq!(storage.uploads().len(), 50);
    }

    #[tokio::test]
    async fn failed_uploads_are_retried_next_cycle() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "segment_000.ts", "aaaa");

        let storage = Arc::new(RecordingSegmentStorage::default());
        *storage.fail.lock().unwrap() = true;
        let mut uploader = uploader(dir.path(), storage.clone());

        let report = uploader.run_cycle().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(uploader.tracked_segments(), 0);

        *storage.fail.lock().unwrap() = false;
        assert_eq!(uploader.run_cycle().await.unwrap().uploaded, 1);
    }

    #[tokio::test]
    async fn prunes_old_uploaded_segments_keeping_most_recent() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..5 {
            write(dir.path(), &format!("segment_{i:03}.ts"), "data");
        }

        let storage = Arc::new(RecordingSegmentStorage::default());
        let mut uploader = SegmentUploader::new(
            "s1".to_string(),
            dir.path().to_path_buf(),
            storage,
            UploadSettings {
                interval: Duration::from_millis(20),
                prune_every_cycles: 1,
                retain_segments: 2,
                tracker_ttl: Duration::from_secs(600),
            },
        );

        let report = uploader.run_cycle().await.unwrap();
        assert_eq!(report.uploaded, 5);
        assert_eq!(report.pruned, 3);

        let remaining = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(remaining, 2);
    }

    #[tokio::test]
    async fn never_prunes_segments_that_were_not_uploaded() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..4 {
            write(dir.path(), &format!("segment_{i:03}.ts"), "data");
        }

        let storage = Arc::new(RecordingSegmentStorage::default());
        *storage.fail.lock().unwrap() = true;
        let mut uploader = SegmentUploader::new(
            "s1".to_string(),
            dir.path().to_path_buf(),
            storage,
            UploadSettings {
                interval: Duration::from_millis(20),
                prune_every_cycles: 1,
                retain_segments: 1,
                tracker_ttl: Duration::from_secs(600),
            },
        );

        assert_eq!(uploader.run_cycle().await.unwrap().pruned, 0);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 4);
    }

    #[tokio::test]
    async fn cancellation_triggers_final_flush_of_everything() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "segment_000.ts", "aaaa");
        write(dir.path(), "stream.m3u8", "#EXTM3U\nsegment_000.ts\n");

        let storage = Arc::new(RecordingSegmentStorage::default());
        let mut uploader = uploader(dir.path(), storage.clone());
        uploader.run_cycle().await.unwrap();

        let tracker = TaskTracker::new();
        let handle = uploader.spawn(&tracker);
        handle.cancel.cancel();
        handle.join.await.unwrap();

        // first cycle (2) + unconditional flush (2)
        assert_eq!(storage.uploads().len(), 4);
    }
}
