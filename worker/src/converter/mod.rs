pub mod toolkit;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tracing::{info, warn};

use toolkit::MediaToolkit;

pub const VIDEO_FILE_NAME: &str = "video.mp4";
pub const THUMBNAIL_FILE_NAME: &str = "thumbnail.jpg";
const SUSPICIOUS_OUTPUT_BYTES: u64 = 1024;
const DEFAULT_DURATION_SECS: u64 = 30;
const SHORT_VIDEO_SECS: u64 = 10;
const SHORT_VIDEO_SEEK_SECS: u64 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistSummary {
    pub segments: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ConversionOutput {
    pub video_path: PathBuf,
    /// Always exists; zero bytes when no frame could be extracted.
    pub thumbnail_path: PathBuf,
    pub file_size_bytes: u64,
    pub duration_secs: u64,
}

/// Turns a fetched segment directory into one archival file plus thumbnail.
pub struct Converter<M>
where
    M: MediaToolkit + Send + Sync + 'static,
{
    toolkit: Arc<M>,
}

impl<M> Converter<M>
where
    M: MediaToolkit + Send + Sync + 'static,
{
    pub fn new(toolkit: Arc<M>) -> Self {
        Self { toolkit }
    }

    pub async fn convert(&self, playlist: &Path, output_dir: &Path) -> Result<ConversionOutput> {
        let summary = validate_playlist(playlist).await?;
        info!(
            playlist = %playlist.display(),
            segments = summary.segments.len(),
            "converter: playlist validated"
        );

        let video_path = output_dir.join(VIDEO_FILE_NAME);
        self.toolkit
            .transcode(playlist.to_path_buf(), video_path.clone())
            .await
            .context("conversion failed")?;

        let file_size_bytes = match tokio::fs::metadata(&video_path).await {
            Ok(meta) => meta.len(),
            Err(_) => bail!("converter produced no output at {}", video_path.display()),
        };
        if file_size_bytes == 0 {
            bail!("converter output {} is empty", video_path.display());
        }
        if file_size_bytes < SUSPICIOUS_OUTPUT_BYTES {
            warn!(path = %video_path.display(), file_size_bytes, "converter: output is very small");
        }

        let report = self
            .toolkit
            .probe(video_path.clone())
            .await
            .context("output probe failed")?;
        if report.streams.is_empty() {
            bail!("converter output {} has no media streams", video_path.display());
        }
        let duration_secs = report.duration_secs().unwrap_or(DEFAULT_DURATION_SECS);

        let thumbnail_path = output_dir.join(THUMBNAIL_FILE_NAME);
        self.write_thumbnail(&video_path, &thumbnail_path, duration_secs).await?;

        info!(
            path = %video_path.display(),
            file_size_bytes,
            duration_secs,
            "converter: output validated"
        );
        Ok(ConversionOutput {
            video_path,
            thumbnail_path,
            file_size_bytes,
            duration_secs,
        })
    }

    async fn write_thumbnail(&self, video: &Path, thumbnail: &Path, duration_secs: u64) -> Result<()> {
        let seek_secs = thumbnail_seek_secs(duration_secs);
        let generated = self
            .toolkit
            .thumbnail(video.to_path_buf(), thumbnail.to_path_buf(), seek_secs)
            .await;
        let exists = tokio::fs::try_exists(thumbnail).await.unwrap_or(false);
        match generated {
            Ok(()) if exists => Ok(()),
            Ok(()) => {
                warn!(path = %thumbnail.display(), "converter: thumbnail missing, writing placeholder");
                write_placeholder(thumbnail).await
            }
            Err(err) => {
                warn!(path = %thumbnail.display(), error = %err, "converter: thumbnail failed, writing placeholder");
                write_placeholder(thumbnail).await
            }
        }
    }
}

pub fn thumbnail_seek_secs(duration_secs: u64) -> u64 {
    if duration_secs > SHORT_VIDEO_SECS {
        duration_secs / 2
    } else {
        SHORT_VIDEO_SEEK_SECS
    }
}

async fn write_placeholder(path: &Path) -> Result<()> {
    tokio::fs::write(path, b"")
        .await
        .with_context(|| format!("failed to write placeholder {}", path.display()))
}

/// Requires the `#EXTM3U` header, at least one segment, and every
/// referenced segment present and non-empty next to the playlist.
pub async fn validate_playlist(playlist: &Path) -> Result<PlaylistSummary> {
    let content = tokio::fs::read_to_string(playlist)
        .await
        .with_context(|| format!("cannot read playlist {}", playlist.display()))?;

    if !content.trim_start().starts_with("#EXTM3U") {
        bail!("invalid playlist {}: missing #EXTM3U header", playlist.display());
    }

    let segments: Vec<String> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect();
    if segments.is_empty() {
        bail!("playlist {} references no segments", playlist.display());
    }

    let dir = playlist.parent().unwrap_or_else(|| Path::new("."));
    for segment in &segments {
        if segment.contains("..") || Path::new(segment).is_absolute() {
            bail!("playlist references a segment outside its directory: {segment}");
        }
        let path = dir.join(segment);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() && meta.len() > 0 => {}
            Ok(_) => bail!("segment {segment} is empty"),
            Err(_) => bail!("segment {segment} is missing"),
        }
    }

    Ok(PlaylistSummary { segments })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use toolkit::{MockMediaToolkit, ProbeFormat, ProbeReport, ProbeStream};

    pub(crate) fn write_hls(dir: &Path) -> PathBuf {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(dir.join("segment_000.ts"), b"seg0").unwrap();
        std::fs::write(dir.join("segment_001.ts"), b"seg1").unwrap();
        let playlist = dir.join("stream.m3u8");
        std::fs::write(
            &playlist,
            "#EXTM3U\n#EXT-X-TARGETDURATION:4\n#EXTINF:4.0,\nsegment_000.ts\n#EXTINF:4.0,\nsegment_001.ts\n#EXT-X-ENDLIST\n",
        )
        .unwrap();
        playlist
    }

    pub(crate) fn probe_with_duration(duration: &str) -> ProbeReport {
        ProbeReport {
            streams: vec![ProbeStream {
                codec_type: Some("video".to_string()),
                duration: None,
            }],
            format: Some(ProbeFormat {
                duration: Some(duration.to_string()),
            }),
        }
    }

    #[tokio::test]
    async fn playlist_validation_is_strict() {
        let dir = tempfile::tempdir().unwrap();
        let playlist = write_hls(dir.path());
        let summary = validate_playlist(&playlist).await.unwrap();
        assert_eq!(summary.segments, vec!["segment_000.ts", "segment_001.ts"]);

        std::fs::write(dir.path().join("segment_001.ts"), b"").unwrap();
        assert!(validate_playlist(&playlist).await.is_err());

        std::fs::remove_file(dir.path().join("segment_001.ts")).unwrap();
        assert!(validate_playlist(&playlist).await.is_err());

        std::fs::write(&playlist, "segment_000.ts\n").unwrap();
        assert!(validate_playlist(&playlist).await.is_err());

        std::fs::write(&playlist, "#EXTM3U\n#EXT-X-ENDLIST\n").unwrap();
        assert!(validate_playlist(&playlist).await.is_err());
    }

    #[test]
    fn thumbnail_seek_depends_on_duration() {
        assert_eq!(thumbnail_seek_secs(754), 377);
        assert_eq!(thumbnail_seek_secs(10), 2);
        assert_eq!(thumbnail_seek_secs(0), 2);
    }

    #[tokio::test]
    async fn converts_and_writes_thumbnail() {
        let dir = tempfile::tempdir().unwrap();
        let playlist = write_hls(&dir.path().join("hls"));

        let mut toolkit = MockMediaToolkit::new();
        toolkit.expect_transcode().times(1).returning(|_, output| {
            Box::pin(async move {
                tokio::fs::write(output, vec![1u8; 2048]).await?;
                Ok::<(), anyhow::Error>(())
            })
        });
        toolkit
            .expect_probe()
            .times(1)
            .returning(|_| Box::pin(async { Ok(probe_with_duration("40.0")) }));
        toolkit
            .expect_thumbnail()
            .withf(|_, _, seek| *seek == 20)
            .times(1)
            .returning(|_, output, _| {
                Box::pin(async move {
                    tokio::fs::write(output, b"jpeg").await?;
                    Ok::<(), anyhow::Error>(())
                })
            });

        let output = Converter::new(Arc::new(toolkit))
            .convert(&playlist, dir.path())
            .await
            .unwrap();

        assert_eq!(output.file_size_bytes, 2048);
        assert_eq!(output.duration_secs, 40);
        assert_eq!(std::fs::read(&output.thumbnail_path).unwrap(), b"jpeg");
    }

    #[tokio::test]
    async fn thumbnail_failure_leaves_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let playlist = write_hls(&dir.path().join("hls"));

        let mut toolkit = MockMediaToolkit::new();
        toolkit.expect_transcode().returning(|_, output| {
            Box::pin(async move {
                tokio::fs::write(output, vec![1u8; 4096]).await?;
                Ok::<(), anyhow::Error>(())
            })
        });
        toolkit
            .expect_probe()
            .returning(|_| Box::pin(async { Ok(probe_with_duration("5")) }));
        toolkit
            .expect_thumbnail()
            .returning(|_, _, _| Box::pin(async { Err(anyhow::anyhow!("no frame")) }));

        let output = Converter::new(Arc::new(toolkit))
            .convert(&playlist, dir.path())
            .await
            .unwrap();

        assert_eq!(std::fs::metadata(&output.thumbnail_path).unwrap().len(), 0);
    }

    #[tokio::test]
    async fn output_without_streams_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let playlist = write_hls(&dir.path().join("hls"));

        let mut toolkit = MockMediaToolkit::new();
        toolkit.expect_transcode().returning(|_, output| {
            Box::pin(async move {
                tokio::fs::write(output, b"garbage").await?;
                Ok::<(), anyhow::Error>(())
            })
        });
        toolkit
            .expect_probe()
            .returning(|_| Box::pin(async { Ok(ProbeReport::default()) }));
        toolkit.expect_thumbnail().times(0);

        let result = Converter::new(Arc::new(toolkit)).convert(&playlist, dir.path()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn invalid_playlist_never_invokes_converter() {
        let dir = tempfile::tempdir().unwrap();
        let playlist = dir.path().join("stream.m3u8");
        std::fs::write(&playlist, "#EXTM3U\nmissing.ts\n").unwrap();

        let mut toolkit = MockMediaToolkit::new();
        toolkit.expect_transcode().times(0);

        let result = Converter::new(Arc::new(toolkit)).convert(&playlist, dir.path()).await;
        assert!(result.is_err());
    }
}
