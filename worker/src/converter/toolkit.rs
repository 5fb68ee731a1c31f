use std::path::PathBuf;
use std::process::Output;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use mockall::automock;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info};

const LOGGED_STDERR_BYTES: usize = 4096;

/// External media tools used to build and check a recording.
#[async_trait]
#[automock]
pub trait MediaToolkit {
    /// Merges the playlist's segments into one file at `output`.
    async fn transcode(&self, playlist: PathBuf, output: PathBuf) -> Result<()>;
    async fn probe(&self, media: PathBuf) -> Result<ProbeReport>;
    async fn thumbnail(&self, media: PathBuf, output: PathBuf, seek_secs: u64) -> Result<()>;
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct ProbeReport {
    #[serde(default)]
    pub streams: Vec<ProbeStream>,
    #[serde(default)]
    pub format: Option<ProbeFormat>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct ProbeStream {
    #[serde(default)]
    pub codec_type: Option<String>,
    #[serde(default)]
    pub duration: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct ProbeFormat {
    #[serde(default)]
    pub duration: Option<String>,
}

impl ProbeReport {
    pub fn from_json(raw: &[u8]) -> Result<Self> {
        serde_json::from_slice(raw).context("failed to parse probe output")
    }

    /// Container duration, else the first video stream's, in whole seconds.
    pub fn duration_secs(&self) -> Option<u64> {
        let from_format = self
            .format
            .as_ref()
            .and_then(|format| format.duration.as_deref())
            .and_then(parse_seconds);
        from_format.or_else(|| {
            self.streams
                .iter()
                .filter(|stream| stream.codec_type.as_deref() == Some("video"))
                .find_map(|stream| stream.duration.as_deref().and_then(parse_seconds))
        })
    }
}

fn parse_seconds(raw: &str) -> Option<u64> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(|secs| secs as u64)
}

/// ffmpeg/ffprobe on `PATH` (or wherever configured).
#[derive(Debug, Clone)]
pub struct FfmpegToolkit {
    ffmpeg_bin: String,
    ffprobe_bin: String,
}

impl FfmpegToolkit {
    pub fn new(ffmpeg_bin: impl Into<String>, ffprobe_bin: impl Into<String>) -> Self {
        Self {
            ffmpeg_bin: ffmpeg_bin.into(),
            ffprobe_bin: ffprobe_bin.into(),
        }
    }

    #[rustfmt::skip]
    pub fn transcode_args(playlist: &str, output: &str) -> Vec<String> {
        [
            "-loglevel", "info",
            "-i", playlist,
            "-c:v", "libx264",
            "-c:a", "aac",
            "-preset", "fast",
            "-crf", "23",
            "-movflags", "+faststart",
            "-f", "mp4",
            "-y", output,
        ]
        .into_iter()
        .map(str::to_string)
        .collect()
    }

    #[rustfmt::skip]
    pub fn thumbnail_args(media: &str, output: &str, seek_secs: u64) -> Vec<String> {
        let seek = seek_secs.to_string();
        [
            "-i", media,
            "-ss", seek.as_str(),
            "-vframes", "1",
            "-vf", "scale=480:360",
            "-q:v", "2",
            "-y", output,
        ]
        .into_iter()
        .map(str::to_string)
        .collect()
    }

    #[rustfmt::skip]
    pub fn probe_args(media: &str) -> Vec<String> {
        [
            "-v", "quiet",
            "-print_format", "json",
            "-show_format",
            "-show_streams",
            media,
        ]
        .into_iter()
        .map(str::to_string)
        .collect()
    }

    async fn run(&self, program: &str, args: &[String]) -> Result<Output> {
        debug!(program, ?args, "media_toolkit: running");
        let output = Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to run {program}"))?;

        let stderr = tail(&output.stderr);
        if !stderr.is_empty() {
            debug!(program, stderr = %stderr, "media_toolkit: diagnostic output");
        }
        if !output.status.success() {
            bail!("{program} exited with {}: {stderr}", output.status);
        }
        Ok(output)
    }
}

#[async_trait]
impl MediaToolkit for FfmpegToolkit {
    async fn transcode(&self, playlist: PathBuf, output: PathBuf) -> Result<()> {
        let args = Self::transcode_args(&playlist.to_string_lossy(), &output.to_string_lossy());
        self.run(&self.ffmpeg_bin, &args).await?;
        info!(output = %output.display(), "media_toolkit: transcode finished");
        Ok(())
    }

    async fn probe(&self, media: PathBuf) -> Result<ProbeReport> {
        let args = Self::probe_args(&media.to_string_lossy());
        let output = self.run(&self.ffprobe_bin, &args).await?;
        ProbeReport::from_json(&output.stdout)
    }

    async fn thumbnail(&self, media: PathBuf, output: PathBuf, seek_secs: u64) -> Result<()> {
        let args = Self::thumbnail_args(&media.to_string_lossy(), &output.to_string_lossy(), seek_secs);
        self.run(&self.ffmpeg_bin, &args).await?;
        Ok(())
    }
}

fn tail(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    let trimmed = text.trim();
    if trimmed.len() <= LOGGED_STDERR_BYTES {
        return trimmed.to_string();
    }
    let mut start = trimmed.len() - LOGGED_STDERR_BYTES;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    trimmed[start..].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_report_prefers_container_duration() {
        let report = ProbeReport::from_json(
            br#"{"streams":[{"codec_type":"video","duration":"12.5"}],"format":{"duration":"754.2"}}"#,
        )
        .unwrap();
        assert_eq!(report.streams.len(), 1);
        assert_eq!(report.duration_secs(), Some(754));

        let no_format = ProbeReport::from_json(
            br#"{"streams":[{"codec_type":"audio","duration":"3"},{"codec_type":"video","duration":"12.9"}]}"#,
        )
        .unwrap();
        assert_eq!(no_format.duration_secs(), Some(12));
    }

    #[test]
    fn empty_probe_has_no_streams() {
        let report = ProbeReport::from_json(b"{}").unwrap();
        assert!(report.streams.is_empty());
        assert_eq!(report.duration_secs(), None);
    }

    #[test]
    fn transcode_writes_mp4_to_output_last() {
        let args = FfmpegToolkit::transcode_args("in/stream.m3u8", "out/video.mp4");
        assert_eq!(&args[2..4], ["-i", "in/stream.m3u8"]);
        assert!(args.windows(2).any(|pair| pair == ["-movflags", "+faststart"]));
        assert_eq!(args.last().map(String::as_str), Some("out/video.mp4"));
    }

    #[test]
    fn thumbnail_seeks_and_scales() {
        let args = FfmpegToolkit::thumbnail_args("video.mp4", "thumb.jpg", 377);
        assert!(args.windows(2).any(|pair| pair == ["-ss", "377"]));
        assert!(args.windows(2).any(|pair| pair == ["-vf", "scale=480:360"]));
    }

    #[test]
    fn inspection_asks_for_json_with_media_last() {
        let args = FfmpegToolkit::probe_args("video.mp4");
        assert!(args.windows(2).any(|pair| pair == ["-print_format", "json"]));
        assert!(args.contains(&"-show_streams".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("video.mp4"));
    }

    #[test]
    fn long_stderr_is_truncated_to_tail() {
        let long = "x".repeat(LOGGED_STDERR_BYTES + 10);
        assert_eq!(tail(long.as_bytes()).len(), LOGGED_STDERR_BYTES);
    }
}
