use std::path::Path;

use tokio::process::Command;

use crates::domain::value_objects::storage::PLAYLIST_FILE_NAME;

/// Builds the transcoder process for one stream.
pub trait TranscoderCommand: Send + Sync {
    fn build(&self, stream_id: &str, listen_address: &str, segment_dir: &Path) -> Command;
}

pub fn srt_listen_address(host: &str, port: u16, stream_id: &str) -> String {
    format!("srt://{host}:{port}?mode=listener&streamid={stream_id}&pkt_size=1316")
}

/// ffmpeg listening on an SRT endpoint and writing an HLS event playlist.
#[derive(Debug, Clone)]
pub struct FfmpegHlsCommand {
    pub ffmpeg_bin: String,
    pub segment_seconds: u32,
}

impl FfmpegHlsCommand {
    pub fn new(ffmpeg_bin: impl Into<String>) -> Self {
        Self {
            ffmpeg_bin: ffmpeg_bin.into(),
            segment_seconds: 4,
        }
    }

    #[rustfmt::skip]
    pub fn args(&self, listen_address: &str, segment_dir: &Path) -> Vec<String> {
        let playlist = segment_dir.join(PLAYLIST_FILE_NAME);
        let segment_pattern = segment_dir.join("segment_%03d.ts");

        let mut args: Vec<String> = [
            "-hide_banner",
            "-loglevel",
            "info",
            "-fflags",
            "+nobuffer+genpts",
            "-analyzeduration",
            "2000000",
            "-probesize",
            "2000000",
            "-timeout",
            "5000000",
            "-i",
        ]
        .iter()
        .map(|arg| arg.to_string())
        .collect();
        args.push(listen_address.to_string());

        args.extend(
            [
                "-c:v", "libx264", "-preset", "faster", "-crf", "23",
                "-maxrate", "5000k", "-bufsize", "6000k", "-pix_fmt", "yuv420p",
                "-g", "60", "-keyint_min", "30", "-sc_threshold", "0", "-r", "30",
                "-c:a", "aac", "-b:a", "128k", "-ar", "48000", "-ac", "2",
                "-f", "hls",
            ]
            .iter()
            .map(|arg| arg.to_string()),
        );
        args.push("-hls_time".to_string());
        args.push(self.segment_seconds.to_string());
        args.extend(
            [
                "-hls_list_size", "0",
                "-hls_flags", "append_list+independent_segments",
                "-hls_playlist_type", "event",
                "-hls_allow_cache", "0",
                "-hls_segment_filename",
            ]
            .iter()
            .map(|arg| arg.to_string()),
        );
        args.push(segment_pattern.to_string_lossy().into_owned());
        args.push(playlist.to_string_lossy().into_owned());
        args
    }
}

impl TranscoderCommand for FfmpegHlsCommand {
    fn build(&self, _stream_id: &str, listen_address: &str, segment_dir: &Path) -> Command {
        let mut command = Command::new(&self.ffmpeg_bin);
        command.args(self.args(listen_address, segment_dir));
        command
    }
}
