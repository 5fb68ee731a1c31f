use serde::{Deserialize, Serialize};

/// Public locations of a published recording.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VodPaths {
    pub video_path: String,
    pub thumbnail_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentObject {
    pub key: String,
    pub file_name: String,
    pub size_bytes: i64,
}

pub const PLAYLIST_FILE_NAME: &str = "stream.m3u8";
pub const PLAYLIST_EXTENSION: &str = "m3u8";
pub const SEGMENT_EXTENSION: &str = "ts";
pub const TEMPORARY_SUFFIX: &str = ".tmp";

pub fn is_playlist_name(name: &str) -> bool {
    has_extension(name, PLAYLIST_EXTENSION)
}

pub fn is_segment_name(name: &str) -> bool {
    has_extension(name, SEGMENT_EXTENSION)
}

/// Segments and playlists, excluding files the transcoder is still writing.
pub fn is_media_name(name: &str) -> bool {
    !name.ends_with(TEMPORARY_SUFFIX) && (is_playlist_name(name) || is_segment_name(name))
}

fn has_extension(name: &str, extension: &str) -> bool {
    name.rsplit_once('.')
        .map(|(stem, ext)| !stem.is_empty() && ext.eq_ignore_ascii_case(extension))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_names() {
        assert!(is_media_name("segment_001.ts"));
        assert!(is_media_name("stream.m3u8"));
        assert!(!is_media_name("stream.m3u8.tmp"));
        assert!(!is_media_name("thumbnail.jpg"));
        assert!(!is_media_name(".ts"));
    }
}
