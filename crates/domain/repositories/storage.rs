use anyhow::Result;
use async_trait::async_trait;
use mockall::automock;
use std::path::PathBuf;

use crate::domain::value_objects::storage::{SegmentObject, VodPaths};

/// Live segment bucket, laid out as `<stream_id>/<file_name>`.
#[async_trait]
#[automock]
pub trait SegmentStorage {
    async fn upload_segment(&self, stream_id: String, local_path: PathBuf) -> Result<()>;
    async fn list_segments(&self, stream_id: String) -> Result<Vec<SegmentObject>>;
    /// Writes the object to `destination` and returns the byte count.
    async fn download_segment(&self, key: String, destination: PathBuf) -> Result<u64>;
}

#[async_trait]
#[automock]
pub trait VodStorage {
    /// The thumbnail is best-effort; a failed thumbnail upload yields `None`.
    async fn upload_vod(
        &self,
        stream_id: String,
        video_path: PathBuf,
        thumbnail_path: PathBuf,
    ) -> Result<VodPaths>;
}
