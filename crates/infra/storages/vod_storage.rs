use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use tracing::{info, warn};

use crate::domain::{repositories::storage::VodStorage, value_objects::storage::VodPaths};

use super::s3::{
    S3Config, StorageUploadError, build_s3_client, content_type_for, ensure_bucket, map_sdk_error,
};

const MAX_UPLOAD_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone)]
pub struct VodStorageConfig {
    pub s3: S3Config,
    pub bucket: String,
    /// Prefix of the public URL path, e.g. `/recordings`.
    pub public_prefix: String,
}

pub struct S3VodStorage {
    client: aws_sdk_s3::Client,
    bucket: String,
    public_prefix: String,
}

impl S3VodStorage {
    pub async fn new(config: VodStorageConfig) -> Result<Self> {
        let client = build_s3_client(&config.s3)
            .await
            .context("failed to build vod storage client")?;

        ensure_bucket(&client, &config.bucket).await?;
        info!(bucket = %config.bucket, "vod storage ready");

        Ok(Self {
            client,
            bucket: config.bucket,
            public_prefix: config.public_prefix.trim_end_matches('/').to_string(),
        })
    }

    async fn put_with_retry(&self, path: &Path, object_key: &str) -> Result<()> {
        let mut attempt = 1;
        loop {
            match self.put_file(path, object_key).await {
                Ok(()) => return Ok(()),
                Err(err)
                    if attempt < MAX_UPLOAD_ATTEMPTS
                        && StorageUploadError::is_retryable_error(&err) =>
                {
                    warn!(
                        bucket = %self.bucket,
                        key = %object_key,
                        attempt,
                        error = %err,
                        "vod upload failed, retrying"
                    );
                    tokio::time::sleep(Duration::from_secs(u64::from(attempt))).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn put_file(&self, path: &Path, object_key: &str) -> Result<()> {
        let body = ByteStream::from_path(path).await.map_err(|err| {
            StorageUploadError::non_retryable_with_source(
                format!("failed to open {}", path.display()),
                err.into(),
            )
        })?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(object_key)
            .body(body)
            .content_type(content_type_for(path))
            .send()
            .await
            .map_err(|err| map_sdk_error(err, "put_object", &self.bucket, object_key))?;

        Ok(())
    }
}

pub fn vod_video_key(stream_id: &str, video_path: &Path) -> String {
    let extension = video_path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("mp4");
    format!("vod/{stream_id}/video.{extension}")
}

pub fn vod_thumbnail_key(stream_id: &str) -> String {
    format!("vod/{stream_id}/thumbnail.jpg")
}

#[async_trait]
impl VodStorage for S3VodStorage {
    async fn upload_vod(
        &self,
        stream_id: String,
        video_path: PathBuf,
        thumbnail_path: PathBuf,
    ) -> Result<VodPaths> {
        let video_key = vod_video_key(&stream_id, &video_path);
        self.put_with_retry(&video_path, &video_key).await?;
        info!(stream_id = %stream_id, bucket = %self.bucket, key = %video_key, "vod video uploaded");

        let thumbnail_key = vod_thumbnail_key(&stream_id);
        let thumbnail_path = match self.put_with_retry(&thumbnail_path, &thumbnail_key).await {
            Ok(()) => Some(format!("{}/{}", self.public_prefix, thumbnail_key)),
            Err(err) => {
                warn!(
                    stream_id = %stream_id,
                    key = %thumbnail_key,
                    error = %err,
                    "vod thumbnail upload failed; continuing without thumbnail"
                );
                None
            }
        };

        Ok(VodPaths {
            video_path: format!("{}/{}", self.public_prefix, video_key),
            thumbnail_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vod_keys() {
        assert_eq!(vod_video_key("s1", Path::new("/tmp/x/video.mp4")), "vod/s1/video.mp4");
        assert_eq!(vod_video_key("s1", Path::new("/tmp/x/out")), "vod/s1/video.mp4");
        assert_eq!(vod_thumbnail_key("s1"), "vod/s1/thumbnail.jpg");
    }
}
