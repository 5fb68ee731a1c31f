use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use tokio::fs;
use tracing::{debug, info};

use crate::domain::{
    repositories::storage::SegmentStorage,
    value_objects::storage::{SegmentObject, is_media_name},
};

use super::s3::{
    S3Config, StorageUploadError, build_s3_client, content_type_for, ensure_bucket,
    ensure_public_read, map_sdk_error,
};

#[derive(Debug, Clone)]
pub struct SegmentStorageConfig {
    pub s3: S3Config,
    pub bucket: String,
}

/// S3-compatible bucket holding live segments as `<stream_id>/<file>`.
pub struct S3SegmentStorage {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3SegmentStorage {
    pub async fn new(config: SegmentStorageConfig) -> Result<Self> {
        let client = build_s3_client(&config.s3)
            .await
            .context("failed to build segment storage client")?;

        ensure_bucket(&client, &config.bucket).await?;
        ensure_public_read(&client, &config.bucket).await;
        info!(bucket = %config.bucket, "segment storage ready");

        Ok(Self {
            client,
            bucket: config.bucket,
        })
    }
}

pub fn segment_object_key(stream_id: &str, file_name: &str) -> String {
    format!("{stream_id}/{file_name}")
}

#[async_trait]
impl SegmentStorage for S3SegmentStorage {
    async fn upload_segment(&self, stream_id: String, local_path: PathBuf) -> Result<()> {
        let file_name = local_path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                StorageUploadError::non_retryable(format!(
                    "segment path has no file name: {}",
                    local_path.display()
                ))
            })?;

        let metadata = fs::metadata(&local_path)
            .await
            .with_context(|| format!("failed to stat {}", local_path.display()))?;
        if metadata.len() == 0 {
            return Err(StorageUploadError::non_retryable(format!(
                "refusing to upload empty file {}",
                local_path.display()
            )));
        }

        let object_key = segment_object_key(&stream_id, file_name);
        let body = ByteStream::from_path(&local_path).await.map_err(|err| {
            StorageUploadError::non_retryable_with_source(
                format!("failed to open segment file {}", local_path.display()),
                err.into(),
            )
        })?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .body(body)
            .content_type(content_type_for(&local_path))
            .send()
            .await
            .map_err(|err| map_sdk_error(err, "put_object", &self.bucket, &object_key))?;

        debug!(
            stream_id = %stream_id,
            bucket = %self.bucket,
            key = %object_key,
            size_bytes = metadata.len(),
            "segment uploaded"
        );
        Ok(())
    }

    async fn list_segments(&self, stream_id: String) -> Result<Vec<SegmentObject>> {
        let prefix = format!("{stream_id}/");
        let mut objects = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let output = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&prefix)
                .set_continuation_token(continuation_token.take())
                .send()
                .await
                .map_err(|err| map_sdk_error(err, "list_objects_v2", &self.bucket, &prefix))?;

            for object in output.contents() {
                let Some(key) = object.key() else { continue };
                let file_name = key.strip_prefix(&prefix).unwrap_or(key);
                if file_name.contains('/') || !is_media_name(file_name) {
                    continue;
                }
                objects.push(SegmentObject {
                    key: key.to_string(),
                    file_name: file_name.to_string(),
                    size_bytes: object.size().unwrap_or_default(),
                });
            }

            match (output.is_truncated(), output.next_continuation_token()) {
                (Some(true), Some(token)) => continuation_token = Some(token.to_string()),
                _ => break,
            }
        }

        Ok(objects)
    }

    async fn download_segment(&self, key: String, destination: PathBuf) -> Result<u64> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|err| map_sdk_error(err, "get_object", &self.bucket, &key))?;

        let bytes = output
            .body
            .collect()
            .await
            .with_context(|| format!("failed to read object body {}/{}", self.bucket, key))?
            .into_bytes();

        fs::write(&destination, &bytes)
            .await
            .with_context(|| format!("failed to write {}", destination.display()))?;

        Ok(bytes.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_grouped_by_stream() {
        assert_eq!(segment_object_key("s1", "segment_004.ts"), "s1/segment_004.ts");
    }
}
