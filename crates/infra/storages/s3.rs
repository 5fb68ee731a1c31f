use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use aws_config::{BehaviorVersion, timeout::TimeoutConfig};
use aws_credential_types::Credentials;
use aws_sdk_s3::{
    Client,
    config::{Region, StalledStreamProtectionConfig},
    error::{ProvideErrorMetadata, SdkError},
};
use http::Uri;
use std::error::Error as StdError;
use std::str::FromStr;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct S3Config {
    pub endpoint: String,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    pub force_path_style: bool,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
}

impl S3Config {
    /// `endpoint` may be a bare `host:port` (MinIO style); the scheme then
    /// follows `use_ssl`.
    pub fn new(
        endpoint: &str,
        use_ssl: bool,
        region: String,
        access_key: String,
        secret_key: String,
    ) -> Self {
        let endpoint = if endpoint.contains("://") {
            endpoint.to_string()
        } else if use_ssl {
            format!("https://{endpoint}")
        } else {
            format!("http://{endpoint}")
        };

        Self {
            endpoint,
            region,
            access_key,
            secret_key,
            force_path_style: true,
            connect_timeout_secs: 10,
            read_timeout_secs: 60,
        }
    }
}

#[derive(Debug)]
pub struct StorageUploadError {
    retryable: bool,
    message: String,
    source: Option<anyhow::Error>,
}

impl StorageUploadError {
    pub fn retryable_with_source(message: impl Into<String>, source: anyhow::Error) -> anyhow::Error {
        anyhow::Error::new(Self {
            retryable: true,
            message: message.into(),
            source: Some(source),
        })
    }

    pub fn non_retryable(message: impl Into<String>) -> anyhow::Error {
        anyhow::Error::new(Self {
            retryable: false,
            message: message.into(),
            source: None,
        })
    }

    pub fn non_retryable_with_source(
        message: impl Into<String>,
        source: anyhow::Error,
    ) -> anyhow::Error {
        anyhow::Error::new(Self {
            retryable: false,
            message: message.into(),
            source: Some(source),
        })
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    /// True when `err` carries a retryable `StorageUploadError`.
    pub fn is_retryable_error(err: &anyhow::Error) -> bool {
        err.downcast_ref::<StorageUploadError>()
            .map(StorageUploadError::is_retryable)
            .unwrap_or(false)
    }
}

impl std::fmt::Display for StorageUploadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl StdError for StorageUploadError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source.as_ref().map(|err| err.as_ref())
    }
}

pub fn is_retryable_s3_error<E>(err: &SdkError<E>) -> bool {
    match err {
        SdkError::TimeoutError(_) => true,
        SdkError::DispatchFailure(_) => true,
        SdkError::ResponseError(_) => true,
        SdkError::ServiceError(service_err) => {
            let status = service_err.raw().status().as_u16();
            matches!(status, 408 | 429) || (500..=599).contains(&status)
        }
        SdkError::ConstructionFailure(_) => false,
        _ => false,
    }
}

/// Wraps an SDK failure into a `StorageUploadError` with bucket/key context.
pub fn map_sdk_error<E>(err: SdkError<E>, operation: &str, bucket: &str, key: &str) -> anyhow::Error
where
    E: ProvideErrorMetadata + StdError + Send + Sync + 'static,
{
    let retryable = is_retryable_s3_error(&err);
    let code = err.code().unwrap_or("unknown").to_string();
    let detail = err.message().unwrap_or_default().to_string();
    let message = format!("s3 {operation} failed for {bucket}/{key} (code: {code}) {detail}");
    let source = anyhow::Error::new(err);

    if retryable {
        StorageUploadError::retryable_with_source(message, source)
    } else {
        StorageUploadError::non_retryable_with_source(message, source)
    }
}

pub fn content_type_for(path: &Path) -> String {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .as_deref()
    {
        Some("m3u8") => "application/vnd.apple.mpegurl".to_string(),
        Some("ts") => "video/MP2T".to_string(),
        _ => mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string(),
    }
}

pub async fn build_s3_client(config: &S3Config) -> Result<Client> {
    let endpoint = format!("{}/", config.endpoint.trim_end_matches('/'));
    Uri::from_str(&endpoint).context("invalid s3 endpoint URL")?;

    let credentials = Credentials::new(
        config.access_key.clone(),
        config.secret_key.clone(),
        None,
        None,
        "s3-compatible",
    );

    let region = Region::new(config.region.clone());
    let shared_config = aws_config::defaults(BehaviorVersion::latest())
        .region(region.clone())
        .credentials_provider(credentials)
        .timeout_config(
            TimeoutConfig::builder()
                .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
                .read_timeout(Duration::from_secs(config.read_timeout_secs))
                .build(),
        )
        .load()
        .await;

    let s3_config = aws_sdk_s3::config::Builder::from(&shared_config)
        .endpoint_url(endpoint)
        .force_path_style(config.force_path_style)
        .region(region)
        .stalled_stream_protection(StalledStreamProtectionConfig::disabled())
        .build();

    Ok(Client::from_conf(s3_config))
}

/// Creates `bucket` when it does not exist yet.
pub async fn ensure_bucket(client: &Client, bucket: &str) -> Result<()> {
    if client.head_bucket().bucket(bucket).send().await.is_ok() {
        return Ok(());
    }

    match client.create_bucket().bucket(bucket).send().await {
        Ok(_) => {
            info!(bucket = %bucket, "s3: bucket created");
            Ok(())
        }
        Err(err) => {
            let code = err.code().unwrap_or_default().to_string();
            if code == "BucketAlreadyOwnedByYou" || code == "BucketAlreadyExists" {
                warn!(bucket = %bucket, code = %code, "s3: bucket appeared concurrently");
                return Ok(());
            }
            Err(map_sdk_error(err, "create_bucket", bucket, ""))
        }
    }
}

/// Anonymous read access to every object in `bucket`.
pub fn public_read_policy(bucket: &str) -> String {
    serde_json::json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Principal": { "AWS": ["*"] },
            "Action": ["s3:GetObject"],
            "Resource": [format!("arn:aws:s3:::{bucket}/*")],
        }],
    })
    .to_string()
}

/// Lets players fetch segments straight from the bucket. A rejected policy
/// is logged and ignored: some S3-compatible stores do not support policies.
pub async fn ensure_public_read(client: &Client, bucket: &str) {
    match client
        .put_bucket_policy()
        .bucket(bucket)
        .policy(public_read_policy(bucket))
        .send()
        .await
    {
        Ok(_) => info!(bucket = %bucket, "s3: public read policy applied"),
        Err(err) => {
            let code = err.code().unwrap_or_default().to_string();
            warn!(bucket = %bucket, code = %code, error = %err, "s3: failed to apply public read policy");
        }
    }
}
