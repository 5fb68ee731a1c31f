use std::{path::PathBuf, str::FromStr};

use anyhow::{Context, Result, bail};
use crates::infra::db::postgres::postgres_connection::database_url_from_parts;

use super::config_model::{
    Database, DotEnvyConfig, Fetch, Media, ObjectStorage, Queue, WorkerPool,
};

const DEFAULT_FALLBACK_ROOTS: &str = "/shared/hls,/app/hls,/tmp/stream-hls,/hls";

pub fn load() -> Result<DotEnvyConfig> {
    dotenvy::dotenv().ok();

    let database = Database {
        url: database_url()?,
    };

    let storage = ObjectStorage {
        endpoint: env_string_or("MINIO_ENDPOINT", "minio:9000"),
        access_key: env_string_or("MINIO_ACCESS_KEY", "minioadmin"),
        secret_key: env_string_or("MINIO_SECRET_KEY", "minioadmin123"),
        use_ssl: env_bool_or("MINIO_USE_SSL", false)?,
        region: env_string_or("MINIO_REGION", "us-east-1"),
        segments_bucket: env_string_or("MINIO_BUCKET", "hls-streams"),
        recordings_bucket: env_string_or("RECORDINGS_BUCKET", "recordings"),
        public_recordings_prefix: env_string_or("PUBLIC_RECORDINGS_PREFIX", "/recordings"),
    };

    let pool = WorkerPool {
        worker_count: env_or("WORKER_COUNT", 3)?,
        queue_capacity: env_or("WORKER_QUEUE_CAPACITY", 100)?,
        work_dir: std::env::var("WORK_DIR")
            .ok()
            .filter(|dir| !dir.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::temp_dir().join("recording-worker")),
    };
    if pool.worker_count == 0 {
        bail!("WORKER_COUNT must be at least 1");
    }
    if pool.queue_capacity == 0 {
        bail!("WORKER_QUEUE_CAPACITY must be at least 1");
    }

    let queue = Queue {
        consumer_group: env_string_or("CONSUMER_GROUP", "recording-workers"),
        poll_interval_ms: env_or("QUEUE_POLL_INTERVAL_MS", 1000)?,
        stale_lock_secs: env_or("QUEUE_STALE_LOCK_SECS", 300)?,
    };

    let fetch = Fetch {
        max_attempts: env_or("FETCH_MAX_ATTEMPTS", 4)?,
        backoff_secs: env_or("FETCH_BACKOFF_SECS", 2)?,
        fallback_roots: parse_roots(&env_string_or("FALLBACK_SEGMENT_ROOTS", DEFAULT_FALLBACK_ROOTS)),
    };

    let media = Media {
        ffmpeg_bin: env_string_or("FFMPEG_BIN", "ffmpeg"),
        ffprobe_bin: env_string_or("FFPROBE_BIN", "ffprobe"),
    };

    Ok(DotEnvyConfig {
        database,
        storage,
        pool,
        queue,
        fetch,
        media,
    })
}

fn database_url() -> Result<String> {
    if let Ok(url) = std::env::var("DATABASE_URL") {
        if !url.trim().is_empty() {
            return Ok(url);
        }
    }

    Ok(database_url_from_parts(
        &env_string_or("DB_HOST", "postgres"),
        env_or("DB_PORT", 5432)?,
        &env_string_or("DB_USER", "postgres"),
        &env_string_or("DB_PASSWORD", "example"),
        &env_string_or("DB_NAME", "appdb"),
    ))
}

fn parse_roots(raw: &str) -> Vec<PathBuf> {
    raw.split(',')
        .map(str::trim)
        .filter(|root| !root.is_empty())
        .map(PathBuf::from)
        .collect()
}

fn env_string_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} is invalid")),
        _ => Ok(default),
    }
}

fn env_bool_or(key: &str, default: bool) -> Result<bool> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => bail!("{key} is invalid"),
        },
        _ => Ok(default),
    }
}
