use std::str::FromStr;

use anyhow::{Context, Result, bail};
use crates::infra::db::postgres::postgres_connection::database_url_from_parts;

use super::config_model::{
    Cleanup, Database, DotEnvyConfig, IngestServer, ObjectStorage, Recording, Recovery,
    TaskService, Transcoder, Upload,
};

pub fn load() -> Result<DotEnvyConfig> {
    dotenvy::dotenv().ok();

    let server = IngestServer {
        port: env_or("SERVER_PORT", 9090)?,
        body_limit: env_or("SERVER_BODY_LIMIT", 10)?,
        timeout: env_or("SERVER_TIMEOUT", 30)?,
    };

    let database = Database {
        url: database_url()?,
    };

    let storage = ObjectStorage {
        endpoint: env_string_or("MINIO_ENDPOINT", "minio:9000"),
        access_key: env_string_or("MINIO_ACCESS_KEY", "minioadmin"),
        secret_key: env_string_or("MINIO_SECRET_KEY", "minioadmin123"),
        use_ssl: env_bool_or("MINIO_USE_SSL", false)?,
        region: env_string_or("MINIO_REGION", "us-east-1"),
        bucket: env_string_or("MINIO_BUCKET", "hls-streams"),
    };

    let task_service = TaskService {
        url: env_string_or("TASK_SERVICE_URL", "http://main-app:8080"),
        timeout_secs: env_or("TASK_SERVICE_TIMEOUT_SECS", 5)?,
    };

    let transcoder = Transcoder {
        port_range_start: env_or("PORT_RANGE_START", 10000)?,
        port_range_end: env_or("PORT_RANGE_END", 10100)?,
        listen_host: env_string_or("INGEST_LISTEN_HOST", "0.0.0.0"),
        hls_root: env_string_or("HLS_ROOT", "hls"),
        ffmpeg_bin: env_string_or("FFMPEG_BIN", "ffmpeg"),
        restart_delay_ms: env_or("TRANSCODER_RESTART_DELAY_MS", 2000)?,
    };
    if transcoder.port_range_start > transcoder.port_range_end {
        bail!(
            "PORT_RANGE_START ({}) must not exceed PORT_RANGE_END ({})",
            transcoder.port_range_start,
            transcoder.port_range_end
        );
    }

    let upload = Upload {
        interval_secs: env_or("UPLOAD_INTERVAL_SECS", 5)?,
        prune_every_cycles: env_or("UPLOAD_PRUNE_EVERY_CYCLES", 10)?,
        local_retention: env_or("LOCAL_SEGMENT_RETENTION", 8)?,
        tracker_ttl_secs: env_or("UPLOAD_TRACKER_TTL_SECS", 600)?,
    };

    let recording = Recording {
        default_duration_secs: env_or("DEFAULT_DURATION_SECS", 60)?,
        publish_timeout_secs: env_or("QUEUE_PUBLISH_TIMEOUT_SECS", 10)?,
    };

    let recovery = Recovery {
        max_attempts: env_or("RECOVERY_MAX_ATTEMPTS", 30)?,
        retry_delay_secs: env_or("RECOVERY_RETRY_DELAY_SECS", 2)?,
        start_delay_secs: env_or("RECOVERY_START_DELAY_SECS", 2)?,
        pause_ms: env_or("RECOVERY_PAUSE_MS", 500)?,
    };

    let cleanup = Cleanup {
        token: std::env::var("INTERNAL_CLEANUP_TOKEN")
            .ok()
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty()),
    };

    Ok(DotEnvyConfig {
        server,
        database,
        storage,
        task_service,
        transcoder,
        upload,
        recording,
        recovery,
        cleanup,
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
        Ok(raw) if !raw.trim().is_empty() => parse_bool(&raw).with_context(|| format!("{key} is invalid")),
        _ => Ok(default),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bool_spellings() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool(" off "), Some(false));
        assert_eq!(parse_bool("sometimes"), None);
    }

    #[test]
    fn missing_numeric_values_use_defaults() {
        let value: u16 = env_or("INGEST_TEST_UNSET_KEY_FOR_DEFAULTS", 9090).unwrap();
        assert_eq!(value, 9090);
    }
}
