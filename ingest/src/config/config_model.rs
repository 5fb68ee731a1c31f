#[derive(Debug, Clone)]
pub struct DotEnvyConfig {
    pub server: IngestServer,
    pub database: Database,
    pub storage: ObjectStorage,
    pub task_service: TaskService,
    pub transcoder: Transcoder,
    pub upload: Upload,
    pub recording: Recording,
    pub recovery: Recovery,
    pub cleanup: Cleanup,
}

#[derive(Debug, Clone)]
pub struct IngestServer {
    pub port: u16,
    /// MiB
    pub body_limit: u64,
    /// Seconds
    pub timeout: u64,
}

#[derive(Debug, Clone)]
pub struct Database {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct ObjectStorage {
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub use_ssl: bool,
    pub region: String,
    pub bucket: String,
}

#[derive(Debug, Clone)]
pub struct TaskService {
    pub url: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct Transcoder {
    pub port_range_start: u16,
    pub port_range_end: u16,
    pub listen_host: String,
    pub hls_root: String,
    pub ffmpeg_bin: String,
    pub restart_delay_ms: u64,
}

#[derive(Debug, Clone)]
pub struct Upload {
    pub interval_secs: u64,
    pub prune_every_cycles: u64,
    pub local_retention: usize,
    pub tracker_ttl_secs: u64,
}

#[derive(Debug, Clone)]
pub struct Recording {
    pub default_duration_secs: i64,
    pub publish_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct Recovery {
    pub max_attempts: u32,
    pub retry_delay_secs: u64,
    pub start_delay_secs: u64,
    pub pause_ms: u64,
}

#[derive(Debug, Clone)]
pub struct Cleanup {
    /// When set, `/stream/cleanup` requires `Authorization: Bearer <token>`.
    pub token: Option<String>,
}
