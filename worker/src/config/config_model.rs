use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct DotEnvyConfig {
    pub database: Database,
    pub storage: ObjectStorage,
    pub pool: WorkerPool,
    pub queue: Queue,
    pub fetch: Fetch,
    pub media: Media,
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
    /// Live segments written by ingest.
    pub segments_bucket: String,
    pub recordings_bucket: String,
    pub public_recordings_prefix: String,
}

#[derive(Debug, Clone)]
pub struct WorkerPool {
    pub worker_count: usize,
    pub queue_capacity: usize,
    pub work_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Queue {
    pub consumer_group: String,
    pub poll_interval_ms: u64,
    pub stale_lock_secs: i64,
}

#[derive(Debug, Clone)]
pub struct Fetch {
    pub max_attempts: u32,
    pub backoff_secs: u64,
    pub fallback_roots: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct Media {
    pub ffmpeg_bin: String,
    pub ffprobe_bin: String,
}
