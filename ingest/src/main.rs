use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Result;
use crates::infra::{
    db::{postgres::postgres_connection, repositories::task_queue::TaskQueuePostgres},
    storages::{
        s3::S3Config,
        segment_storage::{S3SegmentStorage, SegmentStorageConfig},
    },
    task_service::HttpTaskServiceClient,
};
use ingest::{
    axum_http::{http_serve, routers::IngestState},
    config::config_loader,
    ports::PortAllocator,
    registry::StreamRegistry,
    segment_upload::UploadSettings,
    status_dispatch,
    supervisor::{IngestSupervisor, command::FfmpegHlsCommand},
    usecases::{
        cleanup::CleanupUseCase,
        recovery::{RecoverySettings, RecoveryUseCase},
        stream_lifecycle::{LifecycleSettings, StreamLifecycle},
    },
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{error, info, warn};

const STATUS_CHANNEL_CAPACITY: usize = 256;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        error!("Ingest exited with error: {}", error);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    dotenvy::dotenv().ok();
    crates::observability::init_observability("ingest")?;

    let dotenvy_env = Arc::new(config_loader::load()?);
    info!("ENV has been loaded");

    let postgres_pool = postgres_connection::establish_connection(&dotenvy_env.database.url)?;
    info!("Postgres connection has been established");
    let producer = Arc::new(TaskQueuePostgres::new(Arc::new(postgres_pool)));

    let task_service = Arc::new(HttpTaskServiceClient::new(
        &dotenvy_env.task_service.url,
        Duration::from_secs(dotenvy_env.task_service.timeout_secs),
    )?);

    let storage = &dotenvy_env.storage;
    let segment_storage = Arc::new(
        S3SegmentStorage::new(SegmentStorageConfig {
            s3: S3Config::new(
                &storage.endpoint,
                storage.use_ssl,
                storage.region.clone(),
                storage.access_key.clone(),
                storage.secret_key.clone(),
            ),
            bucket: storage.bucket.clone(),
        })
        .await?,
    );

    let transcoder = &dotenvy_env.transcoder;
    let hls_root = PathBuf::from(&transcoder.hls_root);
    tokio::fs::create_dir_all(&hls_root).await?;

    let (status_sender, status_rx) = status_dispatch::channel(STATUS_CHANNEL_CAPACITY);
    let registry = Arc::new(StreamRegistry::new());
    let ports = Arc::new(PortAllocator::new(
        transcoder.port_range_start,
        transcoder.port_range_end,
    )?);
    let supervisor = Arc::new(IngestSupervisor::new(
        Arc::new(FfmpegHlsCommand::new(transcoder.ffmpeg_bin.clone())),
        Duration::from_millis(transcoder.restart_delay_ms),
        status_sender.clone(),
    ));

    let dispatcher_shutdown = CancellationToken::new();
    let dispatcher = tokio::spawn(status_dispatch::run(
        status_rx,
        Arc::clone(&registry),
        task_service.clone(),
        dispatcher_shutdown.clone(),
    ));

    let upload = &dotenvy_env.upload;
    let lifecycle = Arc::new(StreamLifecycle::new(
        Arc::clone(&registry),
        ports,
        supervisor,
        segment_storage,
        producer,
        task_service,
        status_sender,
        TaskTracker::new(),
        LifecycleSettings {
            listen_host: transcoder.listen_host.clone(),
            hls_root: hls_root.clone(),
            upload: UploadSettings {
                interval: Duration::from_secs(upload.interval_secs),
                prune_every_cycles: upload.prune_every_cycles,
                retain_segments: upload.local_retention,
                tracker_ttl: Duration::from_secs(upload.tracker_ttl_secs),
            },
            default_duration_secs: dotenvy_env.recording.default_duration_secs,
            publish_timeout: Duration::from_secs(dotenvy_env.recording.publish_timeout_secs),
        },
    ));

    let recovery_config = &dotenvy_env.recovery;
    let recovery = Arc::new(RecoveryUseCase::new(
        Arc::clone(&lifecycle),
        RecoverySettings {
            max_attempts: recovery_config.max_attempts,
            retry_delay: Duration::from_secs(recovery_config.retry_delay_secs),
            pause: Duration::from_millis(recovery_config.pause_ms),
        },
    ));
    let cleanup = Arc::new(CleanupUseCase::new(registry, hls_root));

    let shutdown = CancellationToken::new();

    let startup_recovery = Arc::clone(&recovery);
    let start_delay = Duration::from_secs(recovery_config.start_delay_secs);
    let recovery_shutdown = shutdown.clone();
    lifecycle.tracker().spawn(async move {
        tokio::select! {
            _ = recovery_shutdown.cancelled() => {}
            _ = async {
                tokio::time::sleep(start_delay).await;
                if let Err(err) = startup_recovery.recover().await {
                    warn!(error = %err, "startup recovery skipped");
                }
            } => {}
        }
    });

    let state = Arc::new(IngestState {
        lifecycle: Arc::clone(&lifecycle),
        recovery,
    });

    let served = http_serve::start(Arc::clone(&dotenvy_env), state, cleanup, shutdown.clone()).await;
    shutdown.cancel();

    info!("Shutting down streams");
    lifecycle.shutdown().await;

    dispatcher_shutdown.cancel();
    if let Err(err) = dispatcher.await {
        error!(error = %err, "status dispatcher panicked");
    }

    served
}
