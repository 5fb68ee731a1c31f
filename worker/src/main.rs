use std::{sync::Arc, time::Duration};

use anyhow::Result;
use crates::domain::value_objects::recording_task::RECORDING_TASKS_TOPIC;
use crates::infra::{
    db::{
        postgres::postgres_connection,
        repositories::{recordings::RecordingPostgres, task_queue::TaskQueuePostgres},
    },
    storages::{
        s3::S3Config,
        segment_storage::{S3SegmentStorage, SegmentStorageConfig},
        vod_storage::{S3VodStorage, VodStorageConfig},
    },
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;
use worker::{
    config::config_loader,
    converter::{Converter, toolkit::FfmpegToolkit},
    segment_fetch::{FetchSettings, SegmentFetchService},
    task_consumer::{ConsumerSettings, TaskConsumer},
    usecases::recording_processor::RecordingProcessor,
    worker_pool::{self, WorkerPool},
};

const REQUEUE_DELAY_SECS: i64 = 5;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        error!("Worker exited with error: {}", error);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    dotenvy::dotenv().ok();
    crates::observability::init_observability("worker")?;

    let dotenvy_env = config_loader::load()?;
    info!("ENV has been loaded");

    let postgres_pool = Arc::new(postgres_connection::establish_connection(
        &dotenvy_env.database.url,
    )?);
    info!("Postgres connection has been established");

    let recording_repository = Arc::new(RecordingPostgres::new(Arc::clone(&postgres_pool)));
    let task_queue = Arc::new(TaskQueuePostgres::new(Arc::clone(&postgres_pool)));

    let storage = &dotenvy_env.storage;
    let s3 = S3Config::new(
        &storage.endpoint,
        storage.use_ssl,
        storage.region.clone(),
        storage.access_key.clone(),
        storage.secret_key.clone(),
    );
    let segment_storage = Arc::new(
        S3SegmentStorage::new(SegmentStorageConfig {
            s3: s3.clone(),
            bucket: storage.segments_bucket.clone(),
        })
        .await?,
    );
    let vod_storage = Arc::new(
        S3VodStorage::new(VodStorageConfig {
            s3,
            bucket: storage.recordings_bucket.clone(),
            public_prefix: storage.public_recordings_prefix.clone(),
        })
        .await?,
    );

    let pool_config = &dotenvy_env.pool;
    tokio::fs::create_dir_all(&pool_config.work_dir).await?;

    let fetch = &dotenvy_env.fetch;
    let processor = Arc::new(RecordingProcessor::new(
        recording_repository,
        SegmentFetchService::new(
            segment_storage,
            FetchSettings {
                max_attempts: fetch.max_attempts,
                backoff: Duration::from_secs(fetch.backoff_secs),
                fallback_roots: fetch.fallback_roots.clone(),
            },
        ),
        Converter::new(Arc::new(FfmpegToolkit::new(
            dotenvy_env.media.ffmpeg_bin.clone(),
            dotenvy_env.media.ffprobe_bin.clone(),
        ))),
        vod_storage,
        pool_config.work_dir.clone(),
    ));

    let (sender, receiver) = worker_pool::channel(pool_config.queue_capacity);
    let pool = WorkerPool::spawn(pool_config.worker_count, receiver, processor);

    let queue_config = &dotenvy_env.queue;
    let consumer = TaskConsumer::new(
        task_queue,
        sender,
        ConsumerSettings {
            topic: RECORDING_TASKS_TOPIC.to_string(),
            consumer_id: format!("{}-{}", queue_config.consumer_group, Uuid::new_v4()),
            poll_interval: Duration::from_millis(queue_config.poll_interval_ms),
            stale_lock_secs: queue_config.stale_lock_secs,
            requeue_delay_secs: REQUEUE_DELAY_SECS,
        },
    );

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_token.cancel();
    });

    info!("Worker started");
    consumer.run(shutdown).await;

    info!("Waiting for in-flight recordings");
    pool.join().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C signal handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("Failed to install SIGTERM signal handler");
        sigterm.recv().await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received ctrl+C signal"),
        _ = terminate => info!("Received terminate signal"),
    }
}
