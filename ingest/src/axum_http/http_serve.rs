use std::{net::SocketAddr, path::Path, sync::Arc, time::Duration};

use anyhow::Result;
use axum::{
    Router,
    http::{
        Method,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
};
use crates::domain::repositories::{
    storage::SegmentStorage, task_queue::TaskQueueProducer, task_service::TaskServiceClient,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    services::ServeDir,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::info;

use crate::{
    axum_http::{
        default_routers,
        routers::{self, IngestState},
    },
    config::config_model::DotEnvyConfig,
    usecases::cleanup::CleanupUseCase,
};

pub struct RouterOptions<'a> {
    pub hls_root: &'a Path,
    pub timeout: Duration,
    pub body_limit_bytes: usize,
    pub cleanup_token: Option<String>,
}

pub fn router<Q, T, S>(
    state: Arc<IngestState<Q, T, S>>,
    cleanup: Arc<CleanupUseCase>,
    options: RouterOptions<'_>,
) -> Router
where
    Q: TaskQueueProducer + Send + Sync + 'static,
    T: TaskServiceClient + Send + Sync + 'static,
    S: SegmentStorage + Send + Sync + 'static,
{
    Router::new()
        .fallback(default_routers::not_found)
        .nest(
            "/stream",
            routers::streams::routes(Arc::clone(&state))
                .merge(routers::cleanup::routes(options.cleanup_token, cleanup)),
        )
        .merge(routers::health::routes(state))
        .nest_service("/hls", ServeDir::new(options.hls_root))
        .layer(TimeoutLayer::new(options.timeout))
        .layer(RequestBodyLimitLayer::new(options.body_limit_bytes))
        .layer(
            CorsLayer::new()
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers([AUTHORIZATION, CONTENT_TYPE])
                .allow_origin(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Serves until a shutdown signal arrives, then cancels `shutdown`.
pub async fn start<Q, T, S>(
    config: Arc<DotEnvyConfig>,
    state: Arc<IngestState<Q, T, S>>,
    cleanup: Arc<CleanupUseCase>,
    shutdown: CancellationToken,
) -> Result<()>
where
    Q: TaskQueueProducer + Send + Sync + 'static,
    T: TaskServiceClient + Send + Sync + 'static,
    S: SegmentStorage + Send + Sync + 'static,
{
    let app = router(
        state,
        cleanup,
        RouterOptions {
            hls_root: Path::new(&config.transcoder.hls_root),
            timeout: Duration::from_secs(config.server.timeout),
            body_limit_bytes: (config.server.body_limit * 1024 * 1024).try_into()?,
            cleanup_token: config.cleanup.token.clone(),
        },
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let listener = TcpListener::bind(addr).await?;
    info!("Ingest HTTP server running on {}", addr);

    let signal_token = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = shutdown_signal() => signal_token.cancel(),
                _ = signal_token.cancelled() => {}
            }
        })
        .await?;

    shutdown.cancel();
    Ok(())
}

pub async fn shutdown_signal() {
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
