use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use magetool_pipeline::{Toolkit, Transform};
use magetool_store::ArtifactStore;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use magetool_api::config::ServerConfig;
use magetool_api::engine::Engine;
use magetool_api::notifications::NotificationRouter;
use magetool_api::router::build_app_router;
use magetool_api::{background, state, ws};

use state::AppState;

/// Upper bound on waiting for each background task to stop.
const TASK_STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Configuration ---
    let config = ServerConfig::from_env();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "magetool_api=debug,magetool_worker=debug,magetool_pipeline=debug,tower_http=debug".into()
        }))
        .with(config.log_json.then(|| fmt::layer().json()))
        .with((!config.log_json).then(fmt::layer))
        .init();

    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Media toolkit ---
    let toolkit = Toolkit::new(config.toolkit_config()).expect("Failed to initialise media toolkit");
    let transform: Arc<dyn Transform> = Arc::new(toolkit);
    tracing::info!(scratch = %config.scratch_dir.display(), "Media toolkit ready");

    // --- Job engine ---
    let engine = Engine::start(&config, transform)
        .await
        .expect("Failed to start job engine");
    tracing::info!(
        max_concurrent_jobs = config.max_concurrent_jobs,
        subtask_concurrency = config.subtask_concurrency,
        "Job engine started"
    );

    // --- WebSocket manager ---
    let ws_manager = Arc::new(ws::WsManager::new());

    // Spawn notification router (routes lifecycle events to client sockets).
    let notification_router = NotificationRouter::new(Arc::clone(&ws_manager));
    let router_handle = tokio::spawn(notification_router.run(engine.event_bus.subscribe()));

    // --- Background tasks ---
    let background_cancel = CancellationToken::new();
    let retention_handle = tokio::spawn(background::job_retention::run(
        Arc::clone(&engine.registry),
        config.sweep_interval(),
        background_cancel.clone(),
    ));
    let reaper_handle = tokio::spawn(background::artifact_reaper::run(
        Arc::clone(&engine.store) as Arc<dyn ArtifactStore>,
        config.sweep_interval(),
        background_cancel.clone(),
    ));
    let heartbeat_handle = tokio::spawn(ws::heartbeat::run(
        Arc::clone(&ws_manager),
        ws::heartbeat::HEARTBEAT_INTERVAL,
        background_cancel.clone(),
    ));

    // --- App state ---
    let state = AppState {
        config: Arc::new(config.clone()),
        registry: Arc::clone(&engine.registry),
        store: Arc::clone(&engine.store),
        ws_manager: Arc::clone(&ws_manager),
        event_bus: Arc::clone(&engine.event_bus),
    };

    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    background_cancel.cancel();
    let _ = tokio::time::timeout(TASK_STOP_TIMEOUT, retention_handle).await;
    let _ = tokio::time::timeout(TASK_STOP_TIMEOUT, reaper_handle).await;
    let _ = tokio::time::timeout(TASK_STOP_TIMEOUT, heartbeat_handle).await;
    tracing::info!("Background tasks stopped");

    // Let running jobs finish; anything still queued fails with a
    // shutdown error so its subscribers see a terminal event.
    let drained = engine
        .shutdown(Duration::from_secs(config.shutdown_timeout_secs))
        .await;
    tracing::info!(drained, "Job engine stopped");

    let ws_count = ws_manager.connection_count().await;
    tracing::info!(ws_count, "Closing remaining WebSocket connections");
    ws_manager.shutdown_all().await;

    router_handle.abort();
    tracing::info!("Notification router stopped");

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
