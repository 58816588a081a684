//! HTTP server wiring: routes, graceful shutdown and the parent watchdog.

use std::time::Duration;

use axum::Router;
use axum::routing::get;
use slipstream_core::Coordinator;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use crate::handlers::{list_torrents, shutdown, stream_file, torrent_details, video};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// The coordinator all requests operate on.
    pub coordinator: Coordinator,
}

/// Builds the application router.
pub fn router(coordinator: Coordinator) -> Router {
    let state = AppState { coordinator };

    Router::new()
        .route("/", get(list_torrents))
        .route("/files", get(list_torrents))
        .route("/files/{info_hash}", get(torrent_details))
        .route("/files/{info_hash}/{*path}", get(stream_file))
        .route("/video", get(video))
        .route("/shutdown", get(shutdown))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Runs the HTTP server until shutdown.
///
/// Shutdown is driven by the coordinator's token (cancelled by
/// `GET /shutdown`, the parent watchdog, or a signal handler). Once it
/// fires, in-flight requests get the configured drain window; readers
/// blocked on missing pieces observe the same token and abort, so the drain
/// actually converges.
///
/// # Errors
/// Fails when the listen socket cannot be bound or the server errors.
pub async fn run_server(coordinator: Coordinator) -> Result<(), Box<dyn std::error::Error>> {
    let http = coordinator.config().http.clone();
    let shutdown = coordinator.shutdown_token();

    if let Some(pid) = http.parent_pid {
        spawn_parent_watchdog(pid, shutdown.clone());
    }

    let app = router(coordinator);
    let listener = TcpListener::bind(("0.0.0.0", http.port)).await?;
    tracing::info!("http listening on port {}", http.port);

    let graceful = {
        let token = shutdown.clone();
        async move { token.cancelled().await }
    };
    let server = async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(graceful)
            .await
    };

    tokio::select! {
        result = server => result?,
        _ = drain_deadline(shutdown, http.drain_timeout) => {
            tracing::info!("drain window elapsed, closing remaining connections");
        }
    }

    tracing::info!("http server stopped");
    Ok(())
}

/// Resolves one drain window after shutdown is triggered.
async fn drain_deadline(shutdown: CancellationToken, drain: Duration) {
    shutdown.cancelled().await;
    tokio::time::sleep(drain).await;
}

/// Exits the process alongside its parent.
///
/// Polls the parent PID once per second; when it disappears, the shared
/// shutdown token is cancelled and the normal drain takes over.
fn spawn_parent_watchdog(pid: u32, shutdown: CancellationToken) {
    tokio::spawn(async move {
        let pid = sysinfo::Pid::from_u32(pid);
        let mut system = sysinfo::System::new();
        loop {
            if !system.refresh_process(pid) {
                tracing::warn!("parent process {pid} is gone, shutting down");
                shutdown.cancel();
                return;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    });
}
