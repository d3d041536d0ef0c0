//! Worker process bootstrap
//!
//! One worker owns a disjoint subset of games, reachable under its /w{n}
//! path prefix on its own port. All simulation runs inside the GameManager
//! task; the HTTP/WS layer only passes messages to it.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::app::AppState;
use crate::config::Config;
use crate::game::GameManager;
use crate::http::build_worker_router;
use crate::util::hash::worker_path;

/// Run one worker until shutdown.
pub async fn run(config: Arc<Config>, worker_id: usize) -> anyhow::Result<()> {
    let port = config.worker_port(worker_id);
    info!(worker_id, port, "starting worker");

    let (manager, handle) = GameManager::new();
    tokio::spawn(manager.run());

    let state = AppState::new(config.clone(), worker_id, handle);
    let router = axum::Router::new().nest(&worker_path(worker_id), build_worker_router(state));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(worker_id, "worker listening on {}", addr);

    // Readiness handshake: tell the master we're up, retrying until it
    // answers (it may still be forking the rest of the pool).
    tokio::spawn(notify_ready(config.clone(), worker_id));

    axum::serve(listener, router)
        .with_graceful_shutdown(crate::shutdown_signal())
        .await?;

    info!(worker_id, "worker shutdown complete");
    Ok(())
}

async fn notify_ready(config: Arc<Config>, worker_id: usize) {
    let url = format!("{}/api/worker/ready/{}", config.master_url(), worker_id);
    let client = reqwest::Client::new();
    for attempt in 1..=60u32 {
        let result = client
            .post(&url)
            .header(
                crate::http::middleware::ADMIN_TOKEN_HEADER,
                config.admin_token.clone(),
            )
            .send()
            .await;
        match result {
            Ok(resp) if resp.status().is_success() => {
                info!(worker_id, "readiness reported to master");
                return;
            }
            Ok(resp) => {
                warn!(worker_id, attempt, status = %resp.status(), "readiness rejected")
            }
            Err(e) => warn!(worker_id, attempt, error = %e, "readiness call failed"),
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    warn!(worker_id, "giving up on readiness handshake");
}
