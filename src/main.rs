//! Territory Server - authoritative sharded game server
//!
//! One binary, two roles. Launched plain, it becomes the master: it forks
//! the worker pool (re-execing itself with WORKER_ID set), supervises it,
//! and serves the cluster control plane. Launched with WORKER_ID, it
//! becomes a worker hosting its shard of games behind /w{n}.

mod app;
mod config;
mod game;
mod http;
mod master;
mod util;
mod worker;
mod ws;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::util::time::init_server_time;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Arc::new(Config::from_env()?);

    // Initialize tracing
    init_tracing(&config.log_level);

    // Initialize server time tracking
    init_server_time();

    match std::env::var("WORKER_ID") {
        Ok(raw) => {
            let worker_id: usize = raw
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid WORKER_ID: {raw}"))?;
            info!("Starting Territory Server worker {}", worker_id);
            worker::run(config, worker_id).await
        }
        Err(_) => {
            info!("Starting Territory Server master");
            master::run(config).await
        }
    }
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// Graceful shutdown signal handler
pub(crate) async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        }
    }
}
