//! Cluster orchestration: the master process
//!
//! Holds no simulation state. Forks and supervises the worker pool,
//! schedules public lobbies onto workers by deterministic game-id routing,
//! and serves the master side of the HTTP control plane.

pub mod lobbies;
pub mod routes;
pub mod supervisor;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use crate::config::Config;
use lobbies::LobbyScheduler;
use routes::{build_master_router, MasterState};
use supervisor::WorkerSupervisor;

/// Run the master until shutdown.
pub async fn run(config: Arc<Config>) -> anyhow::Result<()> {
    info!(
        num_workers = config.num_workers,
        port = config.base_port,
        "starting master"
    );

    let supervisor = WorkerSupervisor::new(config.clone());
    supervisor.clone().spawn_all().await;
    tokio::spawn(supervisor.clone().run_watchdog());
    tokio::spawn(supervisor.clone().run_health_check());

    let scheduler = LobbyScheduler::new(config.clone(), supervisor.clone());
    tokio::spawn(scheduler.clone().run());

    let state = MasterState {
        config: config.clone(),
        supervisor,
        scheduler,
        http: reqwest::Client::new(),
    };
    let router = build_master_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.base_port));
    let listener = TcpListener::bind(addr).await?;
    info!("master listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(crate::shutdown_signal())
        .await?;

    info!("master shutdown complete");
    Ok(())
}
