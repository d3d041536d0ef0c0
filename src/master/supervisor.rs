//! Worker process pool supervision
//!
//! The master forks one child per shard (a re-exec of this binary with
//! WORKER_ID set), watches each child, and reforks on exit after a short
//! delay. A worker is only counted ready once it has called back on the
//! readiness endpoint; the startup watchdog force-reforks anything that
//! never gets there.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::Config;

pub struct WorkerSupervisor {
    config: Arc<Config>,
    /// Workers that have completed the readiness handshake
    ready: DashMap<usize, Instant>,
    /// Spawn time of the current child per worker, cleared on exit
    spawned_at: DashMap<usize, Instant>,
    /// Kill switches for force-refork
    kill_switches: DashMap<usize, mpsc::Sender<()>>,
}

impl WorkerSupervisor {
    pub fn new(config: Arc<Config>) -> Arc<Self> {
        Arc::new(Self {
            config,
            ready: DashMap::new(),
            spawned_at: DashMap::new(),
            kill_switches: DashMap::new(),
        })
    }

    pub fn expected_workers(&self) -> usize {
        self.config.num_workers
    }

    pub fn ready_count(&self) -> usize {
        self.ready.len()
    }

    pub fn running_count(&self) -> usize {
        self.spawned_at.len()
    }

    /// The public-lobby scheduler stays gated until the full pool has
    /// reported in.
    pub fn all_ready(&self) -> bool {
        self.ready.len() == self.config.num_workers
    }

    /// Readiness handshake from a worker. Unknown ids are rejected.
    pub fn mark_ready(&self, worker_id: usize) -> bool {
        if worker_id >= self.config.num_workers {
            warn!(worker_id, "readiness from unknown worker id");
            return false;
        }
        info!(worker_id, "worker ready");
        self.ready.insert(worker_id, Instant::now());
        true
    }

    /// Fork the whole pool, staggered to avoid boot-time contention.
    pub async fn spawn_all(self: Arc<Self>) {
        for worker_id in 0..self.config.num_workers {
            self.clone().spawn_worker(worker_id);
            tokio::time::sleep(Duration::from_millis(self.config.fork_stagger_ms)).await;
        }
    }

    fn spawn_worker(self: Arc<Self>, worker_id: usize) {
        let (kill_tx, kill_rx) = mpsc::channel::<()>(1);
        self.kill_switches.insert(worker_id, kill_tx);
        tokio::spawn(self.monitor_worker(worker_id, kill_rx));
    }

    /// Own one worker slot forever: spawn, wait, refork.
    async fn monitor_worker(self: Arc<Self>, worker_id: usize, mut kill_rx: mpsc::Receiver<()>) {
        loop {
            let exe = match std::env::current_exe() {
                Ok(path) => path,
                Err(e) => {
                    error!(worker_id, error = %e, "cannot resolve current executable");
                    tokio::time::sleep(Duration::from_millis(self.config.refork_delay_ms)).await;
                    continue;
                }
            };

            let child = Command::new(exe)
                .env("WORKER_ID", worker_id.to_string())
                .kill_on_drop(true)
                .spawn();

            let mut child = match child {
                Ok(child) => {
                    info!(worker_id, pid = ?child.id(), "worker forked");
                    self.spawned_at.insert(worker_id, Instant::now());
                    child
                }
                Err(e) => {
                    error!(worker_id, error = %e, "worker fork failed");
                    tokio::time::sleep(Duration::from_millis(self.config.refork_delay_ms)).await;
                    continue;
                }
            };

            tokio::select! {
                status = child.wait() => {
                    warn!(worker_id, status = ?status.ok(), "worker exited");
                }
                _ = kill_rx.recv() => {
                    warn!(worker_id, "force-killing worker");
                    let _ = child.kill().await;
                    let _ = child.wait().await;
                }
            }

            // Exited workers lose their ready status and come back after a
            // short delay; the gap avoids restart storms.
            self.ready.remove(&worker_id);
            self.spawned_at.remove(&worker_id);
            tokio::time::sleep(Duration::from_millis(self.config.refork_delay_ms)).await;
        }
    }

    /// Startup-timeout watchdog: a worker still missing its readiness
    /// handshake past the bound gets killed and reforked.
    pub async fn run_watchdog(self: Arc<Self>) {
        let bound = Duration::from_millis(self.config.worker_boot_timeout_ms);
        let mut interval = tokio::time::interval(Duration::from_secs(10));
        loop {
            interval.tick().await;
            for entry in self.spawned_at.iter() {
                let worker_id = *entry.key();
                if self.ready.contains_key(&worker_id) {
                    continue;
                }
                if entry.value().elapsed() > bound {
                    error!(worker_id, "worker missed startup deadline, reforking");
                    if let Some(kill) = self.kill_switches.get(&worker_id) {
                        let _ = kill.try_send(());
                    }
                }
            }
        }
    }

    /// Periodic expected/running/ready comparison.
    pub async fn run_health_check(self: Arc<Self>) {
        let mut interval =
            tokio::time::interval(Duration::from_millis(self.config.health_check_ms));
        loop {
            interval.tick().await;
            let expected = self.expected_workers();
            let running = self.running_count();
            let ready = self.ready_count();
            if running != expected || ready != expected {
                warn!(expected, running, ready, "worker pool divergence");
            } else {
                info!(expected, running, ready, "worker pool healthy");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(num_workers: usize) -> Arc<Config> {
        Arc::new(Config {
            base_port: 3000,
            num_workers,
            game_env: "test".to_string(),
            log_level: "info".to_string(),
            admin_token: "admin".to_string(),
            token_secret: "secret".to_string(),
            client_origin: "*".to_string(),
            fork_stagger_ms: 0,
            refork_delay_ms: 0,
            worker_boot_timeout_ms: 60_000,
            health_check_ms: 30_000,
            lobby_poll_ms: 2_000,
        })
    }

    #[test]
    fn readiness_gating() {
        let sup = WorkerSupervisor::new(test_config(2));
        assert!(!sup.all_ready());

        assert!(sup.mark_ready(0));
        assert!(!sup.all_ready());

        assert!(sup.mark_ready(1));
        assert!(sup.all_ready());
        assert_eq!(sup.ready_count(), 2);
    }

    #[test]
    fn unknown_worker_ids_are_rejected() {
        let sup = WorkerSupervisor::new(test_config(2));
        assert!(!sup.mark_ready(7));
        assert_eq!(sup.ready_count(), 0);
    }
}
