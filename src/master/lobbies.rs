//! Public lobby scheduling
//!
//! The master keeps at least one public lobby advertised at all times. A
//! playlist rotates map/mode pairs; each new lobby is created on the worker
//! that owns its freshly generated game id, then polled for roster changes
//! until it starts, fills, or dies.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

use super::supervisor::WorkerSupervisor;
use crate::config::Config;
use crate::game::{GameConfig, GameId, GameMode, GamePhase};
use crate::util::hash::worker_index;
use crate::ws::protocol::GameInfo;

/// Deterministic rotation of public map/mode pairs.
pub struct Playlist {
    entries: Vec<(String, GameMode)>,
    next: usize,
}

impl Playlist {
    pub fn new() -> Self {
        Self {
            entries: vec![
                ("highlands".to_string(), GameMode::Ffa),
                ("archipelago".to_string(), GameMode::Ffa),
                ("riverlands".to_string(), GameMode::Teams),
                ("tundra".to_string(), GameMode::Ffa),
            ],
            next: 0,
        }
    }

    pub fn next(&mut self) -> (String, GameMode) {
        let entry = self.entries[self.next % self.entries.len()].clone();
        self.next += 1;
        entry
    }
}

impl Default for Playlist {
    fn default() -> Self {
        Self::new()
    }
}

/// Short random lobby identifier.
pub fn new_game_id() -> GameId {
    let simple = Uuid::new_v4().simple().to_string();
    GameId::new(&simple[..8])
}

pub struct LobbyScheduler {
    config: Arc<Config>,
    supervisor: Arc<WorkerSupervisor>,
    http: reqwest::Client,
    playlist: Mutex<Playlist>,
    /// Lobbies currently advertised, keyed by game id
    advertised: DashMap<GameId, GameInfo>,
    /// Pre-rendered response for /api/public_lobbies
    cache: RwLock<Vec<GameInfo>>,
}

impl LobbyScheduler {
    pub fn new(config: Arc<Config>, supervisor: Arc<WorkerSupervisor>) -> Arc<Self> {
        Arc::new(Self {
            config,
            supervisor,
            http: reqwest::Client::new(),
            playlist: Mutex::new(Playlist::new()),
            advertised: DashMap::new(),
            cache: RwLock::new(Vec::new()),
        })
    }

    /// Cached lobby list; refreshed by the poll loop, not per request.
    pub fn cached_lobbies(&self) -> Vec<GameInfo> {
        self.cache.read().clone()
    }

    pub async fn run(self: Arc<Self>) {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_millis(self.config.lobby_poll_ms));
        loop {
            interval.tick().await;
            // No public traffic until the whole pool is up.
            if !self.supervisor.all_ready() {
                continue;
            }
            self.refresh_advertised().await;
            if self.advertised.is_empty() {
                self.schedule_next().await;
            }
            let lobbies: Vec<GameInfo> =
                self.advertised.iter().map(|e| e.value().clone()).collect();
            *self.cache.write() = lobbies;
        }
    }

    /// Poll each advertised lobby's worker; refresh player counts and
    /// prune lobbies that started, filled, or stopped answering.
    async fn refresh_advertised(&self) {
        let ids: Vec<GameId> = self.advertised.iter().map(|e| e.key().clone()).collect();
        for game_id in ids {
            let url = format!(
                "{}/api/game/{}",
                self.config
                    .worker_url(worker_index(game_id.as_str(), self.config.num_workers)),
                game_id
            );
            let info: Option<GameInfo> = match self.http.get(&url).send().await {
                Ok(resp) if resp.status().is_success() => resp.json().await.ok(),
                Ok(resp) => {
                    warn!(game_id = %game_id, status = %resp.status(), "lobby poll rejected");
                    None
                }
                Err(e) => {
                    warn!(game_id = %game_id, error = %e, "lobby poll failed");
                    None
                }
            };

            match info {
                Some(info)
                    if info.phase == GamePhase::Lobby && info.num_clients < info.max_clients =>
                {
                    self.advertised.insert(game_id, info);
                }
                Some(info) => {
                    info!(game_id = %game_id, phase = ?info.phase, "lobby no longer advertisable");
                    self.advertised.remove(&game_id);
                }
                None => {
                    self.advertised.remove(&game_id);
                }
            }
        }
    }

    /// Create the next public lobby on the worker owning its id.
    async fn schedule_next(&self) {
        let (map, mode) = self.playlist.lock().next();
        let game_id = new_game_id();
        let worker = worker_index(game_id.as_str(), self.config.num_workers);

        let config = GameConfig {
            map,
            mode,
            is_public: true,
            ..GameConfig::default()
        };
        let url = format!(
            "{}/api/create_game/{}",
            self.config.worker_url(worker),
            game_id
        );
        let body = serde_json::json!({ "gameConfig": config });

        match self.http.post(&url).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => match resp.json::<GameInfo>().await {
                Ok(info) => {
                    info!(game_id = %game_id, worker, "public lobby scheduled");
                    self.advertised.insert(game_id, info);
                }
                Err(e) => warn!(game_id = %game_id, error = %e, "lobby create: bad response body"),
            },
            Ok(resp) => {
                warn!(game_id = %game_id, worker, status = %resp.status(), "lobby create rejected")
            }
            Err(e) => warn!(game_id = %game_id, worker, error = %e, "lobby create failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn playlist_rotates_deterministically() {
        let mut a = Playlist::new();
        let mut b = Playlist::new();
        for _ in 0..10 {
            assert_eq!(a.next(), b.next());
        }
        // Full cycle returns to the first entry.
        let mut p = Playlist::new();
        let first = p.next();
        for _ in 0..3 {
            p.next();
        }
        assert_eq!(p.next(), first);
    }

    #[test]
    fn generated_ids_are_short_and_unique_enough() {
        let a = new_game_id();
        let b = new_game_id();
        assert_eq!(a.as_str().len(), 8);
        assert_ne!(a, b);
    }
}
