//! Per-worker game pool
//!
//! All games of one worker live inside a single cooperative task: the
//! simulation interval, the lifecycle sweep, the liveness sweep, and the
//! command mailbox interleave on one loop, so no simulation state is ever
//! touched concurrently. HTTP and WebSocket handlers talk to the pool only
//! through the handle.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::interval;
use tracing::{error, info, warn};

use super::server::{ClientConn, GameError, GameServer};
use super::{ClientId, GameConfig, GameId, GamePhase, Intent, PlayerId};
use crate::util::time::{
    unix_millis, HEARTBEAT_TIMEOUT_MILLIS, LIFECYCLE_SWEEP_MILLIS, LIVENESS_SWEEP_MILLIS,
    LOBBY_MAX_AGE_MILLIS, TICK_MILLIS,
};
use crate::ws::protocol::GameInfo;

/// Commands accepted by the pool task.
pub enum ManagerCmd {
    CreateGame {
        game_id: GameId,
        config: Box<GameConfig>,
        reply: oneshot::Sender<Result<GameInfo, GameError>>,
    },
    StartGame {
        game_id: GameId,
        reply: oneshot::Sender<Result<(), GameError>>,
    },
    GameInfo {
        game_id: GameId,
        reply: oneshot::Sender<Option<GameInfo>>,
    },
    ListGames {
        reply: oneshot::Sender<Vec<GameInfo>>,
    },
    Join {
        game_id: GameId,
        conn: ClientConn,
        reply: oneshot::Sender<Result<(), GameError>>,
    },
    Leave {
        game_id: GameId,
        client_id: ClientId,
    },
    Intent {
        game_id: GameId,
        intent: Intent,
    },
    Heartbeat {
        game_id: GameId,
        client_id: ClientId,
    },
    Kick {
        game_id: GameId,
        client_id: ClientId,
        reply: oneshot::Sender<bool>,
    },
}

/// Cloneable handle HTTP/WS handlers use to reach the pool.
#[derive(Clone)]
pub struct GameManagerHandle {
    tx: mpsc::UnboundedSender<ManagerCmd>,
}

impl GameManagerHandle {
    pub async fn create_game(
        &self,
        game_id: GameId,
        config: GameConfig,
    ) -> Result<GameInfo, GameError> {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(ManagerCmd::CreateGame {
            game_id,
            config: Box::new(config),
            reply,
        });
        rx.await.unwrap_or(Err(GameError::NotFound))
    }

    pub async fn start_game(&self, game_id: GameId) -> Result<(), GameError> {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(ManagerCmd::StartGame { game_id, reply });
        rx.await.unwrap_or(Err(GameError::NotFound))
    }

    pub async fn game_info(&self, game_id: GameId) -> Option<GameInfo> {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(ManagerCmd::GameInfo { game_id, reply });
        rx.await.unwrap_or(None)
    }

    pub async fn list_games(&self) -> Vec<GameInfo> {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(ManagerCmd::ListGames { reply });
        rx.await.unwrap_or_default()
    }

    pub async fn join(&self, game_id: GameId, conn: ClientConn) -> Result<(), GameError> {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(ManagerCmd::Join {
            game_id,
            conn,
            reply,
        });
        rx.await.unwrap_or(Err(GameError::NotFound))
    }

    pub fn leave(&self, game_id: GameId, client_id: ClientId) {
        let _ = self.tx.send(ManagerCmd::Leave { game_id, client_id });
    }

    pub fn intent(&self, game_id: GameId, intent: Intent) {
        let _ = self.tx.send(ManagerCmd::Intent { game_id, intent });
    }

    pub fn heartbeat(&self, game_id: GameId, client_id: ClientId) {
        let _ = self.tx.send(ManagerCmd::Heartbeat { game_id, client_id });
    }

    pub async fn kick(&self, game_id: GameId, client_id: ClientId) -> bool {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(ManagerCmd::Kick {
            game_id,
            client_id,
            reply,
        });
        rx.await.unwrap_or(false)
    }
}

pub struct GameManager {
    games: HashMap<GameId, GameServer>,
    rx: mpsc::UnboundedReceiver<ManagerCmd>,
}

impl GameManager {
    pub fn new() -> (Self, GameManagerHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                games: HashMap::new(),
                rx,
            },
            GameManagerHandle { tx },
        )
    }

    /// Drive the pool until every handle is dropped.
    pub async fn run(mut self) {
        let mut sim = interval(Duration::from_millis(TICK_MILLIS));
        sim.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut lifecycle = interval(Duration::from_millis(LIFECYCLE_SWEEP_MILLIS));
        lifecycle.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut liveness = interval(Duration::from_millis(LIVENESS_SWEEP_MILLIS));
        liveness.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!("game manager running");
        loop {
            tokio::select! {
                _ = sim.tick() => self.sim_tick(),
                _ = lifecycle.tick() => self.lifecycle_sweep(unix_millis()),
                _ = liveness.tick() => self.liveness_sweep(unix_millis()),
                cmd = self.rx.recv() => match cmd {
                    Some(cmd) => self.handle(cmd),
                    None => {
                        info!("game manager shutting down");
                        break;
                    }
                },
            }
        }
    }

    fn handle(&mut self, cmd: ManagerCmd) {
        match cmd {
            ManagerCmd::CreateGame {
                game_id,
                config,
                reply,
            } => {
                let _ = reply.send(self.create_game(game_id, *config, unix_millis()));
            }
            ManagerCmd::StartGame { game_id, reply } => {
                let _ = reply.send(self.start_game(&game_id));
            }
            ManagerCmd::GameInfo { game_id, reply } => {
                let now = unix_millis();
                let _ = reply.send(self.games.get(&game_id).map(|g| g.info(now)));
            }
            ManagerCmd::ListGames { reply } => {
                let now = unix_millis();
                let _ = reply.send(self.games.values().map(|g| g.info(now)).collect());
            }
            ManagerCmd::Join {
                game_id,
                conn,
                reply,
            } => {
                let result = match self.games.get_mut(&game_id) {
                    Some(game) => game.join(conn, unix_millis()),
                    None => Err(GameError::NotFound),
                };
                let _ = reply.send(result);
            }
            ManagerCmd::Leave { game_id, client_id } => {
                if let Some(game) = self.games.get_mut(&game_id) {
                    game.leave(&client_id);
                }
            }
            ManagerCmd::Intent { game_id, intent } => {
                if let Some(game) = self.games.get_mut(&game_id) {
                    game.submit_intent(intent);
                }
            }
            ManagerCmd::Heartbeat { game_id, client_id } => {
                if let Some(game) = self.games.get_mut(&game_id) {
                    game.heartbeat(&client_id, unix_millis());
                }
            }
            ManagerCmd::Kick {
                game_id,
                client_id,
                reply,
            } => {
                let kicked = self
                    .games
                    .get_mut(&game_id)
                    .map(|g| g.kick(&client_id))
                    .unwrap_or(false);
                let _ = reply.send(kicked);
            }
        }
    }

    pub fn create_game(
        &mut self,
        game_id: GameId,
        config: GameConfig,
        now: u64,
    ) -> Result<GameInfo, GameError> {
        if self.games.contains_key(&game_id) {
            return Err(GameError::AlreadyExists);
        }
        info!(game_id = %game_id, public = config.is_public, "game created");
        let game = GameServer::new(game_id.clone(), config, now);
        let info = game.info(now);
        self.games.insert(game_id, game);
        Ok(info)
    }

    pub fn start_game(&mut self, game_id: &GameId) -> Result<(), GameError> {
        match self.games.get_mut(game_id) {
            Some(game) => game.request_start(),
            None => Err(GameError::NotFound),
        }
    }

    pub fn game(&self, game_id: &GameId) -> Option<&GameServer> {
        self.games.get(game_id)
    }

    pub fn game_mut(&mut self, game_id: &GameId) -> Option<&mut GameServer> {
        self.games.get_mut(game_id)
    }

    pub fn num_games(&self) -> usize {
        self.games.len()
    }

    /// Advance every started game one simulation step.
    pub fn sim_tick(&mut self) {
        for game in self.games.values_mut() {
            if game.should_tick() {
                game.tick();
            }
        }
    }

    /// Outer scheduling pass: move lobbies toward start, tear down
    /// finished games. Every per-game step is isolated; one game's failure
    /// never touches the others.
    pub fn lifecycle_sweep(&mut self, now: u64) {
        let mut finished: Vec<GameId> = Vec::new();
        let mut abandoned: Vec<GameId> = Vec::new();

        for (game_id, game) in self.games.iter_mut() {
            match game.phase() {
                GamePhase::Lobby => {
                    let age = now.saturating_sub(game.created_at());
                    let full = game.num_clients() >= game.config().max_players;
                    let timed_out =
                        game.config().is_public && age >= LOBBY_MAX_AGE_MILLIS;
                    if game.num_clients() == 0 && timed_out {
                        abandoned.push(game_id.clone());
                        continue;
                    }
                    let has_clients = game.num_clients() > 0;
                    if has_clients && (game.start_requested() || full || timed_out) {
                        game.prestart(now);
                    }
                    if game.start_due(now) {
                        game.start();
                    }
                }
                GamePhase::Active => {}
                GamePhase::Finished => finished.push(game_id.clone()),
            }
        }

        for game_id in abandoned {
            info!(game_id = %game_id, "empty lobby removed");
            self.games.remove(&game_id);
        }
        for game_id in finished {
            if let Some(mut game) = self.games.remove(&game_id) {
                if let Err(e) = game.end() {
                    error!(game_id = %game_id, error = %e, "game teardown failed");
                }
            }
        }
    }

    /// Disconnect detection. Only Active, started games are swept: a
    /// player whose ClientId is not connected, or whose last heartbeat is
    /// stale, is marked disconnected and not-alive. An abrupt network drop
    /// never sends an explicit goodbye; this sweep is what notices it.
    pub fn liveness_sweep(&mut self, now: u64) {
        for game in self.games.values_mut() {
            if game.phase() != GamePhase::Active || !game.started() {
                continue;
            }
            let connected: HashSet<ClientId> = game.connected_clients().cloned().collect();
            let lost: Vec<PlayerId> = game
                .roster()
                .iter()
                .filter(|(_, data)| {
                    if data.is_disconnected {
                        return false;
                    }
                    let missing = data
                        .client_id
                        .as_ref()
                        .map(|c| !connected.contains(c))
                        .unwrap_or(true);
                    let stale =
                        now.saturating_sub(data.server_received_at) > HEARTBEAT_TIMEOUT_MILLIS;
                    missing || stale
                })
                .map(|(player_id, _)| player_id.clone())
                .collect();

            for player_id in lost {
                warn!(game_id = %game.id, player = %player_id, "player lost (no heartbeat)");
                game.mark_player_disconnected(&player_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::server::ClientConn;
    use crate::ws::protocol::ServerMsg;
    use tokio::sync::mpsc as tokio_mpsc;

    fn conn(client: &str, persistent: &str) -> (ClientConn, tokio_mpsc::UnboundedReceiver<ServerMsg>) {
        let (tx, rx) = tokio_mpsc::unbounded_channel();
        (
            ClientConn {
                client_id: ClientId::new(client),
                persistent_id: persistent.to_string(),
                username: persistent.to_string(),
                tx,
            },
            rx,
        )
    }

    fn manager() -> GameManager {
        GameManager::new().0
    }

    fn config() -> GameConfig {
        GameConfig {
            bots: 0,
            max_players: 4,
            ..GameConfig::default()
        }
    }

    #[test]
    fn create_is_unique_per_game_id() {
        let mut mgr = manager();
        let id = GameId::new("g1");
        assert!(mgr.create_game(id.clone(), config(), 0).is_ok());
        assert!(matches!(
            mgr.create_game(id, config(), 0),
            Err(GameError::AlreadyExists)
        ));
    }

    #[test]
    fn lifecycle_sweep_prestarts_and_starts_requested_games() {
        let mut mgr = manager();
        let id = GameId::new("g1");
        mgr.create_game(id.clone(), config(), 0).unwrap();

        let (c1, _rx) = conn("c1", "alice");
        mgr.game_mut(&id).unwrap().join(c1, 0).unwrap();
        mgr.start_game(&id).unwrap();

        mgr.lifecycle_sweep(1_000);
        let game = mgr.game(&id).unwrap();
        assert!(game.prestarted());
        assert_eq!(game.phase(), GamePhase::Lobby, "grace window still open");

        // After the grace window the next sweep starts the simulation.
        mgr.lifecycle_sweep(1_000 + crate::util::time::PRESTART_GRACE_MILLIS + 1);
        assert_eq!(mgr.game(&id).unwrap().phase(), GamePhase::Active);
    }

    #[test]
    fn finished_games_are_torn_down_and_removed() {
        let mut mgr = manager();
        let id = GameId::new("g1");
        mgr.create_game(
            id.clone(),
            GameConfig {
                max_game_ticks: 3,
                spawn_phase_ticks: 1,
                ..config()
            },
            0,
        )
        .unwrap();
        let (c1, _rx) = conn("c1", "alice");
        mgr.game_mut(&id).unwrap().join(c1, 0).unwrap();
        mgr.game_mut(&id).unwrap().prestart(0);
        mgr.game_mut(&id).unwrap().start();

        for _ in 0..5 {
            mgr.sim_tick();
        }
        assert_eq!(mgr.game(&id).unwrap().phase(), GamePhase::Finished);

        mgr.lifecycle_sweep(10_000);
        assert!(mgr.game(&id).is_none(), "finished game removed from pool");
    }

    #[test]
    fn liveness_sweep_marks_stale_heartbeats() {
        let mut mgr = manager();
        let id = GameId::new("g1");
        mgr.create_game(id.clone(), config(), 0).unwrap();
        let (c1, _rx) = conn("c1", "alice");
        let game = mgr.game_mut(&id).unwrap();
        game.join(c1, 0).unwrap();
        game.prestart(0);
        game.start();

        // Heartbeat at t=1000; sweep at t=15000 is within the timeout.
        let alice = PlayerId::new("alice");
        game.heartbeat(&ClientId::new("c1"), 1_000);
        mgr.liveness_sweep(15_000);
        let data = mgr.game(&id).unwrap().roster().data(&alice).unwrap();
        assert!(!data.is_disconnected);

        // 20s past the heartbeat: lost.
        mgr.liveness_sweep(1_000 + HEARTBEAT_TIMEOUT_MILLIS + 1);
        let data = mgr.game(&id).unwrap().roster().data(&alice).unwrap();
        assert!(data.is_disconnected);
        assert!(!data.is_alive);
    }

    #[test]
    fn disconnect_flag_sticks_until_fresh_heartbeat() {
        let mut mgr = manager();
        let id = GameId::new("g1");
        mgr.create_game(id.clone(), config(), 0).unwrap();
        let (c1, _rx1) = conn("c1", "alice");
        let game = mgr.game_mut(&id).unwrap();
        game.join(c1, 0).unwrap();
        game.prestart(0);
        game.start();
        game.heartbeat(&ClientId::new("c1"), 1_000);

        let stale_time = 1_000 + HEARTBEAT_TIMEOUT_MILLIS + 1;
        mgr.liveness_sweep(stale_time);
        let alice = PlayerId::new("alice");
        assert!(mgr.game(&id).unwrap().roster().data(&alice).unwrap().is_disconnected);

        // The client reconnects but never heartbeats: still disconnected
        // and still not alive on the next sweep.
        let (c2, _rx2) = conn("c2", "alice");
        mgr.game_mut(&id).unwrap().join(c2, stale_time).unwrap();
        mgr.liveness_sweep(stale_time + 100);
        let data = mgr.game(&id).unwrap().roster().data(&alice).unwrap();
        assert!(data.is_disconnected);
        assert!(!data.is_alive);

        // A real heartbeat clears the disconnect flag; aliveness is gone
        // for good.
        mgr.game_mut(&id)
            .unwrap()
            .heartbeat(&ClientId::new("c2"), stale_time + 200);
        let data = mgr.game(&id).unwrap().roster().data(&alice).unwrap();
        assert!(!data.is_disconnected);
        assert!(!data.is_alive);
    }

    #[test]
    fn empty_public_lobby_expires() {
        let mut mgr = manager();
        let id = GameId::new("pub1");
        mgr.create_game(
            id.clone(),
            GameConfig {
                is_public: true,
                ..config()
            },
            0,
        )
        .unwrap();

        mgr.lifecycle_sweep(LOBBY_MAX_AGE_MILLIS - 1);
        assert!(mgr.game(&id).is_some());

        mgr.lifecycle_sweep(LOBBY_MAX_AGE_MILLIS + 1);
        assert!(mgr.game(&id).is_none());
    }

    #[tokio::test]
    async fn handle_round_trip() {
        let (mgr, handle) = GameManager::new();
        tokio::spawn(mgr.run());

        let id = GameId::new("async-game");
        let info = handle.create_game(id.clone(), config()).await.unwrap();
        assert_eq!(info.game_id, id);
        assert_eq!(info.phase, GamePhase::Lobby);

        let (c1, mut rx) = conn("c1", "alice");
        handle.join(id.clone(), c1).await.unwrap();
        let joined = rx.recv().await.expect("joined message");
        assert!(matches!(joined, ServerMsg::Joined { .. }));

        handle.start_game(id.clone()).await.unwrap();
        let info = handle.game_info(id).await.unwrap();
        assert_eq!(info.num_clients, 1);
    }
}
