//! Game simulation modules

pub mod executions;
pub mod executor;
pub mod manager;
pub mod map;
pub mod pathfind;
pub mod random;
pub mod server;
pub mod snapshot;
pub mod world;

pub use manager::{GameManager, GameManagerHandle};
pub use server::GameServer;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::ws::protocol::{IntentBody, UnitKind};

/// Simulation tick counter. One tick = one applied turn.
pub type Tick = u64;

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

id_type!(
    /// Stable identifier of one lobby/game; also the sharding key.
    GameId
);
id_type!(
    /// Identifier of one network connection. A reconnect gets a new one.
    ClientId
);
id_type!(
    /// Identifier of one in-game actor. Survives reconnects via the
    /// persistent id carried in the client's token.
    PlayerId
);

/// Game lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GamePhase {
    /// Accepting joins, simulation not running
    Lobby,
    /// Simulation running (includes the spawn window)
    Active,
    /// Terminal; teardown pending or done
    Finished,
}

impl GamePhase {
    /// Phases move strictly forward: Lobby -> Active -> Finished.
    pub fn can_transition(self, next: GamePhase) -> bool {
        matches!(
            (self, next),
            (GamePhase::Lobby, GamePhase::Active)
                | (GamePhase::Lobby, GamePhase::Finished)
                | (GamePhase::Active, GamePhase::Finished)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameMode {
    Ffa,
    Teams,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    /// Mean ticks between bot attack decisions.
    pub fn bot_attack_interval(self) -> Tick {
        match self {
            Difficulty::Easy => 60,
            Difficulty::Medium => 35,
            Difficulty::Hard => 20,
        }
    }
}

/// Immutable per-game ruleset. Supplied (partially) by the lobby creator;
/// every field has a server-side default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GameConfig {
    pub map: String,
    pub mode: GameMode,
    pub difficulty: Difficulty,
    pub bots: usize,
    pub max_players: usize,
    pub is_public: bool,
    pub infinite_troops: bool,
    pub infinite_gold: bool,
    pub instant_build: bool,
    pub disabled_units: Vec<UnitKind>,
    /// Teams mode only: players are assigned round-robin across this many teams
    pub team_count: u8,
    /// Initial window of ticks reserved for territory claiming
    pub spawn_phase_ticks: Tick,
    /// Hard cap on game length
    pub max_game_ticks: Tick,
    /// Fraction of land one player must own to win
    pub win_threshold: f64,

    /// Any-structure build cooldown, in ticks
    pub build_cooldown_ticks: Tick,
    /// Same-structure-kind build cooldown, in ticks
    pub same_kind_cooldown_ticks: Tick,
    /// Air steps a nuke advances per tick
    pub missile_speed: u32,
    /// Interceptor speed as a multiple of missile_speed
    pub interceptor_speed_mult: f64,
    /// Ticks an interceptor keeps flying after its launcher is destroyed
    pub interceptor_grace_ticks: Tick,
    /// Chebyshev radius a SAM site scans for hostile missiles
    pub sam_range: u32,
    /// Ticks between interceptor launches from one SAM site
    pub sam_reload_ticks: Tick,
    /// Chebyshev radius of a nuke detonation
    pub blast_radius: u32,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            map: "highlands".to_string(),
            mode: GameMode::Ffa,
            difficulty: Difficulty::Medium,
            bots: 4,
            max_players: 16,
            is_public: false,
            infinite_troops: false,
            infinite_gold: false,
            instant_build: false,
            disabled_units: Vec::new(),
            team_count: 2,
            spawn_phase_ticks: 100,
            max_game_ticks: 36_000,
            win_threshold: 0.8,
            build_cooldown_ticks: 10,
            same_kind_cooldown_ticks: 30,
            missile_speed: 4,
            interceptor_speed_mult: 1.5,
            interceptor_grace_ticks: 40,
            sam_range: 12,
            sam_reload_ticks: 50,
            blast_radius: 4,
        }
    }
}

/// A validated command from one client, stamped with its connection id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intent {
    pub client_id: ClientId,
    pub body: IntentBody,
}

/// The ordered batch of intents applied in one simulation step. Intents are
/// applied in array order; there is no intra-turn priority beyond it.
#[derive(Debug, Clone)]
pub struct Turn {
    pub turn_number: Tick,
    pub intents: Vec<Intent>,
}

/// Per-player server bookkeeping, distinct from the in-world player state.
#[derive(Debug, Clone)]
pub struct ServerPlayerData {
    pub client_id: Option<ClientId>,
    pub username: String,
    pub is_alive: bool,
    pub is_disconnected: bool,
    /// Last heartbeat, unix millis
    pub server_received_at: u64,
    /// Admission tick of the last structure build (any kind)
    pub last_build_tick: Option<Tick>,
    /// Admission tick of the last structure build, per kind
    pub last_build_by_kind: HashMap<UnitKind, Tick>,
}

impl ServerPlayerData {
    fn new(client_id: ClientId, username: String, now: u64) -> Self {
        Self {
            client_id: Some(client_id),
            username,
            is_alive: true,
            is_disconnected: false,
            server_received_at: now,
            last_build_tick: None,
            last_build_by_kind: HashMap::new(),
        }
    }
}

/// Per-game player registry owned by the GameServer. Maps connections to
/// players and tracks the server-side state the simulation must not own
/// (heartbeats, build cooldowns).
#[derive(Debug, Default)]
pub struct Roster {
    players: HashMap<PlayerId, ServerPlayerData>,
    by_client: HashMap<ClientId, PlayerId>,
}

impl Roster {
    /// Attach a connection to a player, creating the player on first join.
    /// A rejoin under a new ClientId rebinds to the same PlayerId.
    pub fn bind(&mut self, client_id: ClientId, player_id: PlayerId, username: &str, now: u64) {
        match self.players.get_mut(&player_id) {
            Some(data) => {
                if let Some(old) = data.client_id.take() {
                    self.by_client.remove(&old);
                }
                // No heartbeat refresh here: a reappearing ClientId stays
                // flagged disconnected until a real heartbeat lands.
                data.client_id = Some(client_id.clone());
            }
            None => {
                self.players.insert(
                    player_id.clone(),
                    ServerPlayerData::new(client_id.clone(), username.to_string(), now),
                );
            }
        }
        self.by_client.insert(client_id, player_id);
    }

    /// Detach a connection (socket closed). Player data stays; the liveness
    /// sweep decides aliveness.
    pub fn unbind_client(&mut self, client_id: &ClientId) {
        if let Some(player_id) = self.by_client.remove(client_id) {
            if let Some(data) = self.players.get_mut(&player_id) {
                if data.client_id.as_ref() == Some(client_id) {
                    data.client_id = None;
                }
            }
        }
    }

    pub fn player_for(&self, client_id: &ClientId) -> Option<&PlayerId> {
        self.by_client.get(client_id)
    }

    pub fn contains(&self, player_id: &PlayerId) -> bool {
        self.players.contains_key(player_id)
    }

    pub fn data(&self, player_id: &PlayerId) -> Option<&ServerPlayerData> {
        self.players.get(player_id)
    }

    pub fn data_mut(&mut self, player_id: &PlayerId) -> Option<&mut ServerPlayerData> {
        self.players.get_mut(player_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PlayerId, &ServerPlayerData)> {
        self.players.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&PlayerId, &mut ServerPlayerData)> {
        self.players.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    /// Record a heartbeat for the player behind a connection.
    pub fn heartbeat(&mut self, client_id: &ClientId, now: u64) {
        if let Some(player_id) = self.by_client.get(client_id) {
            if let Some(data) = self.players.get_mut(player_id) {
                data.server_received_at = now;
                data.is_disconnected = false;
            }
        }
    }

    /// Check whether a structure build is outside both cooldown windows.
    /// Does not record anything.
    pub fn build_allowed(
        &self,
        player_id: &PlayerId,
        kind: UnitKind,
        tick: Tick,
        config: &GameConfig,
    ) -> bool {
        let Some(data) = self.players.get(player_id) else {
            return false;
        };
        if let Some(last) = data.last_build_tick {
            if tick.saturating_sub(last) < config.build_cooldown_ticks {
                return false;
            }
        }
        if let Some(last) = data.last_build_by_kind.get(&kind) {
            if tick.saturating_sub(*last) < config.same_kind_cooldown_ticks {
                return false;
            }
        }
        true
    }

    /// Record an admitted structure build at the given tick.
    pub fn record_build(&mut self, player_id: &PlayerId, kind: UnitKind, tick: Tick) {
        if let Some(data) = self.players.get_mut(player_id) {
            data.last_build_tick = Some(tick);
            data.last_build_by_kind.insert(kind, tick);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_transitions_only_forward() {
        assert!(GamePhase::Lobby.can_transition(GamePhase::Active));
        assert!(GamePhase::Active.can_transition(GamePhase::Finished));
        assert!(!GamePhase::Finished.can_transition(GamePhase::Active));
        assert!(!GamePhase::Finished.can_transition(GamePhase::Lobby));
        assert!(!GamePhase::Active.can_transition(GamePhase::Lobby));
    }

    #[test]
    fn rejoin_rebinds_same_player() {
        let mut roster = Roster::default();
        let player = PlayerId::new("persistent-1");
        roster.bind(ClientId::new("c1"), player.clone(), "alice", 1_000);
        roster.bind(ClientId::new("c2"), player.clone(), "alice", 2_000);

        assert_eq!(roster.player_for(&ClientId::new("c2")), Some(&player));
        assert_eq!(roster.player_for(&ClientId::new("c1")), None);
        assert_eq!(roster.len(), 1);
    }

    #[test]
    fn build_cooldowns_cover_global_and_same_kind() {
        let config = GameConfig {
            build_cooldown_ticks: 10,
            same_kind_cooldown_ticks: 30,
            ..GameConfig::default()
        };
        let mut roster = Roster::default();
        let player = PlayerId::new("p1");
        roster.bind(ClientId::new("c1"), player.clone(), "bob", 0);

        assert!(roster.build_allowed(&player, UnitKind::City, 5, &config));
        roster.record_build(&player, UnitKind::City, 5);

        // Inside the global window, any kind is rejected.
        assert!(!roster.build_allowed(&player, UnitKind::Port, 9, &config));
        // Outside the global window, a different kind is fine.
        assert!(roster.build_allowed(&player, UnitKind::Port, 15, &config));
        // The same kind stays on cooldown longer.
        assert!(!roster.build_allowed(&player, UnitKind::City, 20, &config));
        assert!(roster.build_allowed(&player, UnitKind::City, 35, &config));
    }
}
