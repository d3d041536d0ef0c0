//! WebSocket and control-plane wire types
//! These are the message definitions for client-server and master-worker
//! communication.

use serde::{Deserialize, Serialize};

use crate::game::{ClientId, GameConfig, GameId, GamePhase, PlayerId, Tick};
use crate::game::map::TileIdx;

/// Unit identifier inside one game.
pub type UnitId = u64;

/// Unit categories players can field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    /// Economy structure
    City,
    /// Enables naval construction; transports embark near it
    Port,
    /// Raises capture cost of nearby territory
    DefensePost,
    /// Launch platform for nukes
    MissileSilo,
    /// Scans for hostile missiles and fires interceptors
    SamLauncher,
    /// Player-steerable naval unit
    Warship,
    /// Troop carrier created by boat intents
    TransportBoat,
    /// In-flight missile
    Nuke,
    /// In-flight counter-missile
    Interceptor,
}

impl UnitKind {
    /// Discrete structure categories subject to build cooldowns.
    pub fn is_structure(self) -> bool {
        matches!(
            self,
            UnitKind::City
                | UnitKind::Port
                | UnitKind::DefensePost
                | UnitKind::MissileSilo
                | UnitKind::SamLauncher
        )
    }
}

/// Chat delivery scope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum ChatScope {
    /// Everyone in the game
    All,
    /// Sender and one recipient, shown in the normal chat stream
    Direct { to: PlayerId },
    /// Sender and one recipient, private styling
    Whisper { to: PlayerId },
}

/// A client-submitted command for one simulation tick. This is the closed
/// set of actions the dispatcher understands; adding a variant without
/// handling it is a compile error at the executor match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IntentBody {
    /// Claim a starting position during the spawn phase
    Spawn { x: u32, y: u32 },

    /// Begin a territorial attack. target None attacks unclaimed land.
    Attack {
        target: Option<PlayerId>,
        /// Override of the player's standing troop ratio for this attack
        troop_ratio: Option<f64>,
    },

    /// Retreat from an ongoing attack (all attacks if target is None)
    CancelAttack { target: Option<PlayerId> },

    /// Steer one warship toward a destination
    MoveWarship { unit_id: UnitId, x: u32, y: u32 },

    /// Steer several warships toward a destination
    BatchMoveWarship { unit_ids: Vec<UnitId>, x: u32, y: u32 },

    /// Send troops by transport boat toward a (possibly hostile) shore
    Boat {
        x: u32,
        y: u32,
        troop_ratio: Option<f64>,
    },

    AllianceRequest { to: PlayerId },

    AllianceReply {
        /// The player whose request is being answered
        to: PlayerId,
        accept: bool,
    },

    BreakAlliance { with: PlayerId },

    /// Mark a player as the preferred target (UI affordance + bot hint)
    TargetPlayer { target: PlayerId },

    Emoji {
        emoji: String,
        to: Option<PlayerId>,
    },

    DonateTroops { to: PlayerId, amount: f64 },

    DonateGold { to: PlayerId, amount: f64 },

    /// Set the standing fraction of troops committed to attacks
    TroopRatio { ratio: f64 },

    Embargo { target: PlayerId, on: bool },

    /// Build a structure, or launch a missile when kind is a munition
    BuildUnit { kind: UnitKind, x: u32, y: u32 },

    Chat { scope: ChatScope, body: String },

    /// Canned phrase by key, optionally aimed at a player
    QuickChat {
        key: String,
        to: Option<PlayerId>,
    },

    /// Install or remove the scripted controller for this player
    AutoplayToggle {
        enabled: bool,
        attack_ratio: Option<f64>,
    },

    /// Adjust the live attack ratio of an installed controller
    AutoplayUpdate { attack_ratio: f64 },
}

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Attach this connection to a game
    Join {
        game_id: GameId,
        username: String,
    },

    /// Submit an intent for the next turn
    Intent { intent: IntentBody },

    /// Keep-alive; absence for 20s marks the player disconnected
    Heartbeat,

    /// Ping for latency measurement
    Ping { t: u64 },
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Confirmation of game join
    Joined {
        game_id: GameId,
        client_id: ClientId,
        player_id: PlayerId,
        phase: GamePhase,
        config: GameConfig,
    },

    /// The game is about to start; begin loading
    Prestart { start_in_ms: u64 },

    /// The simulation has started
    Start { tick: Tick, config: GameConfig },

    /// Per-tick delta: everything that happened this turn
    Turn { tick: Tick, events: Vec<GameEvent> },

    /// Periodic full state snapshot
    Snapshot {
        tick: Tick,
        players: Vec<PlayerSnapshot>,
        units: Vec<UnitSnapshot>,
    },

    /// Targeted event delivery (whispers, direct chat)
    Event { tick: Tick, event: GameEvent },

    /// Removed by an administrator
    Kicked { reason: String },

    /// Terminal message; the game is over
    GameEnd {
        winner: Option<PlayerId>,
        tick: Tick,
    },

    /// Error message
    Error { code: String, message: String },

    /// Pong response
    Pong { t: u64 },
}

/// Simulation events broadcast with each turn
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum GameEvent {
    PlayerSpawned {
        player: PlayerId,
        tile: TileIdx,
    },

    AttackLaunched {
        attacker: PlayerId,
        target: Option<PlayerId>,
        troops: f64,
    },

    AttackEnded {
        attacker: PlayerId,
        target: Option<PlayerId>,
    },

    PlayerEliminated {
        player: PlayerId,
    },

    ConstructionStarted {
        owner: PlayerId,
        kind: UnitKind,
        tile: TileIdx,
    },

    UnitBuilt {
        owner: PlayerId,
        kind: UnitKind,
        unit_id: UnitId,
        tile: TileIdx,
    },

    UnitDestroyed {
        owner: PlayerId,
        kind: UnitKind,
        unit_id: UnitId,
    },

    NukeLaunched {
        owner: PlayerId,
        unit_id: UnitId,
        from: TileIdx,
        to: TileIdx,
    },

    NukeDetonated {
        owner: PlayerId,
        tile: TileIdx,
    },

    MissileIntercepted {
        interceptor_owner: PlayerId,
        nuke_owner: PlayerId,
        tile: TileIdx,
    },

    InterceptorExpired {
        owner: PlayerId,
    },

    BoatLanded {
        owner: PlayerId,
        tile: TileIdx,
        troops: f64,
    },

    AllianceRequested {
        from: PlayerId,
        to: PlayerId,
    },

    AllianceAccepted {
        a: PlayerId,
        b: PlayerId,
    },

    AllianceRejected {
        from: PlayerId,
        to: PlayerId,
    },

    AllianceBroken {
        breaker: PlayerId,
        with: PlayerId,
    },

    EmbargoChanged {
        from: PlayerId,
        to: PlayerId,
        on: bool,
    },

    TargetMarked {
        from: PlayerId,
        target: PlayerId,
    },

    TroopsDonated {
        from: PlayerId,
        to: PlayerId,
        amount: f64,
    },

    GoldDonated {
        from: PlayerId,
        to: PlayerId,
        amount: f64,
    },

    Chat {
        from: PlayerId,
        to: Option<PlayerId>,
        whisper: bool,
        body: String,
    },

    QuickChat {
        from: PlayerId,
        key: String,
        to: Option<PlayerId>,
    },

    Emoji {
        from: PlayerId,
        emoji: String,
        to: Option<PlayerId>,
    },
}

/// Player state in a snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub player_id: PlayerId,
    pub username: String,
    pub is_bot: bool,
    pub troops: f64,
    pub gold: f64,
    /// Owned territory, in tiles
    pub tiles: u32,
    pub alive: bool,
    pub connected: bool,
}

/// Unit state in a snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitSnapshot {
    pub unit_id: UnitId,
    pub kind: UnitKind,
    pub owner: PlayerId,
    pub tile: TileIdx,
}

/// Roster/config view of a game, served on the control plane and used for
/// public lobby listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameInfo {
    pub game_id: GameId,
    pub phase: GamePhase,
    pub num_clients: usize,
    pub max_clients: usize,
    pub ms_until_start: Option<u64>,
    pub game_config: GameConfig,
    pub clients: Vec<ClientInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub client_id: ClientId,
    pub username: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intents_round_trip_as_tagged_json() {
        let intent = IntentBody::BuildUnit {
            kind: UnitKind::MissileSilo,
            x: 10,
            y: 12,
        };
        let json = serde_json::to_string(&intent).unwrap();
        assert!(json.contains("\"type\":\"build_unit\""));
        assert!(json.contains("missile_silo"));
        let back: IntentBody = serde_json::from_str(&json).unwrap();
        assert_eq!(back, intent);
    }

    #[test]
    fn chat_scope_tags() {
        let intent = IntentBody::Chat {
            scope: ChatScope::Whisper {
                to: PlayerId::new("p2"),
            },
            body: "psst".to_string(),
        };
        let json = serde_json::to_string(&intent).unwrap();
        assert!(json.contains("\"scope\":\"whisper\""));
    }

    #[test]
    fn unknown_intent_type_fails_to_parse() {
        // The intent set is closed: unrecognized tags are a parse error at
        // the boundary, not a silently dropped default.
        let err = serde_json::from_str::<IntentBody>("{\"type\":\"launch_meteor\"}");
        assert!(err.is_err());
    }
}
