//! Authoritative in-game world state
//!
//! One WorldState per started game, exclusively owned by its GameServer.
//! Executions mutate it through `&mut` access during the tick pass; nothing
//! else touches it. Iteration-ordered containers (BTreeMap) keep every pass
//! deterministic for a given seed and turn sequence.

use std::collections::{BTreeMap, BTreeSet};

use super::executions::Execution;
use super::map::{GameMap, TileIdx};
use super::random::GameRng;
use super::{GameConfig, GameId, GameMode, PlayerId, Tick};
use crate::ws::protocol::{GameEvent, UnitId, UnitKind};

/// Defense posts raise capture costs within this Chebyshev radius.
pub const DEFENSE_RADIUS: u32 = 4;
/// Base troop cost of capturing one undefended tile.
pub const TILE_CAPTURE_COST: f64 = 10.0;
/// Capture cost multiplier under a defense post.
pub const DEFENDED_MULTIPLIER: f64 = 2.0;

/// One in-game actor (human or bot).
#[derive(Debug, Clone)]
pub struct Player {
    pub id: PlayerId,
    pub username: String,
    pub is_bot: bool,
    pub alive: bool,
    /// Has claimed a spawn; a player without one never holds territory
    pub spawned: bool,
    pub troops: f64,
    pub gold: f64,
    /// Standing fraction of troops committed when attacking
    pub troop_ratio: f64,
    pub target: Option<PlayerId>,
    pub alliances: BTreeSet<PlayerId>,
    pub embargoes: BTreeSet<PlayerId>,
    /// Set when the player breaks an alliance
    pub traitor: bool,
    pub team: Option<u8>,
    /// Owned territory in tiles, maintained by set_owner
    pub tiles: u32,
}

/// One fielded unit.
#[derive(Debug, Clone)]
pub struct Unit {
    pub id: UnitId,
    pub kind: UnitKind,
    pub owner: PlayerId,
    pub tile: TileIdx,
    pub active: bool,
}

/// A pending alliance request awaiting a reply.
#[derive(Debug, Clone)]
pub struct AllianceRequest {
    pub from: PlayerId,
    pub to: PlayerId,
    pub tick: Tick,
}

/// A standing retreat order. Honored by matching attacks for one full
/// execution pass, then pruned by the server.
#[derive(Debug, Clone)]
pub struct RetreatOrder {
    pub owner: PlayerId,
    /// None cancels all of the owner's attacks
    pub target: Option<PlayerId>,
    pub filed_tick: Tick,
}

/// Who a broadcast event is for.
#[derive(Debug, Clone)]
pub enum Audience {
    All,
    Players(Vec<PlayerId>),
}

#[derive(Debug, Clone)]
pub struct OutboundEvent {
    pub event: GameEvent,
    pub audience: Audience,
}

/// The full mutable state of one game.
pub struct WorldState {
    pub game_id: GameId,
    pub config: GameConfig,
    pub map: GameMap,
    pub rng: GameRng,
    pub tick: Tick,

    players: BTreeMap<PlayerId, Player>,
    units: BTreeMap<UnitId, Unit>,
    next_unit_id: UnitId,
    owners: Vec<Option<PlayerId>>,

    /// Events produced this tick, drained by the server for broadcast
    pub events: Vec<OutboundEvent>,
    /// Executions spawned mid-tick (boat landings, SAM launches), drained
    /// and initialized by the server after the tick pass
    pub deferred: Vec<Box<dyn Execution>>,
    pub retreat_orders: Vec<RetreatOrder>,
    pub alliance_requests: Vec<AllianceRequest>,
}

impl WorldState {
    pub fn new(game_id: GameId, config: GameConfig) -> Self {
        let map = GameMap::generate(&config.map);
        let tile_count = map.tile_count() as usize;
        Self {
            rng: GameRng::for_game(game_id.as_str()),
            game_id,
            config,
            map,
            tick: 0,
            players: BTreeMap::new(),
            units: BTreeMap::new(),
            next_unit_id: 1,
            owners: vec![None; tile_count],
            events: Vec::new(),
            deferred: Vec::new(),
            retreat_orders: Vec::new(),
            alliance_requests: Vec::new(),
        }
    }

    pub fn in_spawn_phase(&self) -> bool {
        self.tick < self.config.spawn_phase_ticks
    }

    // ------------------------------------------------------------------
    // Players
    // ------------------------------------------------------------------

    pub fn add_player(&mut self, id: PlayerId, username: String, is_bot: bool, team: Option<u8>) {
        let player = Player {
            id: id.clone(),
            username,
            is_bot,
            alive: true,
            spawned: false,
            troops: 500.0,
            gold: 100.0,
            troop_ratio: 0.25,
            target: None,
            alliances: BTreeSet::new(),
            embargoes: BTreeSet::new(),
            traitor: false,
            team,
            tiles: 0,
        };
        self.players.insert(id, player);
    }

    pub fn player(&self, id: &PlayerId) -> Option<&Player> {
        self.players.get(id)
    }

    pub fn player_mut(&mut self, id: &PlayerId) -> Option<&mut Player> {
        self.players.get_mut(id)
    }

    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    pub fn alive_players(&self) -> impl Iterator<Item = &Player> {
        self.players.values().filter(|p| p.alive)
    }

    /// Allied either explicitly or by team assignment.
    pub fn are_allied(&self, a: &PlayerId, b: &PlayerId) -> bool {
        if a == b {
            return true;
        }
        if self.config.mode == GameMode::Teams {
            if let (Some(pa), Some(pb)) = (self.players.get(a), self.players.get(b)) {
                if pa.team.is_some() && pa.team == pb.team {
                    return true;
                }
            }
        }
        self.players
            .get(a)
            .map(|p| p.alliances.contains(b))
            .unwrap_or(false)
    }

    pub fn add_alliance(&mut self, a: &PlayerId, b: &PlayerId) {
        if let Some(p) = self.players.get_mut(a) {
            p.alliances.insert(b.clone());
        }
        if let Some(p) = self.players.get_mut(b) {
            p.alliances.insert(a.clone());
        }
    }

    pub fn remove_alliance(&mut self, a: &PlayerId, b: &PlayerId) {
        if let Some(p) = self.players.get_mut(a) {
            p.alliances.remove(b);
        }
        if let Some(p) = self.players.get_mut(b) {
            p.alliances.remove(a);
        }
    }

    pub fn pending_request(&self, from: &PlayerId, to: &PlayerId) -> bool {
        self.alliance_requests
            .iter()
            .any(|r| &r.from == from && &r.to == to)
    }

    pub fn remove_request(&mut self, from: &PlayerId, to: &PlayerId) -> bool {
        let before = self.alliance_requests.len();
        self.alliance_requests
            .retain(|r| !(&r.from == from && &r.to == to));
        self.alliance_requests.len() != before
    }

    // ------------------------------------------------------------------
    // Territory
    // ------------------------------------------------------------------

    pub fn owner_of(&self, tile: TileIdx) -> Option<&PlayerId> {
        self.owners[tile as usize].as_ref()
    }

    /// Reassign a tile, maintaining per-player territory counters.
    pub fn set_owner(&mut self, tile: TileIdx, owner: Option<PlayerId>) {
        let prev = self.owners[tile as usize].take();
        if let Some(prev_id) = &prev {
            if let Some(p) = self.players.get_mut(prev_id) {
                p.tiles = p.tiles.saturating_sub(1);
            }
        }
        if let Some(new_id) = &owner {
            if let Some(p) = self.players.get_mut(new_id) {
                p.tiles += 1;
            }
        }
        self.owners[tile as usize] = owner;
    }

    pub fn conquer(&mut self, tile: TileIdx, owner: &PlayerId) {
        self.set_owner(tile, Some(owner.clone()));
    }

    /// Tiles the attacker can currently capture from the given target:
    /// target-owned land (or unclaimed land for None) adjacent to attacker
    /// territory, in tile-index order.
    pub fn border_tiles(&self, attacker: &PlayerId, target: Option<&PlayerId>) -> Vec<TileIdx> {
        let mut out = Vec::new();
        for tile in 0..self.map.tile_count() {
            if !self.map.is_land(tile) {
                continue;
            }
            let owner = self.owner_of(tile);
            let matches = match target {
                Some(t) => owner == Some(t),
                None => owner.is_none(),
            };
            if !matches {
                continue;
            }
            let adjacent = self
                .map
                .neighbors(tile)
                .iter()
                .any(|n| self.owner_of(*n) == Some(attacker));
            if adjacent {
                out.push(tile);
            }
        }
        out
    }

    /// Whether a tile sits under a defense post owned by its defender.
    pub fn is_defended(&self, tile: TileIdx, defender: &PlayerId) -> bool {
        self.units.values().any(|u| {
            u.active
                && u.kind == UnitKind::DefensePost
                && &u.owner == defender
                && self.map.distance(u.tile, tile) <= DEFENSE_RADIUS
        })
    }

    /// A player stripped of all territory after spawning is eliminated:
    /// marked dead and their remaining units destroyed.
    pub fn check_elimination(&mut self, player_id: &PlayerId) {
        let eliminated = match self.players.get(player_id) {
            Some(p) => p.alive && p.spawned && p.tiles == 0,
            None => false,
        };
        if !eliminated {
            return;
        }
        if let Some(p) = self.players.get_mut(player_id) {
            p.alive = false;
        }
        let doomed: Vec<UnitId> = self
            .units
            .values()
            .filter(|u| u.active && &u.owner == player_id)
            .map(|u| u.id)
            .collect();
        for unit_id in doomed {
            self.destroy_unit(unit_id);
        }
        self.emit(GameEvent::PlayerEliminated {
            player: player_id.clone(),
        });
    }

    pub fn total_land(&self) -> u32 {
        self.map.land_tiles()
    }

    /// Player currently holding the most territory.
    pub fn leader(&self) -> Option<&Player> {
        self.players.values().filter(|p| p.spawned).max_by_key(|p| p.tiles)
    }

    // ------------------------------------------------------------------
    // Units
    // ------------------------------------------------------------------

    pub fn spawn_unit(&mut self, kind: UnitKind, owner: &PlayerId, tile: TileIdx) -> UnitId {
        let id = self.next_unit_id;
        self.next_unit_id += 1;
        self.units.insert(
            id,
            Unit {
                id,
                kind,
                owner: owner.clone(),
                tile,
                active: true,
            },
        );
        id
    }

    pub fn unit(&self, id: UnitId) -> Option<&Unit> {
        self.units.get(&id)
    }

    pub fn unit_mut(&mut self, id: UnitId) -> Option<&mut Unit> {
        self.units.get_mut(&id)
    }

    pub fn units(&self) -> impl Iterator<Item = &Unit> {
        self.units.values()
    }

    pub fn units_of<'a>(&'a self, owner: &'a PlayerId) -> impl Iterator<Item = &'a Unit> {
        self.units.values().filter(move |u| &u.owner == owner)
    }

    /// Mark a unit destroyed and emit the destruction event.
    pub fn destroy_unit(&mut self, id: UnitId) {
        let info = self.units.get_mut(&id).and_then(|u| {
            if u.active {
                u.active = false;
                Some((u.owner.clone(), u.kind))
            } else {
                None
            }
        });
        if let Some((owner, kind)) = info {
            self.emit(GameEvent::UnitDestroyed {
                owner,
                kind,
                unit_id: id,
            });
        }
    }

    pub fn unit_active(&self, id: UnitId) -> bool {
        self.units.get(&id).map(|u| u.active).unwrap_or(false)
    }

    /// Closest active unit of a kind owned by a player, ties broken by
    /// unit id order.
    pub fn nearest_unit(&self, owner: &PlayerId, kind: UnitKind, to: TileIdx) -> Option<&Unit> {
        self.units
            .values()
            .filter(|u| u.active && u.kind == kind && &u.owner == owner)
            .min_by_key(|u| (self.map.distance(u.tile, to), u.id))
    }

    pub fn count_units(&self, owner: &PlayerId, kind: UnitKind) -> usize {
        self.units
            .values()
            .filter(|u| u.active && u.kind == kind && &u.owner == owner)
            .count()
    }

    // ------------------------------------------------------------------
    // Tick bookkeeping
    // ------------------------------------------------------------------

    /// Resource growth for every living player.
    pub fn economy_tick(&mut self) {
        let infinite_troops = self.config.infinite_troops;
        let infinite_gold = self.config.infinite_gold;
        let cities: BTreeMap<PlayerId, usize> = self
            .players
            .keys()
            .map(|id| (id.clone(), self.count_units(id, UnitKind::City)))
            .collect();

        for player in self.players.values_mut() {
            if !player.alive || !player.spawned {
                continue;
            }
            let tiles = player.tiles as f64;
            if infinite_troops {
                player.troops = 1_000_000_000.0;
            } else {
                // Growth saturates at a territory-scaled cap; losing land
                // never confiscates an existing surplus.
                let cap = (100.0 + tiles * 50.0).max(player.troops);
                player.troops = (player.troops + 10.0 + tiles * 0.5).min(cap);
            }
            if infinite_gold {
                player.gold = 1_000_000_000.0;
            } else {
                let city_income = *cities.get(&player.id).unwrap_or(&0) as f64 * 5.0;
                player.gold += 1.0 + tiles * 0.1 + city_income;
            }
        }
    }

    pub fn emit(&mut self, event: GameEvent) {
        self.events.push(OutboundEvent {
            event,
            audience: Audience::All,
        });
    }

    pub fn emit_to(&mut self, event: GameEvent, players: Vec<PlayerId>) {
        self.events.push(OutboundEvent {
            event,
            audience: Audience::Players(players),
        });
    }

    pub fn push_deferred(&mut self, exec: Box<dyn Execution>) {
        self.deferred.push(exec);
    }

    pub fn file_retreat(&mut self, owner: PlayerId, target: Option<PlayerId>) {
        let filed_tick = self.tick;
        self.retreat_orders.push(RetreatOrder {
            owner,
            target,
            filed_tick,
        });
    }

    /// Whether a standing order cancels an attack by `owner` on `target`.
    pub fn retreat_ordered(&self, owner: &PlayerId, target: Option<&PlayerId>) -> bool {
        self.retreat_orders.iter().any(|o| {
            &o.owner == owner && (o.target.is_none() || o.target.as_ref() == target)
        })
    }

    /// Prune orders every attack has had a full pass to observe.
    pub fn prune_retreat_orders(&mut self) {
        let tick = self.tick;
        self.retreat_orders.retain(|o| o.filed_tick >= tick);
    }

    /// Order-insensitive digest of the simulation state, for determinism
    /// tests and desync logging.
    pub fn digest(&self) -> u64 {
        let mut h = Fnv::new();
        h.write_u64(self.tick);
        for (id, p) in &self.players {
            h.write_str(id.as_str());
            h.write_u64(p.troops.to_bits());
            h.write_u64(p.gold.to_bits());
            h.write_u64(p.tiles as u64);
            h.write_u64(u64::from(p.alive));
        }
        for (tile, owner) in self.owners.iter().enumerate() {
            if let Some(owner) = owner {
                h.write_u64(tile as u64);
                h.write_str(owner.as_str());
            }
        }
        for (id, u) in &self.units {
            if u.active {
                h.write_u64(*id);
                h.write_u64(u.tile as u64);
            }
        }
        h.finish()
    }
}

/// FNV-1a, enough for state digests without pulling in a hashing crate.
struct Fnv(u64);

impl Fnv {
    fn new() -> Self {
        Self(0xcbf2_9ce4_8422_2325)
    }

    fn write_u64(&mut self, v: u64) {
        for byte in v.to_be_bytes() {
            self.0 ^= byte as u64;
            self.0 = self.0.wrapping_mul(0x100_0000_01b3);
        }
    }

    fn write_str(&mut self, s: &str) {
        for byte in s.as_bytes() {
            self.0 ^= *byte as u64;
            self.0 = self.0.wrapping_mul(0x100_0000_01b3);
        }
    }

    fn finish(&self) -> u64 {
        self.0
    }
}
