//! Naval movement: warships and troop transports

use tracing::debug;

use super::attack::AttackExecution;
use super::Execution;
use crate::game::map::TileIdx;
use crate::game::pathfind::NavalPathFinder;
use crate::game::world::WorldState;
use crate::game::{PlayerId, Tick};
use crate::ws::protocol::{GameEvent, UnitId, UnitKind};

/// Minimum troops worth putting on a boat.
const MIN_EMBARKED_TROOPS: f64 = 10.0;

/// Steers one or more warships toward a destination, one water tile per
/// ship per tick. A batch-move intent becomes a single execution driving
/// the whole group; ships drop out as they arrive or sink.
pub struct MoveWarshipExecution {
    owner: PlayerId,
    dst: TileIdx,
    ships: Vec<(UnitId, NavalPathFinder)>,
    active: bool,
}

impl MoveWarshipExecution {
    pub fn new(owner: PlayerId, unit_id: UnitId, dst: TileIdx) -> Self {
        Self::batch(owner, vec![unit_id], dst)
    }

    pub fn batch(owner: PlayerId, unit_ids: Vec<UnitId>, dst: TileIdx) -> Self {
        Self {
            owner,
            dst,
            ships: unit_ids
                .into_iter()
                .map(|id| (id, NavalPathFinder::new()))
                .collect(),
            active: true,
        }
    }
}

impl Execution for MoveWarshipExecution {
    fn init(&mut self, world: &mut WorldState, _tick: Tick) {
        if self.dst >= world.map.tile_count() || !world.map.is_water(self.dst) {
            debug!(owner = %self.owner, dst = self.dst, "warship move to non-water tile");
            self.active = false;
            return;
        }
        // Silently drop units the caller doesn't own or that aren't ships.
        self.ships.retain(|(id, _)| {
            world
                .unit(*id)
                .map(|u| u.active && u.kind == UnitKind::Warship && u.owner == self.owner)
                .unwrap_or(false)
        });
        if self.ships.is_empty() {
            debug!(owner = %self.owner, "no valid warships to move");
            self.active = false;
        }
    }

    fn tick(&mut self, world: &mut WorldState, _tick: Tick) {
        if !self.active {
            return;
        }
        let dst = self.dst;
        self.ships.retain_mut(|(unit_id, pathfinder)| {
            let tile = match world.unit(*unit_id) {
                Some(u) if u.active => u.tile,
                _ => return false,
            };
            match pathfinder.next_step(&world.map, tile, dst) {
                Some(next) => {
                    if let Some(u) = world.unit_mut(*unit_id) {
                        u.tile = next;
                    }
                    next != dst
                }
                // Arrived, or no route through this water.
                None => false,
            }
        });
        if self.ships.is_empty() {
            self.active = false;
        }
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn owner(&self) -> Option<&PlayerId> {
        Some(&self.owner)
    }
}

/// Carries troops across water to a destination shore. Landing on hostile
/// or unclaimed ground establishes a beachhead and converts the cargo into
/// an attack; landing home refunds it.
pub struct TransportExecution {
    owner: PlayerId,
    dst: TileIdx,
    ratio_override: Option<f64>,
    troops: f64,
    boat: Option<UnitId>,
    pathfinder: NavalPathFinder,
    active: bool,
}

impl TransportExecution {
    pub fn new(owner: PlayerId, dst: TileIdx, ratio_override: Option<f64>) -> Self {
        Self {
            owner,
            dst,
            ratio_override,
            troops: 0.0,
            boat: None,
            pathfinder: NavalPathFinder::new(),
            active: true,
        }
    }

    /// Owned shore tile closest to the destination, then a water neighbor
    /// of it to launch from.
    fn embark_tile(&self, world: &WorldState) -> Option<TileIdx> {
        let shore = (0..world.map.tile_count())
            .filter(|t| world.owner_of(*t) == Some(&self.owner) && world.map.is_shore(*t))
            .min_by_key(|t| (world.map.distance(*t, self.dst), *t))?;
        world
            .map
            .neighbors(shore)
            .into_iter()
            .find(|t| world.map.is_water(*t))
    }

    fn land(&mut self, world: &mut WorldState) {
        let prev_owner = world.owner_of(self.dst).cloned();
        let troops = self.troops;

        if prev_owner.as_ref() == Some(&self.owner) {
            // Came home: cargo returns to the pool.
            if let Some(p) = world.player_mut(&self.owner) {
                p.troops += troops;
            }
        } else {
            world.conquer(self.dst, &self.owner);
            world.push_deferred(Box::new(AttackExecution::with_committed_troops(
                self.owner.clone(),
                prev_owner.clone(),
                troops,
            )));
            if let Some(prev) = prev_owner {
                world.check_elimination(&prev);
            }
        }

        world.emit(GameEvent::BoatLanded {
            owner: self.owner.clone(),
            tile: self.dst,
            troops,
        });
        if let Some(boat) = self.boat {
            world.destroy_unit(boat);
        }
        self.active = false;
    }

    fn abort_with_refund(&mut self, world: &mut WorldState) {
        if let Some(p) = world.player_mut(&self.owner) {
            p.troops += self.troops / 2.0;
        }
        if let Some(boat) = self.boat {
            world.destroy_unit(boat);
        }
        self.active = false;
    }
}

impl Execution for TransportExecution {
    fn init(&mut self, world: &mut WorldState, _tick: Tick) {
        let Some(player) = world.player(&self.owner) else {
            self.active = false;
            return;
        };
        if !player.alive
            || !player.spawned
            || self.dst >= world.map.tile_count()
            || !world.map.is_land(self.dst)
        {
            self.active = false;
            return;
        }
        // Attacking an ally's shore by boat is rejected like a land attack.
        if let Some(target) = world.owner_of(self.dst) {
            if target != &self.owner && world.are_allied(&self.owner, target) {
                debug!(owner = %self.owner, "transport against ally rejected");
                self.active = false;
                return;
            }
        }

        let Some(embark) = self.embark_tile(world) else {
            debug!(owner = %self.owner, "no coastal launch point");
            self.active = false;
            return;
        };

        let ratio = self
            .ratio_override
            .unwrap_or(player.troop_ratio)
            .clamp(0.01, 1.0);
        let troops = player.troops * ratio;
        if troops < MIN_EMBARKED_TROOPS {
            self.active = false;
            return;
        }
        if let Some(p) = world.player_mut(&self.owner) {
            p.troops -= troops;
        }
        self.troops = troops;
        self.boat = Some(world.spawn_unit(UnitKind::TransportBoat, &self.owner, embark));
    }

    fn tick(&mut self, world: &mut WorldState, _tick: Tick) {
        if !self.active {
            return;
        }
        let Some(boat) = self.boat else {
            self.active = false;
            return;
        };
        let tile = match world.unit(boat) {
            Some(u) if u.active => u.tile,
            // Boat sunk: the cargo goes down with it.
            _ => {
                self.active = false;
                return;
            }
        };

        match self.pathfinder.next_step(&world.map, tile, self.dst) {
            Some(next) if next == self.dst => self.land(world),
            Some(next) => {
                if let Some(u) = world.unit_mut(boat) {
                    u.tile = next;
                }
            }
            None => self.abort_with_refund(world),
        }
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn owner(&self) -> Option<&PlayerId> {
        Some(&self.owner)
    }
}
