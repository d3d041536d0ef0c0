//! Spawn-phase territory claiming

use tracing::debug;

use super::Execution;
use crate::game::map::TileIdx;
use crate::game::world::WorldState;
use crate::game::{PlayerId, Tick};
use crate::ws::protocol::GameEvent;

/// Claims a starting blob of land for a player during the spawn window.
/// Re-spawning relocates the claim: the previous blob is released first.
pub struct SpawnExecution {
    owner: PlayerId,
    tile: TileIdx,
    done: bool,
}

impl SpawnExecution {
    pub fn new(owner: PlayerId, tile: TileIdx) -> Self {
        Self {
            owner,
            tile,
            done: false,
        }
    }
}

impl Execution for SpawnExecution {
    fn init(&mut self, world: &mut WorldState, _tick: Tick) {
        let valid = world.player(&self.owner).map(|p| p.alive).unwrap_or(false)
            && self.tile < world.map.tile_count()
            && world.map.is_land(self.tile)
            && world.owner_of(self.tile).is_none();
        if !valid {
            debug!(owner = %self.owner, tile = self.tile, "invalid spawn claim");
            self.done = true;
        }
    }

    fn tick(&mut self, world: &mut WorldState, _tick: Tick) {
        if self.done {
            return;
        }
        self.done = true;

        if !world.in_spawn_phase() {
            debug!(owner = %self.owner, "spawn window closed");
            return;
        }
        // Tile may have been claimed since init by an earlier intent in
        // this same turn.
        if world.owner_of(self.tile).is_some() {
            return;
        }

        // Relocation: release any previous claim.
        let previous: Vec<TileIdx> = (0..world.map.tile_count())
            .filter(|t| world.owner_of(*t) == Some(&self.owner))
            .collect();
        for tile in previous {
            world.set_owner(tile, None);
        }

        for tile in world.map.tiles_within(self.tile, 1) {
            if world.map.is_land(tile) && world.owner_of(tile).is_none() {
                world.conquer(tile, &self.owner);
            }
        }
        if let Some(p) = world.player_mut(&self.owner) {
            p.spawned = true;
        }
        world.emit(GameEvent::PlayerSpawned {
            player: self.owner.clone(),
            tile: self.tile,
        });
    }

    fn is_active(&self) -> bool {
        !self.done
    }

    fn active_during_spawn_phase(&self) -> bool {
        true
    }

    fn owner(&self) -> Option<&PlayerId> {
        Some(&self.owner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::{GameConfig, GameId};

    fn world_with_player() -> (WorldState, PlayerId, TileIdx) {
        let mut w = WorldState::new(GameId::new("spawn-test"), GameConfig::default());
        let p = PlayerId::new("p1");
        w.add_player(p.clone(), "a".into(), false, None);
        let tile = (0..w.map.tile_count())
            .find(|t| w.map.is_land(*t))
            .expect("land tile");
        (w, p, tile)
    }

    #[test]
    fn spawn_claims_a_blob_during_spawn_phase() {
        let (mut w, p, tile) = world_with_player();
        let mut spawn = SpawnExecution::new(p.clone(), tile);
        spawn.init(&mut w, 0);
        spawn.tick(&mut w, 0);

        assert!(!spawn.is_active());
        assert!(w.player(&p).unwrap().spawned);
        assert!(w.player(&p).unwrap().tiles >= 1);
        assert_eq!(w.owner_of(tile), Some(&p));
    }

    #[test]
    fn spawn_after_window_is_a_no_op() {
        let (mut w, p, tile) = world_with_player();
        w.tick = w.config.spawn_phase_ticks + 1;

        let mut spawn = SpawnExecution::new(p.clone(), tile);
        let now = w.tick;
        spawn.init(&mut w, now);
        spawn.tick(&mut w, now);

        assert!(!w.player(&p).unwrap().spawned);
        assert_eq!(w.player(&p).unwrap().tiles, 0);
    }

    #[test]
    fn respawn_relocates_claim() {
        let (mut w, p, tile) = world_with_player();
        let mut first = SpawnExecution::new(p.clone(), tile);
        first.init(&mut w, 0);
        first.tick(&mut w, 0);

        let other = (0..w.map.tile_count())
            .find(|t| w.map.is_land(*t) && w.map.distance(*t, tile) > 4 && w.owner_of(*t).is_none())
            .expect("second spawn site");
        let mut second = SpawnExecution::new(p.clone(), other);
        second.init(&mut w, 1);
        second.tick(&mut w, 1);

        assert_eq!(w.owner_of(tile), None, "old claim released");
        assert_eq!(w.owner_of(other), Some(&p));
    }
}
