//! Structure and warship construction

use tracing::debug;

use super::missile::SamSiteExecution;
use super::Execution;
use crate::game::map::TileIdx;
use crate::game::world::WorldState;
use crate::game::{PlayerId, Tick};
use crate::ws::protocol::{GameEvent, UnitKind};

/// Gold cost of one build.
pub fn gold_cost(kind: UnitKind) -> f64 {
    match kind {
        UnitKind::City => 100.0,
        UnitKind::Port => 150.0,
        UnitKind::DefensePost => 75.0,
        UnitKind::MissileSilo => 500.0,
        UnitKind::SamLauncher => 400.0,
        UnitKind::Warship => 250.0,
        // Munitions are priced at launch by their executions.
        UnitKind::TransportBoat | UnitKind::Nuke | UnitKind::Interceptor => 0.0,
    }
}

/// Build time in ticks (zero under the instant-build rule).
pub fn build_duration(kind: UnitKind) -> Tick {
    match kind {
        UnitKind::City => 20,
        UnitKind::Port => 25,
        UnitKind::DefensePost => 15,
        UnitKind::MissileSilo => 50,
        UnitKind::SamLauncher => 40,
        UnitKind::Warship => 30,
        UnitKind::TransportBoat | UnitKind::Nuke | UnitKind::Interceptor => 0,
    }
}

/// Builds one structure (or warship) on an owned tile over several ticks.
/// Admission-side cooldown checks happen in the Executor; this execution
/// validates placement and cost.
pub struct ConstructionExecution {
    owner: PlayerId,
    kind: UnitKind,
    tile: TileIdx,
    remaining: Tick,
    active: bool,
}

impl ConstructionExecution {
    pub fn new(owner: PlayerId, kind: UnitKind, tile: TileIdx) -> Self {
        Self {
            owner,
            kind,
            tile,
            remaining: 0,
            active: true,
        }
    }

    fn validate_site(&self, world: &WorldState) -> bool {
        if self.tile >= world.map.tile_count() {
            return false;
        }
        match self.kind {
            UnitKind::Warship => {
                // Needs a port, and the warship itself launches onto water
                // beside it; the requested tile is only a rally hint.
                world.nearest_unit(&self.owner, UnitKind::Port, self.tile).is_some()
            }
            UnitKind::Port => {
                world.owner_of(self.tile) == Some(&self.owner) && world.map.is_shore(self.tile)
            }
            _ => world.owner_of(self.tile) == Some(&self.owner) && world.map.is_land(self.tile),
        }
    }

    fn placement_tile(&self, world: &WorldState) -> Option<TileIdx> {
        if self.kind != UnitKind::Warship {
            return Some(self.tile);
        }
        let port = world.nearest_unit(&self.owner, UnitKind::Port, self.tile)?;
        world
            .map
            .neighbors(port.tile)
            .into_iter()
            .find(|t| world.map.is_water(*t))
    }
}

impl Execution for ConstructionExecution {
    fn init(&mut self, world: &mut WorldState, _tick: Tick) {
        let alive = world.player(&self.owner).map(|p| p.alive).unwrap_or(false);
        if !alive || !self.validate_site(world) {
            debug!(owner = %self.owner, kind = ?self.kind, tile = self.tile, "invalid build site");
            self.active = false;
            return;
        }

        let cost = gold_cost(self.kind);
        let gold = world.player(&self.owner).map(|p| p.gold).unwrap_or(0.0);
        if gold < cost {
            debug!(owner = %self.owner, kind = ?self.kind, "insufficient gold");
            self.active = false;
            return;
        }
        if let Some(p) = world.player_mut(&self.owner) {
            p.gold -= cost;
        }

        self.remaining = if world.config.instant_build {
            0
        } else {
            build_duration(self.kind)
        };
        world.emit(GameEvent::ConstructionStarted {
            owner: self.owner.clone(),
            kind: self.kind,
            tile: self.tile,
        });
    }

    fn tick(&mut self, world: &mut WorldState, _tick: Tick) {
        if !self.active {
            return;
        }
        // The build site can be lost to an attack mid-construction.
        if self.kind != UnitKind::Warship && world.owner_of(self.tile) != Some(&self.owner) {
            self.active = false;
            return;
        }
        if self.remaining > 0 {
            self.remaining -= 1;
            return;
        }

        let Some(tile) = self.placement_tile(world) else {
            self.active = false;
            return;
        };
        let unit_id = world.spawn_unit(self.kind, &self.owner, tile);
        world.emit(GameEvent::UnitBuilt {
            owner: self.owner.clone(),
            kind: self.kind,
            unit_id,
            tile,
        });

        // SAM sites get their scanning controller alongside the unit.
        if self.kind == UnitKind::SamLauncher {
            world.push_deferred(Box::new(SamSiteExecution::new(self.owner.clone(), unit_id)));
        }

        self.active = false;
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn owner(&self) -> Option<&PlayerId> {
        Some(&self.owner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::{GameConfig, GameId};

    fn setup() -> (WorldState, PlayerId, TileIdx) {
        let mut w = WorldState::new(
            GameId::new("build-test"),
            GameConfig {
                instant_build: true,
                ..GameConfig::default()
            },
        );
        let p = PlayerId::new("p1");
        w.add_player(p.clone(), "a".into(), false, None);
        w.player_mut(&p).unwrap().spawned = true;
        w.player_mut(&p).unwrap().gold = 10_000.0;
        let tile = (0..w.map.tile_count())
            .find(|t| w.map.is_land(*t))
            .expect("land");
        w.conquer(tile, &p);
        (w, p, tile)
    }

    #[test]
    fn instant_build_places_unit_on_first_tick() {
        let (mut w, p, tile) = setup();
        let mut build = ConstructionExecution::new(p.clone(), UnitKind::City, tile);
        build.init(&mut w, 0);
        assert!(build.is_active());
        build.tick(&mut w, 1);
        assert!(!build.is_active());
        assert_eq!(w.count_units(&p, UnitKind::City), 1);
    }

    #[test]
    fn build_deducts_gold_and_rejects_when_broke() {
        let (mut w, p, tile) = setup();
        w.player_mut(&p).unwrap().gold = 10.0;
        let mut build = ConstructionExecution::new(p.clone(), UnitKind::City, tile);
        build.init(&mut w, 0);
        assert!(!build.is_active());
        // No resources were consumed by the failed attempt.
        assert_eq!(w.player(&p).unwrap().gold, 10.0);
    }

    #[test]
    fn build_on_unowned_tile_is_rejected() {
        let (mut w, p, tile) = setup();
        let unowned = (0..w.map.tile_count())
            .find(|t| w.map.is_land(*t) && *t != tile && w.owner_of(*t).is_none())
            .expect("unowned land");
        let mut build = ConstructionExecution::new(p, UnitKind::City, unowned);
        build.init(&mut w, 0);
        assert!(!build.is_active());
    }

    #[test]
    fn timed_build_takes_duration_ticks() {
        let (mut w, p, tile) = setup();
        w.config.instant_build = false;
        let mut build = ConstructionExecution::new(p.clone(), UnitKind::DefensePost, tile);
        build.init(&mut w, 0);
        for t in 0..build_duration(UnitKind::DefensePost) {
            assert!(build.is_active(), "still building at tick {t}");
            build.tick(&mut w, t);
        }
        build.tick(&mut w, 99);
        assert!(!build.is_active());
        assert_eq!(w.count_units(&p, UnitKind::DefensePost), 1);
    }
}
