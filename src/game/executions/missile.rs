//! Missile flight, SAM scanning, and interception

use std::collections::BTreeSet;

use tracing::debug;

use super::Execution;
use crate::game::map::TileIdx;
use crate::game::pathfind::AirPathFinder;
use crate::game::world::WorldState;
use crate::game::{PlayerId, Tick};
use crate::ws::protocol::{GameEvent, UnitId, UnitKind};

/// Gold cost of one nuke launch.
pub const NUKE_GOLD_COST: f64 = 750.0;

/// A nuke in flight from an owned silo to a target tile. The execution owns
/// a live Nuke unit so interceptors can target it; if that unit dies before
/// arrival the flight ends without detonation.
pub struct NukeExecution {
    owner: PlayerId,
    target: TileIdx,
    unit_id: Option<UnitId>,
    active: bool,
}

impl NukeExecution {
    pub fn new(owner: PlayerId, target: TileIdx) -> Self {
        Self {
            owner,
            target,
            unit_id: None,
            active: true,
        }
    }

    fn detonate(&mut self, world: &mut WorldState) {
        let Some(unit_id) = self.unit_id else { return };
        let tile = world.unit(unit_id).map(|u| u.tile).unwrap_or(self.target);

        let blast = world.map.tiles_within(tile, world.config.blast_radius);
        let doomed: Vec<UnitId> = world
            .units()
            .filter(|u| u.active && u.id != unit_id && blast.contains(&u.tile))
            .map(|u| u.id)
            .collect();
        for id in doomed {
            world.destroy_unit(id);
        }

        let mut affected: BTreeSet<PlayerId> = BTreeSet::new();
        for t in blast {
            if world.map.is_land(t) {
                if let Some(owner) = world.owner_of(t).cloned() {
                    affected.insert(owner);
                    world.set_owner(t, None);
                }
            }
        }
        for player in affected {
            world.check_elimination(&player);
        }

        world.destroy_unit(unit_id);
        world.emit(GameEvent::NukeDetonated {
            owner: self.owner.clone(),
            tile,
        });
        self.active = false;
    }
}

impl Execution for NukeExecution {
    fn init(&mut self, world: &mut WorldState, _tick: Tick) {
        let alive = world.player(&self.owner).map(|p| p.alive).unwrap_or(false);
        if !alive || self.target >= world.map.tile_count() {
            self.active = false;
            return;
        }
        let Some(silo) = world
            .nearest_unit(&self.owner, UnitKind::MissileSilo, self.target)
            .map(|u| (u.id, u.tile))
        else {
            debug!(owner = %self.owner, "nuke launch without a silo");
            self.active = false;
            return;
        };

        let gold = world.player(&self.owner).map(|p| p.gold).unwrap_or(0.0);
        if gold < NUKE_GOLD_COST {
            debug!(owner = %self.owner, "insufficient gold for nuke");
            self.active = false;
            return;
        }
        if let Some(p) = world.player_mut(&self.owner) {
            p.gold -= NUKE_GOLD_COST;
        }

        let unit_id = world.spawn_unit(UnitKind::Nuke, &self.owner, silo.1);
        self.unit_id = Some(unit_id);
        world.emit(GameEvent::NukeLaunched {
            owner: self.owner.clone(),
            unit_id,
            from: silo.1,
            to: self.target,
        });
    }

    fn tick(&mut self, world: &mut WorldState, _tick: Tick) {
        if !self.active {
            return;
        }
        let Some(unit_id) = self.unit_id else {
            self.active = false;
            return;
        };
        // Intercepted (or otherwise destroyed) mid-flight: no detonation.
        if !world.unit_active(unit_id) {
            self.active = false;
            return;
        }

        for _ in 0..world.config.missile_speed {
            let tile = match world.unit(unit_id) {
                Some(u) => u.tile,
                None => {
                    self.active = false;
                    return;
                }
            };
            if tile == self.target {
                self.detonate(world);
                return;
            }
            let next = AirPathFinder::next_step(&world.map, tile, self.target);
            if let Some(u) = world.unit_mut(unit_id) {
                u.tile = next;
            }
        }
        if world.unit(unit_id).map(|u| u.tile) == Some(self.target) {
            self.detonate(world);
        }
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn owner(&self) -> Option<&PlayerId> {
        Some(&self.owner)
    }
}

/// Long-lived controller attached to a SamLauncher unit: scans for hostile
/// missiles in range and fires interceptors, observing a reload cooldown.
/// Dies with its launcher.
pub struct SamSiteExecution {
    owner: PlayerId,
    sam_unit: UnitId,
    reload: Tick,
    active: bool,
}

impl SamSiteExecution {
    pub fn new(owner: PlayerId, sam_unit: UnitId) -> Self {
        Self {
            owner,
            sam_unit,
            reload: 0,
            active: true,
        }
    }
}

impl Execution for SamSiteExecution {
    fn init(&mut self, world: &mut WorldState, _tick: Tick) {
        if !world.unit_active(self.sam_unit) {
            self.active = false;
        }
    }

    fn tick(&mut self, world: &mut WorldState, _tick: Tick) {
        if !self.active {
            return;
        }
        if !world.unit_active(self.sam_unit) {
            self.active = false;
            return;
        }
        if self.reload > 0 {
            self.reload -= 1;
            return;
        }

        let sam_tile = match world.unit(self.sam_unit) {
            Some(u) => u.tile,
            None => return,
        };
        let range = world.config.sam_range;
        let threat = world
            .units()
            .filter(|u| {
                u.active
                    && u.kind == UnitKind::Nuke
                    && !world.are_allied(&self.owner, &u.owner)
                    && world.map.distance(sam_tile, u.tile) <= range
            })
            .min_by_key(|u| (world.map.distance(sam_tile, u.tile), u.id))
            .map(|u| u.id);

        if let Some(target) = threat {
            world.push_deferred(Box::new(InterceptorExecution::new(
                self.owner.clone(),
                self.sam_unit,
                target,
            )));
            self.reload = world.config.sam_reload_ticks;
        }
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn owner(&self) -> Option<&PlayerId> {
        Some(&self.owner)
    }
}

/// A homing counter-missile chasing one nuke. Multiple air steps per tick
/// (speed multiplier over the nuke's own speed). Ends by hitting the target
/// (both destroyed), by the target going inactive or allied first (only
/// itself removed), or by timeout after its launch platform is lost.
pub struct InterceptorExecution {
    owner: PlayerId,
    sam_unit: UnitId,
    target_unit: UnitId,
    unit_id: Option<UnitId>,
    grace_remaining: Option<Tick>,
    active: bool,
}

impl InterceptorExecution {
    pub fn new(owner: PlayerId, sam_unit: UnitId, target_unit: UnitId) -> Self {
        Self {
            owner,
            sam_unit,
            target_unit,
            unit_id: None,
            grace_remaining: None,
            active: true,
        }
    }

    fn steps_per_tick(world: &WorldState) -> u32 {
        let steps =
            (world.config.missile_speed as f64 * world.config.interceptor_speed_mult).round();
        (steps as u32).max(1)
    }

    fn expire(&mut self, world: &mut WorldState) {
        if let Some(unit_id) = self.unit_id {
            world.destroy_unit(unit_id);
        }
        world.emit(GameEvent::InterceptorExpired {
            owner: self.owner.clone(),
        });
        self.active = false;
    }

    fn try_hit(&mut self, world: &mut WorldState, my_tile: TileIdx) -> bool {
        let target_tile = match world.unit(self.target_unit) {
            Some(u) if u.active => u.tile,
            _ => return false,
        };
        if my_tile != target_tile {
            return false;
        }
        let nuke_owner = world
            .unit(self.target_unit)
            .map(|u| u.owner.clone())
            .unwrap_or_else(|| self.owner.clone());
        world.destroy_unit(self.target_unit);
        if let Some(unit_id) = self.unit_id {
            world.destroy_unit(unit_id);
        }
        world.emit(GameEvent::MissileIntercepted {
            interceptor_owner: self.owner.clone(),
            nuke_owner,
            tile: my_tile,
        });
        self.active = false;
        true
    }
}

impl Execution for InterceptorExecution {
    fn init(&mut self, world: &mut WorldState, _tick: Tick) {
        let launch_tile = match world.unit(self.sam_unit) {
            Some(u) if u.active => u.tile,
            _ => {
                self.active = false;
                return;
            }
        };
        if !world.unit_active(self.target_unit) {
            self.active = false;
            return;
        }
        self.unit_id = Some(world.spawn_unit(UnitKind::Interceptor, &self.owner, launch_tile));
    }

    fn tick(&mut self, world: &mut WorldState, _tick: Tick) {
        if !self.active {
            return;
        }
        let Some(unit_id) = self.unit_id else {
            self.active = false;
            return;
        };
        if !world.unit_active(unit_id) {
            self.active = false;
            return;
        }

        // Target gone, or no longer hostile: stand down, target untouched.
        let target_hostile = world
            .unit(self.target_unit)
            .filter(|u| u.active)
            .map(|u| !world.are_allied(&self.owner, &u.owner))
            .unwrap_or(false);
        if !target_hostile {
            self.expire(world);
            return;
        }

        // Platform loss starts the grace countdown.
        if !world.unit_active(self.sam_unit) {
            let remaining = self
                .grace_remaining
                .get_or_insert(world.config.interceptor_grace_ticks);
            if *remaining == 0 {
                self.expire(world);
                return;
            }
            *remaining -= 1;
        }

        for _ in 0..Self::steps_per_tick(world) {
            let my_tile = match world.unit(unit_id) {
                Some(u) => u.tile,
                None => {
                    self.active = false;
                    return;
                }
            };
            if self.try_hit(world, my_tile) {
                return;
            }
            let target_tile = match world.unit(self.target_unit) {
                Some(u) => u.tile,
                None => {
                    self.expire(world);
                    return;
                }
            };
            let next = AirPathFinder::next_step(&world.map, my_tile, target_tile);
            if let Some(u) = world.unit_mut(unit_id) {
                u.tile = next;
            }
            if self.try_hit(world, next) {
                return;
            }
        }
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

    fn setup() -> (WorldState, PlayerId, PlayerId) {
        let mut w = WorldState::new(GameId::new("missile-test"), GameConfig::default());
        let attacker = PlayerId::new("attacker");
        let defender = PlayerId::new("defender");
        w.add_player(attacker.clone(), "a".into(), false, None);
        w.add_player(defender.clone(), "d".into(), false, None);
        for p in [&attacker, &defender] {
            let player = w.player_mut(p).unwrap();
            player.spawned = true;
            player.gold = 100_000.0;
        }
        (w, attacker, defender)
    }

    #[test]
    fn interceptor_hit_removes_both_missiles() {
        let (mut w, attacker, defender) = setup();
        let far = w.map.tile(60, 60);
        let near = w.map.tile(2, 2);

        let silo = w.spawn_unit(UnitKind::MissileSilo, &attacker, far);
        assert!(w.unit_active(silo));
        let sam = w.spawn_unit(UnitKind::SamLauncher, &defender, near);

        let mut nuke = NukeExecution::new(attacker.clone(), near);
        nuke.init(&mut w, 0);
        let nuke_unit = w
            .units()
            .find(|u| u.kind == UnitKind::Nuke)
            .map(|u| u.id)
            .expect("nuke in flight");

        let mut interceptor = InterceptorExecution::new(defender.clone(), sam, nuke_unit);
        interceptor.init(&mut w, 0);
        let interceptor_unit = w
            .units()
            .find(|u| u.kind == UnitKind::Interceptor)
            .map(|u| u.id)
            .expect("interceptor in flight");

        // Interceptor is faster than the nuke; run both until resolution.
        for t in 0..200 {
            nuke.tick(&mut w, t);
            interceptor.tick(&mut w, t);
            if !interceptor.is_active() {
                break;
            }
        }

        assert!(!interceptor.is_active());
        assert!(!w.unit_active(interceptor_unit), "interceptor consumed");
        assert!(!w.unit_active(nuke_unit), "nuke destroyed by the hit");
        assert!(!nuke.is_active(), "nuke flight ends without detonating");
        assert!(w
            .events
            .iter()
            .any(|e| matches!(e.event, GameEvent::MissileIntercepted { .. })));
    }

    #[test]
    fn interceptor_self_cancels_when_target_goes_inactive() {
        let (mut w, attacker, defender) = setup();
        let sam = w.spawn_unit(UnitKind::SamLauncher, &defender, w.map.tile(1, 1));
        let nuke_unit = w.spawn_unit(UnitKind::Nuke, &attacker, w.map.tile(30, 30));

        let mut interceptor = InterceptorExecution::new(defender, sam, nuke_unit);
        interceptor.init(&mut w, 0);

        // The target dies before the interceptor reaches it.
        w.destroy_unit(nuke_unit);
        w.events.clear();
        interceptor.tick(&mut w, 1);

        assert!(!interceptor.is_active());
        assert!(w
            .events
            .iter()
            .any(|e| matches!(e.event, GameEvent::InterceptorExpired { .. })));
        // Only the interceptor was removed by this tick; the nuke was
        // already gone and is not double-destroyed.
        assert!(!w
            .events
            .iter()
            .any(|e| matches!(e.event, GameEvent::MissileIntercepted { .. })));
    }

    #[test]
    fn interceptor_times_out_after_platform_loss() {
        let (mut w, attacker, defender) = setup();
        w.config.interceptor_grace_ticks = 3;
        // Park the nuke far away so the chase outlasts the grace window.
        let sam = w.spawn_unit(UnitKind::SamLauncher, &defender, w.map.tile(0, 0));
        let nuke_unit = w.spawn_unit(UnitKind::Nuke, &attacker, w.map.tile(63, 63));

        let mut interceptor = InterceptorExecution::new(defender, sam, nuke_unit);
        interceptor.init(&mut w, 0);
        w.destroy_unit(sam);

        let mut survived = 0;
        for t in 0..10 {
            if !interceptor.is_active() {
                break;
            }
            interceptor.tick(&mut w, t);
            survived += 1;
        }

        assert!(!interceptor.is_active());
        assert_eq!(survived, 4, "grace of 3 ticks after platform loss");
        assert!(w.unit_active(nuke_unit), "timeout leaves the target alone");
    }

    #[test]
    fn nuke_without_silo_is_rejected() {
        let (mut w, attacker, _) = setup();
        let mut nuke = NukeExecution::new(attacker.clone(), w.map.tile(5, 5));
        nuke.init(&mut w, 0);
        assert!(!nuke.is_active());
        assert_eq!(w.player(&attacker).unwrap().gold, 100_000.0);
    }

    #[test]
    fn nuke_detonation_clears_territory_and_units() {
        let (mut w, attacker, defender) = setup();
        w.config.blast_radius = 2;
        w.config.missile_speed = 8;

        let target = w
            .map
            .tiles_within(w.map.tile(32, 32), 0)[0];
        // Give the defender some territory and a structure at the impact.
        let blast_tiles: Vec<_> = w.map.tiles_within(target, 2);
        for t in &blast_tiles {
            if w.map.is_land(*t) {
                w.conquer(*t, &defender);
            }
        }
        let doomed_city = w.spawn_unit(UnitKind::City, &defender, target);
        let silo = w.spawn_unit(UnitKind::MissileSilo, &attacker, w.map.tile(2, 2));
        assert!(w.unit_active(silo));

        let mut nuke = NukeExecution::new(attacker, target);
        nuke.init(&mut w, 0);
        for t in 0..100 {
            if !nuke.is_active() {
                break;
            }
            nuke.tick(&mut w, t);
        }

        assert!(!nuke.is_active());
        assert!(!w.unit_active(doomed_city));
        for t in blast_tiles {
            if w.map.is_land(t) {
                assert_eq!(w.owner_of(t), None, "blast clears ownership");
            }
        }
        assert!(w
            .events
            .iter()
            .any(|e| matches!(e.event, GameEvent::NukeDetonated { .. })));
    }
}
