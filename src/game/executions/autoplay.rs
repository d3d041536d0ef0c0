//! Scripted per-player controller
//!
//! One AutoPlayExecution drives one player: it claims a spawn during the
//! spawn window and launches periodic attacks afterwards. Bots are these
//! controllers installed at game start. The controller reads its attack
//! ratio through a shared handle on every decision, so updates apply
//! live without rebuilding the execution, and toggling off flips the
//! handle and lets the execution retire itself on its next tick.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use super::attack::AttackExecution;
use super::Execution;
use crate::game::world::WorldState;
use crate::game::{PlayerId, Tick};

/// Shared, live-updatable controller parameters.
pub struct AutoplayHandle {
    enabled: AtomicBool,
    /// f64 bits of the attack ratio
    ratio_bits: AtomicU64,
}

impl AutoplayHandle {
    pub fn new(attack_ratio: f64) -> Arc<Self> {
        Arc::new(Self {
            enabled: AtomicBool::new(true),
            ratio_bits: AtomicU64::new(attack_ratio.clamp(0.01, 1.0).to_bits()),
        })
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Relaxed);
    }

    pub fn attack_ratio(&self) -> f64 {
        f64::from_bits(self.ratio_bits.load(Ordering::Relaxed))
    }

    pub fn set_attack_ratio(&self, ratio: f64) {
        self.ratio_bits
            .store(ratio.clamp(0.01, 1.0).to_bits(), Ordering::Relaxed);
    }
}

pub struct AutoPlayExecution {
    player: PlayerId,
    handle: Arc<AutoplayHandle>,
    next_action_tick: Tick,
    active: bool,
}

impl AutoPlayExecution {
    pub fn new(player: PlayerId, handle: Arc<AutoplayHandle>) -> Self {
        Self {
            player,
            handle,
            next_action_tick: 0,
            active: true,
        }
    }

    fn claim_spawn(&self, world: &mut WorldState) -> bool {
        // Up to a handful of draws to find open land; a crowded map just
        // waits for the next tick.
        for _ in 0..8 {
            let tile = world.rng.gen_range_u32(0, world.map.tile_count());
            if world.map.is_land(tile) && world.owner_of(tile).is_none() {
                for t in world.map.tiles_within(tile, 1) {
                    if world.map.is_land(t) && world.owner_of(t).is_none() {
                        world.conquer(t, &self.player);
                    }
                }
                if let Some(p) = world.player_mut(&self.player) {
                    p.spawned = true;
                }
                return true;
            }
        }
        false
    }

    /// Weakest adjacent opponent, or unclaimed land when the frontier is
    /// open. None when there is nothing to attack.
    fn pick_target(&self, world: &WorldState) -> Option<Option<PlayerId>> {
        if !world.border_tiles(&self.player, None).is_empty() {
            return Some(None);
        }
        let mut neighbors: Vec<PlayerId> = world
            .players()
            .filter(|p| {
                p.alive
                    && p.id != self.player
                    && !world.are_allied(&self.player, &p.id)
                    && !world.border_tiles(&self.player, Some(&p.id)).is_empty()
            })
            .map(|p| p.id.clone())
            .collect();
        if neighbors.is_empty() {
            return None;
        }
        neighbors.sort_by_key(|id| world.player(id).map(|p| p.tiles).unwrap_or(u32::MAX));
        Some(Some(neighbors.remove(0)))
    }
}

impl Execution for AutoPlayExecution {
    fn init(&mut self, world: &mut WorldState, tick: Tick) {
        if world.player(&self.player).is_none() {
            self.active = false;
            return;
        }
        let interval = world.config.difficulty.bot_attack_interval();
        self.next_action_tick = tick + world.rng.gen_range_u64(1, interval.max(2));
    }

    fn tick(&mut self, world: &mut WorldState, tick: Tick) {
        if !self.active {
            return;
        }
        if !self.handle.enabled() {
            self.active = false;
            return;
        }
        let Some(player) = world.player(&self.player) else {
            self.active = false;
            return;
        };
        if !player.alive {
            self.active = false;
            return;
        }

        if world.in_spawn_phase() {
            if !player.spawned {
                self.claim_spawn(world);
            }
            return;
        }

        if tick < self.next_action_tick {
            return;
        }
        let interval = world.config.difficulty.bot_attack_interval();
        self.next_action_tick = tick + interval + world.rng.gen_range_u64(0, interval.max(2));

        // Prefer the marked target when it still borders us.
        let marked = world
            .player(&self.player)
            .and_then(|p| p.target.clone())
            .filter(|t| {
                world.player(t).map(|p| p.alive).unwrap_or(false)
                    && !world.are_allied(&self.player, t)
                    && !world.border_tiles(&self.player, Some(t)).is_empty()
            });
        let target = match marked {
            Some(t) => Some(Some(t)),
            None => self.pick_target(world),
        };

        if let Some(target) = target {
            let ratio = self.handle.attack_ratio();
            world.push_deferred(Box::new(AttackExecution::new(
                self.player.clone(),
                target,
                Some(ratio),
            )));
        }
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn active_during_spawn_phase(&self) -> bool {
        true
    }

    fn owner(&self) -> Option<&PlayerId> {
        Some(&self.player)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::{GameConfig, GameId};

    fn setup() -> (WorldState, PlayerId) {
        let mut w = WorldState::new(GameId::new("autoplay-test"), GameConfig::default());
        let p = PlayerId::new("bot-0");
        w.add_player(p.clone(), "Bot 0".into(), true, None);
        (w, p)
    }

    #[test]
    fn controller_claims_spawn_during_spawn_phase() {
        let (mut w, p) = setup();
        let handle = AutoplayHandle::new(0.3);
        let mut auto = AutoPlayExecution::new(p.clone(), handle);
        auto.init(&mut w, 0);

        for t in 0..20 {
            auto.tick(&mut w, t);
            if w.player(&p).unwrap().spawned {
                break;
            }
        }
        assert!(w.player(&p).unwrap().spawned);
        assert!(w.player(&p).unwrap().tiles > 0);
    }

    #[test]
    fn disabled_handle_retires_controller() {
        let (mut w, p) = setup();
        let handle = AutoplayHandle::new(0.3);
        let mut auto = AutoPlayExecution::new(p, handle.clone());
        auto.init(&mut w, 0);
        auto.tick(&mut w, 0);
        assert!(auto.is_active());

        handle.disable();
        auto.tick(&mut w, 1);
        assert!(!auto.is_active());
    }

    #[test]
    fn ratio_updates_apply_without_reconstruction() {
        let handle = AutoplayHandle::new(0.3);
        assert!((handle.attack_ratio() - 0.3).abs() < 1e-9);
        handle.set_attack_ratio(0.8);
        assert!((handle.attack_ratio() - 0.8).abs() < 1e-9);
        handle.set_attack_ratio(42.0);
        assert_eq!(handle.attack_ratio(), 1.0);
    }

    #[test]
    fn controller_attacks_after_spawn_phase() {
        let (mut w, p) = setup();
        let handle = AutoplayHandle::new(0.5);
        let mut auto = AutoPlayExecution::new(p.clone(), handle);
        auto.init(&mut w, 0);
        auto.tick(&mut w, 0); // claims spawn

        if !w.player(&p).unwrap().spawned {
            return; // no land found on this seed draw; nothing to assert
        }
        w.tick = w.config.spawn_phase_ticks + 1;
        w.player_mut(&p).unwrap().troops = 10_000.0;

        let far_future = w.config.spawn_phase_ticks + 10_000;
        auto.tick(&mut w, far_future);
        assert!(
            !w.deferred.is_empty(),
            "controller should have queued an attack"
        );
    }
}
