//! Territorial attack and retreat

use tracing::debug;

use super::Execution;
use crate::game::world::{WorldState, DEFENDED_MULTIPLIER, TILE_CAPTURE_COST};
use crate::game::{PlayerId, Tick};
use crate::ws::protocol::GameEvent;

/// Border tiles captured per tick at most, scaled down when troops run low.
const MAX_CAPTURES_PER_TICK: usize = 4;

/// A multi-tick territorial push by one player against another player's
/// territory, or against unclaimed land when `target` is None.
pub struct AttackExecution {
    owner: PlayerId,
    target: Option<PlayerId>,
    /// Explicit ratio overrides the player's standing troop ratio
    ratio_override: Option<f64>,
    troops: f64,
    active: bool,
}

impl AttackExecution {
    pub fn new(owner: PlayerId, target: Option<PlayerId>, ratio_override: Option<f64>) -> Self {
        Self {
            owner,
            target,
            ratio_override,
            troops: 0.0,
            active: true,
        }
    }

    /// Used by transports on landing: troops already detached from the
    /// player, committed directly to the beachhead.
    pub fn with_committed_troops(owner: PlayerId, target: Option<PlayerId>, troops: f64) -> Self {
        Self {
            owner,
            target,
            ratio_override: None,
            troops,
            active: true,
        }
    }

    fn refund(&mut self, world: &mut WorldState) {
        if self.troops > 0.0 {
            if let Some(p) = world.player_mut(&self.owner) {
                p.troops += self.troops / 2.0;
            }
            self.troops = 0.0;
        }
    }

    fn finish(&mut self, world: &mut WorldState) {
        self.active = false;
        world.emit(GameEvent::AttackEnded {
            attacker: self.owner.clone(),
            target: self.target.clone(),
        });
    }
}

impl Execution for AttackExecution {
    fn init(&mut self, world: &mut WorldState, _tick: Tick) {
        let Some(player) = world.player(&self.owner) else {
            self.active = false;
            return;
        };
        if !player.alive || !player.spawned {
            self.active = false;
            return;
        }
        if let Some(target) = &self.target {
            // Attacking an ally or a dead player is rejected at bind time.
            if world.are_allied(&self.owner, target)
                || !world.player(target).map(|p| p.alive).unwrap_or(false)
            {
                debug!(owner = %self.owner, target = %target, "attack target invalid");
                self.active = false;
                return;
            }
        }

        if self.troops == 0.0 {
            let ratio = self
                .ratio_override
                .unwrap_or(player.troop_ratio)
                .clamp(0.01, 1.0);
            let committed = player.troops * ratio;
            if committed < TILE_CAPTURE_COST {
                self.active = false;
                return;
            }
            if let Some(p) = world.player_mut(&self.owner) {
                p.troops -= committed;
            }
            self.troops = committed;
        }

        world.emit(GameEvent::AttackLaunched {
            attacker: self.owner.clone(),
            target: self.target.clone(),
            troops: self.troops,
        });
    }

    fn tick(&mut self, world: &mut WorldState, _tick: Tick) {
        if !self.active {
            return;
        }

        if world.retreat_ordered(&self.owner, self.target.as_ref()) {
            self.refund(world);
            self.finish(world);
            return;
        }

        if let Some(target) = &self.target {
            // Target eliminated, or became an ally mid-attack (alliance
            // accepted while fighting): stand down.
            let target_alive = world.player(target).map(|p| p.alive).unwrap_or(false);
            if !target_alive || world.are_allied(&self.owner, target) {
                self.refund(world);
                self.finish(world);
                return;
            }
        }

        let mut border = world.border_tiles(&self.owner, self.target.as_ref());
        if border.is_empty() || self.troops < TILE_CAPTURE_COST {
            self.refund(world);
            self.finish(world);
            return;
        }

        // Sample the frontier with the game rng so expansion direction is
        // varied but reproducible.
        world.rng.shuffle(&mut border);
        let captures = border
            .len()
            .min(MAX_CAPTURES_PER_TICK)
            .min((self.troops / TILE_CAPTURE_COST) as usize)
            .max(1);

        for tile in border.into_iter().take(captures) {
            let cost = match &self.target {
                Some(t) if world.is_defended(tile, t) => TILE_CAPTURE_COST * DEFENDED_MULTIPLIER,
                _ => TILE_CAPTURE_COST,
            };
            if self.troops < cost {
                break;
            }
            self.troops -= cost;
            world.conquer(tile, &self.owner);
        }

        if let Some(target) = self.target.clone() {
            world.check_elimination(&target);
        }
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn owner(&self) -> Option<&PlayerId> {
        Some(&self.owner)
    }
}

/// Single-tick cancel-attack: files a retreat order that matching attacks
/// observe on their next tick.
pub struct RetreatExecution {
    owner: PlayerId,
    target: Option<PlayerId>,
    done: bool,
}

impl RetreatExecution {
    pub fn new(owner: PlayerId, target: Option<PlayerId>) -> Self {
        Self {
            owner,
            target,
            done: false,
        }
    }
}

impl Execution for RetreatExecution {
    fn init(&mut self, world: &mut WorldState, _tick: Tick) {
        if world.player(&self.owner).is_none() {
            self.done = true;
        }
    }

    fn tick(&mut self, world: &mut WorldState, _tick: Tick) {
        if self.done {
            return;
        }
        world.file_retreat(self.owner.clone(), self.target.clone());
        self.done = true;
    }

    fn is_active(&self) -> bool {
        !self.done
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
        let mut w = WorldState::new(GameId::new("attack-test"), GameConfig::default());
        let p1 = PlayerId::new("p1");
        let p2 = PlayerId::new("p2");
        w.add_player(p1.clone(), "a".into(), false, None);
        w.add_player(p2.clone(), "b".into(), false, None);
        for p in [&p1, &p2] {
            w.player_mut(p).unwrap().spawned = true;
        }
        // Adjacent strips of land: p1 owns column 0, p2 owns column 1, on
        // whatever land tiles exist in the first rows.
        let mut claimed = 0;
        for tile in 0..w.map.tile_count() {
            if !w.map.is_land(tile) {
                continue;
            }
            let (x, _) = w.map.xy(tile);
            let right = tile + 1;
            if x + 1 < w.map.width() && w.map.is_land(right) {
                w.conquer(tile, &p1);
                w.conquer(right, &p2);
                claimed += 1;
                if claimed >= 4 {
                    break;
                }
            }
        }
        assert!(claimed > 0, "test map must have adjacent land pairs");
        (w, p1, p2)
    }

    #[test]
    fn attack_captures_border_tiles_and_spends_troops() {
        let (mut w, p1, p2) = setup();
        w.player_mut(&p1).unwrap().troops = 1_000.0;
        let before_tiles = w.player(&p2).unwrap().tiles;

        let mut attack = AttackExecution::new(p1.clone(), Some(p2.clone()), Some(0.5));
        attack.init(&mut w, 0);
        assert!(attack.is_active());

        attack.tick(&mut w, 1);
        assert!(w.player(&p2).unwrap().tiles < before_tiles);
        assert!(w.player(&p1).unwrap().troops < 1_000.0);
    }

    #[test]
    fn attack_on_ally_is_rejected_at_init() {
        let (mut w, p1, p2) = setup();
        w.add_alliance(&p1, &p2);
        let mut attack = AttackExecution::new(p1, Some(p2), None);
        attack.init(&mut w, 0);
        assert!(!attack.is_active());
    }

    #[test]
    fn retreat_order_ends_attack_with_refund() {
        let (mut w, p1, p2) = setup();
        w.player_mut(&p1).unwrap().troops = 1_000.0;

        let mut attack = AttackExecution::new(p1.clone(), Some(p2.clone()), Some(0.5));
        attack.init(&mut w, 0);
        let committed_pool = w.player(&p1).unwrap().troops;

        let mut retreat = RetreatExecution::new(p1.clone(), Some(p2));
        retreat.init(&mut w, 1);
        retreat.tick(&mut w, 1);
        assert!(!retreat.is_active());

        attack.tick(&mut w, 2);
        assert!(!attack.is_active());
        // Half of the committed troops came back.
        assert!(w.player(&p1).unwrap().troops > committed_pool);
    }

    #[test]
    fn attack_never_resurrects() {
        let (mut w, p1, p2) = setup();
        w.player_mut(&p1).unwrap().troops = 1_000.0;
        let mut attack = AttackExecution::new(p1.clone(), Some(p2), Some(0.5));
        attack.init(&mut w, 0);
        w.file_retreat(p1, None);
        attack.tick(&mut w, 1);
        assert!(!attack.is_active());
        attack.tick(&mut w, 2);
        assert!(!attack.is_active());
    }
}
