//! Single-tick diplomacy actions

use tracing::debug;

use super::Execution;
use crate::game::world::{AllianceRequest, WorldState};
use crate::game::{PlayerId, Tick};
use crate::ws::protocol::GameEvent;

macro_rules! fire_once {
    ($name:ident { $($field:ident : $ty:ty),* $(,)? }) => {
        pub struct $name {
            owner: PlayerId,
            $($field: $ty,)*
            done: bool,
        }

        impl $name {
            pub fn new(owner: PlayerId, $($field: $ty),*) -> Self {
                Self { owner, $($field,)* done: false }
            }
        }
    };
}

fire_once!(AllianceRequestExecution { to: PlayerId });

impl Execution for AllianceRequestExecution {
    fn init(&mut self, world: &mut WorldState, _tick: Tick) {
        let both_alive = world.player(&self.owner).map(|p| p.alive).unwrap_or(false)
            && world.player(&self.to).map(|p| p.alive).unwrap_or(false);
        if !both_alive || self.owner == self.to {
            self.done = true;
        }
    }

    fn tick(&mut self, world: &mut WorldState, tick: Tick) {
        if self.done {
            return;
        }
        self.done = true;

        if world.are_allied(&self.owner, &self.to) {
            return;
        }
        if world.pending_request(&self.owner, &self.to) {
            debug!(from = %self.owner, to = %self.to, "duplicate alliance request");
            return;
        }
        world.alliance_requests.push(AllianceRequest {
            from: self.owner.clone(),
            to: self.to.clone(),
            tick,
        });
        world.emit_to(
            GameEvent::AllianceRequested {
                from: self.owner.clone(),
                to: self.to.clone(),
            },
            vec![self.owner.clone(), self.to.clone()],
        );
    }

    fn is_active(&self) -> bool {
        !self.done
    }

    fn owner(&self) -> Option<&PlayerId> {
        Some(&self.owner)
    }
}

fire_once!(AllianceReplyExecution { to: PlayerId, accept: bool });

impl Execution for AllianceReplyExecution {
    fn init(&mut self, world: &mut WorldState, _tick: Tick) {
        if world.player(&self.owner).is_none() {
            self.done = true;
        }
    }

    fn tick(&mut self, world: &mut WorldState, _tick: Tick) {
        if self.done {
            return;
        }
        self.done = true;

        // The reply answers a request from `to` addressed to `owner`.
        if !world.remove_request(&self.to, &self.owner) {
            debug!(from = %self.to, to = %self.owner, "reply without pending request");
            return;
        }
        if self.accept {
            world.add_alliance(&self.owner, &self.to);
            world.emit(GameEvent::AllianceAccepted {
                a: self.to.clone(),
                b: self.owner.clone(),
            });
        } else {
            world.emit_to(
                GameEvent::AllianceRejected {
                    from: self.to.clone(),
                    to: self.owner.clone(),
                },
                vec![self.owner.clone(), self.to.clone()],
            );
        }
    }

    fn is_active(&self) -> bool {
        !self.done
    }

    fn owner(&self) -> Option<&PlayerId> {
        Some(&self.owner)
    }
}

fire_once!(BreakAllianceExecution { with: PlayerId });

impl Execution for BreakAllianceExecution {
    fn init(&mut self, world: &mut WorldState, _tick: Tick) {
        if !world.are_allied(&self.owner, &self.with) {
            self.done = true;
        }
    }

    fn tick(&mut self, world: &mut WorldState, _tick: Tick) {
        if self.done {
            return;
        }
        self.done = true;

        world.remove_alliance(&self.owner, &self.with);
        if let Some(p) = world.player_mut(&self.owner) {
            p.traitor = true;
        }
        world.emit(GameEvent::AllianceBroken {
            breaker: self.owner.clone(),
            with: self.with.clone(),
        });
    }

    fn is_active(&self) -> bool {
        !self.done
    }

    fn owner(&self) -> Option<&PlayerId> {
        Some(&self.owner)
    }
}

fire_once!(EmbargoExecution { target: PlayerId, on: bool });

impl Execution for EmbargoExecution {
    fn init(&mut self, world: &mut WorldState, _tick: Tick) {
        if world.player(&self.owner).is_none() || world.player(&self.target).is_none() {
            self.done = true;
        }
    }

    fn tick(&mut self, world: &mut WorldState, _tick: Tick) {
        if self.done {
            return;
        }
        self.done = true;

        let target = self.target.clone();
        if let Some(p) = world.player_mut(&self.owner) {
            if self.on {
                p.embargoes.insert(target);
            } else {
                p.embargoes.remove(&target);
            }
        }
        world.emit(GameEvent::EmbargoChanged {
            from: self.owner.clone(),
            to: self.target.clone(),
            on: self.on,
        });
    }

    fn is_active(&self) -> bool {
        !self.done
    }

    fn owner(&self) -> Option<&PlayerId> {
        Some(&self.owner)
    }
}

fire_once!(TargetPlayerExecution { target: PlayerId });

impl Execution for TargetPlayerExecution {
    fn init(&mut self, world: &mut WorldState, _tick: Tick) {
        if world.player(&self.owner).is_none() || world.player(&self.target).is_none() {
            self.done = true;
        }
    }

    fn tick(&mut self, world: &mut WorldState, _tick: Tick) {
        if self.done {
            return;
        }
        self.done = true;

        let target = self.target.clone();
        if let Some(p) = world.player_mut(&self.owner) {
            p.target = Some(target);
        }
        world.emit(GameEvent::TargetMarked {
            from: self.owner.clone(),
            target: self.target.clone(),
        });
    }

    fn is_active(&self) -> bool {
        !self.done
    }

    fn owner(&self) -> Option<&PlayerId> {
        Some(&self.owner)
    }
}

fire_once!(DonateTroopsExecution { to: PlayerId, amount: f64 });

impl Execution for DonateTroopsExecution {
    fn init(&mut self, world: &mut WorldState, _tick: Tick) {
        // Donations only flow between allies.
        if !world.are_allied(&self.owner, &self.to) || self.owner == self.to {
            debug!(from = %self.owner, to = %self.to, "troop donation outside alliance");
            self.done = true;
        }
    }

    fn tick(&mut self, world: &mut WorldState, _tick: Tick) {
        if self.done {
            return;
        }
        self.done = true;

        let amount = self.amount.max(0.0);
        let available = world.player(&self.owner).map(|p| p.troops).unwrap_or(0.0);
        let transferred = amount.min(available);
        if transferred <= 0.0 {
            return;
        }
        if let Some(p) = world.player_mut(&self.owner) {
            p.troops -= transferred;
        }
        if let Some(p) = world.player_mut(&self.to) {
            p.troops += transferred;
        }
        world.emit_to(
            GameEvent::TroopsDonated {
                from: self.owner.clone(),
                to: self.to.clone(),
                amount: transferred,
            },
            vec![self.owner.clone(), self.to.clone()],
        );
    }

    fn is_active(&self) -> bool {
        !self.done
    }

    fn owner(&self) -> Option<&PlayerId> {
        Some(&self.owner)
    }
}

fire_once!(DonateGoldExecution { to: PlayerId, amount: f64 });

impl Execution for DonateGoldExecution {
    fn init(&mut self, world: &mut WorldState, _tick: Tick) {
        if !world.are_allied(&self.owner, &self.to) || self.owner == self.to {
            debug!(from = %self.owner, to = %self.to, "gold donation outside alliance");
            self.done = true;
        }
    }

    fn tick(&mut self, world: &mut WorldState, _tick: Tick) {
        if self.done {
            return;
        }
        self.done = true;

        let amount = self.amount.max(0.0);
        let available = world.player(&self.owner).map(|p| p.gold).unwrap_or(0.0);
        let transferred = amount.min(available);
        if transferred <= 0.0 {
            return;
        }
        if let Some(p) = world.player_mut(&self.owner) {
            p.gold -= transferred;
        }
        if let Some(p) = world.player_mut(&self.to) {
            p.gold += transferred;
        }
        world.emit_to(
            GameEvent::GoldDonated {
                from: self.owner.clone(),
                to: self.to.clone(),
                amount: transferred,
            },
            vec![self.owner.clone(), self.to.clone()],
        );
    }

    fn is_active(&self) -> bool {
        !self.done
    }

    fn owner(&self) -> Option<&PlayerId> {
        Some(&self.owner)
    }
}

fire_once!(TroopRatioExecution { ratio: f64 });

impl Execution for TroopRatioExecution {
    fn init(&mut self, world: &mut WorldState, _tick: Tick) {
        if world.player(&self.owner).is_none() {
            self.done = true;
        }
    }

    fn tick(&mut self, world: &mut WorldState, _tick: Tick) {
        if self.done {
            return;
        }
        self.done = true;

        let ratio = self.ratio.clamp(0.01, 1.0);
        if let Some(p) = world.player_mut(&self.owner) {
            p.troop_ratio = ratio;
        }
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
        let mut w = WorldState::new(GameId::new("diplo-test"), GameConfig::default());
        let p1 = PlayerId::new("p1");
        let p2 = PlayerId::new("p2");
        w.add_player(p1.clone(), "a".into(), false, None);
        w.add_player(p2.clone(), "b".into(), false, None);
        (w, p1, p2)
    }

    fn run(exec: &mut dyn Execution, world: &mut WorldState, tick: Tick) {
        exec.init(world, tick);
        if exec.is_active() {
            exec.tick(world, tick);
        }
    }

    #[test]
    fn request_then_accept_forms_symmetric_alliance() {
        let (mut w, p1, p2) = setup();
        run(&mut AllianceRequestExecution::new(p1.clone(), p2.clone()), &mut w, 0);
        assert!(w.pending_request(&p1, &p2));

        run(&mut AllianceReplyExecution::new(p2.clone(), p1.clone(), true), &mut w, 1);
        assert!(w.are_allied(&p1, &p2));
        assert!(w.are_allied(&p2, &p1));
        assert!(!w.pending_request(&p1, &p2));
    }

    #[test]
    fn duplicate_request_is_ignored() {
        let (mut w, p1, p2) = setup();
        run(&mut AllianceRequestExecution::new(p1.clone(), p2.clone()), &mut w, 0);
        run(&mut AllianceRequestExecution::new(p1.clone(), p2.clone()), &mut w, 1);
        assert_eq!(w.alliance_requests.len(), 1);
    }

    #[test]
    fn reject_clears_request_without_alliance() {
        let (mut w, p1, p2) = setup();
        run(&mut AllianceRequestExecution::new(p1.clone(), p2.clone()), &mut w, 0);
        run(&mut AllianceReplyExecution::new(p2.clone(), p1.clone(), false), &mut w, 1);
        assert!(!w.are_allied(&p1, &p2));
        assert!(!w.pending_request(&p1, &p2));
    }

    #[test]
    fn breaking_marks_traitor() {
        let (mut w, p1, p2) = setup();
        w.add_alliance(&p1, &p2);
        run(&mut BreakAllianceExecution::new(p1.clone(), p2.clone()), &mut w, 0);
        assert!(!w.are_allied(&p1, &p2));
        assert!(w.player(&p1).unwrap().traitor);
        assert!(!w.player(&p2).unwrap().traitor);
    }

    #[test]
    fn donations_require_alliance_and_cap_at_balance() {
        let (mut w, p1, p2) = setup();
        w.player_mut(&p1).unwrap().troops = 100.0;

        // Not allied: no-op.
        run(&mut DonateTroopsExecution::new(p1.clone(), p2.clone(), 50.0), &mut w, 0);
        assert_eq!(w.player(&p2).unwrap().troops, 500.0);

        w.add_alliance(&p1, &p2);
        run(&mut DonateTroopsExecution::new(p1.clone(), p2.clone(), 500.0), &mut w, 1);
        assert_eq!(w.player(&p1).unwrap().troops, 0.0);
        assert_eq!(w.player(&p2).unwrap().troops, 600.0);
    }

    #[test]
    fn troop_ratio_is_clamped() {
        let (mut w, p1, _) = setup();
        run(&mut TroopRatioExecution::new(p1.clone(), 7.5), &mut w, 0);
        assert_eq!(w.player(&p1).unwrap().troop_ratio, 1.0);
        run(&mut TroopRatioExecution::new(p1.clone(), -3.0), &mut w, 1);
        assert_eq!(w.player(&p1).unwrap().troop_ratio, 0.01);
    }
}
