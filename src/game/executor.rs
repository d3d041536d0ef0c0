//! Per-game intent dispatcher
//!
//! Maps admitted intents to concrete executions. Resolution failures and
//! cooldown violations degrade to no-op executions with a log line; one bad
//! intent never blocks the rest of its turn. The match over intent bodies
//! is exhaustive with no wildcard arm, so an unhandled variant is a compile
//! error rather than a silently dropped message.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use super::executions::{
    AllianceReplyExecution, AllianceRequestExecution, AttackExecution, AutoPlayExecution,
    AutoplayHandle, BreakAllianceExecution, ChatExecution, ConstructionExecution,
    DonateGoldExecution, DonateTroopsExecution, EmbargoExecution, EmojiExecution, Execution,
    MoveWarshipExecution, NoOpExecution, NukeExecution, QuickChatExecution, RetreatExecution,
    SpawnExecution, TargetPlayerExecution, TransportExecution, TroopRatioExecution,
};
use super::map::TileIdx;
use super::world::WorldState;
use super::{GameId, Intent, PlayerId, Roster, Turn};
use crate::ws::protocol::{IntentBody, UnitKind};

pub struct Executor {
    game_id: GameId,
    /// At most one live controller per player
    autoplay: HashMap<PlayerId, Arc<AutoplayHandle>>,
}

impl Executor {
    pub fn new(game_id: GameId) -> Self {
        Self {
            game_id,
            autoplay: HashMap::new(),
        }
    }

    /// Order-preserving map over a turn's intents.
    pub fn create_execs(
        &mut self,
        turn: &Turn,
        world: &WorldState,
        roster: &mut Roster,
    ) -> Vec<Box<dyn Execution>> {
        turn.intents
            .iter()
            .map(|intent| self.create_exec(intent, world, roster))
            .collect()
    }

    /// Dispatch one intent. Always returns an execution; invalid input
    /// yields an inert one.
    pub fn create_exec(
        &mut self,
        intent: &Intent,
        world: &WorldState,
        roster: &mut Roster,
    ) -> Box<dyn Execution> {
        let Some(player) = roster.player_for(&intent.client_id).cloned() else {
            warn!(
                game_id = %self.game_id,
                client_id = %intent.client_id,
                "intent from unresolved client"
            );
            return Box::new(NoOpExecution::new());
        };

        match &intent.body {
            IntentBody::Spawn { x, y } => match self.tile(world, *x, *y) {
                Some(tile) => Box::new(SpawnExecution::new(player, tile)),
                None => self.oob(&player, *x, *y),
            },

            IntentBody::Attack {
                target,
                troop_ratio,
            } => Box::new(AttackExecution::new(player, target.clone(), *troop_ratio)),

            IntentBody::CancelAttack { target } => {
                Box::new(RetreatExecution::new(player, target.clone()))
            }

            IntentBody::MoveWarship { unit_id, x, y } => match self.tile(world, *x, *y) {
                Some(tile) => Box::new(MoveWarshipExecution::new(player, *unit_id, tile)),
                None => self.oob(&player, *x, *y),
            },

            IntentBody::BatchMoveWarship { unit_ids, x, y } => match self.tile(world, *x, *y) {
                Some(tile) => Box::new(MoveWarshipExecution::batch(player, unit_ids.clone(), tile)),
                None => self.oob(&player, *x, *y),
            },

            IntentBody::Boat { x, y, troop_ratio } => match self.tile(world, *x, *y) {
                Some(tile) => Box::new(TransportExecution::new(player, tile, *troop_ratio)),
                None => self.oob(&player, *x, *y),
            },

            IntentBody::AllianceRequest { to } => {
                Box::new(AllianceRequestExecution::new(player, to.clone()))
            }

            IntentBody::AllianceReply { to, accept } => {
                Box::new(AllianceReplyExecution::new(player, to.clone(), *accept))
            }

            IntentBody::BreakAlliance { with } => {
                Box::new(BreakAllianceExecution::new(player, with.clone()))
            }

            IntentBody::TargetPlayer { target } => {
                Box::new(TargetPlayerExecution::new(player, target.clone()))
            }

            IntentBody::Emoji { emoji, to } => {
                Box::new(EmojiExecution::new(player, emoji.clone(), to.clone()))
            }

            IntentBody::DonateTroops { to, amount } => {
                Box::new(DonateTroopsExecution::new(player, to.clone(), *amount))
            }

            IntentBody::DonateGold { to, amount } => {
                Box::new(DonateGoldExecution::new(player, to.clone(), *amount))
            }

            IntentBody::TroopRatio { ratio } => Box::new(TroopRatioExecution::new(player, *ratio)),

            IntentBody::Embargo { target, on } => {
                Box::new(EmbargoExecution::new(player, target.clone(), *on))
            }

            IntentBody::BuildUnit { kind, x, y } => self.build_unit(player, *kind, *x, *y, world, roster),

            IntentBody::Chat { scope, body } => {
                Box::new(ChatExecution::new(player, scope.clone(), body.clone()))
            }

            IntentBody::QuickChat { key, to } => {
                Box::new(QuickChatExecution::new(player, key.clone(), to.clone()))
            }

            IntentBody::AutoplayToggle {
                enabled,
                attack_ratio,
            } => self.autoplay_toggle(player, *enabled, *attack_ratio),

            IntentBody::AutoplayUpdate { attack_ratio } => {
                match self.autoplay.get(&player) {
                    Some(handle) => handle.set_attack_ratio(*attack_ratio),
                    None => {
                        debug!(
                            game_id = %self.game_id,
                            player = %player,
                            "autoplay update without a controller"
                        );
                    }
                }
                Box::new(NoOpExecution::new())
            }
        }
    }

    fn build_unit(
        &mut self,
        player: PlayerId,
        kind: UnitKind,
        x: u32,
        y: u32,
        world: &WorldState,
        roster: &mut Roster,
    ) -> Box<dyn Execution> {
        if world.config.disabled_units.contains(&kind) {
            debug!(game_id = %self.game_id, player = %player, kind = ?kind, "unit disabled in this game");
            return Box::new(NoOpExecution::new());
        }
        let Some(tile) = self.tile(world, x, y) else {
            return self.oob(&player, x, y);
        };

        match kind {
            UnitKind::City
            | UnitKind::Port
            | UnitKind::DefensePost
            | UnitKind::MissileSilo
            | UnitKind::SamLauncher => {
                if !roster.build_allowed(&player, kind, world.tick, &world.config) {
                    warn!(
                        game_id = %self.game_id,
                        player = %player,
                        kind = ?kind,
                        tick = world.tick,
                        "build rejected by cooldown"
                    );
                    return Box::new(NoOpExecution::new());
                }
                roster.record_build(&player, kind, world.tick);
                Box::new(ConstructionExecution::new(player, kind, tile))
            }
            UnitKind::Nuke => Box::new(NukeExecution::new(player, tile)),
            UnitKind::Warship => Box::new(ConstructionExecution::new(player, kind, tile)),
            UnitKind::TransportBoat | UnitKind::Interceptor => {
                warn!(game_id = %self.game_id, player = %player, kind = ?kind, "unit is not directly buildable");
                Box::new(NoOpExecution::new())
            }
        }
    }

    fn autoplay_toggle(
        &mut self,
        player: PlayerId,
        enabled: bool,
        attack_ratio: Option<f64>,
    ) -> Box<dyn Execution> {
        // Evict any existing controller first; the old execution observes
        // the disabled handle and retires on its next tick.
        if let Some(old) = self.autoplay.remove(&player) {
            old.disable();
        }
        if !enabled {
            return Box::new(NoOpExecution::new());
        }
        let handle = AutoplayHandle::new(attack_ratio.unwrap_or(0.25));
        self.autoplay.insert(player.clone(), handle.clone());
        Box::new(AutoPlayExecution::new(player, handle))
    }

    /// Install a bot controller at game start.
    pub fn install_bot(&mut self, player: PlayerId, attack_ratio: f64) -> Box<dyn Execution> {
        self.autoplay_toggle(player, true, Some(attack_ratio))
    }

    pub fn autoplay_handle(&self, player: &PlayerId) -> Option<&Arc<AutoplayHandle>> {
        self.autoplay.get(player)
    }

    fn tile(&self, world: &WorldState, x: u32, y: u32) -> Option<TileIdx> {
        if world.map.in_bounds(x as i64, y as i64) {
            Some(world.map.tile(x, y))
        } else {
            None
        }
    }

    fn oob(&self, player: &PlayerId, x: u32, y: u32) -> Box<dyn Execution> {
        warn!(game_id = %self.game_id, player = %player, x, y, "intent tile out of bounds");
        Box::new(NoOpExecution::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::{ClientId, GameConfig, Tick};
    use crate::ws::protocol::GameEvent;

    fn setup() -> (Executor, WorldState, Roster, ClientId, PlayerId) {
        let game_id = GameId::new("exec-test");
        let executor = Executor::new(game_id.clone());
        let mut world = WorldState::new(
            game_id,
            GameConfig {
                instant_build: true,
                ..GameConfig::default()
            },
        );
        let client = ClientId::new("c1");
        let player = PlayerId::new("p1");
        let mut roster = Roster::default();
        roster.bind(client.clone(), player.clone(), "alice", 0);
        world.add_player(player.clone(), "alice".into(), false, None);
        {
            let p = world.player_mut(&player).unwrap();
            p.spawned = true;
            p.gold = 100_000.0;
        }
        let tile = (0..world.map.tile_count())
            .find(|t| world.map.is_land(*t))
            .unwrap();
        world.conquer(tile, &player);
        (executor, world, roster, client, player)
    }

    fn run_all(execs: Vec<Box<dyn Execution>>, world: &mut WorldState, tick: Tick) {
        for mut e in execs {
            e.init(world, tick);
            if e.is_active() {
                e.tick(world, tick);
            }
        }
    }

    fn build_intent(client: &ClientId, world: &WorldState, kind: UnitKind) -> Intent {
        let tile = (0..world.map.tile_count())
            .find(|t| world.owner_of(*t).is_some())
            .unwrap();
        let (x, y) = world.map.xy(tile);
        Intent {
            client_id: client.clone(),
            body: IntentBody::BuildUnit { kind, x, y },
        }
    }

    #[test]
    fn unresolved_client_degrades_to_noop() {
        let (mut executor, mut world, mut roster, _client, _player) = setup();
        let intent = Intent {
            client_id: ClientId::new("ghost"),
            body: IntentBody::TroopRatio { ratio: 0.5 },
        };
        let mut exec = executor.create_exec(&intent, &world, &mut roster);
        exec.init(&mut world, 0);
        assert!(!exec.is_active());
    }

    #[test]
    fn double_build_inside_cooldown_creates_one_construction() {
        let (mut executor, mut world, mut roster, client, _player) = setup();
        let turn = Turn {
            turn_number: 5,
            intents: vec![
                build_intent(&client, &world, UnitKind::City),
                build_intent(&client, &world, UnitKind::City),
            ],
        };
        world.tick = 5;
        let execs = executor.create_execs(&turn, &world, &mut roster);
        assert_eq!(execs.len(), 2, "order-preserving map, one exec per intent");

        run_all(execs, &mut world, 5);
        let started = world
            .events
            .iter()
            .filter(|e| matches!(e.event, GameEvent::ConstructionStarted { .. }))
            .count();
        assert_eq!(started, 1, "second build is a no-op");
    }

    #[test]
    fn build_outside_cooldown_is_admitted() {
        let (mut executor, mut world, mut roster, client, _player) = setup();

        world.tick = 5;
        let turn = Turn {
            turn_number: 5,
            intents: vec![build_intent(&client, &world, UnitKind::City)],
        };
        let execs = executor.create_execs(&turn, &world, &mut roster);
        run_all(execs, &mut world, 5);

        world.tick = 5 + world.config.same_kind_cooldown_ticks;
        let turn = Turn {
            turn_number: world.tick,
            intents: vec![build_intent(&client, &world, UnitKind::City)],
        };
        let tick = world.tick;
        let execs = executor.create_execs(&turn, &world, &mut roster);
        run_all(execs, &mut world, tick);

        let started = world
            .events
            .iter()
            .filter(|e| matches!(e.event, GameEvent::ConstructionStarted { .. }))
            .count();
        assert_eq!(started, 2);
    }

    #[test]
    fn cooldown_rejection_spends_nothing() {
        let (mut executor, mut world, mut roster, client, player) = setup();
        world.tick = 5;
        let turn = Turn {
            turn_number: 5,
            intents: vec![build_intent(&client, &world, UnitKind::City)],
        };
        let execs = executor.create_execs(&turn, &world, &mut roster);
        run_all(execs, &mut world, 5);
        let gold_after_first = world.player(&player).unwrap().gold;

        world.tick = 6;
        let turn = Turn {
            turn_number: 6,
            intents: vec![build_intent(&client, &world, UnitKind::City)],
        };
        let execs = executor.create_execs(&turn, &world, &mut roster);
        run_all(execs, &mut world, 6);
        assert_eq!(world.player(&player).unwrap().gold, gold_after_first);
    }

    #[test]
    fn autoplay_toggle_evicts_previous_controller() {
        let (mut executor, world, mut roster, client, player) = setup();
        let toggle = |enabled| Intent {
            client_id: client.clone(),
            body: IntentBody::AutoplayToggle {
                enabled,
                attack_ratio: Some(0.4),
            },
        };

        let _first = executor.create_exec(&toggle(true), &world, &mut roster);
        let first_handle = executor.autoplay_handle(&player).unwrap().clone();
        assert!(first_handle.enabled());

        let _second = executor.create_exec(&toggle(true), &world, &mut roster);
        assert!(!first_handle.enabled(), "old controller evicted");
        let second_handle = executor.autoplay_handle(&player).unwrap();
        assert!(second_handle.enabled());

        let _off = executor.create_exec(&toggle(false), &world, &mut roster);
        assert!(executor.autoplay_handle(&player).is_none());
    }

    #[test]
    fn autoplay_update_adjusts_live_ratio() {
        let (mut executor, world, mut roster, client, player) = setup();
        let _on = executor.create_exec(
            &Intent {
                client_id: client.clone(),
                body: IntentBody::AutoplayToggle {
                    enabled: true,
                    attack_ratio: Some(0.3),
                },
            },
            &world,
            &mut roster,
        );
        let _update = executor.create_exec(
            &Intent {
                client_id: client.clone(),
                body: IntentBody::AutoplayUpdate { attack_ratio: 0.9 },
            },
            &world,
            &mut roster,
        );
        let handle = executor.autoplay_handle(&player).unwrap();
        assert!((handle.attack_ratio() - 0.9).abs() < 1e-9);
    }

    #[test]
    fn disabled_unit_is_a_noop() {
        let (mut executor, mut world, mut roster, client, _player) = setup();
        world.config.disabled_units = vec![UnitKind::MissileSilo];
        let intent = build_intent(&client, &world, UnitKind::MissileSilo);
        let mut exec = executor.create_exec(&intent, &world, &mut roster);
        exec.init(&mut world, 0);
        assert!(!exec.is_active());
    }
}
