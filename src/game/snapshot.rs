//! Snapshot building for network transmission

use super::world::WorldState;
use super::Roster;
use crate::ws::protocol::{PlayerSnapshot, ServerMsg, UnitSnapshot};

/// Builds periodic full-state snapshots. Events go out every tick; the
/// full player/unit picture only every `snapshot_interval` ticks.
pub struct SnapshotBuilder {
    /// Tick counter since last snapshot
    ticks_since_snapshot: u64,
    /// Snapshot interval in ticks
    snapshot_interval: u64,
}

impl SnapshotBuilder {
    pub fn new(snapshot_interval: u64) -> Self {
        Self {
            ticks_since_snapshot: 0,
            snapshot_interval,
        }
    }

    /// Check if it's time to send a snapshot
    pub fn should_send(&mut self) -> bool {
        self.ticks_since_snapshot += 1;
        if self.ticks_since_snapshot >= self.snapshot_interval {
            self.ticks_since_snapshot = 0;
            true
        } else {
            false
        }
    }

    /// Force snapshot on next check (used for important transitions)
    pub fn force_next(&mut self) {
        self.ticks_since_snapshot = self.snapshot_interval;
    }

    /// Build a snapshot message
    pub fn build(&self, world: &WorldState, roster: &Roster) -> ServerMsg {
        let players: Vec<PlayerSnapshot> = world
            .players()
            .map(|p| PlayerSnapshot {
                player_id: p.id.clone(),
                username: p.username.clone(),
                is_bot: p.is_bot,
                troops: p.troops,
                gold: p.gold,
                tiles: p.tiles,
                alive: p.alive,
                connected: roster
                    .data(&p.id)
                    .map(|d| !d.is_disconnected && d.client_id.is_some())
                    .unwrap_or(false),
            })
            .collect();

        let units: Vec<UnitSnapshot> = world
            .units()
            .filter(|u| u.active)
            .map(|u| UnitSnapshot {
                unit_id: u.id,
                kind: u.kind,
                owner: u.owner.clone(),
                tile: u.tile,
            })
            .collect();

        ServerMsg::Snapshot {
            tick: world.tick,
            players,
            units,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_cadence() {
        let mut b = SnapshotBuilder::new(3);
        assert!(!b.should_send());
        assert!(!b.should_send());
        assert!(b.should_send());
        assert!(!b.should_send());

        b.force_next();
        assert!(b.should_send());
    }
}
