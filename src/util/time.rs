//! Time utilities and scheduling constants for the simulation

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Get current Unix timestamp in milliseconds
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Server start time for uptime tracking
static SERVER_START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize server start time (call once at startup)
pub fn init_server_time() {
    SERVER_START.get_or_init(Instant::now);
}

/// Get server uptime in seconds
pub fn uptime_secs() -> u64 {
    SERVER_START
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0)
}

/// Simulation tick period. Every started game advances one turn per tick.
pub const TICK_MILLIS: u64 = 100;

/// Outer lifecycle sweep period (lobby -> prestart -> start, finished -> end).
pub const LIFECYCLE_SWEEP_MILLIS: u64 = 1_000;

/// Liveness sweep period for disconnect detection.
pub const LIVENESS_SWEEP_MILLIS: u64 = 4_000;

/// A client whose last heartbeat is older than this is considered gone.
pub const HEARTBEAT_TIMEOUT_MILLIS: u64 = 20_000;

/// Full player snapshots go out every N ticks; events go out every tick.
pub const SNAPSHOT_EVERY_TICKS: u64 = 10;

/// Grace window between the prestart notification and the actual start,
/// giving connected clients time to load the map.
pub const PRESTART_GRACE_MILLIS: u64 = 5_000;

/// Public lobbies that sat unstarted this long are force-started (with
/// clients) or torn down (empty).
pub const LOBBY_MAX_AGE_MILLIS: u64 = 60_000;

/// A simple timer for measuring durations
#[derive(Debug, Clone)]
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    pub fn reset(&mut self) {
        self.start = Instant::now();
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
