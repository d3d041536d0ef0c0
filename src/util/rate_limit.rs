//! Transport-level rate limiting
//!
//! This guards the WebSocket read loop against message floods. It is
//! distinct from the tick-measured build cooldowns inside the simulation,
//! which live in the per-game roster.

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Rate limiter type alias
pub type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Create a rate limiter with the specified requests per second
pub fn create_limiter(requests_per_second: u32) -> Arc<Limiter> {
    let quota = Quota::per_second(NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN));
    Arc::new(RateLimiter::direct(quota))
}

/// Max intent/heartbeat messages per second on one socket
pub const SOCKET_MSG_RATE_LIMIT: u32 = 30;

/// Per-socket rate limiter state
#[derive(Clone)]
pub struct SocketRateLimiter {
    msg_limiter: Arc<Limiter>,
}

impl SocketRateLimiter {
    pub fn new() -> Self {
        Self {
            msg_limiter: create_limiter(SOCKET_MSG_RATE_LIMIT),
        }
    }

    /// Check if a message is allowed (returns true if allowed)
    pub fn check_msg(&self) -> bool {
        self.msg_limiter.check().is_ok()
    }
}

impl Default for SocketRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
