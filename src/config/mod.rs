//! Configuration module - environment variable parsing

use std::env;

/// Application configuration loaded from environment variables.
///
/// The same configuration is read by the master and by every worker it
/// forks; workers derive their own port from `base_port` and `WORKER_ID`.
#[derive(Clone, Debug)]
pub struct Config {
    /// Master listen port. Worker n listens on base_port + 1 + n.
    pub base_port: u16,
    /// Number of worker processes the master forks and supervises
    pub num_workers: usize,
    /// Environment label reported on /api/env
    pub game_env: String,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Shared secret for administrative endpoints (x-admin-token header)
    pub admin_token: String,
    /// HMAC secret for JWT verification. Raw-UUID tokens are accepted as
    /// anonymous persistent ids regardless of this setting.
    pub token_secret: String,

    /// Allowed client origins for CORS (comma-separated)
    pub client_origin: String,

    /// Delay between worker forks at boot
    pub fork_stagger_ms: u64,
    /// Delay before reforking an exited worker
    pub refork_delay_ms: u64,
    /// A worker still not ready this long after spawn is force-reforked
    pub worker_boot_timeout_ms: u64,
    /// Period of the expected/running/ready divergence check
    pub health_check_ms: u64,
    /// Period of the public lobby refresh poll
    pub lobby_poll_ms: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let base_port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .map_err(|_| ConfigError::Invalid("PORT"))?;

        let num_workers = env::var("NUM_WORKERS")
            .unwrap_or_else(|_| "2".to_string())
            .parse()
            .map_err(|_| ConfigError::Invalid("NUM_WORKERS"))?;
        if num_workers == 0 {
            return Err(ConfigError::Invalid("NUM_WORKERS"));
        }

        Ok(Self {
            base_port,
            num_workers,
            game_env: env::var("GAME_ENV").unwrap_or_else(|_| "dev".to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),

            admin_token: env::var("ADMIN_TOKEN").map_err(|_| ConfigError::Missing("ADMIN_TOKEN"))?,
            token_secret: env::var("TOKEN_SECRET")
                .map_err(|_| ConfigError::Missing("TOKEN_SECRET"))?,

            client_origin: env::var("CLIENT_ORIGIN").unwrap_or_else(|_| "*".to_string()),

            fork_stagger_ms: env_u64("FORK_STAGGER_MS", 250)?,
            refork_delay_ms: env_u64("REFORK_DELAY_MS", 1_000)?,
            worker_boot_timeout_ms: env_u64("WORKER_BOOT_TIMEOUT_MS", 60_000)?,
            health_check_ms: env_u64("HEALTH_CHECK_MS", 30_000)?,
            lobby_poll_ms: env_u64("LOBBY_POLL_MS", 2_000)?,
        })
    }

    /// Port this worker listens on
    pub fn worker_port(&self, worker_id: usize) -> u16 {
        crate::util::hash::worker_port(self.base_port, worker_id)
    }

    /// Base URL of the master's control plane, as seen from a worker
    pub fn master_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.base_port)
    }

    /// Base URL of a worker's control plane, as seen from the master
    pub fn worker_url(&self, worker_id: usize) -> String {
        format!(
            "http://127.0.0.1:{}{}",
            self.worker_port(worker_id),
            crate::util::hash::worker_path(worker_id)
        )
    }
}

fn env_u64(key: &'static str, default: u64) -> Result<u64, ConfigError> {
    match env::var(key) {
        Ok(v) => v.parse().map_err(|_| ConfigError::Invalid(key)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),
}
