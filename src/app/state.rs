//! Worker-side application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::game::GameManagerHandle;

/// Shared state of one worker process.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub worker_id: usize,
    pub manager: GameManagerHandle,
}

impl AppState {
    pub fn new(config: Arc<Config>, worker_id: usize, manager: GameManagerHandle) -> Self {
        Self {
            config,
            worker_id,
            manager,
        }
    }
}
