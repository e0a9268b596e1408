// Application state module
// Shared between connections: configuration, the engine and cached flags

use std::sync::atomic::AtomicBool;

use super::types::Config;
use crate::engine::Engine;

/// Application state
pub struct AppState {
    pub config: Config,
    pub engine: Engine,

    // Cached config values for fast access without locks
    pub cached_access_log: AtomicBool,
}

impl AppState {
    pub fn new(config: &Config, engine: Engine) -> Self {
        Self {
            config: config.clone(),
            engine,
            cached_access_log: AtomicBool::new(config.logging.access_log),
        }
    }
}
