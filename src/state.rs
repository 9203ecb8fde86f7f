//! Application state shared across the web surface.

use crate::config::Config;
use crate::engine::MemoryEngine;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub engine: Arc<MemoryEngine>,
}

impl AppState {
    pub fn new(config: Arc<Config>, engine: Arc<MemoryEngine>) -> Self {
        Self { config, engine }
    }
}
