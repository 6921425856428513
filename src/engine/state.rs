//! Shared application state.
//!
//! One explicit container for everything the runner and its observers
//! touch, handed around as `Arc<AppState>` instead of living in a global.

use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::AppConfig;
use crate::engine::definitions::DefinitionStore;
use crate::engine::events::EventBus;
use crate::engine::logs::LogFeed;
use crate::engine::storage::RunStore;

pub struct AppState {
    pub definitions: RwLock<DefinitionStore>,
    pub runs: RunStore,
    pub logs: LogFeed,
    pub events: Arc<EventBus>,
}

impl AppState {
    pub fn new(definitions: DefinitionStore, max_runs_per_flow: usize) -> Self {
        let events = Arc::new(EventBus::new());
        Self {
            definitions: RwLock::new(definitions),
            runs: RunStore::new(events.clone(), max_runs_per_flow),
            logs: LogFeed::new(),
            events,
        }
    }

    pub fn from_config(definitions: DefinitionStore, config: &AppConfig) -> Self {
        Self::new(definitions, config.max_runs_per_flow)
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(DefinitionStore::new(), AppConfig::default().max_runs_per_flow)
    }
}
