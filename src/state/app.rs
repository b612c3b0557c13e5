use std::sync::Arc;

use crate::config::AppConfig;
use crate::services::keygen::KeyPolicy;
use crate::services::rate_limit::RateLimits;
use crate::services::sweeper::Sweeper;
use crate::state::store::RecordStore;

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: RecordStore,
    pub sweeper: Arc<Sweeper>,
    pub limits: Arc<RateLimits>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(
        store: RecordStore,
        sweeper: Sweeper,
        limits: RateLimits,
        config: AppConfig,
    ) -> Self {
        Self {
            store,
            sweeper: Arc::new(sweeper),
            limits: Arc::new(limits),
            config: Arc::new(config),
        }
    }

    pub fn key_policy(&self) -> KeyPolicy {
        KeyPolicy::from(self.config.as_ref())
    }
}
