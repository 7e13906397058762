//! Application state module: the process-wide singletons every request
//! handler shares (§5).

use std::sync::Arc;

use crate::cache::{Cache, CacheStore};
use crate::rate_limit::RateLimiter;
use crate::render::{RenderEngine, Renderer};

use super::types::GlobalConfig;

pub struct AppState {
    pub config: GlobalConfig,
    pub cache: Arc<dyn Cache>,
    pub engine: Arc<dyn Renderer>,
    pub rate_limiter: RateLimiter,
}

impl AppState {
    pub fn new(config: GlobalConfig) -> Self {
        let cache: Arc<dyn Cache> = Arc::new(CacheStore::new(&config.cache_dir));
        let engine: Arc<dyn Renderer> = Arc::new(RenderEngine::new());
        Self {
            config,
            cache,
            engine,
            rate_limiter: RateLimiter::new(100, std::time::Duration::from_secs(15 * 60)),
        }
    }
}
