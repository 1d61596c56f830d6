use shared::Config;
use std::sync::Arc;

use crate::services::CacheService;
use crate::tasks::{StaticTenantDirectory, WarmTask};

/// Shared application state, injected into every handler.
#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<CacheService>,
    pub config: Arc<Config>,
}

impl AppState {
    /// Connects the cache service described by `config` and starts the
    /// warmer for the tenants in `CACHE_WARM_TENANTS`. An unreachable backend
    /// leaves the service running without the distributed tier; only an
    /// invalid tenant list fails.
    pub async fn new(config: Config, warm_tasks: Vec<Arc<dyn WarmTask>>) -> anyhow::Result<Self> {
        let directory = StaticTenantDirectory::from_ids(&config.cache.warm_tenants)?;
        let cache = CacheService::connect(&config).await;
        cache.start_warmer(warm_tasks, Arc::new(directory)).await?;
        Ok(Self::with_cache(Arc::new(cache), config))
    }

    pub fn with_cache(cache: Arc<CacheService>, config: Config) -> Self {
        Self {
            cache,
            config: Arc::new(config),
        }
    }
}
