// ============================================================================
// CACHE SERVICE - single entry point for request handlers
// ============================================================================
//
// Constructed once at startup and injected through `AppState`. Read paths go
// through `cached`/`wrap`/`warm_or_cached`, write paths call `invalidate`
// after the data-store commit.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use shared::{CacheBackendKind, CacheConfig, Config};
use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{info, warn};

use crate::cache::{
    CacheBackend, CacheHealth, CachePolicy, CacheStats, CacheStore, Cached, CallSignature,
    EntityFamily, InvalidationReport, Invalidator, MemoryBackend, RedisBackend, TenantId,
    TenantScope, WarmCache, WarmKey,
};
use crate::tasks::cache_warmer::{BackgroundWarmer, TenantDirectory, WarmTask, WarmerState};

pub struct CacheService {
    store: Arc<CacheStore>,
    invalidator: Invalidator,
    warm: Arc<WarmCache>,
    warmer: OnceLock<BackgroundWarmer>,
    warm_interval: Duration,
}

impl CacheService {
    /// Opens the distributed tier on `backend`; an unreachable backend yields
    /// a disabled service.
    pub async fn open(backend: Arc<dyn CacheBackend>, config: &CacheConfig) -> Self {
        if !config.enabled {
            return Self::disabled(config);
        }
        let store = CacheStore::open(backend, config.key_prefix.clone()).await;
        Self::from_store(Arc::new(store), config)
    }

    pub fn disabled(config: &CacheConfig) -> Self {
        Self::from_store(Arc::new(CacheStore::disabled(config.key_prefix.clone())), config)
    }

    /// Builds the configured backend and opens it. Never fails: any problem
    /// reaching the backend leaves the service running without the distributed tier.
    pub async fn connect(config: &Config) -> Self {
        let cache = &config.cache;
        if !cache.enabled {
            info!("Caching disabled by configuration");
            return Self::disabled(cache);
        }

        let backend: Arc<dyn CacheBackend> = match cache.backend {
            CacheBackendKind::Memory => Arc::new(MemoryBackend::new()),
            CacheBackendKind::Redis => {
                match RedisBackend::from_config(&config.redis, cache.scan_batch_size) {
                    Ok(backend) => Arc::new(backend),
                    Err(e) => {
                        warn!(error = %e, "⚠️ Redis pool unavailable, caching disabled for this process");
                        return Self::disabled(cache);
                    }
                }
            }
        };

        Self::open(backend, cache).await
    }

    fn from_store(store: Arc<CacheStore>, config: &CacheConfig) -> Self {
        Self {
            invalidator: Invalidator::new(Arc::clone(&store)),
            store,
            warm: Arc::new(WarmCache::new(Duration::from_secs(config.warm_ttl_seconds))),
            warmer: OnceLock::new(),
            warm_interval: Duration::from_secs(config.warm_interval_seconds),
        }
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_enabled()
    }

    // ------------------------------------------------------------------------
    // Read path
    // ------------------------------------------------------------------------

    pub async fn cached<T, E, F, Fut>(
        &self,
        policy: &CachePolicy,
        signature: &CallSignature,
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.store.cached(policy, signature, compute).await
    }

    /// Composes `operation` with read-through caching under `policy`.
    pub fn wrap<F>(&self, policy: CachePolicy, operation: F) -> Cached<F> {
        Cached::new(Arc::clone(&self.store), policy, operation)
    }

    /// Serves the warm aggregate when fresh, otherwise reads through the
    /// distributed tier.
    pub async fn warm_or_cached<T, E, F, Fut>(
        &self,
        tenant: &TenantId,
        aggregate: &str,
        policy: &CachePolicy,
        signature: &CallSignature,
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(warm) = self.get_warm_as::<T>(tenant, aggregate).await {
            return Ok(warm);
        }
        self.store.cached(policy, signature, compute).await
    }

    // ------------------------------------------------------------------------
    // Write path
    // ------------------------------------------------------------------------

    /// Call after the write commits and before responding.
    pub async fn invalidate(
        &self,
        scope: impl Into<TenantScope>,
        family: EntityFamily,
        entity_id: Option<&str>,
    ) -> InvalidationReport {
        self.invalidator
            .invalidate(&scope.into(), family, entity_id)
            .await
    }

    pub async fn invalidate_tenant_cache(
        &self,
        tenant: &TenantId,
        family: Option<EntityFamily>,
    ) -> u64 {
        self.invalidator
            .invalidate_tenant_cache(&TenantScope::from(tenant), family)
            .await
    }

    // ------------------------------------------------------------------------
    // Warm tier
    // ------------------------------------------------------------------------

    /// Fresh warm data for the aggregate. A tenant the directory lists but the
    /// warmer has not seen yet is enrolled on this first lookup, so the next
    /// wave covers it.
    pub async fn get_warm(&self, tenant: &TenantId, aggregate: &str) -> Option<Value> {
        self.enroll_on_lookup(tenant).await;
        self.warm.get_warm(&WarmKey::new(tenant.clone(), aggregate))
    }

    pub async fn get_warm_as<T: DeserializeOwned>(
        &self,
        tenant: &TenantId,
        aggregate: &str,
    ) -> Option<T> {
        self.enroll_on_lookup(tenant).await;
        self.warm
            .get_warm_as(&WarmKey::new(tenant.clone(), aggregate))
    }

    async fn enroll_on_lookup(&self, tenant: &TenantId) {
        if let Some(warmer) = self.warmer.get() {
            if !warmer.is_enrolled(tenant) {
                warmer.enroll_if_listed(tenant).await;
            }
        }
    }

    /// Starts the background warmer with `tasks` and enrolls every tenant the
    /// directory reports. Can be called once.
    pub async fn start_warmer(
        &self,
        tasks: Vec<Arc<dyn WarmTask>>,
        directory: Arc<dyn TenantDirectory>,
    ) -> anyhow::Result<usize> {
        let warmer = BackgroundWarmer::new(
            Arc::clone(&self.warm),
            tasks,
            self.warm_interval,
            directory,
        );
        if self.warmer.set(warmer).is_err() {
            anyhow::bail!("cache warmer already started");
        }
        match self.warmer.get() {
            Some(warmer) => warmer.start().await,
            None => anyhow::bail!("cache warmer failed to initialize"),
        }
    }

    /// Onboarding hook; also re-enrolls a withdrawn tenant. No-op until the
    /// warmer is started.
    pub fn enroll_tenant(&self, tenant: &TenantId) -> bool {
        self.warmer
            .get()
            .map(|warmer| warmer.enroll(tenant.clone()))
            .unwrap_or(false)
    }

    /// Offboarding: stops the tenant's warm loop and drops its warm entries.
    /// Later lookups do not enroll the tenant again.
    pub async fn withdraw_tenant(&self, tenant: &TenantId) -> bool {
        match self.warmer.get() {
            Some(warmer) => warmer.withdraw(tenant).await,
            None => self.warm.remove_tenant(tenant) > 0,
        }
    }

    pub fn warmer_state(&self, tenant: &TenantId) -> Option<WarmerState> {
        self.warmer.get().and_then(|warmer| warmer.state(tenant))
    }

    // ------------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------------

    pub async fn health_check(&self) -> CacheHealth {
        self.store.health_check().await
    }

    pub fn stats(&self) -> CacheStats {
        self.store.stats()
    }

    pub fn warm_entries(&self) -> usize {
        self.warm.len()
    }

    /// Stops the warmer, then releases the distributed tier.
    pub async fn close(&self) {
        if let Some(warmer) = self.warmer.get() {
            warmer.shutdown().await;
        }
        self.store.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::cache_warmer::StaticTenantDirectory;
    use async_trait::async_trait;
    use serde_json::json;

    struct ArrivalsTask;

    #[async_trait]
    impl WarmTask for ArrivalsTask {
        fn name(&self) -> &str {
            "arrivals"
        }

        async fn compute(&self, tenant: &TenantId) -> anyhow::Result<Value> {
            Ok(json!({ "tenant": tenant.as_str() }))
        }
    }

    fn config() -> CacheConfig {
        CacheConfig {
            backend: CacheBackendKind::Memory,
            ..CacheConfig::default()
        }
    }

    #[tokio::test]
    async fn disabled_by_configuration() {
        let config = CacheConfig {
            enabled: false,
            ..config()
        };
        let service = CacheService::open(Arc::new(MemoryBackend::new()), &config).await;
        assert!(!service.is_enabled());
    }

    #[tokio::test]
    async fn connect_with_memory_backend() {
        let config = Config {
            cache: config(),
            ..Config::default()
        };
        let service = CacheService::connect(&config).await;
        assert!(service.is_enabled());
        assert_eq!(service.health_check().await.backend, "memory");
    }

    #[tokio::test]
    async fn connect_with_unreachable_redis_degrades() {
        let mut config = Config::default();
        config.redis.url = "redis://127.0.0.1:1".to_string();
        config.redis.connection_timeout_seconds = 1;
        config.cache.backend = CacheBackendKind::Redis;

        let service = CacheService::connect(&config).await;
        assert!(!service.is_enabled());
    }

    #[tokio::test]
    async fn enroll_is_a_no_op_before_the_warmer_starts() {
        let service = CacheService::open(Arc::new(MemoryBackend::new()), &config()).await;
        let tenant = TenantId::new("t1").unwrap();
        assert!(!service.enroll_tenant(&tenant));
        assert_eq!(service.warmer_state(&tenant), None);
        assert_eq!(service.get_warm(&tenant, "dashboard").await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn lookups_do_not_undo_offboarding() {
        let service = CacheService::open(Arc::new(MemoryBackend::new()), &config()).await;
        let offboarded = TenantId::new("offboarded").unwrap();
        let directory = StaticTenantDirectory::new(vec![offboarded.clone()]);
        service
            .start_warmer(vec![Arc::new(ArrivalsTask)], Arc::new(directory))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(service.get_warm(&offboarded, "arrivals").await.is_some());

        assert!(service.withdraw_tenant(&offboarded).await);
        assert_eq!(service.get_warm(&offboarded, "arrivals").await, None);
        assert_eq!(service.warmer_state(&offboarded), None);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(service.get_warm(&offboarded, "arrivals").await, None);
        assert_eq!(service.warm_entries(), 0);

        for i in 0..50 {
            let unknown = TenantId::new(format!("made-up-{}", i)).unwrap();
            assert_eq!(service.get_warm(&unknown, "arrivals").await, None);
            assert_eq!(service.warmer_state(&unknown), None);
        }
        service.close().await;
    }
}
