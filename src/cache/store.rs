// ============================================================================
// CACHE STORE - distributed tier facade
// ============================================================================
//
// The backend is an optional accelerator. If it cannot be reached when the
// store opens, the store is disabled for the rest of the process: every get
// is a miss and every write is a no-op. Restarting is the recovery path.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::backend::CacheBackend;
use super::key::CacheKey;
use crate::observability::metrics::{record_cache_access, record_cache_write};

/// Envelope stored for every entry.
#[derive(Debug, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub value: T,
    pub stored_at: DateTime<Utc>,
    pub ttl_seconds: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStatus {
    Healthy,
    Unhealthy,
    Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheHealth {
    pub status: CacheStatus,
    pub backend: String,
    pub connected_clients: Option<u64>,
    pub used_memory: Option<String>,
    pub total_keys: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub write_failures: u64,
    pub deletions: u64,
    pub hit_rate: f64,
}

#[derive(Default)]
struct StatCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    write_failures: AtomicU64,
    deletions: AtomicU64,
}

pub struct CacheStore {
    backend: Option<Arc<dyn CacheBackend>>,
    backend_name: &'static str,
    key_prefix: String,
    closed: AtomicBool,
    stats: StatCounters,
}

impl CacheStore {
    /// Connects to the backend with a single liveness check.
    pub async fn open(backend: Arc<dyn CacheBackend>, key_prefix: impl Into<String>) -> Self {
        let key_prefix = key_prefix.into();
        let backend_name = backend.name();

        match backend.ping().await {
            Ok(()) => {
                info!(backend = backend_name, prefix = %key_prefix, "✅ Cache store connected");
                Self::with_backend(Some(backend), backend_name, key_prefix)
            }
            Err(e) => {
                warn!(
                    backend = backend_name,
                    error = %e,
                    "⚠️ Cache backend unreachable at startup, caching disabled for this process"
                );
                Self::with_backend(None, backend_name, key_prefix)
            }
        }
    }

    pub fn disabled(key_prefix: impl Into<String>) -> Self {
        Self::with_backend(None, "none", key_prefix.into())
    }

    fn with_backend(
        backend: Option<Arc<dyn CacheBackend>>,
        backend_name: &'static str,
        key_prefix: String,
    ) -> Self {
        Self {
            backend,
            backend_name,
            key_prefix,
            closed: AtomicBool::new(false),
            stats: StatCounters::default(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.active_backend().is_some()
    }

    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    fn active_backend(&self) -> Option<&Arc<dyn CacheBackend>> {
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        self.backend.as_ref()
    }

    fn full_key(&self, key: &CacheKey) -> String {
        format!("{}{}", self.key_prefix, key.render())
    }

    /// Reads an entry. Backend errors and undecodable payloads are misses;
    /// undecodable payloads are also deleted so they are never served.
    pub async fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let found = self.lookup(key).await;
        let namespace = key.namespace();
        if found.is_some() {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            record_cache_access(self.backend_name, namespace, true);
        } else {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            record_cache_access(self.backend_name, namespace, false);
        }
        found
    }

    async fn lookup<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let backend = self.active_backend()?;
        let full_key = self.full_key(key);

        let raw = match backend.get(&full_key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!(key = %full_key, "Cache MISS");
                return None;
            }
            Err(e) => {
                error!(key = %full_key, error = %e, "Cache read failed, treating as miss");
                return None;
            }
        };

        match serde_json::from_str::<CacheEntry<T>>(&raw) {
            Ok(entry) => {
                debug!(key = %full_key, stored_at = %entry.stored_at, "Cache HIT");
                Some(entry.value)
            }
            Err(e) => {
                warn!(key = %full_key, error = %e, "Discarding undecodable cache entry");
                if let Err(e) = backend.del(&full_key).await {
                    error!(key = %full_key, error = %e, "Failed to delete undecodable cache entry");
                }
                None
            }
        }
    }

    /// Stores a value. Never fails: serialization or backend errors are logged
    /// and the write is dropped. Returns whether the entry was written.
    pub async fn set<T: Serialize>(&self, key: &CacheKey, value: &T, ttl: Duration) -> bool {
        let Some(backend) = self.active_backend() else {
            return false;
        };
        if ttl.is_zero() {
            debug!(key = %key, "Zero TTL, skipping cache write");
            record_cache_write("skipped");
            return false;
        }
        // Backends expire in whole seconds; partial seconds round up.
        let ttl_seconds = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);

        let full_key = self.full_key(key);
        let entry = CacheEntry {
            value,
            stored_at: Utc::now(),
            ttl_seconds,
        };
        let payload = match serde_json::to_string(&entry) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(key = %full_key, error = %e, "Failed to serialize cache value, not storing");
                self.stats.write_failures.fetch_add(1, Ordering::Relaxed);
                record_cache_write("serialization_failed");
                return false;
            }
        };

        match backend.set_ex(&full_key, payload, ttl_seconds).await {
            Ok(()) => {
                debug!(key = %full_key, ttl = ttl_seconds, "🔑 Cache entry stored");
                self.stats.writes.fetch_add(1, Ordering::Relaxed);
                record_cache_write("stored");
                true
            }
            Err(e) => {
                error!(key = %full_key, error = %e, "Cache write failed");
                self.stats.write_failures.fetch_add(1, Ordering::Relaxed);
                record_cache_write("backend_failed");
                false
            }
        }
    }

    pub async fn delete(&self, key: &CacheKey) -> u64 {
        let Some(backend) = self.active_backend() else {
            return 0;
        };
        let full_key = self.full_key(key);
        match backend.del(&full_key).await {
            Ok(removed) => {
                self.stats.deletions.fetch_add(removed, Ordering::Relaxed);
                removed
            }
            Err(e) => {
                error!(key = %full_key, error = %e, "Cache delete failed");
                0
            }
        }
    }

    /// Deletes every key matching `pattern`; the store prefix is prepended so
    /// unrelated data in the backend is never touched.
    pub async fn delete_by_pattern(&self, pattern: &str) -> u64 {
        let Some(backend) = self.active_backend() else {
            return 0;
        };
        let full_pattern = format!("{}{}", self.key_prefix, pattern);
        match backend.del_pattern(&full_pattern).await {
            Ok(removed) => {
                debug!(pattern = %full_pattern, removed, "Cache pattern deleted");
                self.stats.deletions.fetch_add(removed, Ordering::Relaxed);
                removed
            }
            Err(e) => {
                error!(pattern = %full_pattern, error = %e, "Cache pattern delete failed");
                0
            }
        }
    }

    pub async fn health_check(&self) -> CacheHealth {
        let Some(backend) = self.active_backend() else {
            return CacheHealth {
                status: CacheStatus::Disabled,
                backend: self.backend_name.to_string(),
                connected_clients: None,
                used_memory: None,
                total_keys: None,
                error: None,
            };
        };

        match backend.info().await {
            Ok(info) => CacheHealth {
                status: CacheStatus::Healthy,
                backend: self.backend_name.to_string(),
                connected_clients: Some(info.connected_clients),
                used_memory: Some(info.used_memory),
                total_keys: Some(info.total_keys),
                error: None,
            },
            Err(e) => CacheHealth {
                status: CacheStatus::Unhealthy,
                backend: self.backend_name.to_string(),
                connected_clients: None,
                used_memory: None,
                total_keys: None,
                error: Some(e.to_string()),
            },
        }
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.stats.hits.load(Ordering::Relaxed);
        let misses = self.stats.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            hits,
            misses,
            writes: self.stats.writes.load(Ordering::Relaxed),
            write_failures: self.stats.write_failures.load(Ordering::Relaxed),
            deletions: self.stats.deletions.load(Ordering::Relaxed),
            hit_rate: if total > 0 { hits as f64 / total as f64 } else { 0.0 },
        }
    }

    /// Releases the backend. The store reports disabled afterwards.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(backend) = &self.backend {
            backend.close().await;
            info!(backend = self.backend_name, "Cache store closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::key::{CallSignature, TenantId};
    use crate::cache::memory::MemoryBackend;
    use std::collections::HashMap;

    fn key(tenant: &str, namespace: &str) -> CacheKey {
        let tenant = TenantId::new(tenant).unwrap();
        CacheKey::for_call(namespace, &CallSignature::tenant(&tenant).arg("page", 1))
    }

    async fn open_store() -> (CacheStore, MemoryBackend) {
        let backend = MemoryBackend::new();
        let store = CacheStore::open(Arc::new(backend.clone()), "cache:").await;
        (store, backend)
    }

    #[tokio::test]
    async fn set_then_get_roundtrips_through_the_envelope() {
        let (store, backend) = open_store().await;
        let k = key("t1", "rooms");

        assert!(store.set(&k, &vec![101, 102], Duration::from_secs(60)).await);
        let got: Option<Vec<u32>> = store.get(&k).await;
        assert_eq!(got, Some(vec![101, 102]));
        assert_eq!(backend.keys(), vec![format!("cache:{}", k.render())]);

        let stats = store.stats();
        assert_eq!((stats.hits, stats.writes), (1, 1));
    }

    #[tokio::test]
    async fn unreachable_backend_disables_the_store() {
        let backend = MemoryBackend::offline();
        let store = CacheStore::open(Arc::new(backend.clone()), "cache:").await;
        assert!(!store.is_enabled());

        let k = key("t1", "rooms");
        assert!(!store.set(&k, &1, Duration::from_secs(60)).await);
        assert_eq!(store.get::<i32>(&k).await, None);
        assert_eq!(store.delete(&k).await, 0);
        assert_eq!(store.delete_by_pattern("t1:*").await, 0);

        // Only the startup ping ever reached the backend.
        assert_eq!(backend.calls(), 1);
        backend.set_offline(false);
        assert!(!store.is_enabled());
        assert_eq!(store.health_check().await.status, CacheStatus::Disabled);
    }

    #[tokio::test]
    async fn serialization_failure_is_a_silent_no_op() {
        let (store, backend) = open_store().await;
        let k = key("t1", "reports");
        let mut unserializable: HashMap<(u8, u8), u8> = HashMap::new();
        unserializable.insert((1, 2), 3);

        assert!(!store.set(&k, &unserializable, Duration::from_secs(60)).await);
        assert!(backend.keys().is_empty());
        assert_eq!(store.stats().write_failures, 1);
    }

    #[tokio::test]
    async fn undecodable_entries_are_dropped() {
        let (store, backend) = open_store().await;
        let k = key("t1", "rooms");
        backend.insert_raw(&format!("cache:{}", k.render()), "{not json", Duration::from_secs(60));

        assert_eq!(store.get::<Vec<u32>>(&k).await, None);
        assert!(backend.keys().is_empty());
    }

    #[tokio::test]
    async fn zero_ttl_is_not_stored() {
        let (store, backend) = open_store().await;
        assert!(!store.set(&key("t1", "rooms"), &1, Duration::ZERO).await);
        assert!(backend.keys().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn sub_second_ttl_rounds_up_to_one_second() {
        let (store, backend) = open_store().await;
        let k = key("t1", "rooms");
        assert!(store.set(&k, &1, Duration::from_millis(500)).await);
        assert_eq!(store.get::<i32>(&k).await, Some(1));

        tokio::time::advance(Duration::from_millis(999)).await;
        assert_eq!(store.get::<i32>(&k).await, Some(1));
        tokio::time::advance(Duration::from_millis(2)).await;
        assert_eq!(store.get::<i32>(&k).await, None);
        assert!(backend.keys().is_empty());
    }

    #[tokio::test]
    async fn runtime_backend_errors_degrade_to_misses() {
        let (store, backend) = open_store().await;
        let k = key("t1", "rooms");
        store.set(&k, &1, Duration::from_secs(60)).await;

        backend.set_offline(true);
        assert_eq!(store.get::<i32>(&k).await, None);
        assert!(!store.set(&k, &2, Duration::from_secs(60)).await);
        assert_eq!(store.health_check().await.status, CacheStatus::Unhealthy);
    }

    #[tokio::test]
    async fn pattern_delete_is_confined_to_the_prefix() {
        let (store, backend) = open_store().await;
        backend.insert_raw("sessions:t1:rooms:x", "keep", Duration::from_secs(60));
        store.set(&key("t1", "rooms"), &1, Duration::from_secs(60)).await;

        assert_eq!(store.delete_by_pattern("t1:*").await, 1);
        assert_eq!(backend.keys(), vec!["sessions:t1:rooms:x".to_string()]);
    }

    #[tokio::test]
    async fn health_reports_backend_snapshot() {
        let (store, _backend) = open_store().await;
        store.set(&key("t1", "rooms"), &1, Duration::from_secs(60)).await;

        let health = store.health_check().await;
        assert_eq!(health.status, CacheStatus::Healthy);
        assert_eq!(health.total_keys, Some(1));
        assert_eq!(health.backend, "memory");
    }

    #[tokio::test]
    async fn closed_store_behaves_disabled() {
        let (store, _backend) = open_store().await;
        store.close().await;
        assert!(!store.is_enabled());
        assert_eq!(store.health_check().await.status, CacheStatus::Disabled);
    }
}
