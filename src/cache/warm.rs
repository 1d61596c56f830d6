//! In-process warm tier.
//!
//! Holds precomputed per-tenant aggregates (dashboard KPIs, arrivals board)
//! refreshed by the background warmer. Entries are keyed by tenant and
//! aggregate name only; there is no argument fingerprint at this tier.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::key::TenantId;
use crate::observability::metrics::{record_warm_lookup, update_cache_size};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WarmKey {
    pub tenant: TenantId,
    pub aggregate: String,
}

impl WarmKey {
    pub fn new(tenant: TenantId, aggregate: impl Into<String>) -> Self {
        Self {
            tenant,
            aggregate: aggregate.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WarmCacheEntry {
    pub data: Value,
    pub refreshed_at: DateTime<Utc>,
    pub expires_at: Instant,
}

/// Mutex-guarded map: a lookup's lazy delete and a wave's overwrite are
/// serialized by the same lock, so a lookup never sees a half-written entry.
pub struct WarmCache {
    entries: Mutex<HashMap<WarmKey, WarmCacheEntry>>,
    ttl: Duration,
}

impl WarmCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Overwrites the entry with a fresh expiry of `now + ttl`.
    pub fn put(&self, key: WarmKey, data: Value) {
        let entry = WarmCacheEntry {
            data,
            refreshed_at: Utc::now(),
            expires_at: Instant::now() + self.ttl,
        };
        let size = {
            let mut entries = self.entries.lock();
            entries.insert(key, entry);
            entries.len()
        };
        update_cache_size("warm", "aggregates", size as i64);
    }

    /// Returns the data while `now < expires_at`; an expired entry is removed.
    pub fn get_warm(&self, key: &WarmKey) -> Option<Value> {
        let now = Instant::now();
        let found = {
            let mut entries = self.entries.lock();
            match entries.get(key) {
                Some(entry) if now < entry.expires_at => Some(entry.data.clone()),
                Some(_) => {
                    entries.remove(key);
                    None
                }
                None => None,
            }
        };
        record_warm_lookup(&key.aggregate, found.is_some());
        found
    }

    /// Typed lookup. Data that no longer decodes into `T` is treated as absent.
    pub fn get_warm_as<T: DeserializeOwned>(&self, key: &WarmKey) -> Option<T> {
        let data = self.get_warm(key)?;
        match serde_json::from_value(data) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(
                    tenant = %key.tenant,
                    aggregate = %key.aggregate,
                    error = %e,
                    "Warm entry does not match the requested type"
                );
                None
            }
        }
    }

    pub fn refreshed_at(&self, key: &WarmKey) -> Option<DateTime<Utc>> {
        self.entries.lock().get(key).map(|entry| entry.refreshed_at)
    }

    /// Drops every expired entry; returns how many were removed.
    pub fn prune_expired(&self) -> usize {
        let now = Instant::now();
        let (removed, size) = {
            let mut entries = self.entries.lock();
            let before = entries.len();
            entries.retain(|_, entry| now < entry.expires_at);
            (before - entries.len(), entries.len())
        };
        if removed > 0 {
            debug!(removed, "Pruned expired warm entries");
        }
        update_cache_size("warm", "aggregates", size as i64);
        removed
    }

    pub fn remove_tenant(&self, tenant: &TenantId) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|key, _| &key.tenant != tenant);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
