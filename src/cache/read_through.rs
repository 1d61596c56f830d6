//! Read-through caching for tenant-scoped read operations.
//!
//! Two ways to use it:
//!
//! ```ignore
//! // Inline, with an explicit signature
//! let rooms = store
//!     .cached(&policy, &CallSignature::tenant(&tenant).arg("floor", 3), || {
//!         repo.list_rooms(&tenant, 3)
//!     })
//!     .await?;
//!
//! // Composed once, called many times
//! let list_rooms = service.wrap(policy, |q: RoomQuery| async move { repo.list(q).await });
//! let rooms = list_rooms.call(query).await?;
//! ```
//!
//! A hit never invokes the operation. A miss invokes it, stores `Ok` values
//! and returns them. Errors are returned untouched and are never stored.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::key::{CacheKey, CallSignature};
use super::store::CacheStore;

/// Namespace and TTL of one cached operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePolicy {
    namespace: String,
    ttl: Duration,
}

impl CachePolicy {
    pub fn new(namespace: impl Into<String>, ttl: Duration) -> Self {
        Self {
            namespace: namespace.into(),
            ttl,
        }
    }

    pub fn seconds(namespace: impl Into<String>, ttl_seconds: u64) -> Self {
        Self::new(namespace, Duration::from_secs(ttl_seconds))
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The family segment: everything before the first `:`.
    pub fn family(&self) -> &str {
        self.namespace
            .split(':')
            .next()
            .unwrap_or(self.namespace.as_str())
    }
}

/// Argument types of wrapped operations describe their own cache signature:
/// the tenant scope plus the fields that change the result.
pub trait CacheArgs {
    fn signature(&self) -> CallSignature;
}

impl CacheStore {
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
        let key = CacheKey::for_call(policy.namespace(), signature);

        if let Some(hit) = self.get::<T>(&key).await {
            return Ok(hit);
        }

        let value = compute().await?;
        self.set(&key, &value, policy.ttl()).await;
        Ok(value)
    }
}

/// A read operation composed with read-through caching.
pub struct Cached<F> {
    store: Arc<CacheStore>,
    policy: CachePolicy,
    operation: F,
}

impl<F> Cached<F> {
    pub fn new(store: Arc<CacheStore>, policy: CachePolicy, operation: F) -> Self {
        Self {
            store,
            policy,
            operation,
        }
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    pub async fn call<A, T, E, Fut>(&self, args: A) -> Result<T, E>
    where
        A: CacheArgs,
        F: Fn(A) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        T: Serialize + DeserializeOwned,
    {
        let signature = args.signature();
        self.store
            .cached(&self.policy, &signature, || (self.operation)(args))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::key::TenantId;
    use crate::cache::memory::MemoryBackend;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone)]
    struct RoomQuery {
        tenant: TenantId,
        floor: u32,
    }

    impl CacheArgs for RoomQuery {
        fn signature(&self) -> CallSignature {
            CallSignature::tenant(&self.tenant).arg("floor", self.floor)
        }
    }

    async fn store() -> Arc<CacheStore> {
        Arc::new(CacheStore::open(Arc::new(MemoryBackend::new()), "cache:").await)
    }

    fn tenant(id: &str) -> TenantId {
        TenantId::new(id).unwrap()
    }

    #[test]
    fn policy_family_is_first_segment() {
        assert_eq!(CachePolicy::seconds("rooms:list", 60).family(), "rooms");
        assert_eq!(CachePolicy::seconds("rooms", 60).family(), "rooms");
    }

    #[tokio::test]
    async fn hit_does_not_invoke_the_operation() {
        let store = store().await;
        let policy = CachePolicy::seconds("rooms", 60);
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let signature = CallSignature::tenant(&tenant("t1")).arg("floor", 1);

        for _ in 0..3 {
            let rooms: Result<Vec<String>, String> = store
                .cached(&policy, &signature, || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(vec!["101".to_string()])
                })
                .await;
            assert_eq!(rooms.unwrap(), vec!["101".to_string()]);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn values_are_stale_within_ttl() {
        let store = store().await;
        let policy = CachePolicy::seconds("rooms", 60);
        let signature = CallSignature::tenant(&tenant("t1"));

        let first: Result<u32, ()> = store.cached(&policy, &signature, || async { Ok(1) }).await;
        let second: Result<u32, ()> = store.cached(&policy, &signature, || async { Ok(2) }).await;
        assert_eq!(first, Ok(1));
        assert_eq!(second, Ok(1));
    }

    #[tokio::test]
    async fn errors_propagate_and_are_not_cached() {
        let store = store().await;
        let policy = CachePolicy::seconds("rooms", 60);
        let signature = CallSignature::tenant(&tenant("t1"));

        let failed: Result<u32, String> = store
            .cached(&policy, &signature, || async { Err("datastore timeout".to_string()) })
            .await;
        assert_eq!(failed, Err("datastore timeout".to_string()));

        let recovered: Result<u32, String> =
            store.cached(&policy, &signature, || async { Ok(7) }).await;
        assert_eq!(recovered, Ok(7));
        assert_eq!(store.stats().writes, 1);
    }

    #[tokio::test]
    async fn wrapped_operation_is_tenant_isolated() {
        let store = store().await;
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let list_rooms = Cached::new(store, CachePolicy::seconds("rooms:list", 60), move |q: RoomQuery| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(format!("{}-floor-{}", q.tenant, q.floor))
            }
        });

        let a = RoomQuery { tenant: tenant("a"), floor: 2 };
        let b = RoomQuery { tenant: tenant("b"), floor: 2 };

        assert_eq!(list_rooms.call(a.clone()).await.unwrap(), "a-floor-2");
        assert_eq!(list_rooms.call(b.clone()).await.unwrap(), "b-floor-2");
        assert_eq!(list_rooms.call(a).await.unwrap(), "a-floor-2");
        assert_eq!(list_rooms.call(b).await.unwrap(), "b-floor-2");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn entity_reads_are_never_served_to_a_lookalike_entity() {
        let store = store().await;
        let policy = CachePolicy::seconds("guests:detail", 60);
        let t = tenant("t1");

        let mut served = Vec::new();
        for guest in ["ana@hotel.com", "ana_hotel.com"] {
            let signature = CallSignature::tenant(&t).entity(guest);
            let value: Result<String, ()> = store
                .cached(&policy, &signature, || async move { Ok(format!("guest {}", guest)) })
                .await;
            served.push(value.unwrap());
        }
        assert_eq!(served, vec!["guest ana@hotel.com", "guest ana_hotel.com"]);
    }

    #[tokio::test]
    async fn disabled_store_always_recomputes() {
        let store = Arc::new(CacheStore::disabled("cache:"));
        let policy = CachePolicy::seconds("rooms", 60);
        let signature = CallSignature::tenant(&tenant("t1"));
        let calls = AtomicUsize::new(0);
        let counter = &calls;

        for expected in 1..=3 {
            let value: Result<usize, ()> = store
                .cached(&policy, &signature, || async move {
                    Ok(counter.fetch_add(1, Ordering::SeqCst) + 1)
                })
                .await;
            assert_eq!(value, Ok(expected));
        }
    }
}
