// ============================================================================
// INVALIDATION ROUTER - write-side cache eviction with cascades
// ============================================================================
//
// Writes call `invalidate` after the data-store commit and before responding.
// The mutated family is cleared first (one entity or the whole family), then
// every family reachable through the cascade table is cleared in full.

use futures::future::join_all;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::error::CacheError;
use super::key::{CacheKey, TenantScope};
use super::read_through::CachePolicy;
use super::store::CacheStore;
use crate::cache_ttl;
use crate::observability::metrics::record_invalidation;

/// Domain entity families, each owning one key namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum EntityFamily {
    #[serde(rename = "bookings")]
    Booking,
    #[serde(rename = "rooms")]
    Room,
    #[serde(rename = "housekeeping")]
    Housekeeping,
    #[serde(rename = "billing")]
    Billing,
    #[serde(rename = "guests")]
    Guest,
    #[serde(rename = "maintenance")]
    Maintenance,
    #[serde(rename = "staff")]
    Staff,
    #[serde(rename = "dashboard")]
    Dashboard,
    #[serde(rename = "reports")]
    Reports,
    #[serde(rename = "settings")]
    Settings,
}

impl EntityFamily {
    pub const ALL: [EntityFamily; 10] = [
        EntityFamily::Booking,
        EntityFamily::Room,
        EntityFamily::Housekeeping,
        EntityFamily::Billing,
        EntityFamily::Guest,
        EntityFamily::Maintenance,
        EntityFamily::Staff,
        EntityFamily::Dashboard,
        EntityFamily::Reports,
        EntityFamily::Settings,
    ];

    pub fn namespace(self) -> &'static str {
        match self {
            EntityFamily::Booking => "bookings",
            EntityFamily::Room => "rooms",
            EntityFamily::Housekeeping => "housekeeping",
            EntityFamily::Billing => "billing",
            EntityFamily::Guest => "guests",
            EntityFamily::Maintenance => "maintenance",
            EntityFamily::Staff => "staff",
            EntityFamily::Dashboard => "dashboard",
            EntityFamily::Reports => "reports",
            EntityFamily::Settings => "settings",
        }
    }

    fn snake_name(self) -> &'static str {
        match self {
            EntityFamily::Booking => "booking",
            EntityFamily::Room => "room",
            EntityFamily::Guest => "guest",
            other => other.namespace(),
        }
    }

    /// Families whose cached reads embed data from this one.
    pub fn cascades(self) -> &'static [EntityFamily] {
        use EntityFamily::*;
        match self {
            Booking => &[Room, Dashboard, Guest],
            Room => &[Dashboard, Housekeeping],
            Housekeeping => &[Room, Dashboard],
            Billing => &[Dashboard, Reports],
            Guest => &[Booking],
            Maintenance => &[Room, Dashboard],
            Staff => &[Housekeeping],
            Dashboard | Reports | Settings => &[],
        }
    }

    /// Transitive cascade targets, in discovery order, excluding `self`.
    pub fn cascade_closure(self) -> Vec<EntityFamily> {
        let mut visited = HashSet::from([self]);
        let mut closure = Vec::new();
        let mut frontier = vec![self];

        while let Some(family) = frontier.pop() {
            for &next in family.cascades() {
                if visited.insert(next) {
                    closure.push(next);
                    frontier.push(next);
                }
            }
        }
        closure
    }

    /// TTL matching how volatile the family's data is.
    pub fn default_ttl(self) -> Duration {
        match self {
            EntityFamily::Room | EntityFamily::Housekeeping | EntityFamily::Dashboard => {
                cache_ttl::realtime()
            }
            EntityFamily::Reports => cache_ttl::reports(),
            EntityFamily::Settings => cache_ttl::reference(),
            EntityFamily::Booking
            | EntityFamily::Billing
            | EntityFamily::Guest
            | EntityFamily::Maintenance
            | EntityFamily::Staff => cache_ttl::default_ttl(),
        }
    }

    /// Policy for one operation of this family, e.g. `Room.policy("list")` → `rooms:list`.
    pub fn policy(self, operation: &str) -> CachePolicy {
        let namespace = if operation.is_empty() {
            self.namespace().to_string()
        } else {
            format!("{}:{}", self.namespace(), operation)
        };
        CachePolicy::new(namespace, self.default_ttl())
    }
}

impl fmt::Display for EntityFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.namespace())
    }
}

impl FromStr for EntityFamily {
    type Err = CacheError;

    /// Accepts the namespace (`bookings`) or the singular name (`booking`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        EntityFamily::ALL
            .into_iter()
            .find(|family| family.namespace() == wanted || family.snake_name() == wanted)
            .ok_or_else(|| CacheError::InvalidFamily(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CascadeOutcome {
    pub family: EntityFamily,
    pub deleted: u64,
}

/// What one `invalidate` call removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvalidationReport {
    pub family: EntityFamily,
    pub entity_id: Option<String>,
    pub deleted: u64,
    pub cascaded: Vec<CascadeOutcome>,
}

impl InvalidationReport {
    pub fn total_deleted(&self) -> u64 {
        self.deleted + self.cascaded.iter().map(|c| c.deleted).sum::<u64>()
    }
}

#[derive(Clone)]
pub struct Invalidator {
    store: Arc<CacheStore>,
}

impl Invalidator {
    pub fn new(store: Arc<CacheStore>) -> Self {
        Self { store }
    }

    pub async fn invalidate(
        &self,
        scope: &TenantScope,
        family: EntityFamily,
        entity_id: Option<&str>,
    ) -> InvalidationReport {
        let direct_pattern = match entity_id {
            Some(id) => CacheKey::entity_pattern(scope, family.namespace(), id),
            None => CacheKey::family_pattern(scope, family.namespace()),
        };
        let deleted = self.store.delete_by_pattern(&direct_pattern).await;
        record_invalidation(family.namespace(), "direct", deleted);

        let closure = family.cascade_closure();
        let deletions = closure.iter().map(|&target| {
            let pattern = CacheKey::family_pattern(scope, target.namespace());
            async move {
                let deleted = self.store.delete_by_pattern(&pattern).await;
                record_invalidation(target.namespace(), "cascade", deleted);
                CascadeOutcome { family: target, deleted }
            }
        });
        let cascaded = join_all(deletions).await;

        let report = InvalidationReport {
            family,
            entity_id: entity_id.map(str::to_string),
            deleted,
            cascaded,
        };
        debug!(
            scope = %scope,
            family = %family,
            entity_id = ?entity_id,
            deleted = report.deleted,
            total = report.total_deleted(),
            "🧹 Cache invalidated"
        );
        report
    }

    /// Administrative clear: one family without cascades, or the whole tenant.
    pub async fn invalidate_tenant_cache(
        &self,
        scope: &TenantScope,
        family: Option<EntityFamily>,
    ) -> u64 {
        let (pattern, label) = match family {
            Some(family) => (
                CacheKey::family_pattern(scope, family.namespace()),
                family.namespace(),
            ),
            None => (CacheKey::scope_pattern(scope), "all"),
        };
        let deleted = self.store.delete_by_pattern(&pattern).await;
        record_invalidation(label, "admin", deleted);
        info!(scope = %scope, family = label, deleted, "🗑️ Tenant cache cleared");
        deleted
    }
}
