// ============================================================================
// CACHE MODULE - tenant-scoped multi-tier read cache
// ============================================================================

pub mod backend;
pub mod error;
pub mod invalidation;
pub mod key;
pub mod memory;
pub mod read_through;
pub mod store;
pub mod warm;

pub use backend::{BackendInfo, CacheBackend, RedisBackend};
pub use error::{CacheError, CacheResult};
pub use invalidation::{CascadeOutcome, EntityFamily, InvalidationReport, Invalidator};
pub use key::{CacheKey, CallSignature, TenantId, TenantScope, GLOBAL_SCOPE};
pub use memory::MemoryBackend;
pub use read_through::{CacheArgs, CachePolicy, Cached};
pub use store::{CacheEntry, CacheHealth, CacheStats, CacheStatus, CacheStore};
pub use warm::{WarmCache, WarmCacheEntry, WarmKey};
