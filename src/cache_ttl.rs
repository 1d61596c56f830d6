//! Centralized TTL constants for caching
//!
//! TTLs follow data volatility: real-time operational data (room status,
//! arrivals board) lives a minute, mobile app reads two, reference and
//! lookup data fifteen. Every value can be overridden from the environment.

use std::env;
use std::time::Duration;

use crate::cache::CachePolicy;

// Default TTL constants (in seconds)
pub const TTL_REALTIME: u64 = 60; // 1 minute
pub const TTL_MOBILE: u64 = 120; // 2 minutes
pub const TTL_DEFAULT: u64 = 300; // 5 minutes
pub const TTL_REPORTS: u64 = 600; // 10 minutes
pub const TTL_REFERENCE: u64 = 900; // 15 minutes

/// Get TTL with environment variable override
pub fn ttl_with_env(env_key: &str, default_ttl: u64) -> u64 {
    env::var(env_key)
        .map(|val| val.parse::<u64>().unwrap_or(default_ttl))
        .unwrap_or(default_ttl)
}

pub fn realtime() -> Duration {
    Duration::from_secs(ttl_with_env("TTL_REALTIME_SECONDS", TTL_REALTIME))
}

pub fn mobile() -> Duration {
    Duration::from_secs(ttl_with_env("TTL_MOBILE_SECONDS", TTL_MOBILE))
}

pub fn default_ttl() -> Duration {
    Duration::from_secs(ttl_with_env("CACHE_DEFAULT_TTL_SECONDS", TTL_DEFAULT))
}

pub fn reports() -> Duration {
    Duration::from_secs(ttl_with_env("TTL_REPORTS_SECONDS", TTL_REPORTS))
}

pub fn reference() -> Duration {
    Duration::from_secs(ttl_with_env("TTL_REFERENCE_SECONDS", TTL_REFERENCE))
}

/// Policy for real-time operational reads.
pub fn realtime_policy(namespace: &str) -> CachePolicy {
    CachePolicy::new(namespace, realtime())
}

/// Policy for static reference and lookup data.
pub fn reference_policy(namespace: &str) -> CachePolicy {
    CachePolicy::new(namespace, reference())
}
