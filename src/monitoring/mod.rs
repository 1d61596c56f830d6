pub mod endpoints;

use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use tracing::info;

use crate::cache::{CacheHealth, CacheStats};

pub use endpoints::monitoring_router;

#[derive(Debug, Serialize, Deserialize)]
pub struct CacheHealthResponse {
    pub timestamp: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub cache: CacheHealth,
    pub stats: CacheStats,
    pub warm_entries: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CacheClearResponse {
    pub tenant_id: String,
    pub entity_type: Option<String>,
    pub deleted: u64,
}

static START_TIME: std::sync::OnceLock<SystemTime> = std::sync::OnceLock::new();

pub fn init_monitoring() {
    START_TIME.set(SystemTime::now()).ok();
    info!("🔍 Monitoring system initialized");
}

pub(crate) fn uptime_seconds() -> u64 {
    START_TIME
        .get()
        .and_then(|start| SystemTime::now().duration_since(*start).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
