// ============================================================================
// CACHE BACKENDS - key-value stores behind the distributed tier
// ============================================================================

use async_trait::async_trait;
use deadpool_redis::{Config as PoolSettings, Connection, Pool as RedisPool, PoolConfig, Runtime, Timeouts};
use redis::AsyncCommands;
use serde::Serialize;
use shared::RedisConfig;
use std::time::Duration;
use tracing::{debug, info};

use super::error::{CacheError, CacheResult};

/// Diagnostic snapshot reported by a backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackendInfo {
    pub connected_clients: u64,
    pub used_memory: String,
    pub total_keys: u64,
}

/// Minimal key-value contract the cache store needs.
///
/// Implementations must be safe for concurrent use from many tasks without
/// caller-side locking; per-key atomicity is the backend's job.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn ping(&self) -> CacheResult<()>;

    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    async fn set_ex(&self, key: &str, value: String, ttl_seconds: u64) -> CacheResult<()>;

    /// Returns the number of keys removed.
    async fn del(&self, key: &str) -> CacheResult<u64>;

    /// Removes every key matching a glob pattern (`*` and `?`).
    async fn del_pattern(&self, pattern: &str) -> CacheResult<u64>;

    async fn info(&self) -> CacheResult<BackendInfo>;

    async fn close(&self) {}
}

// ============================================================================
// REDIS BACKEND
// ============================================================================

#[derive(Clone)]
pub struct RedisBackend {
    pool: RedisPool,
    scan_batch_size: usize,
}

impl RedisBackend {
    pub fn new(pool: RedisPool, scan_batch_size: usize) -> Self {
        Self {
            pool,
            scan_batch_size: scan_batch_size.max(1),
        }
    }

    /// Builds the connection pool. No connection is opened here; the store's
    /// startup ping is the first round trip.
    pub fn from_config(config: &RedisConfig, scan_batch_size: usize) -> CacheResult<Self> {
        let timeout = Duration::from_secs(config.connection_timeout_seconds.max(1));
        let mut settings = PoolSettings::from_url(config.url.as_str());
        settings.pool = Some(PoolConfig {
            max_size: config.pool_size.max(1) as usize,
            timeouts: Timeouts {
                wait: Some(timeout),
                create: Some(timeout),
                recycle: Some(timeout),
            },
            ..Default::default()
        });

        let pool = settings
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| CacheError::backend_unavailable(format!("Failed to create Redis pool: {}", e)))?;

        info!(pool_size = config.pool_size, "🔌 Redis cache pool created");
        Ok(Self::new(pool, scan_batch_size))
    }

    async fn connection(&self) -> CacheResult<Connection> {
        Ok(self.pool.get().await?)
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn ping(&self) -> CacheResult<()> {
        let mut conn = self.connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut *conn).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.connection().await?;
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: String, ttl_seconds: u64) -> CacheResult<()> {
        let mut conn = self.connection().await?;
        conn.set_ex::<_, _, ()>(key, value, ttl_seconds).await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> CacheResult<u64> {
        let mut conn = self.connection().await?;
        let removed: u64 = conn.del(key).await?;
        Ok(removed)
    }

    async fn del_pattern(&self, pattern: &str) -> CacheResult<u64> {
        let mut conn = self.connection().await?;
        let mut cursor: u64 = 0;
        let mut removed: u64 = 0;

        // SCAN instead of KEYS so a large keyspace never blocks the server.
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(self.scan_batch_size)
                .query_async(&mut *conn)
                .await?;

            if !keys.is_empty() {
                let count: u64 = conn.del(&keys).await?;
                removed += count;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        debug!(pattern = %pattern, removed, "🧹 Redis pattern delete");
        Ok(removed)
    }

    async fn info(&self) -> CacheResult<BackendInfo> {
        let mut conn = self.connection().await?;
        let raw: String = redis::cmd("INFO").query_async(&mut *conn).await?;
        let total_keys: u64 = redis::cmd("DBSIZE").query_async(&mut *conn).await?;

        let mut info = parse_info(&raw);
        info.total_keys = total_keys;
        Ok(info)
    }

    async fn close(&self) {
        self.pool.close();
    }
}

/// Picks the fields we report out of the `INFO` text block.
fn parse_info(raw: &str) -> BackendInfo {
    let mut info = BackendInfo::default();
    for line in raw.lines() {
        let Some((field, value)) = line.trim().split_once(':') else {
            continue;
        };
        match field {
            "connected_clients" => info.connected_clients = value.parse().unwrap_or(0),
            "used_memory_human" => info.used_memory = value.to_string(),
            _ => {}
        }
    }
    info
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_info_block() {
        let raw = "# Clients\r\nconnected_clients:7\r\nblocked_clients:0\r\n# Memory\r\nused_memory:1048576\r\nused_memory_human:1.00M\r\n";
        let info = parse_info(raw);
        assert_eq!(info.connected_clients, 7);
        assert_eq!(info.used_memory, "1.00M");
        assert_eq!(info.total_keys, 0);
    }

    #[test]
    fn ignores_garbage_lines() {
        let info = parse_info("no separator here\r\nconnected_clients:not-a-number\r\n");
        assert_eq!(info, BackendInfo::default());
    }

    #[tokio::test]
    async fn pool_creation_does_not_connect() {
        let config = RedisConfig {
            url: "redis://127.0.0.1:1".to_string(),
            pool_size: 2,
            connection_timeout_seconds: 1,
        };
        let backend = RedisBackend::from_config(&config, 100).expect("pool is lazy");
        assert_eq!(backend.name(), "redis");
        assert!(backend.ping().await.is_err());
    }

    /// Needs a live server: `REDIS_URL=redis://... cargo test -- --ignored`.
    #[tokio::test]
    #[ignore]
    async fn pattern_delete_walks_every_scan_page() {
        let config = RedisConfig {
            url: std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            ..RedisConfig::default()
        };
        // Small pages force several SCAN round trips.
        let backend = RedisBackend::from_config(&config, 10).unwrap();
        backend.ping().await.unwrap();
        backend.del_pattern("pms-scan-test:*").await.unwrap();

        for i in 0..55 {
            backend
                .set_ex(&format!("pms-scan-test:t1:rooms:{}", i), "v".into(), 60)
                .await
                .unwrap();
        }
        backend
            .set_ex("pms-scan-test:t2:rooms:0", "v".into(), 60)
            .await
            .unwrap();

        assert_eq!(backend.del_pattern("pms-scan-test:t1:*").await.unwrap(), 55);
        assert_eq!(backend.del_pattern("pms-scan-test:t1:*").await.unwrap(), 0);
        assert_eq!(
            backend.get("pms-scan-test:t2:rooms:0").await.unwrap(),
            Some("v".to_string())
        );
        backend.del_pattern("pms-scan-test:*").await.unwrap();
    }
}
