//! Configuration management for the cache subsystem and its operations surface

use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub redis: RedisConfig,
    pub cache: CacheConfig,
    pub app: AppConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    pub pool_size: u32,
    pub connection_timeout_seconds: u64,
}

/// Which key-value backend the distributed tier talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    Redis,
    Memory,
}

impl FromStr for CacheBackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(CacheBackendKind::Redis),
            "memory" | "in-process" => Ok(CacheBackendKind::Memory),
            other => Err(anyhow::anyhow!("unknown cache backend '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub enabled: bool,
    pub backend: CacheBackendKind,
    pub key_prefix: String,
    pub warm_interval_seconds: u64,
    pub warm_ttl_seconds: u64,
    pub warm_tenants: Vec<String>,
    pub scan_batch_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: CacheBackendKind::Redis,
            key_prefix: "cache:".to_string(),
            warm_interval_seconds: 15,
            warm_ttl_seconds: 30,
            warm_tenants: Vec::new(),
            scan_batch_size: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: String,
    pub log_level: String,
    pub port: u16,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            pool_size: 10,
            connection_timeout_seconds: 5,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            log_level: "info".to_string(),
            port: 8000,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            redis: RedisConfig::default(),
            cache: CacheConfig::default(),
            app: AppConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config {
            redis: RedisConfig {
                url: env::var("REDIS_URL")
                    .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
                pool_size: env::var("REDIS_POOL_SIZE")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()?,
                connection_timeout_seconds: env::var("REDIS_CONNECTION_TIMEOUT_SECONDS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()?,
            },
            cache: CacheConfig {
                enabled: env::var("CACHE_ENABLED")
                    .unwrap_or_else(|_| "true".to_string())
                    .parse()?,
                backend: env::var("CACHE_BACKEND")
                    .unwrap_or_else(|_| "redis".to_string())
                    .parse()?,
                key_prefix: env::var("CACHE_KEY_PREFIX")
                    .unwrap_or_else(|_| "cache:".to_string()),
                warm_interval_seconds: env::var("CACHE_WARM_INTERVAL_SECONDS")
                    .unwrap_or_else(|_| "15".to_string())
                    .parse()?,
                warm_ttl_seconds: env::var("CACHE_WARM_TTL_SECONDS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()?,
                warm_tenants: parse_list(&env::var("CACHE_WARM_TENANTS").unwrap_or_default()),
                scan_batch_size: env::var("CACHE_SCAN_BATCH_SIZE")
                    .unwrap_or_else(|_| "500".to_string())
                    .parse()?,
            },
            app: AppConfig {
                environment: env::var("ENVIRONMENT")
                    .unwrap_or_else(|_| "development".to_string()),
                log_level: env::var("RUST_LOG")
                    .unwrap_or_else(|_| "info".to_string()),
                port: env::var("PORT")
                    .unwrap_or_else(|_| "8000".to_string())
                    .parse()?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.cache.validate()
    }
}

impl CacheConfig {
    /// The warm tier must outlive one warm interval, otherwise hot aggregates
    /// lapse between two successful cycles.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.warm_interval_seconds == 0 {
            anyhow::bail!("CACHE_WARM_INTERVAL_SECONDS must be greater than zero");
        }
        if self.warm_ttl_seconds <= self.warm_interval_seconds {
            anyhow::bail!(
                "CACHE_WARM_TTL_SECONDS ({}) must exceed CACHE_WARM_INTERVAL_SECONDS ({})",
                self.warm_ttl_seconds,
                self.warm_interval_seconds
            );
        }
        if self.scan_batch_size == 0 {
            anyhow::bail!("CACHE_SCAN_BATCH_SIZE must be greater than zero");
        }
        if self.key_prefix.contains(['*', '?', '[', ']']) {
            anyhow::bail!("CACHE_KEY_PREFIX must not contain glob characters");
        }
        Ok(())
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_cache_config_is_valid() {
        assert!(CacheConfig::default().validate().is_ok());
    }

    #[test]
    fn warm_ttl_must_exceed_interval() {
        let config = CacheConfig {
            warm_interval_seconds: 20,
            warm_ttl_seconds: 20,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = CacheConfig {
            warm_interval_seconds: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn glob_characters_rejected_in_prefix() {
        let config = CacheConfig {
            key_prefix: "cache*:".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn backend_kind_parses_case_insensitively() {
        assert_eq!("Redis".parse::<CacheBackendKind>().unwrap(), CacheBackendKind::Redis);
        assert_eq!("memory".parse::<CacheBackendKind>().unwrap(), CacheBackendKind::Memory);
        assert!("memcached".parse::<CacheBackendKind>().is_err());
    }

    #[test]
    fn tenant_list_skips_blanks() {
        assert_eq!(parse_list(" t1, ,t2,"), vec!["t1".to_string(), "t2".to_string()]);
        assert!(parse_list("").is_empty());
    }
}
