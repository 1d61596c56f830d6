//! Shared library for the property-management services
//!
//! Holds what every service binary needs before it can do anything useful:
//! - Configuration loaded from the environment
//! - The HTTP-facing error type

pub mod config;
pub mod error;

// Re-export commonly used types
pub use config::{AppConfig, CacheBackendKind, CacheConfig, Config, RedisConfig};
pub use error::{AppError, ErrorResponse, Result};
