use shared::AppError;

pub type CacheResult<T> = Result<T, CacheError>;

/// Failures the cache layer can observe.
///
/// None of these ever escape a read-through call: the store turns them into
/// misses or no-op writes. They surface only from constructors, the health
/// check and the backend trait itself.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid tenant id: {0}")]
    InvalidTenant(String),

    #[error("Unknown entity family: {0}")]
    InvalidFamily(String),
}

impl CacheError {
    pub fn backend_unavailable(message: impl Into<String>) -> Self {
        Self::BackendUnavailable(message.into())
    }
}

impl From<CacheError> for AppError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::InvalidTenant(_) | CacheError::InvalidFamily(_) => {
                AppError::validation(err.to_string())
            }
            CacheError::BackendUnavailable(_) | CacheError::Pool(_) => {
                AppError::service_unavailable(err.to_string())
            }
            CacheError::Redis(e) => AppError::Redis(e),
            CacheError::Serialization(e) => AppError::Serialization(e),
        }
    }
}
