use std::time::Duration;
use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum CacheError {
    #[error("Cache value (de)serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Remote cache error: {0}")]
    Remote(#[from] redis::RedisError),

    #[error("Remote cache did not answer within {0:?}")]
    RemoteTimeout(Duration),

    #[error("Remote cache unavailable: {0}")]
    Unavailable(String),
}
