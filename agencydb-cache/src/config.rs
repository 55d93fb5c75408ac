use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Cache configuration (see `cache` table in agencydb.toml).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Redis connection URL. Unset means the in-process store is always used.
    /// TOML: `cache.redis_url`. Example: `redis://127.0.0.1:6379/0`.
    #[serde(default)]
    pub redis_url: Option<String>,

    /// TTL applied when a caller passes `0` seconds.
    /// TOML: `cache.default_ttl_secs`. Default: `300`.
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,

    /// Upper bound on entries held by the in-process store.
    /// TOML: `cache.fallback_max_capacity`. Default: `10000`.
    #[serde(default = "default_fallback_max_capacity")]
    pub fallback_max_capacity: u64,

    /// Per-call budget for the remote service before falling back.
    /// TOML: `cache.remote_timeout_ms`. Default: `250`.
    #[serde(default = "default_remote_timeout_ms")]
    pub remote_timeout_ms: u64,

    /// After a failed remote call, serve from the in-process store for this long
    /// before trying the remote again. `0` tries the remote on every call.
    /// TOML: `cache.remote_retry_after_ms`. Default: `2000`.
    #[serde(default = "default_remote_retry_after_ms")]
    pub remote_retry_after_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            default_ttl_secs: default_ttl_secs(),
            fallback_max_capacity: default_fallback_max_capacity(),
            remote_timeout_ms: default_remote_timeout_ms(),
            remote_retry_after_ms: default_remote_retry_after_ms(),
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs.max(1))
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms.max(1))
    }

    pub fn remote_retry_after(&self) -> Duration {
        Duration::from_millis(self.remote_retry_after_ms)
    }
}

fn default_ttl_secs() -> u64 {
    300
}

fn default_fallback_max_capacity() -> u64 {
    10_000
}

fn default_remote_timeout_ms() -> u64 {
    250
}

fn default_remote_retry_after_ms() -> u64 {
    2_000
}
