use serde::{Serialize, de::DeserializeOwned};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::fallback::FallbackStore;
use crate::remote::{RedisStore, RemoteStore};

/// Which backend is currently authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackend {
    Remote,
    Fallback,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub backend: CacheBackend,
    pub remote_configured: bool,
    pub remote_reachable: bool,
    pub remote_keys: Option<u64>,
    pub fallback_entries: u64,
    pub hits: u64,
    pub misses: u64,
}

/// Uniform get/set/delete/clear over the remote cache with in-process fallback.
///
/// Cloning is cheap; clones share both backends and the counters.
#[derive(Clone)]
pub struct CacheFacade {
    inner: Arc<FacadeInner>,
}

struct FacadeInner {
    remote: Option<Arc<dyn RemoteStore>>,
    fallback: FallbackStore,
    default_ttl: Duration,
    remote_timeout: Duration,
    remote_retry_after: Duration,
    remote_healthy: AtomicBool,
    /// Milliseconds after `epoch` before which the remote is not tried; 0 = none.
    remote_skip_until_ms: AtomicU64,
    epoch: Instant,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheFacade {
    /// Builds a facade from configuration. A missing or malformed `redis_url`
    /// leaves the facade running on the in-process store only.
    pub fn from_config(cfg: &CacheConfig) -> Self {
        let remote: Option<Arc<dyn RemoteStore>> = match cfg.redis_url.as_deref() {
            Some(url) if !url.trim().is_empty() => match RedisStore::open(url) {
                Ok(store) => Some(Arc::new(store)),
                Err(e) => {
                    error!(error = %e, "invalid cache.redis_url; using in-process cache only");
                    None
                }
            },
            _ => {
                info!("cache.redis_url not set; using in-process cache only");
                None
            }
        };
        Self::with_remote(remote, cfg)
    }

    pub fn with_remote(remote: Option<Arc<dyn RemoteStore>>, cfg: &CacheConfig) -> Self {
        let remote_healthy = AtomicBool::new(remote.is_some());
        Self {
            inner: Arc::new(FacadeInner {
                remote,
                fallback: FallbackStore::new(cfg.fallback_max_capacity),
                default_ttl: cfg.default_ttl(),
                remote_timeout: cfg.remote_timeout(),
                remote_retry_after: cfg.remote_retry_after(),
                remote_healthy,
                remote_skip_until_ms: AtomicU64::new(0),
                epoch: Instant::now(),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
            }),
        }
    }

    /// In-process store only.
    pub fn local_only(cfg: &CacheConfig) -> Self {
        Self::with_remote(None, cfg)
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        let raw = match self
            .try_remote("get", |remote| async move { remote.get(key).await })
            .await
        {
            Some(raw) => raw.map(Arc::<str>::from),
            None => self.inner.fallback.get(key),
        };

        match raw {
            Some(raw) => {
                self.inner.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(serde_json::from_str(&raw)?))
            }
            None => {
                self.inner.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    /// Stores `value` for `ttl_secs` seconds; `0` means the configured default.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl_secs: u64,
    ) -> Result<(), CacheError> {
        let encoded: Arc<str> = Arc::from(serde_json::to_string(value)?);
        let ttl = self.effective_ttl(ttl_secs);

        let payload = encoded.clone();
        let stored = self
            .try_remote("set", |remote| async move {
                remote.set_ex(key, &payload, ttl.as_secs()).await
            })
            .await;

        if stored.is_none() {
            self.inner.fallback.set(key, encoded, ttl);
        }
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let removed = self
            .try_remote("delete", |remote| async move {
                remote.del(&[key.to_string()]).await
            })
            .await;

        if removed.is_none() {
            self.inner.fallback.delete(key);
        }
        Ok(())
    }

    /// Deletes keys matching `pattern`. The remote service receives the glob as-is;
    /// the fallback strips `*` and matches substrings.
    pub async fn delete_by_prefix(&self, pattern: &str) -> Result<(), CacheError> {
        let removed = self
            .try_remote("delete_by_prefix", |remote| async move {
                let keys = remote.keys(pattern).await?;
                remote.del(&keys).await?;
                Ok(keys.len())
            })
            .await;

        match removed {
            Some(count) => debug!(pattern, count, "remote cache keys removed"),
            None => {
                let count = self.inner.fallback.delete_matching(pattern);
                debug!(pattern, count, "fallback cache keys removed");
            }
        }
        Ok(())
    }

    pub async fn clear(&self) -> Result<(), CacheError> {
        let flushed = self
            .try_remote("clear", |remote| async move { remote.flush().await })
            .await;

        if flushed.is_none() {
            self.inner.fallback.clear();
        }
        Ok(())
    }

    /// Returns the cached value, or runs `loader`, caches its output and returns it.
    pub async fn get_or_set_with<T, F, Fut, E>(
        &self,
        key: &str,
        ttl_secs: u64,
        loader: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<CacheError>,
    {
        if let Some(hit) = self.get::<T>(key).await? {
            return Ok(hit);
        }
        let value = loader().await?;
        self.set(key, &value, ttl_secs).await?;
        Ok(value)
    }

    pub async fn stats(&self) -> CacheStats {
        let remote_keys = self
            .try_remote("stats", |remote| async move { remote.size().await })
            .await;
        let remote_reachable = remote_keys.is_some();

        CacheStats {
            backend: if remote_reachable {
                CacheBackend::Remote
            } else {
                CacheBackend::Fallback
            },
            remote_configured: self.inner.remote.is_some(),
            remote_reachable,
            remote_keys,
            fallback_entries: self.inner.fallback.len(),
            hits: self.inner.hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
        }
    }

    /// Pings the remote service and records the outcome. Unlike regular calls,
    /// a probe goes out even while a recent failure keeps the remote skipped.
    pub async fn probe(&self) -> CacheBackend {
        match self
            .call_remote("ping", |remote| async move { remote.ping().await })
            .await
        {
            Some(()) => CacheBackend::Remote,
            None => CacheBackend::Fallback,
        }
    }

    fn effective_ttl(&self, ttl_secs: u64) -> Duration {
        if ttl_secs == 0 {
            self.inner.default_ttl
        } else {
            Duration::from_secs(ttl_secs)
        }
    }

    /// Runs `op` against the remote store within the configured budget, unless a
    /// recent failure says to leave it alone for now.
    /// `None` means the caller must serve the request from the fallback store.
    async fn try_remote<'a, T, F, Fut>(&'a self, op: &'static str, call: F) -> Option<T>
    where
        F: FnOnce(&'a dyn RemoteStore) -> Fut,
        Fut: Future<Output = Result<T, CacheError>> + 'a,
    {
        if self.remote_skipped() {
            return None;
        }
        self.call_remote(op, call).await
    }

    fn now_ms(&self) -> u64 {
        u64::try_from(self.inner.epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn remote_skipped(&self) -> bool {
        let until = self.inner.remote_skip_until_ms.load(Ordering::Relaxed);
        until != 0 && self.now_ms() < until
    }

    async fn call_remote<'a, T, F, Fut>(&'a self, op: &'static str, call: F) -> Option<T>
    where
        F: FnOnce(&'a dyn RemoteStore) -> Fut,
        Fut: Future<Output = Result<T, CacheError>> + 'a,
    {
        let remote = self.inner.remote.as_deref()?;

        let outcome = match tokio::time::timeout(self.inner.remote_timeout, call(remote)).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::RemoteTimeout(self.inner.remote_timeout)),
        };

        match outcome {
            Ok(value) => {
                self.inner.remote_skip_until_ms.store(0, Ordering::Relaxed);
                if !self.inner.remote_healthy.swap(true, Ordering::Relaxed) {
                    info!(op, "remote cache reachable again; it is authoritative");
                }
                Some(value)
            }
            Err(e) => {
                if !self.inner.remote_retry_after.is_zero() {
                    let retry_after =
                        u64::try_from(self.inner.remote_retry_after.as_millis()).unwrap_or(u64::MAX);
                    let until = self.now_ms().saturating_add(retry_after).max(1);
                    self.inner
                        .remote_skip_until_ms
                        .store(until, Ordering::Relaxed);
                }
                if self.inner.remote_healthy.swap(false, Ordering::Relaxed) {
                    warn!(op, error = %e, "remote cache unavailable; serving from in-process store");
                } else {
                    debug!(op, error = %e, "remote cache still unavailable");
                }
                None
            }
        }
    }
}
