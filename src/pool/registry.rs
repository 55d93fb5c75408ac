use chrono::{DateTime, Utc};
use moka::future::Cache;
use moka::notification::RemovalCause;
use moka::ops::compute::{CompResult, Op};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::db::traits::{PoolConnector, TenantPool};
use crate::error::AgencyDbError;
use crate::tenant::TenantId;

/// A tenant's pool together with its bookkeeping.
pub struct PooledTenant<P> {
    tenant: TenantId,
    pool: P,
    created_at: DateTime<Utc>,
}

impl<P: TenantPool> PooledTenant<P> {
    fn new(tenant: TenantId, pool: P) -> Self {
        Self {
            tenant,
            pool,
            created_at: Utc::now(),
        }
    }

    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    pub fn pool(&self) -> &P {
        &self.pool
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            tenant: self.tenant.clone(),
            size: self.pool.size(),
            idle: self.pool.num_idle(),
            max_connections: self.pool.max_connections(),
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub tenant: TenantId,
    pub size: u32,
    pub idle: usize,
    pub max_connections: u32,
    pub created_at: DateTime<Utc>,
}

type PoolCache<P> = Cache<TenantId, Arc<PooledTenant<P>>>;

/// Maps tenants to lazily created, cached connection pools.
///
/// At most one pool exists per tenant: concurrent first requests for the same
/// tenant share a single construction. Cloning is cheap and clones share state.
pub struct PoolRegistry<C: PoolConnector> {
    inner: Arc<RegistryInner<C>>,
}

struct RegistryInner<C: PoolConnector> {
    connector: Arc<C>,
    pools: PoolCache<C::Pool>,
}

impl<C: PoolConnector> Clone for PoolRegistry<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C: PoolConnector> PoolRegistry<C> {
    /// Pools are kept until evicted explicitly.
    pub fn new(connector: C) -> Self {
        Self::with_idle_eviction(connector, None)
    }

    /// With `Some(idle)`, a pool unused for `idle` is dropped from the registry
    /// and closed in the background; the next request recreates it.
    pub fn with_idle_eviction(connector: C, idle: Option<Duration>) -> Self {
        let connector = Arc::new(connector);
        let mut builder = PoolCache::<C::Pool>::builder();

        if let Some(idle) = idle {
            builder = builder.time_to_idle(idle).eviction_listener(
                |_tenant: Arc<TenantId>, pooled: Arc<PooledTenant<C::Pool>>, cause: RemovalCause| {
                    if cause.was_evicted() {
                        close_in_background(pooled, "idle");
                    }
                },
            );
        }

        Self {
            inner: Arc::new(RegistryInner {
                connector,
                pools: builder.build(),
            }),
        }
    }

    /// Returns the tenant's pool, creating it on first use.
    pub async fn get_pool(
        &self,
        tenant: &TenantId,
    ) -> Result<Arc<PooledTenant<C::Pool>>, AgencyDbError> {
        let connector = self.inner.connector.clone();
        let key = tenant.clone();

        self.inner
            .pools
            .try_get_with(tenant.clone(), async move {
                let pool = connector.connect(&key).await?;
                debug!(tenant = %key, "tenant pool registered");
                Ok::<_, AgencyDbError>(Arc::new(PooledTenant::new(key, pool)))
            })
            .await
            .map_err(|source| AgencyDbError::PoolInit {
                tenant: tenant.clone(),
                source,
            })
    }

    /// Forgets the tenant's pool and closes it in the background. No-op when
    /// none is cached.
    ///
    /// Returns as soon as the entry is gone: closing waits for checked-out
    /// connections, which may belong to other callers' long statements.
    pub async fn evict(&self, tenant: &TenantId) {
        if let Some(pooled) = self.inner.pools.remove(tenant).await {
            warn!(tenant = %tenant, "tenant pool evicted");
            close_in_background(pooled, "evicted");
        }
    }

    /// Evicts only if `stale` is still the registered pool, so a failure seen on
    /// an old pool never tears down a replacement another caller already built.
    /// The check and the removal happen in one step on the entry.
    pub async fn evict_if_current(&self, tenant: &TenantId, stale: &Arc<PooledTenant<C::Pool>>) {
        let result = self
            .inner
            .pools
            .entry(tenant.clone())
            .and_compute_with(|current| {
                let op = match current {
                    Some(entry) if Arc::ptr_eq(entry.value(), stale) => Op::Remove,
                    _ => Op::Nop,
                };
                std::future::ready(op)
            })
            .await;

        match result {
            CompResult::Removed(entry) => {
                warn!(tenant = %tenant, "tenant pool evicted");
                close_in_background(entry.into_value(), "evicted");
            }
            _ => debug!(tenant = %tenant, "pool already replaced; skipping eviction"),
        }
    }

    pub fn contains(&self, tenant: &TenantId) -> bool {
        self.inner.pools.contains_key(tenant)
    }

    pub fn len(&self) -> usize {
        self.inner.pools.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> Vec<PoolStats> {
        let mut stats: Vec<PoolStats> = self
            .inner
            .pools
            .iter()
            .map(|(_, pooled)| pooled.stats())
            .collect();
        stats.sort_by(|a, b| a.tenant.cmp(&b.tenant));
        stats
    }

    /// Closes every pool; used on process shutdown.
    pub async fn shutdown(&self) {
        let pools: Vec<_> = self.inner.pools.iter().map(|(_, p)| p).collect();
        self.inner.pools.invalidate_all();
        for pooled in &pools {
            pooled.pool().close().await;
        }
        info!(closed = pools.len(), "all tenant pools closed");
    }
}

fn close_in_background<P: TenantPool>(pooled: Arc<PooledTenant<P>>, reason: &'static str) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                pooled.pool().close().await;
                info!(tenant = %pooled.tenant(), reason, "tenant pool closed");
            });
        }
        Err(_) => {
            warn!(tenant = %pooled.tenant(), reason, "no runtime to close pool; dropping it");
        }
    }
}
