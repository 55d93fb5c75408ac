use std::sync::Arc;
use tracing::info;

use agencydb_cache::CacheFacade;

use crate::config::Config;
use crate::db::pg::PgConnector;
use crate::db::traits::PoolConnector;
use crate::error::AgencyDbError;
use crate::executor::QueryExecutor;
use crate::pool::PoolRegistry;

/// Everything a business module needs to reach tenant data: the executor (and
/// through it the pool registry) plus the shared cache.
///
/// Cloning is cheap; clones share pools, breaker state and cache.
pub struct DataLayer<C: PoolConnector = PgConnector> {
    executor: Arc<QueryExecutor<C>>,
    cache: CacheFacade,
}

impl<C: PoolConnector> Clone for DataLayer<C> {
    fn clone(&self) -> Self {
        Self {
            executor: self.executor.clone(),
            cache: self.cache.clone(),
        }
    }
}

impl DataLayer<PgConnector> {
    /// Postgres pools and the configured cache. No connection is opened until
    /// the first statement for a tenant.
    pub fn connect(cfg: &Config) -> Result<Self, AgencyDbError> {
        cfg.validate()?;
        let connector = PgConnector::new(cfg.database.clone());
        Self::with_connector(connector, CacheFacade::from_config(&cfg.cache), cfg)
    }
}

impl<C: PoolConnector> DataLayer<C> {
    pub fn with_connector(
        connector: C,
        cache: CacheFacade,
        cfg: &Config,
    ) -> Result<Self, AgencyDbError> {
        let registry = PoolRegistry::with_idle_eviction(connector, cfg.database.pool_idle_evict());
        let executor = QueryExecutor::new(registry, cfg)?;
        info!(
            auto_repair = cfg.schema_repair.auto_repair,
            max_retries = cfg.resilience.max_retries,
            idle_evict_secs = ?cfg.database.pool_idle_evict_secs,
            "data layer ready"
        );
        Ok(Self {
            executor: Arc::new(executor),
            cache,
        })
    }

    pub fn executor(&self) -> &QueryExecutor<C> {
        &self.executor
    }

    pub fn pools(&self) -> &PoolRegistry<C> {
        self.executor.registry()
    }

    pub fn cache(&self) -> &CacheFacade {
        &self.cache
    }

    /// Closes every tenant pool.
    pub async fn shutdown(&self) {
        self.pools().shutdown().await;
    }
}
