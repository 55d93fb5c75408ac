//! Tenant-routed statement execution with connectivity retries, audit identity
//! stamping and optional schema self-repair.

mod retry;

use backon::{ExponentialBuilder, Retryable};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::db::models::{RowSet, SqlParam, Statement};
use crate::db::pg::PgConnector;
use crate::db::schema::HEALTH_CHECK;
use crate::db::traits::{PoolConnector, TenantPool};
use crate::error::{AgencyDbError, ErrorKind, IsRetryable};
use crate::pool::{PoolRegistry, PooledTenant};
use crate::repair::{CircuitBreaker, MissingObject, SchemaRepairGate};
use crate::tenant::{ActingUser, TenantId};
use crate::utils::logging::with_pretty_json_debug;

/// Outcome of [`QueryExecutor::health_check`].
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub tenant: TenantId,
    pub latency: Duration,
}

pub struct QueryExecutor<C: PoolConnector = PgConnector> {
    registry: PoolRegistry<C>,
    gate: SchemaRepairGate,
    auto_repair: bool,
    retry: ExponentialBuilder,
    attempt_timeout: Duration,
    control: TenantId,
}

impl<C: PoolConnector> QueryExecutor<C> {
    pub fn new(registry: PoolRegistry<C>, cfg: &Config) -> Result<Self, AgencyDbError> {
        Ok(Self {
            registry,
            gate: SchemaRepairGate::new(&cfg.schema_repair),
            auto_repair: cfg.schema_repair.auto_repair,
            retry: retry::connectivity_policy(&cfg.resilience),
            attempt_timeout: cfg.database.attempt_timeout(),
            control: TenantId::control(&cfg.database)?,
        })
    }

    /// Shares `breaker` with other executors instead of owning a fresh one.
    pub fn with_breaker(mut self, cfg: &Config, breaker: Arc<CircuitBreaker>) -> Self {
        self.gate = SchemaRepairGate::with_breaker(&cfg.schema_repair, breaker);
        self
    }

    pub fn registry(&self) -> &PoolRegistry<C> {
        &self.registry
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        self.gate.breaker()
    }

    /// Runs one statement against `tenant`.
    ///
    /// With an acting user the statement runs in a transaction that first
    /// stamps the user into the audit session setting.
    pub async fn execute(
        &self,
        tenant: &TenantId,
        sql: &str,
        params: Vec<SqlParam>,
        acting_user: Option<&str>,
    ) -> Result<RowSet, AgencyDbError> {
        let stmt = Statement::with_params(sql, params);
        let acting_user = acting_user.map(ActingUser::parse).transpose()?;
        let mut sets = self
            .run_with_retry(tenant, std::slice::from_ref(&stmt), acting_user.as_ref())
            .await?;
        Ok(sets.pop().unwrap_or_default())
    }

    /// Runs `statements` in order inside one transaction; any failure rolls
    /// back the whole batch.
    pub async fn execute_transaction(
        &self,
        tenant: &TenantId,
        statements: Vec<Statement>,
        acting_user: Option<&str>,
    ) -> Result<Vec<RowSet>, AgencyDbError> {
        let acting_user = acting_user.map(ActingUser::parse).transpose()?;
        if statements.is_empty() {
            return Ok(Vec::new());
        }
        self.run_with_retry(tenant, &statements, acting_user.as_ref())
            .await
    }

    /// [`execute`](Self::execute) against the control database.
    pub async fn execute_control(
        &self,
        sql: &str,
        params: Vec<SqlParam>,
        acting_user: Option<&str>,
    ) -> Result<RowSet, AgencyDbError> {
        self.execute(&self.control, sql, params, acting_user).await
    }

    /// `SELECT 1` through a single attempt, no retries.
    pub async fn health_check(&self, tenant: &TenantId) -> Result<HealthReport, AgencyDbError> {
        let started = Instant::now();
        self.attempt(tenant, &[Statement::new(HEALTH_CHECK)], None)
            .await?;
        let latency = started.elapsed();
        debug!(tenant = %tenant, latency_ms = latency.as_millis() as u64, "health check ok");
        Ok(HealthReport {
            tenant: tenant.clone(),
            latency,
        })
    }

    pub fn control_tenant(&self) -> &TenantId {
        &self.control
    }

    async fn run_with_retry(
        &self,
        tenant: &TenantId,
        statements: &[Statement],
        acting_user: Option<&ActingUser>,
    ) -> Result<Vec<RowSet>, AgencyDbError> {
        with_pretty_json_debug(&statements, |json| {
            debug!(tenant = %tenant, statements = %json, "executing");
        });

        let this = self;
        let mut retries = 0u32;
        (|| async move { this.attempt(tenant, statements, acting_user).await })
            .retry(self.retry)
            .when(|e: &AgencyDbError| e.is_retryable())
            .notify(|err: &AgencyDbError, delay: Duration| {
                retries += 1;
                warn!(
                    tenant = %tenant,
                    retry = retries,
                    delay_ms = delay.as_millis() as u64,
                    sqlstate = err.sqlstate().unwrap_or("-"),
                    error = %err,
                    "connectivity failure; retrying"
                );
            })
            .await
    }

    /// One attempt: fetch the pool, run under the client-side timeout, and react
    /// to the failure class.
    async fn attempt(
        &self,
        tenant: &TenantId,
        statements: &[Statement],
        acting_user: Option<&ActingUser>,
    ) -> Result<Vec<RowSet>, AgencyDbError> {
        let pooled = self.registry.get_pool(tenant).await?;

        match self.run_on(&pooled, statements, acting_user).await {
            Ok(sets) => Ok(sets),
            Err(err) if err.kind() == ErrorKind::Connectivity => {
                self.registry.evict_if_current(tenant, &pooled).await;
                Err(err)
            }
            Err(err) if err.kind() == ErrorKind::Schema => {
                let missing = MissingObject::from_error(&err, statements);
                let err = err.locate(missing.table(), missing.column());
                if self.auto_repair {
                    self.repair_then_retry(&pooled, statements, acting_user, &missing, err)
                        .await
                } else {
                    Err(err)
                }
            }
            Err(err) => Err(err),
        }
    }

    async fn run_on(
        &self,
        pooled: &PooledTenant<C::Pool>,
        statements: &[Statement],
        acting_user: Option<&ActingUser>,
    ) -> Result<Vec<RowSet>, AgencyDbError> {
        tokio::time::timeout(
            self.attempt_timeout,
            pooled.pool().run(statements, acting_user),
        )
        .await
        .unwrap_or_else(|_| {
            Err(AgencyDbError::Timeout {
                tenant: pooled.tenant().clone(),
                elapsed: self.attempt_timeout,
            })
        })
    }

    /// One repair followed by one retry. Whatever goes wrong, the caller sees
    /// `original`.
    async fn repair_then_retry(
        &self,
        pooled: &PooledTenant<C::Pool>,
        statements: &[Statement],
        acting_user: Option<&ActingUser>,
        missing: &MissingObject,
        original: AgencyDbError,
    ) -> Result<Vec<RowSet>, AgencyDbError> {
        let tenant = pooled.tenant();
        let outcome = self.gate.repair(pooled.pool(), tenant, missing).await;

        if !outcome.allows_retry() {
            debug!(tenant = %tenant, ?outcome, "no repair applied; surfacing schema error");
            return Err(original);
        }

        match self.run_on(pooled, statements, acting_user).await {
            Ok(sets) => {
                info!(tenant = %tenant, ?missing, "statement succeeded after schema repair");
                Ok(sets)
            }
            Err(retry_err) => {
                warn!(
                    tenant = %tenant,
                    error = %retry_err,
                    "statement still failing after schema repair"
                );
                Err(original)
            }
        }
    }
}
