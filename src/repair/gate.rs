use std::sync::Arc;
use tracing::{debug, info, warn};

use super::breaker::CircuitBreaker;
use super::catalog::{self, RepairAction};
use super::missing::MissingObject;
use crate::config::SchemaRepairConfig;
use crate::db::models::{SqlParam, Statement};
use crate::db::schema::{COLUMN_EXISTS, TABLE_EXISTS};
use crate::db::traits::TenantPool;
use crate::error::AgencyDbError;
use crate::tenant::TenantId;

/// Result of one repair request.
#[derive(Debug)]
pub enum RepairOutcome {
    /// DDL ran and the object now exists.
    Repaired { action: RepairAction },
    /// The object was already there (another caller repaired it first).
    AlreadyPresent,
    /// Nothing was attempted; the caller surfaces its original error.
    Skipped(SkipReason),
    /// DDL or verification failed; the tenant is now in the failure cooldown.
    Failed(AgencyDbError),
}

impl RepairOutcome {
    /// Whether the failed operation is worth retrying once.
    pub fn allows_retry(&self) -> bool {
        matches!(
            self,
            RepairOutcome::Repaired { .. } | RepairOutcome::AlreadyPresent
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    CoolingDown,
    NotRepairable,
}

/// Applies targeted schema fixes, throttled per tenant by a [`CircuitBreaker`].
pub struct SchemaRepairGate {
    schema: String,
    breaker: Arc<CircuitBreaker>,
}

impl SchemaRepairGate {
    pub fn new(cfg: &SchemaRepairConfig) -> Self {
        Self::with_breaker(cfg, Arc::new(CircuitBreaker::from_config(cfg)))
    }

    pub fn with_breaker(cfg: &SchemaRepairConfig, breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            schema: cfg.schema.clone(),
            breaker,
        }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub async fn repair<P: TenantPool>(
        &self,
        pool: &P,
        tenant: &TenantId,
        missing: &MissingObject,
    ) -> RepairOutcome {
        let (table, column, action) = match missing {
            MissingObject::Column { table, column } => {
                let action = catalog::column_action(table, column);
                (table.as_str(), Some(column.as_str()), action)
            }
            MissingObject::Table { table } => match catalog::table_action(table) {
                Some(action) => (table.as_str(), None, action),
                None => {
                    debug!(tenant = %tenant, table = %table, "missing table is not in the repair catalog");
                    return RepairOutcome::Skipped(SkipReason::NotRepairable);
                }
            },
            MissingObject::Function { name } => {
                debug!(tenant = %tenant, function = %name, "missing functions are not repaired");
                return RepairOutcome::Skipped(SkipReason::NotRepairable);
            }
            MissingObject::Unknown => return RepairOutcome::Skipped(SkipReason::NotRepairable),
        };

        if !self.breaker.try_begin(tenant) {
            info!(
                tenant = %tenant,
                table,
                column = column.unwrap_or("*"),
                "schema repair skipped: tenant is cooling down"
            );
            return RepairOutcome::Skipped(SkipReason::CoolingDown);
        }

        match self.run_action(pool, tenant, table, column, action).await {
            Ok(outcome) => {
                self.breaker.record_success(tenant);
                outcome
            }
            Err(e) => {
                self.breaker.record_failure(tenant);
                warn!(tenant = %tenant, table, error = %e, "schema repair failed");
                RepairOutcome::Failed(e)
            }
        }
    }

    async fn run_action<P: TenantPool>(
        &self,
        pool: &P,
        tenant: &TenantId,
        table: &str,
        column: Option<&str>,
        action: RepairAction,
    ) -> Result<RepairOutcome, AgencyDbError> {
        if self.object_exists(pool, table, column).await? {
            debug!(tenant = %tenant, table, "object already present; nothing to repair");
            return Ok(RepairOutcome::AlreadyPresent);
        }

        let legacy_present = match action.legacy_column() {
            Some(legacy) => self.object_exists(pool, table, Some(legacy)).await?,
            None => false,
        };

        if action.is_generic() {
            warn!(
                tenant = %tenant,
                table,
                column = column.unwrap_or("*"),
                "column not in repair catalog; adding it as nullable TEXT"
            );
        }

        let ddl: Vec<Statement> = action
            .ddl(&self.schema, table, column, legacy_present)?
            .into_iter()
            .map(Statement::new)
            .collect();
        pool.run(&ddl, None).await?;

        if !self.object_exists(pool, table, column).await? {
            return Err(AgencyDbError::RepairVerification {
                tenant: tenant.clone(),
                table: table.to_string(),
                column: column.map(str::to_string),
                action: action.to_string(),
            });
        }

        info!(
            tenant = %tenant,
            table,
            column = column.unwrap_or("*"),
            %action,
            "schema repaired"
        );
        Ok(RepairOutcome::Repaired { action })
    }

    async fn object_exists<P: TenantPool>(
        &self,
        pool: &P,
        table: &str,
        column: Option<&str>,
    ) -> Result<bool, AgencyDbError> {
        let stmt = match column {
            Some(column) => Statement::with_params(
                COLUMN_EXISTS,
                vec![
                    SqlParam::from(self.schema.as_str()),
                    SqlParam::from(table),
                    SqlParam::from(column),
                ],
            ),
            None => Statement::with_params(
                TABLE_EXISTS,
                vec![SqlParam::from(self.schema.as_str()), SqlParam::from(table)],
            ),
        };
        let sets = pool.run(std::slice::from_ref(&stmt), None).await?;
        Ok(sets.first().is_some_and(|set| !set.is_empty()))
    }
}
