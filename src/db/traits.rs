use async_trait::async_trait;

use crate::db::models::{RowSet, Statement};
use crate::error::AgencyDbError;
use crate::tenant::{ActingUser, TenantId};

/// One tenant's bounded set of reusable connections.
#[async_trait]
pub trait TenantPool: Send + Sync + 'static {
    /// Runs `statements` in order on a single connection.
    ///
    /// A lone statement without an acting user runs directly; anything else
    /// runs inside one transaction that stamps the acting user first and is
    /// rolled back entirely if any statement fails.
    async fn run(
        &self,
        statements: &[Statement],
        acting_user: Option<&ActingUser>,
    ) -> Result<Vec<RowSet>, AgencyDbError>;

    /// Closes every connection; later `run` calls fail.
    async fn close(&self);

    /// Open connections (busy + idle).
    fn size(&self) -> u32;

    fn num_idle(&self) -> usize;

    fn max_connections(&self) -> u32;
}

/// Builds pools; parameters are identical for every tenant except the database.
#[async_trait]
pub trait PoolConnector: Send + Sync + 'static {
    type Pool: TenantPool;

    async fn connect(&self, tenant: &TenantId) -> Result<Self::Pool, AgencyDbError>;
}
