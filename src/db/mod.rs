//! Database module: statement/row models, pool traits and the Postgres backend.
//!
//! Layout:
//! - `models.rs`: statements, parameters and decoded row sets
//! - `schema.rs`: SQL the layer itself issues (audit identity, introspection)
//! - `traits.rs`: the `TenantPool` / `PoolConnector` seam
//! - `pg.rs`: sqlx Postgres implementation of that seam

pub mod models;
pub mod pg;
pub mod schema;
pub mod traits;

pub use models::{RowSet, SqlParam, Statement};
pub use pg::{PgConnector, PgTenantPool};
pub use traits::{PoolConnector, TenantPool};
