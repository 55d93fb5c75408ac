//! Per-tenant connection pool registry.

mod registry;

pub use registry::{PoolRegistry, PoolStats, PooledTenant};
