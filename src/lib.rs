pub mod config;
pub mod db;
pub mod error;
pub mod executor;
pub mod layer;
pub mod pool;
pub mod repair;
pub mod tenant;
pub mod utils;

pub use agencydb_cache::{CacheError, CacheFacade};
pub use config::Config;
pub use db::{RowSet, SqlParam, Statement};
pub use error::{AgencyDbError, ErrorKind};
pub use executor::{HealthReport, QueryExecutor};
pub use layer::DataLayer;
pub use pool::PoolRegistry;
pub use tenant::{ActingUser, TenantId};
