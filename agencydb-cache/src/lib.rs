//! Cache facade with graceful degradation.
//!
//! Every operation goes to the external cache service first (Redis, behind the
//! [`RemoteStore`] trait). When that service is absent, unreachable or slow, the
//! facade serves the call from an in-process [`FallbackStore`] instead. The two
//! backends are never synchronized.

pub mod config;
pub mod error;
pub mod facade;
pub mod fallback;
pub mod remote;

pub use config::CacheConfig;
pub use error::CacheError;
pub use facade::{CacheBackend, CacheFacade, CacheStats};
pub use fallback::{FallbackEntry, FallbackStore};
pub use remote::{RedisStore, RemoteStore};
