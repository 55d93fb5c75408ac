//! Schema self-repair: locating the missing object, the catalog of fixes and
//! the per-tenant circuit breaker that throttles them.

pub mod breaker;
pub mod catalog;
mod gate;
pub mod missing;

pub use breaker::{BreakerState, CircuitBreaker, RepairOutcomeKind};
pub use catalog::RepairAction;
pub use gate::{RepairOutcome, SchemaRepairGate, SkipReason};
pub use missing::MissingObject;
