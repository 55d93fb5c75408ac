mod agencydb;
mod classify;

pub use agencydb::{AgencyDbError, ErrorContext};
pub use classify::{classify_sqlx, kind_for_sqlstate};

use serde::Serialize;
use std::fmt;

/// Failure classes that drive the executor's recovery decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Timeout, reset, refused: transient and retried.
    Connectivity,
    /// Missing table, column, function or object: repairable when enabled.
    Schema,
    /// Constraint violation: never retried.
    Integrity,
    /// Malformed statement or input: never retried.
    Programming,
    Other,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Connectivity => "connectivity",
            ErrorKind::Schema => "schema",
            ErrorKind::Integrity => "integrity",
            ErrorKind::Programming => "programming",
            ErrorKind::Other => "database",
        };
        f.write_str(s)
    }
}

pub trait IsRetryable {
    fn is_retryable(&self) -> bool;
}
