//! Maps driver failures onto [`ErrorKind`].

use sqlx::postgres::PgDatabaseError;

use super::{AgencyDbError, ErrorContext, ErrorKind};
use crate::tenant::TenantId;

/// Message fragments that betray a dead or unreachable connection even when
/// the driver reports them as something else.
const CONNECTIVITY_HINTS: &[&str] = &[
    "timed out",
    "timeout",
    "connection reset",
    "connection refused",
    "econnreset",
    "econnrefused",
    "broken pipe",
    "terminating connection",
    "server closed the connection",
];

/// Classifies a Postgres SQLSTATE.
pub fn kind_for_sqlstate(code: &str) -> ErrorKind {
    match code {
        // undefined_table, undefined_column, undefined_function, undefined_object
        "42P01" | "42703" | "42883" | "42704" => ErrorKind::Schema,
        // admin/crash/cannot_connect_now shutdown, query_canceled, too_many_connections
        "57P01" | "57P02" | "57P03" | "57014" | "53300" => ErrorKind::Connectivity,
        _ if code.starts_with("08") => ErrorKind::Connectivity,
        _ if code.starts_with("23") => ErrorKind::Integrity,
        _ if code.starts_with("42") || code.starts_with("22") || code.starts_with("0A") => {
            ErrorKind::Programming
        }
        _ => ErrorKind::Other,
    }
}

fn looks_like_connectivity(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    CONNECTIVITY_HINTS.iter().any(|hint| lower.contains(hint))
}

/// Converts an sqlx error into a classified [`AgencyDbError::Query`].
pub fn classify_sqlx(tenant: &TenantId, err: sqlx::Error) -> AgencyDbError {
    let (kind, sqlstate, message, context) = match &err {
        sqlx::Error::Database(db) => {
            let code = db.code().map(|c| c.into_owned());
            let kind = code.as_deref().map(kind_for_sqlstate).unwrap_or(ErrorKind::Other);
            let context = ErrorContext {
                table: db.table().map(str::to_string),
                column: db
                    .try_downcast_ref::<PgDatabaseError>()
                    .and_then(PgDatabaseError::column)
                    .map(str::to_string),
                constraint: db.constraint().map(str::to_string),
            };
            (kind, code, db.message().to_string(), context)
        }
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Protocol(_) => (
            ErrorKind::Connectivity,
            None,
            err.to_string(),
            ErrorContext::default(),
        ),
        sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnIndexOutOfBounds { .. }
        | sqlx::Error::TypeNotFound { .. } => (
            ErrorKind::Programming,
            None,
            err.to_string(),
            ErrorContext::default(),
        ),
        _ => (ErrorKind::Other, None, err.to_string(), ErrorContext::default()),
    };

    let kind = if kind == ErrorKind::Other && looks_like_connectivity(&message) {
        ErrorKind::Connectivity
    } else {
        kind
    };

    AgencyDbError::Query {
        kind,
        tenant: tenant.clone(),
        sqlstate,
        message,
        context,
        source: Some(err),
    }
}
