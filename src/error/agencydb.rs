use std::sync::Arc;
use std::time::Duration;
use thiserror::Error as ThisError;

use super::{ErrorKind, IsRetryable};
use crate::tenant::TenantId;

/// Table/column/constraint a failure refers to, when the server reports one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    pub table: Option<String>,
    pub column: Option<String>,
    pub constraint: Option<String>,
}

#[derive(Debug, ThisError)]
pub enum AgencyDbError {
    #[error("{kind} error on tenant `{tenant}` [{}]: {message}", .sqlstate.as_deref().unwrap_or("-"))]
    Query {
        kind: ErrorKind,
        tenant: TenantId,
        sqlstate: Option<String>,
        message: String,
        context: ErrorContext,
        #[source]
        source: Option<sqlx::Error>,
    },

    #[error("Statement on tenant `{tenant}` exceeded {elapsed:?}")]
    Timeout { tenant: TenantId, elapsed: Duration },

    #[error("Failed to initialize pool for tenant `{tenant}`: {source}")]
    PoolInit {
        tenant: TenantId,
        #[source]
        source: Arc<AgencyDbError>,
    },

    #[error("Invalid tenant identifier: {0:?}")]
    InvalidTenant(String),

    #[error("Invalid acting user identifier: {0:?}")]
    InvalidActingUser(String),

    #[error("Refusing to use {0:?} as an SQL identifier")]
    InvalidIdentifier(String),

    #[error(
        "Schema repair on tenant `{tenant}` ran `{action}` but {table}.{} is still missing",
        .column.as_deref().unwrap_or("*")
    )]
    RepairVerification {
        tenant: TenantId,
        table: String,
        column: Option<String>,
        action: String,
    },

    #[error("Invalid connection settings: {0}")]
    ConnectionSettings(String),

    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl AgencyDbError {
    /// A classified failure without an underlying driver error.
    pub fn query(kind: ErrorKind, tenant: &TenantId, message: impl Into<String>) -> Self {
        AgencyDbError::Query {
            kind,
            tenant: tenant.clone(),
            sqlstate: None,
            message: message.into(),
            context: ErrorContext::default(),
            source: None,
        }
    }

    pub fn connectivity(tenant: &TenantId, message: impl Into<String>) -> Self {
        Self::query(ErrorKind::Connectivity, tenant, message)
    }

    pub fn with_sqlstate(mut self, code: impl Into<String>) -> Self {
        if let AgencyDbError::Query { sqlstate, .. } = &mut self {
            *sqlstate = Some(code.into());
        }
        self
    }

    pub fn with_context(mut self, ctx: ErrorContext) -> Self {
        if let AgencyDbError::Query { context, .. } = &mut self {
            *context = ctx;
        }
        self
    }

    /// Fills table/column the server left out; fields it did report win.
    pub fn locate(mut self, table: Option<&str>, column: Option<&str>) -> Self {
        if let AgencyDbError::Query { context, .. } = &mut self {
            if context.table.is_none() {
                context.table = table.map(str::to_string);
            }
            if context.column.is_none() {
                context.column = column.map(str::to_string);
            }
        }
        self
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AgencyDbError::Query { kind, .. } => *kind,
            AgencyDbError::Timeout { .. } => ErrorKind::Connectivity,
            AgencyDbError::PoolInit { source, .. } => source.kind(),
            AgencyDbError::InvalidTenant(_)
            | AgencyDbError::InvalidActingUser(_)
            | AgencyDbError::InvalidIdentifier(_) => ErrorKind::Programming,
            AgencyDbError::RepairVerification { .. } => ErrorKind::Schema,
            AgencyDbError::ConnectionSettings(_)
            | AgencyDbError::Config(_)
            | AgencyDbError::InvalidConfig(_) => ErrorKind::Other,
        }
    }

    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            AgencyDbError::Query { sqlstate, .. } => sqlstate.as_deref(),
            AgencyDbError::PoolInit { source, .. } => source.sqlstate(),
            _ => None,
        }
    }

    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            AgencyDbError::Query { context, .. } => Some(context),
            _ => None,
        }
    }

    /// Server-side message text, used to locate the missing object of a schema error.
    pub fn message(&self) -> Option<&str> {
        match self {
            AgencyDbError::Query { message, .. } => Some(message),
            _ => None,
        }
    }
}

impl From<figment::Error> for AgencyDbError {
    fn from(value: figment::Error) -> Self {
        AgencyDbError::Config(Box::new(value))
    }
}

impl IsRetryable for AgencyDbError {
    fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Connectivity
    }
}
