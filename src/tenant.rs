//! Tenant and acting-user identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

use crate::config::DatabaseConfig;
use crate::error::AgencyDbError;

static TENANT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_-]{0,62}$").expect("tenant id regex is valid")
});

static ACTING_USER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.:@-]{0,127}$").expect("acting user regex is valid")
});

/// A tenant ("agency"), addressed by the name of its dedicated database.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

impl TenantId {
    pub fn new(database_name: impl Into<String>) -> Result<Self, AgencyDbError> {
        let name = database_name.into();
        if !TENANT_RE.is_match(&name) {
            return Err(AgencyDbError::InvalidTenant(name));
        }
        Ok(Self(name))
    }

    /// The shared control database.
    pub fn control(cfg: &DatabaseConfig) -> Result<Self, AgencyDbError> {
        Self::new(cfg.control_database.clone())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TenantId {
    type Err = AgencyDbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for TenantId {
    type Error = AgencyDbError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TenantId> for String {
    fn from(value: TenantId) -> Self {
        value.0
    }
}

/// Identity of the user on whose behalf a mutation runs.
///
/// Only ever transmitted as a bound parameter, but validated up front so a
/// malformed value never reaches the audit triggers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActingUser(String);

impl ActingUser {
    pub fn parse(raw: &str) -> Result<Self, AgencyDbError> {
        if !ACTING_USER_RE.is_match(raw) {
            return Err(AgencyDbError::InvalidActingUser(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActingUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
