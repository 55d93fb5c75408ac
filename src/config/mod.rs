mod basic;
mod database;
mod resilience;

pub use agencydb_cache::CacheConfig;
pub use basic::BasicConfig;
pub use database::DatabaseConfig;
pub use resilience::{ResilienceConfig, SchemaRepairConfig};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::AgencyDbError;

/// Application configuration managed by Figment.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    /// Process-level settings (see `basic` table in agencydb.toml).
    #[serde(default)]
    pub basic: BasicConfig,

    /// Tenant connection defaults shared by every agency database.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Retry budget and backoff for connectivity failures.
    #[serde(default)]
    pub resilience: ResilienceConfig,

    /// Schema self-repair switch and circuit-breaker cooldowns.
    #[serde(default)]
    pub schema_repair: SchemaRepairConfig,

    /// External cache service and in-process fallback.
    #[serde(default)]
    pub cache: CacheConfig,
}

const DEFAULT_CONFIG_FILE: &str = "agencydb.toml";
const ENV_PREFIX: &str = "AGENCYDB_";

impl Config {
    /// Builds a Figment that merges defaults, an optional TOML file and
    /// `AGENCYDB_`-prefixed environment variables (`__` separates tables,
    /// e.g. `AGENCYDB_SCHEMA_REPAIR__AUTO_REPAIR=true`).
    pub fn figment() -> Figment {
        let figment = Figment::new().merge(Serialized::defaults(Config::default()));
        let figment = if PathBuf::from(DEFAULT_CONFIG_FILE).is_file() {
            figment.merge(Toml::file(DEFAULT_CONFIG_FILE))
        } else {
            figment
        };
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Loads and validates configuration.
    pub fn load() -> Result<Self, AgencyDbError> {
        Self::from_figment(Self::figment())
    }

    pub fn from_figment(figment: Figment) -> Result<Self, AgencyDbError> {
        let cfg: Self = figment.extract()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), AgencyDbError> {
        if self.database.max_connections == 0 {
            return Err(AgencyDbError::InvalidConfig(
                "database.max_connections must be greater than zero".to_string(),
            ));
        }
        if self.database.host.trim().is_empty() {
            return Err(AgencyDbError::InvalidConfig(
                "database.host must be set and non-empty".to_string(),
            ));
        }
        if self.database.audit_setting.split('.').count() != 2 {
            return Err(AgencyDbError::InvalidConfig(format!(
                "database.audit_setting must look like `namespace.name`, got {:?}",
                self.database.audit_setting
            )));
        }
        if self.resilience.backoff_base_ms == 0 {
            return Err(AgencyDbError::InvalidConfig(
                "resilience.backoff_base_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
