use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry behaviour for connectivity failures.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResilienceConfig {
    /// Retries after the first attempt.
    /// TOML: `resilience.max_retries`. Default: `2` (three attempts in total).
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// First backoff delay; each later one doubles.
    /// TOML: `resilience.backoff_base_ms`. Default: `100`.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// TOML: `resilience.backoff_max_ms`. Default: `2000`.
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    /// TOML: `resilience.jitter`. Default: `false`.
    #[serde(default)]
    pub jitter: bool,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            jitter: false,
        }
    }
}

impl ResilienceConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms.max(self.backoff_base_ms))
    }
}

/// Schema self-repair switch and circuit-breaker cooldowns.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchemaRepairConfig {
    /// Opt-in; schema errors propagate unchanged when false.
    /// TOML: `schema_repair.auto_repair`. Default: `false`.
    #[serde(default)]
    pub auto_repair: bool,

    /// Schema that repairs and introspection target.
    /// TOML: `schema_repair.schema`. Default: `public`.
    #[serde(default = "default_schema")]
    pub schema: String,

    /// TOML: `schema_repair.success_cooldown_secs`. Default: `30`.
    #[serde(default = "default_success_cooldown_secs")]
    pub success_cooldown_secs: u64,

    /// TOML: `schema_repair.failure_cooldown_secs`. Default: `300`.
    #[serde(default = "default_failure_cooldown_secs")]
    pub failure_cooldown_secs: u64,
}

impl Default for SchemaRepairConfig {
    fn default() -> Self {
        Self {
            auto_repair: false,
            schema: default_schema(),
            success_cooldown_secs: default_success_cooldown_secs(),
            failure_cooldown_secs: default_failure_cooldown_secs(),
        }
    }
}

impl SchemaRepairConfig {
    pub fn success_cooldown(&self) -> Duration {
        Duration::from_secs(self.success_cooldown_secs)
    }

    pub fn failure_cooldown(&self) -> Duration {
        Duration::from_secs(self.failure_cooldown_secs)
    }
}

fn default_max_retries() -> usize {
    2
}

fn default_backoff_base_ms() -> u64 {
    100
}

fn default_backoff_max_ms() -> u64 {
    2_000
}

fn default_schema() -> String {
    "public".to_string()
}

fn default_success_cooldown_secs() -> u64 {
    30
}

fn default_failure_cooldown_secs() -> u64 {
    300
}
