use ahash::AHashMap;
use serde::Serialize;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::SchemaRepairConfig;
use crate::tenant::TenantId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairOutcomeKind {
    InProgress,
    Succeeded,
    Failed,
}

/// Observable breaker state of one tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Repair allowed.
    Closed,
    /// Inside the cooldown window; repairs are skipped until then.
    Open { remaining: Duration },
}

#[derive(Debug, Clone, Copy)]
struct BreakerRecord {
    last_attempt: Instant,
    cooldown_until: Instant,
    last_outcome: RepairOutcomeKind,
}

/// Per-tenant throttle for schema self-repair.
///
/// After a successful repair the tenant is blocked for the success cooldown,
/// after a failed one for the (longer) failure cooldown. A started repair
/// holds the failure cooldown until its outcome is recorded, so concurrent
/// callers for the same tenant never repair in parallel.
pub struct CircuitBreaker {
    success_cooldown: Duration,
    failure_cooldown: Duration,
    records: Mutex<AHashMap<TenantId, BreakerRecord>>,
}

impl CircuitBreaker {
    pub fn new(success_cooldown: Duration, failure_cooldown: Duration) -> Self {
        Self {
            success_cooldown,
            failure_cooldown,
            records: Mutex::new(AHashMap::new()),
        }
    }

    pub fn from_config(cfg: &SchemaRepairConfig) -> Self {
        Self::new(cfg.success_cooldown(), cfg.failure_cooldown())
    }

    /// Claims the right to repair `tenant`. Returns false inside the cooldown.
    pub fn try_begin(&self, tenant: &TenantId) -> bool {
        let now = Instant::now();
        let mut records = self.lock();
        if let Some(record) = records.get(tenant)
            && now < record.cooldown_until
        {
            return false;
        }
        records.insert(
            tenant.clone(),
            BreakerRecord {
                last_attempt: now,
                cooldown_until: now + self.failure_cooldown,
                last_outcome: RepairOutcomeKind::InProgress,
            },
        );
        true
    }

    pub fn record_success(&self, tenant: &TenantId) {
        self.finish(tenant, RepairOutcomeKind::Succeeded, self.success_cooldown);
    }

    pub fn record_failure(&self, tenant: &TenantId) {
        self.finish(tenant, RepairOutcomeKind::Failed, self.failure_cooldown);
    }

    pub fn state(&self, tenant: &TenantId) -> BreakerState {
        let now = Instant::now();
        match self.lock().get(tenant) {
            Some(record) if now < record.cooldown_until => BreakerState::Open {
                remaining: record.cooldown_until - now,
            },
            _ => BreakerState::Closed,
        }
    }

    pub fn last_outcome(&self, tenant: &TenantId) -> Option<RepairOutcomeKind> {
        self.lock().get(tenant).map(|r| r.last_outcome)
    }

    pub fn last_attempt(&self, tenant: &TenantId) -> Option<Instant> {
        self.lock().get(tenant).map(|r| r.last_attempt)
    }

    /// Cooldown runs from the end of the repair, not from its start.
    fn finish(&self, tenant: &TenantId, outcome: RepairOutcomeKind, cooldown: Duration) {
        let now = Instant::now();
        let mut records = self.lock();
        let last_attempt = records.get(tenant).map_or(now, |r| r.last_attempt);
        records.insert(
            tenant.clone(),
            BreakerRecord {
                last_attempt,
                cooldown_until: now + cooldown,
                last_outcome: outcome,
            },
        );
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, AHashMap<TenantId, BreakerRecord>> {
        // The map holds plain timestamps; a poisoned guard is still consistent.
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::from_config(&SchemaRepairConfig::default())
    }
}
