use backon::ExponentialBuilder;

use crate::config::ResilienceConfig;

/// Exponential backoff for connectivity failures: `backoff_base`, doubling,
/// capped at `backoff_max`, for at most `max_retries` retries.
pub(crate) fn connectivity_policy(cfg: &ResilienceConfig) -> ExponentialBuilder {
    let policy = ExponentialBuilder::default()
        .with_min_delay(cfg.backoff_base())
        .with_max_delay(cfg.backoff_max())
        .with_factor(2.0)
        .with_max_times(cfg.max_retries);

    if cfg.jitter {
        policy.with_jitter()
    } else {
        policy
    }
}
