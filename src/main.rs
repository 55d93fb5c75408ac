use mimalloc::MiMalloc;
use tokio::signal;
use tracing::{info, warn};

use agencydb::{Config, DataLayer, utils::logging::init_tracing};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let cfg = Config::load()?;
    init_tracing(&cfg.basic.loglevel);

    info!(
        build_profile = option_env!("AGENCYDB_BUILD_PROFILE").unwrap_or("dev"),
        host = %cfg.database.host,
        port = cfg.database.port,
        control_database = %cfg.database.control_database,
        max_connections = cfg.database.max_connections,
        auto_repair = cfg.schema_repair.auto_repair,
        redis = cfg.cache.redis_url.is_some(),
        loglevel = %cfg.basic.loglevel,
    );

    let layer = DataLayer::connect(&cfg)?;
    let control = layer.executor().control_tenant().clone();

    match layer.executor().health_check(&control).await {
        Ok(report) => info!(
            tenant = %report.tenant,
            latency_ms = report.latency.as_millis() as u64,
            "control database reachable"
        ),
        Err(e) => warn!(tenant = %control, error = %e, "control database health check failed"),
    }

    let cache_backend = layer.cache().probe().await;
    let cache_stats = layer.cache().stats().await;
    info!(
        backend = ?cache_backend,
        fallback_entries = cache_stats.fallback_entries,
        remote_keys = ?cache_stats.remote_keys,
        "cache ready"
    );
    for pool in layer.pools().stats() {
        info!(
            tenant = %pool.tenant,
            size = pool.size,
            idle = pool.idle,
            max = pool.max_connections,
            "pool"
        );
    }

    shutdown_signal().await;
    info!("shutdown requested; closing tenant pools");
    layer.shutdown().await;
    info!("data layer has shut down gracefully.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
