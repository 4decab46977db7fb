use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use slotkeeper::clock::SystemClock;
use slotkeeper::compactor;
use slotkeeper::config::Config;
use slotkeeper::engine::Engine;
use slotkeeper::notify::NotifyHub;
use slotkeeper::observability::RECONCILIATION_BACKLOG;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    slotkeeper::observability::init(config.metrics_port)?;

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let policy = config.policy();
    let notify = Arc::new(NotifyHub::new());
    let engine = Arc::new(Engine::new(
        config.wal_path(),
        policy,
        notify.clone(),
        Arc::new(SystemClock),
    )?);

    info!("slotkeeper started");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  buffer: {} min", config.buffer_minutes);
    info!("  patient lead time: {} h", config.patient_lead_time_hours);
    info!("  compact threshold: {}", config.compact_threshold);
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let backlog = engine.needs_reconciliation().await;
    metrics::gauge!(RECONCILIATION_BACKLOG).set(backlog.len() as f64);
    if !backlog.is_empty() {
        tracing::warn!(
            "{} appointments need manual reconciliation: {}",
            backlog.len(),
            serde_json::to_string(&backlog)?
        );
    }
    for finding in engine.audit().await {
        tracing::warn!("audit: {finding:?}");
    }

    let compactor_engine = engine.clone();
    let threshold = config.compact_threshold;
    let compactor = tokio::spawn(async move {
        compactor::run_compactor(compactor_engine, threshold, Duration::from_secs(30)).await;
    });

    let mut events = notify.subscribe_all();
    let logger = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            tracing::debug!("event: {event:?}");
        }
    });

    shutdown_signal().await?;
    info!("shutdown signal received");
    compactor.abort();
    logger.abort();

    if let Err(e) = engine.compact_wal().await {
        tracing::error!("final compaction failed: {e}");
    }
    info!("slotkeeper stopped");
    Ok(())
}

async fn shutdown_signal() -> std::io::Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            r = ctrl_c => r?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await?;
    }
    Ok(())
}
