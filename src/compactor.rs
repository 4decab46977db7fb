use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::{Engine, EngineError};

/// Background task that compacts the WAL once enough appends have piled up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        if let Err(e) = compact_if_needed(&engine, threshold).await {
            tracing::error!("WAL compaction failed: {e}");
        }
    }
}

/// Compact when at least `threshold` events were appended since the last
/// compaction. Returns whether it ran.
pub async fn compact_if_needed(engine: &Engine, threshold: u64) -> Result<bool, EngineError> {
    let appended = engine.wal_appends_since_compact().await;
    if appended < threshold {
        return Ok(false);
    }
    info!("compacting WAL after {appended} appends");
    engine.compact_wal().await?;
    Ok(true)
}
