use std::net::SocketAddr;

use crate::engine::EngineError;

// ── Request metrics ─────────────────────────────────────────────

/// Counter: engine operations. Labels: op, outcome.
pub const OPERATIONS_TOTAL: &str = "slotkeeper_operations_total";

/// Histogram: engine operation latency in seconds. Labels: op.
pub const OPERATION_DURATION_SECONDS: &str = "slotkeeper_operation_duration_seconds";

/// Counter: appointment status changes. Labels: from, to.
pub const STATUS_TRANSITIONS_TOTAL: &str = "slotkeeper_status_transitions_total";

/// Counter: reschedules whose compensation failed. Needs an operator.
pub const IRRECOVERABLE_RESCHEDULES_TOTAL: &str = "slotkeeper_irrecoverable_reschedules_total";

/// Counter: cancellations whose slot release found the slot not booked.
pub const RELEASE_MISSES_TOTAL: &str = "slotkeeper_release_misses_total";

/// Histogram: suggestions returned per request.
pub const SUGGESTIONS_RETURNED: &str = "slotkeeper_suggestions_returned";

/// Counter: failed notification dispatches.
pub const DISPATCH_FAILURES_TOTAL: &str = "slotkeeper_dispatch_failures_total";

// ── Storage metrics ─────────────────────────────────────────────

/// Counter: conditional slot writes. Labels: op (reserve|release), outcome.
pub const SLOT_WRITES_TOTAL: &str = "slotkeeper_slot_writes_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotkeeper_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotkeeper_wal_flush_batch_size";

/// Gauge: appointments waiting for manual reconciliation.
pub const RECONCILIATION_BACKLOG: &str = "slotkeeper_reconciliation_backlog";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short outcome label for an operation result.
pub fn outcome_label<T>(result: &Result<T, EngineError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(e) => e.kind().as_str(),
    }
}

/// Record count and latency of one engine operation.
pub fn record_operation<T>(
    op: &'static str,
    started: std::time::Instant,
    result: &Result<T, EngineError>,
) {
    metrics::counter!(OPERATIONS_TOTAL, "op" => op, "outcome" => outcome_label(result)).increment(1);
    metrics::histogram!(OPERATION_DURATION_SECONDS, "op" => op)
        .record(started.elapsed().as_secs_f64());
}
