use std::future::Future;
use std::time::Instant;

use crate::engine::BookingError;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: core operations executed. Labels: operation, outcome.
pub const OPERATIONS_TOTAL: &str = "rentbook_operations_total";

/// Histogram: operation latency in seconds. Labels: operation.
pub const OPERATION_DURATION_SECONDS: &str = "rentbook_operation_duration_seconds";

/// Counter: requests rejected because the window was already reserved.
pub const CONFLICTS_TOTAL: &str = "rentbook_conflicts_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "rentbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (records per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "rentbook_wal_flush_batch_size";

/// Counter: rentals completed by the background sweeper.
pub const SWEEPER_COMPLETIONS_TOTAL: &str = "rentbook_sweeper_completions_total";

/// Outcome label for a finished operation.
pub fn outcome_label<T>(result: &Result<T, BookingError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(e) => e.kind().as_str(),
    }
}

/// Run one core operation, recording its outcome and latency.
pub async fn track<T, F>(operation: &'static str, fut: F) -> Result<T, BookingError>
where
    F: Future<Output = Result<T, BookingError>>,
{
    let started = Instant::now();
    let result = fut.await;
    let outcome = outcome_label(&result);
    metrics::counter!(OPERATIONS_TOTAL, "operation" => operation, "outcome" => outcome)
        .increment(1);
    metrics::histogram!(OPERATION_DURATION_SECONDS, "operation" => operation)
        .record(started.elapsed().as_secs_f64());
    match &result {
        Err(e @ BookingError::Conflict { .. }) => {
            metrics::counter!(CONFLICTS_TOTAL, "operation" => operation).increment(1);
            tracing::debug!("{operation} rejected: {e}");
        }
        Err(BookingError::Unexpected { .. }) | Ok(_) => {}
        Err(e) => tracing::debug!("{operation} rejected: {e}"),
    }
    result
}
