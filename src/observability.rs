use crate::engine::EngineError;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: booking proposals. Labels: outcome.
pub const PROPOSALS_TOTAL: &str = "spacebook_proposals_total";

/// Counter: cancellations. Labels: outcome.
pub const CANCELLATIONS_TOTAL: &str = "spacebook_cancellations_total";

/// Counter: in-memory mutations undone after a persistence failure.
pub const ROLLBACKS_TOTAL: &str = "spacebook_rollbacks_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: registered resources.
pub const RESOURCES_REGISTERED: &str = "spacebook_resources_registered";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "spacebook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "spacebook_wal_flush_batch_size";

/// Counter: WAL compactions performed by the background compactor.
pub const WAL_COMPACTIONS_TOTAL: &str = "spacebook_wal_compactions_total";

/// Map an operation result to a short label for metrics.
pub fn outcome_label<T>(result: &Result<T, EngineError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(EngineError::Validation(_)) => "validation",
        Err(EngineError::Conflict(_)) => "conflict",
        Err(EngineError::UnknownResource(_)) => "unknown_resource",
        Err(EngineError::DuplicateResource(_)) => "duplicate_resource",
        Err(EngineError::NotFound(_)) => "not_found",
        Err(EngineError::AlreadyCancelled(_)) => "already_cancelled",
        Err(EngineError::LimitExceeded(_)) => "limit_exceeded",
        Err(EngineError::Persistence(_)) => "persistence",
    }
}
