//! Observability for the recovery source
//!
//! - Structured logging (JSON lines)
//! - Typed recovery events
//! - Global and per-shard counters
//!
//! Observability is read-only: it describes what happened, it never
//! decides what happens.
//!
//! ```ignore
//! use peer_recovery::observability::{log_event_with_fields, RecoveryEvent, RecoveryMetrics};
//!
//! log_event_with_fields(RecoveryEvent::SessionStart, &[("shard", "[a][0]")]);
//!
//! let metrics = RecoveryMetrics::new();
//! metrics.increment_sessions_started();
//! ```

mod events;
mod logger;
mod metrics;

pub use events::RecoveryEvent;
pub use logger::{Logger, Severity};
pub use metrics::{MetricsSnapshot, RecoveryMetrics, ShardRecoveryStats, ShardStatsSnapshot};

/// Log a recovery event at its own severity
pub fn log_event(event: RecoveryEvent) {
    Logger::log(event.severity(), event.as_str(), &[]);
}

/// Log a recovery event with fields at its own severity
pub fn log_event_with_fields(event: RecoveryEvent, fields: &[(&str, &str)]) {
    Logger::log(event.severity(), event.as_str(), fields);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_event() {
        // This just verifies no panic
        log_event(RecoveryEvent::SessionStart);
        log_event_with_fields(RecoveryEvent::SourceDelayed, &[("reason", "not yet known")]);
    }
}
