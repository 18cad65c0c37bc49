//! Observable recovery events
//!
//! Events are explicit and typed; names are stable upper-snake strings.

use super::logger::Severity;
use std::fmt;

/// Observable events of the recovery source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryEvent {
    // Request handling
    /// Recovery request received
    SourceRequest,
    /// Request answered with a retry-later signal
    SourceDelayed,
    /// Request rejected before a session was created
    SourceRejected,

    // Session lifecycle
    /// Session registered and started
    SessionStart,
    /// Session finished successfully
    SessionComplete,
    /// Session failed
    SessionFailed,
    /// Session cancelled
    SessionCancelled,

    // Protocol phases
    /// File copy begins
    Phase1Begin,
    /// File copy complete
    Phase1Complete,
    /// Op-log streaming begins
    Phase2Begin,
    /// Op-log streaming complete
    Phase2Complete,
    /// Finalize acknowledged by target
    Finalized,
    /// Primary handoff begins
    HandoffBegin,
    /// Primary handoff complete
    HandoffComplete,

    // Registry
    /// New sessions blocked for a shard
    SessionsBlocked,
    /// Block released
    SessionsUnblocked,
    /// All sessions of a shard cancelled
    ShardSessionsCancelled,

    /// Local and cluster state are mutually inconsistent
    InvariantViolation,
}

impl RecoveryEvent {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryEvent::SourceRequest => "RECOVERY_SOURCE_REQUEST",
            RecoveryEvent::SourceDelayed => "RECOVERY_SOURCE_DELAYED",
            RecoveryEvent::SourceRejected => "RECOVERY_SOURCE_REJECTED",

            RecoveryEvent::SessionStart => "RECOVERY_SESSION_START",
            RecoveryEvent::SessionComplete => "RECOVERY_SESSION_COMPLETE",
            RecoveryEvent::SessionFailed => "RECOVERY_SESSION_FAILED",
            RecoveryEvent::SessionCancelled => "RECOVERY_SESSION_CANCELLED",

            RecoveryEvent::Phase1Begin => "RECOVERY_PHASE1_BEGIN",
            RecoveryEvent::Phase1Complete => "RECOVERY_PHASE1_COMPLETE",
            RecoveryEvent::Phase2Begin => "RECOVERY_PHASE2_BEGIN",
            RecoveryEvent::Phase2Complete => "RECOVERY_PHASE2_COMPLETE",
            RecoveryEvent::Finalized => "RECOVERY_FINALIZED",
            RecoveryEvent::HandoffBegin => "RECOVERY_HANDOFF_BEGIN",
            RecoveryEvent::HandoffComplete => "RECOVERY_HANDOFF_COMPLETE",

            RecoveryEvent::SessionsBlocked => "RECOVERY_SESSIONS_BLOCKED",
            RecoveryEvent::SessionsUnblocked => "RECOVERY_SESSIONS_UNBLOCKED",
            RecoveryEvent::ShardSessionsCancelled => "RECOVERY_SHARD_SESSIONS_CANCELLED",

            RecoveryEvent::InvariantViolation => "RECOVERY_INVARIANT_VIOLATION",
        }
    }

    /// Severity this event is logged at.
    pub fn severity(&self) -> Severity {
        match self {
            RecoveryEvent::InvariantViolation => Severity::Fatal,
            RecoveryEvent::SessionFailed => Severity::Error,
            RecoveryEvent::SourceRejected | RecoveryEvent::SessionCancelled => Severity::Warn,
            RecoveryEvent::Phase1Begin
            | RecoveryEvent::Phase2Begin
            | RecoveryEvent::SessionsBlocked
            | RecoveryEvent::SessionsUnblocked => Severity::Trace,
            _ => Severity::Info,
        }
    }
}

impl fmt::Display for RecoveryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
