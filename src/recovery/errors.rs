//! Recovery Error Types
//!
//! - A "retry later" answer is not an error; see `Admission` and
//!   `RecoveryOutcome`
//! - Invariant violations are never retried automatically
//! - Transport and protocol failures end the session; a retry needs a
//!   fresh request with a fresh recovery id

use super::request::RecoveryId;
use super::target_client::ClientError;
use crate::cluster::ShardId;
use crate::shard::ShardError;
use std::fmt;
use thiserror::Error;

/// Result type for recovery operations
pub type RecoveryResult<T> = Result<T, RecoveryError>;

/// Recovery errors
#[derive(Debug, Clone, Error)]
pub enum RecoveryError {
    // ==================
    // Validation
    // ==================
    /// No local copy of the shard
    #[error("shard {0} not found on this node")]
    ShardNotFound(ShardId),

    /// Request carries unusable parameters
    #[error("invalid recovery request: {0}")]
    InvalidRequest(String),

    /// Local and cluster-observed state contradict each other
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    // ==================
    // Session failures
    // ==================
    /// Network-level failure talking to the target
    #[error("transport failure: {0}")]
    Transport(String),

    /// Target rejected content or reported an incompatible state
    #[error("protocol failure: {0}")]
    Protocol(String),

    /// Local shard engine failure
    #[error("shard failure: {0}")]
    Shard(ShardError),

    /// Session was cancelled
    #[error("recovery cancelled: {reason}")]
    Cancelled { reason: String },

    // ==================
    // Registry
    // ==================
    /// A handoff already holds the new-session gate for this shard
    #[error("new recoveries for shard {shard_id} are already blocked: {reason}")]
    AlreadyBlocked { shard_id: ShardId, reason: String },

    /// One or more session cancellations failed
    #[error("{0}")]
    AggregateCancellation(CancellationFailures),

    // ==================
    // Configuration
    // ==================
    /// Invalid recovery settings
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl RecoveryError {
    /// Create an invariant violation error.
    pub fn invariant(message: impl Into<String>) -> Self {
        RecoveryError::InvariantViolation(message.into())
    }

    /// Create a cancelled error.
    pub fn cancelled(reason: impl Into<String>) -> Self {
        RecoveryError::Cancelled {
            reason: reason.into(),
        }
    }

    /// Check if this error signals a bug rather than an operational failure.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, RecoveryError::InvariantViolation(_))
    }

    /// Check if this error ended a running session with a failure.
    pub fn is_session_failure(&self) -> bool {
        matches!(
            self,
            RecoveryError::Transport(_) | RecoveryError::Protocol(_) | RecoveryError::Shard(_)
        )
    }

    /// Check if this error is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RecoveryError::Cancelled { .. })
    }
}

impl From<ClientError> for RecoveryError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Transport(message) => RecoveryError::Transport(message),
            ClientError::Protocol(message) => RecoveryError::Protocol(message),
        }
    }
}

impl From<ShardError> for RecoveryError {
    fn from(err: ShardError) -> Self {
        if err.is_position_error() {
            RecoveryError::Protocol(err.to_string())
        } else {
            RecoveryError::Shard(err)
        }
    }
}

/// A single failed cancellation inside `cancel_all`
#[derive(Debug, Clone)]
pub struct CancellationFailure {
    /// Session whose cancellation failed
    pub recovery_id: RecoveryId,
    /// Why it failed
    pub error: Box<RecoveryError>,
}

/// Every failed cancellation of one `cancel_all` call
#[derive(Debug, Clone)]
pub struct CancellationFailures {
    /// Shard being cancelled
    pub shard_id: ShardId,
    /// Sessions attempted in total
    pub attempted: usize,
    /// Failures, one per session that failed to cancel
    pub failures: Vec<CancellationFailure>,
}

impl CancellationFailures {
    /// Number of failed cancellations.
    pub fn len(&self) -> usize {
        self.failures.len()
    }

    /// Check if no cancellation failed.
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }
}

impl fmt::Display for CancellationFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "failed to cancel {} of {} recoveries for shard {}",
            self.failures.len(),
            self.attempted,
            self.shard_id
        )?;
        for failure in &self.failures {
            write!(f, "; [{}] {}", failure.recovery_id, failure.error)?;
        }
        Ok(())
    }
}
