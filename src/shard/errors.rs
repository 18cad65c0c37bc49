//! Shard Error Types

use thiserror::Error;

/// Result type for local shard access
pub type ShardResult<T> = Result<T, ShardError>;

/// Errors raised by the local shard engine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShardError {
    /// Requested op-log position was already trimmed
    #[error("operation log no longer retains seq_no {requested} (min retained {min_retained})")]
    PositionNotRetained { requested: u64, min_retained: u64 },

    /// Requested op-log position lies beyond the end of the log
    #[error("seq_no {requested} is beyond the end of the operation log (max {max_seq_no})")]
    PositionOutOfRange { requested: u64, max_seq_no: u64 },

    /// Shard is closed
    #[error("shard is closed")]
    Closed,

    /// Storage-level failure
    #[error("storage error: {0}")]
    Storage(String),
}

impl ShardError {
    /// Check if this error concerns an op-log position.
    pub fn is_position_error(&self) -> bool {
        matches!(
            self,
            ShardError::PositionNotRetained { .. } | ShardError::PositionOutOfRange { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_errors() {
        assert!(ShardError::PositionNotRetained { requested: 1, min_retained: 5 }.is_position_error());
        assert!(ShardError::PositionOutOfRange { requested: 9, max_seq_no: 5 }.is_position_error());
        assert!(!ShardError::Closed.is_position_error());
    }
}
