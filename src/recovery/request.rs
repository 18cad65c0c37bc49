//! Recovery requests and responses
//!
//! A request is built once by the transport layer from a wire message,
//! consumed once by the coordinator, and never mutated.

use crate::cluster::{AllocationId, NodeId, ShardId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Identity of one recovery attempt. A retry always gets a fresh id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecoveryId(Uuid);

impl RecoveryId {
    /// Generate a fresh recovery id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing uuid.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }
}

impl Default for RecoveryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecoveryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Recovery protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecoveryKind {
    /// Data files, then trailing operations, then finalize
    FullCopy,
    /// Operations only, for a target that already holds a recent base
    IncrementalOps,
    /// Transfer of write authority, no data copied
    PrimaryHandoff,
}

impl RecoveryKind {
    /// Kind name for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryKind::FullCopy => "full_copy",
            RecoveryKind::IncrementalOps => "incremental_ops",
            RecoveryKind::PrimaryHandoff => "primary_handoff",
        }
    }
}

impl fmt::Display for RecoveryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind-specific request parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecoveryParams {
    FullCopy {
        /// Per-request override of the configured chunk size
        chunk_size: Option<u64>,
    },
    IncrementalOps {
        /// First sequence number the target is missing
        starting_seq_no: u64,
    },
    PrimaryHandoff,
}

impl RecoveryParams {
    /// The protocol these parameters select.
    pub fn kind(&self) -> RecoveryKind {
        match self {
            RecoveryParams::FullCopy { .. } => RecoveryKind::FullCopy,
            RecoveryParams::IncrementalOps { .. } => RecoveryKind::IncrementalOps,
            RecoveryParams::PrimaryHandoff => RecoveryKind::PrimaryHandoff,
        }
    }
}

/// Inbound request to recover a shard copy from this node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryRequest {
    pub recovery_id: RecoveryId,
    pub shard_id: ShardId,
    pub target_node: NodeId,
    pub target_allocation_id: AllocationId,
    pub params: RecoveryParams,
}

impl RecoveryRequest {
    /// Create a request with a fresh recovery id.
    pub fn new(
        shard_id: ShardId,
        target_node: NodeId,
        target_allocation_id: AllocationId,
        params: RecoveryParams,
    ) -> Self {
        Self {
            recovery_id: RecoveryId::new(),
            shard_id,
            target_node,
            target_allocation_id,
            params,
        }
    }

    /// Full-copy request using the configured chunk size.
    pub fn full_copy(shard_id: ShardId, target_node: NodeId, target_allocation_id: AllocationId) -> Self {
        Self::new(
            shard_id,
            target_node,
            target_allocation_id,
            RecoveryParams::FullCopy { chunk_size: None },
        )
    }

    /// Incremental request starting at `starting_seq_no`.
    pub fn incremental_ops(
        shard_id: ShardId,
        target_node: NodeId,
        target_allocation_id: AllocationId,
        starting_seq_no: u64,
    ) -> Self {
        Self::new(
            shard_id,
            target_node,
            target_allocation_id,
            RecoveryParams::IncrementalOps { starting_seq_no },
        )
    }

    /// Primary handoff request.
    pub fn primary_handoff(
        shard_id: ShardId,
        target_node: NodeId,
        target_allocation_id: AllocationId,
    ) -> Self {
        Self::new(shard_id, target_node, target_allocation_id, RecoveryParams::PrimaryHandoff)
    }

    /// The protocol this request selects.
    pub fn kind(&self) -> RecoveryKind {
        self.params.kind()
    }

    /// Reject parameters no session could run with.
    pub fn validate_format(&self) -> Option<&'static str> {
        match self.params {
            RecoveryParams::FullCopy { chunk_size: Some(0) } => Some("chunk size override must be greater than zero"),
            _ => None,
        }
    }
}

/// Summary of a completed recovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecoveryResponse {
    pub recovery_id: RecoveryId,
    pub kind: RecoveryKind,
    /// Data files sent
    pub files_sent: usize,
    /// File chunks sent
    pub chunks_sent: u64,
    /// File bytes sent
    pub bytes_sent: u64,
    /// Operations sent
    pub ops_sent: u64,
    /// Time spent waiting on the rate limiter
    pub throttle_time: Duration,
    /// Wall-clock duration of the session
    pub took: Duration,
}

impl RecoveryResponse {
    /// Empty response for a session.
    pub fn new(recovery_id: RecoveryId, kind: RecoveryKind) -> Self {
        Self {
            recovery_id,
            kind,
            files_sent: 0,
            chunks_sent: 0,
            bytes_sent: 0,
            ops_sent: 0,
            throttle_time: Duration::ZERO,
            took: Duration::ZERO,
        }
    }
}

/// What the request issuer gets back when no error occurred
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// The session ran to completion
    Completed(RecoveryResponse),
    /// A transient precondition is not met yet; retry the whole request later
    Delayed { reason: String },
}

impl RecoveryOutcome {
    /// Check if the outcome asks the caller to retry later.
    pub fn is_delayed(&self) -> bool {
        matches!(self, RecoveryOutcome::Delayed { .. })
    }

    /// The response if completed.
    pub fn response(&self) -> Option<&RecoveryResponse> {
        match self {
            RecoveryOutcome::Completed(response) => Some(response),
            RecoveryOutcome::Delayed { .. } => None,
        }
    }

    /// The delay reason if delayed.
    pub fn delay_reason(&self) -> Option<&str> {
        match self {
            RecoveryOutcome::Delayed { reason } => Some(reason),
            RecoveryOutcome::Completed(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shard() -> ShardId {
        ShardId::new("a", 0)
    }

    #[test]
    fn test_kind_follows_params() {
        let node = NodeId::new("n2");
        let alloc = AllocationId::new();
        assert_eq!(
            RecoveryRequest::full_copy(shard(), node.clone(), alloc).kind(),
            RecoveryKind::FullCopy
        );
        assert_eq!(
            RecoveryRequest::incremental_ops(shard(), node.clone(), alloc, 5).kind(),
            RecoveryKind::IncrementalOps
        );
        assert_eq!(
            RecoveryRequest::primary_handoff(shard(), node, alloc).kind(),
            RecoveryKind::PrimaryHandoff
        );
    }

    #[test]
    fn test_every_request_gets_a_fresh_id() {
        let a = RecoveryRequest::full_copy(shard(), NodeId::new("n2"), AllocationId::new());
        let b = RecoveryRequest::full_copy(shard(), NodeId::new("n2"), AllocationId::new());
        assert_ne!(a.recovery_id, b.recovery_id);
    }

    #[test]
    fn test_zero_chunk_override_rejected() {
        let request = RecoveryRequest::new(
            shard(),
            NodeId::new("n2"),
            AllocationId::new(),
            RecoveryParams::FullCopy { chunk_size: Some(0) },
        );
        assert!(request.validate_format().is_some());
    }

    #[test]
    fn test_request_serde() {
        let request = RecoveryRequest::incremental_ops(shard(), NodeId::new("n2"), AllocationId::new(), 42);
        let json = serde_json::to_string(&request).unwrap();
        let parsed: RecoveryRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, request);
    }

    #[test]
    fn test_outcome_accessors() {
        let delayed = RecoveryOutcome::Delayed {
            reason: "later".to_string(),
        };
        assert!(delayed.is_delayed());
        assert_eq!(delayed.delay_reason(), Some("later"));
        assert!(delayed.response().is_none());
    }
}
