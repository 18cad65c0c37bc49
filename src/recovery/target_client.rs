//! Recovery Target Client
//!
//! Thin RPC facade a session uses to push data and operations to the
//! recovering copy. The network transport behind it is an external
//! collaborator.
//!
//! Every call may fail with a transport error (network level) or a
//! protocol error (the target rejected the content). The session reports
//! both as failures without distinguishing further.

use super::request::RecoveryRequest;
use crate::cluster::DiscoveryNode;
use crate::shard::{Operation, PrimaryContext};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Result type for target client calls
pub type ClientResult<T> = Result<T, ClientError>;

/// Target client errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// Network-level failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Target rejected the content or is in an incompatible state
    #[error("target rejected request: {0}")]
    Protocol(String),
}

/// Name and length of one file in a full-copy snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub name: String,
    pub length: u64,
}

/// Files the target should expect before chunks start flowing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileManifest {
    pub files: Vec<FileInfo>,
    pub total_bytes: u64,
}

/// A bounded slice of one data file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChunk {
    /// File this chunk belongs to
    pub file_name: String,
    /// Byte offset of `data` within the file
    pub position: u64,
    pub data: Bytes,
    /// Whether this is the file's final chunk
    pub last_chunk: bool,
}

/// Consecutive operation-log entries, in log order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpBatch {
    pub operations: Vec<Operation>,
}

impl OpBatch {
    /// Number of operations in the batch.
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Check if the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// RPC client bound to one recovering target copy.
#[async_trait]
pub trait RecoveryTargetClient: Send + Sync {
    /// Announce the files a full copy is about to send.
    async fn receive_file_info(&self, manifest: &FileManifest) -> ClientResult<()>;

    /// Send one file chunk.
    async fn send_chunk(&self, chunk: FileChunk) -> ClientResult<()>;

    /// Send a batch of operations; the target applies them in order.
    async fn send_ops(&self, batch: OpBatch) -> ClientResult<()>;

    /// Ask the target to finish recovery and report ready.
    ///
    /// `max_seq_no` is the highest sequence number the source sent, if any.
    async fn finalize(&self, max_seq_no: Option<u64>) -> ClientResult<()>;

    /// Transfer write authority to the target.
    async fn hand_off_primary_context(&self, context: PrimaryContext) -> ClientResult<()>;

    /// Abort outstanding calls. Must not block.
    fn cancel(&self) -> ClientResult<()>;
}

/// Builds target clients for accepted requests.
pub trait TargetClientFactory: Send + Sync {
    /// Client bound to the copy named by `request` on `node`.
    fn client_for(&self, request: &RecoveryRequest, node: &DiscoveryNode) -> Arc<dyn RecoveryTargetClient>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_op_batch_len() {
        let batch = OpBatch {
            operations: vec![Operation::delete(1, 1, "a"), Operation::delete(2, 1, "b")],
        };
        assert_eq!(batch.len(), 2);
        assert!(!batch.is_empty());
        assert!(OpBatch::default().is_empty());
    }

    #[test]
    fn test_client_error_display() {
        assert_eq!(
            ClientError::Protocol("shard is not initializing".into()).to_string(),
            "target rejected request: shard is not initializing"
        );
    }
}
