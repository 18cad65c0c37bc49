//! Operation Log Entries
//!
//! Entries are sent verbatim and in log order; the recovery source never
//! re-encodes or reorders them.

use serde::{Deserialize, Serialize};

/// Fixed per-entry overhead used in size estimates (seq_no, kind tag, framing)
const ENTRY_OVERHEAD_BYTES: u64 = 32;

/// Operation payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationKind {
    /// Index (insert or overwrite) a document
    Index { id: String, source: Vec<u8> },
    /// Delete a document
    Delete { id: String },
    /// Sequence number consumed without a document change
    NoOp { reason: String },
}

/// One operation-log entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    /// Sequence number assigned by the primary
    pub seq_no: u64,
    /// Primary term the operation was assigned under
    pub primary_term: u64,
    /// Payload
    pub kind: OperationKind,
}

impl Operation {
    /// Create an index operation.
    pub fn index(seq_no: u64, primary_term: u64, id: impl Into<String>, source: Vec<u8>) -> Self {
        Self {
            seq_no,
            primary_term,
            kind: OperationKind::Index {
                id: id.into(),
                source,
            },
        }
    }

    /// Create a delete operation.
    pub fn delete(seq_no: u64, primary_term: u64, id: impl Into<String>) -> Self {
        Self {
            seq_no,
            primary_term,
            kind: OperationKind::Delete { id: id.into() },
        }
    }

    /// Create a no-op.
    pub fn no_op(seq_no: u64, primary_term: u64, reason: impl Into<String>) -> Self {
        Self {
            seq_no,
            primary_term,
            kind: OperationKind::NoOp {
                reason: reason.into(),
            },
        }
    }

    /// Approximate wire size, used to cut op batches.
    pub fn estimate_size(&self) -> u64 {
        let payload = match &self.kind {
            OperationKind::Index { id, source } => id.len() + source.len(),
            OperationKind::Delete { id } => id.len(),
            OperationKind::NoOp { reason } => reason.len(),
        };
        ENTRY_OVERHEAD_BYTES + payload as u64
    }
}
