//! Local Shard Boundary
//!
//! The on-disk shard engine is an external collaborator. The recovery
//! source only needs read access to it:
//! - A consistent point-in-time data snapshot
//! - The operation log from a given sequence number, in log order
//! - In-sync allocation tracking and the local routing entry
//!
//! The single exception is primary handoff, which drains writes and
//! marks the local copy relocated once the target holds authority.

mod errors;
mod oplog;
mod snapshot;

pub use errors::{ShardError, ShardResult};
pub use oplog::{Operation, OperationKind};
pub use snapshot::{DataSnapshot, StoreFile};

use crate::cluster::{AllocationId, ShardId, ShardRouting};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Write-serialization state handed to a new primary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimaryContext {
    /// Primary term the source copy operated under
    pub primary_term: u64,
    /// Highest sequence number assigned by the source copy
    pub max_seq_no: u64,
}

/// A shard copy hosted on this node.
#[async_trait]
pub trait LocalShard: Send + Sync {
    /// Shard identity.
    fn shard_id(&self) -> &ShardId;

    /// Current local routing entry of this copy.
    fn routing_entry(&self) -> ShardRouting;

    /// Whether `allocation_id` is tracked as in sync with this copy.
    fn is_allocation_in_sync(&self, allocation_id: &AllocationId) -> bool;

    /// Take a consistent point-in-time snapshot of the data files.
    ///
    /// Operations above the snapshot's `max_seq_no` stay retained in the
    /// operation log while the returned snapshot is alive.
    fn data_snapshot(&self) -> ShardResult<DataSnapshot>;

    /// Operations with `seq_no >= from_seq_no`, in log order.
    ///
    /// `from_seq_no` one past the last operation yields an empty list.
    /// Fails with `PositionNotRetained` if the log no longer holds
    /// `from_seq_no`, and `PositionOutOfRange` if it lies further out.
    fn op_log_from(&self, from_seq_no: u64) -> ShardResult<Vec<Operation>>;

    /// Number of write operations currently executing.
    fn in_flight_operations(&self) -> usize;

    /// Block new writes and wait for in-flight ones to finish.
    ///
    /// Dropping the future before it resolves must leave writes unblocked.
    async fn drain_operations(&self) -> ShardResult<PrimaryContext>;

    /// Undo [`LocalShard::drain_operations`] after a failed handoff.
    fn resume_operations(&self);

    /// Record that write authority moved to `target`.
    fn relocated(&self, target: &AllocationId) -> ShardResult<()>;
}

/// Resolves local shard instances.
pub trait ShardLookup: Send + Sync {
    /// The local copy of `shard_id`, if this node hosts one.
    fn shard(&self, shard_id: &ShardId) -> Option<Arc<dyn LocalShard>>;
}
