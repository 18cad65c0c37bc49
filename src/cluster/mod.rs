//! Cluster Routing View
//!
//! Read-only view of cluster membership and shard assignment as the
//! recovery source sees it:
//! - Which nodes are known
//! - Which shard copies exist, where, and in which lifecycle state
//!
//! This module never mutates routing state. The service that owns it is
//! an external collaborator behind [`ClusterStateSource`].

mod ids;
mod routing;

pub use ids::{AllocationId, NodeId, ShardId};
pub use routing::{ClusterStateSource, DiscoveryNode, RoutingView, ShardRouting, ShardRoutingState};
