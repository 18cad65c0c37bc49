//! Routing entries and the routing-state collaborator.

use super::ids::{AllocationId, NodeId, ShardId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Lifecycle state of a shard copy in routing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShardRoutingState {
    /// Assigned nowhere yet
    Unassigned,
    /// Assigned and waiting for recovery to complete
    Initializing,
    /// Serving
    Started,
    /// Serving, and moving to another node
    Relocating,
}

impl ShardRoutingState {
    /// State name for logs and delay reasons.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unassigned => "UNASSIGNED",
            Self::Initializing => "INITIALIZING",
            Self::Started => "STARTED",
            Self::Relocating => "RELOCATING",
        }
    }
}

impl fmt::Display for ShardRoutingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One shard copy as recorded in routing state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardRouting {
    /// Shard this copy belongs to
    pub shard_id: ShardId,
    /// Node hosting the copy
    pub node_id: NodeId,
    /// Physical copy identity
    pub allocation_id: AllocationId,
    /// Whether this copy is (or is becoming) the primary
    pub primary: bool,
    /// Lifecycle state
    pub state: ShardRoutingState,
    /// Node this copy is relocating to, when `state` is `Relocating`
    pub relocating_node_id: Option<NodeId>,
}

impl ShardRouting {
    /// Create a started copy.
    pub fn started(shard_id: ShardId, node_id: NodeId, primary: bool) -> Self {
        Self {
            shard_id,
            node_id,
            allocation_id: AllocationId::new(),
            primary,
            state: ShardRoutingState::Started,
            relocating_node_id: None,
        }
    }

    /// Create an initializing copy with a known allocation id.
    pub fn initializing(
        shard_id: ShardId,
        node_id: NodeId,
        allocation_id: AllocationId,
        primary: bool,
    ) -> Self {
        Self {
            shard_id,
            node_id,
            allocation_id,
            primary,
            state: ShardRoutingState::Initializing,
            relocating_node_id: None,
        }
    }

    /// Mark this copy as relocating to `target`.
    pub fn relocating_to(mut self, target: NodeId) -> Self {
        self.state = ShardRoutingState::Relocating;
        self.relocating_node_id = Some(target);
        self
    }

    /// Check if the copy is relocating.
    pub fn is_relocating(&self) -> bool {
        self.state == ShardRoutingState::Relocating
    }

    /// Check if the copy is initializing.
    pub fn is_initializing(&self) -> bool {
        self.state == ShardRoutingState::Initializing
    }
}

/// A node known to the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryNode {
    /// Node identity
    pub id: NodeId,
    /// Transport address
    pub address: String,
}

impl DiscoveryNode {
    /// Create a node entry.
    pub fn new(id: NodeId, address: impl Into<String>) -> Self {
        Self {
            id,
            address: address.into(),
        }
    }
}

/// Point-in-time snapshot of routing state.
#[derive(Debug, Clone, Default)]
pub struct RoutingView {
    /// Cluster state version this view was taken at
    pub version: u64,
    nodes: HashMap<NodeId, DiscoveryNode>,
    shards: Vec<ShardRouting>,
}

impl RoutingView {
    /// Create an empty view at `version`.
    pub fn new(version: u64) -> Self {
        Self {
            version,
            nodes: HashMap::new(),
            shards: Vec::new(),
        }
    }

    /// Add a node to the view.
    pub fn with_node(mut self, node: DiscoveryNode) -> Self {
        self.nodes.insert(node.id.clone(), node);
        self
    }

    /// Add a shard copy to the view.
    pub fn with_shard(mut self, routing: ShardRouting) -> Self {
        self.shards.push(routing);
        self
    }

    /// Look up a node.
    pub fn node(&self, id: &NodeId) -> Option<&DiscoveryNode> {
        self.nodes.get(id)
    }

    /// Look up the copy of `shard_id` hosted on `node_id`.
    pub fn shard_on_node(&self, shard_id: &ShardId, node_id: &NodeId) -> Option<&ShardRouting> {
        self.shards
            .iter()
            .find(|r| &r.shard_id == shard_id && &r.node_id == node_id)
    }

    /// All copies of `shard_id`.
    pub fn copies_of<'a>(&'a self, shard_id: &'a ShardId) -> impl Iterator<Item = &'a ShardRouting> + 'a {
        self.shards.iter().filter(move |r| &r.shard_id == shard_id)
    }
}

/// Routing-state collaborator.
///
/// Queries are read-only snapshots; a new view may be returned on every
/// call as the cluster changes underneath.
pub trait ClusterStateSource: Send + Sync {
    /// Current routing view.
    fn current_routing_view(&self) -> Arc<RoutingView>;
}
