//! Coordinator wired to in-memory collaborators

use super::mocks::{MockShard, QueuedClientFactory, ShardMap, StaticCluster};
use peer_recovery::cluster::{
    AllocationId, ClusterStateSource, DiscoveryNode, NodeId, RoutingView, ShardId, ShardRouting,
};
use peer_recovery::recovery::{RecoveryCoordinator, RecoverySettings, TargetClientFactory};
use peer_recovery::shard::ShardLookup;
use std::sync::Arc;

pub const SOURCE_NODE: &str = "node-source";
pub const TARGET_NODE: &str = "node-target";

pub fn source() -> NodeId {
    NodeId::new(SOURCE_NODE)
}

pub fn target() -> NodeId {
    NodeId::new(TARGET_NODE)
}

pub fn shard_id() -> ShardId {
    ShardId::new("orders", 0)
}

/// View where `source` holds a started primary of `shard_id()` and the
/// target node hosts an initializing copy with `allocation_id`.
pub fn view_with_target(allocation_id: AllocationId, primary: bool) -> RoutingView {
    RoutingView::new(1)
        .with_node(DiscoveryNode::new(source(), "10.0.0.1:9300"))
        .with_node(DiscoveryNode::new(target(), "10.0.0.2:9300"))
        .with_shard(ShardRouting::started(shard_id(), source(), true))
        .with_shard(ShardRouting::initializing(shard_id(), target(), allocation_id, primary))
}

pub struct Harness {
    pub coordinator: Arc<RecoveryCoordinator>,
    pub cluster: Arc<StaticCluster>,
    pub shards: Arc<ShardMap>,
    pub clients: Arc<QueuedClientFactory>,
}

impl Harness {
    pub fn new(view: RoutingView) -> Self {
        Self::with_settings(view, RecoverySettings::unthrottled())
    }

    pub fn with_settings(view: RoutingView, settings: RecoverySettings) -> Self {
        let cluster = Arc::new(StaticCluster::new(view));
        let shards = Arc::new(ShardMap::default());
        let clients = Arc::new(QueuedClientFactory::default());
        let coordinator = RecoveryCoordinator::new(
            source(),
            settings,
            Arc::clone(&cluster) as Arc<dyn ClusterStateSource>,
            Arc::clone(&shards) as Arc<dyn ShardLookup>,
            Arc::clone(&clients) as Arc<dyn TargetClientFactory>,
        )
        .expect("valid settings");

        Self {
            coordinator: Arc::new(coordinator),
            cluster,
            shards,
            clients,
        }
    }

    pub fn add_shard(&self, shard: MockShard) -> Arc<MockShard> {
        self.shards.insert(shard)
    }
}
