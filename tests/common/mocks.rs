//! In-memory collaborators
//!
//! Every mock records what it was asked to do so tests can assert on the
//! exact sequence of calls.

use async_trait::async_trait;
use peer_recovery::cluster::{
    AllocationId, ClusterStateSource, DiscoveryNode, NodeId, RoutingView, ShardId, ShardRouting,
};
use peer_recovery::recovery::{
    ClientError, ClientResult, FileChunk, FileManifest, OpBatch, RecoveryRequest,
    RecoveryTargetClient, TargetClientFactory,
};
use peer_recovery::shard::{
    DataSnapshot, LocalShard, Operation, PrimaryContext, ShardError, ShardLookup, ShardResult,
    StoreFile,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, Semaphore};

// =============================================================================
// Cluster
// =============================================================================

/// Routing view that tests swap out wholesale
pub struct StaticCluster {
    view: Mutex<Arc<RoutingView>>,
}

impl StaticCluster {
    pub fn new(view: RoutingView) -> Self {
        Self {
            view: Mutex::new(Arc::new(view)),
        }
    }

    pub fn set(&self, view: RoutingView) {
        *self.view.lock().unwrap() = Arc::new(view);
    }
}

impl ClusterStateSource for StaticCluster {
    fn current_routing_view(&self) -> Arc<RoutingView> {
        Arc::clone(&self.view.lock().unwrap())
    }
}

// =============================================================================
// Shards
// =============================================================================

/// Local shard copy backed by vectors
pub struct MockShard {
    shard_id: ShardId,
    routing: Mutex<ShardRouting>,
    in_sync: Mutex<HashSet<AllocationId>>,
    files: Vec<StoreFile>,
    snapshot_max_seq_no: Option<u64>,
    ops: Mutex<Vec<Operation>>,
    min_retained: u64,
    primary_term: u64,
    stuck_in_flight: usize,
    pub drained: AtomicBool,
    pub resumed: AtomicUsize,
    pub relocated_to: Mutex<Option<AllocationId>>,
}

impl MockShard {
    /// Started primary copy on `node`.
    pub fn primary(shard_id: ShardId, node: NodeId) -> Self {
        Self {
            routing: Mutex::new(ShardRouting::started(shard_id.clone(), node, true)),
            shard_id,
            in_sync: Mutex::new(HashSet::new()),
            files: Vec::new(),
            snapshot_max_seq_no: None,
            ops: Mutex::new(Vec::new()),
            min_retained: 0,
            primary_term: 1,
            stuck_in_flight: 0,
            drained: AtomicBool::new(false),
            resumed: AtomicUsize::new(0),
            relocated_to: Mutex::new(None),
        }
    }

    pub fn with_files(mut self, files: Vec<StoreFile>, max_seq_no: Option<u64>) -> Self {
        self.files = files;
        self.snapshot_max_seq_no = max_seq_no;
        self
    }

    pub fn with_ops(self, ops: Vec<Operation>) -> Self {
        *self.ops.lock().unwrap() = ops;
        self
    }

    /// Log no longer holds anything below `seq_no`.
    pub fn with_min_retained(mut self, seq_no: u64) -> Self {
        self.min_retained = seq_no;
        self
    }

    pub fn relocating_to(self, target: NodeId) -> Self {
        let routing = self.routing.lock().unwrap().clone().relocating_to(target);
        *self.routing.lock().unwrap() = routing;
        self
    }

    /// Replace the local routing entry wholesale.
    pub fn with_routing(self, routing: ShardRouting) -> Self {
        *self.routing.lock().unwrap() = routing;
        self
    }

    pub fn with_in_sync(self, allocation_id: AllocationId) -> Self {
        self.in_sync.lock().unwrap().insert(allocation_id);
        self
    }

    /// Report this many in-flight operations even after draining.
    pub fn with_stuck_in_flight(mut self, count: usize) -> Self {
        self.stuck_in_flight = count;
        self
    }
}

#[async_trait]
impl LocalShard for MockShard {
    fn shard_id(&self) -> &ShardId {
        &self.shard_id
    }

    fn routing_entry(&self) -> ShardRouting {
        self.routing.lock().unwrap().clone()
    }

    fn is_allocation_in_sync(&self, allocation_id: &AllocationId) -> bool {
        self.in_sync.lock().unwrap().contains(allocation_id)
    }

    fn data_snapshot(&self) -> ShardResult<DataSnapshot> {
        Ok(DataSnapshot::new(self.files.clone(), self.snapshot_max_seq_no))
    }

    fn op_log_from(&self, from_seq_no: u64) -> ShardResult<Vec<Operation>> {
        if from_seq_no < self.min_retained {
            return Err(ShardError::PositionNotRetained {
                requested: from_seq_no,
                min_retained: self.min_retained,
            });
        }
        let ops = self.ops.lock().unwrap();
        let next = ops.last().map_or(self.min_retained, |op| op.seq_no + 1);
        if from_seq_no > next {
            return Err(ShardError::PositionOutOfRange {
                requested: from_seq_no,
                max_seq_no: next.saturating_sub(1),
            });
        }
        Ok(ops.iter().filter(|op| op.seq_no >= from_seq_no).cloned().collect())
    }

    fn in_flight_operations(&self) -> usize {
        self.stuck_in_flight
    }

    async fn drain_operations(&self) -> ShardResult<PrimaryContext> {
        self.drained.store(true, Ordering::SeqCst);
        let max_seq_no = self.ops.lock().unwrap().last().map_or(0, |op| op.seq_no);
        Ok(PrimaryContext {
            primary_term: self.primary_term,
            max_seq_no,
        })
    }

    fn resume_operations(&self) {
        self.resumed.fetch_add(1, Ordering::SeqCst);
    }

    fn relocated(&self, target: &AllocationId) -> ShardResult<()> {
        *self.relocated_to.lock().unwrap() = Some(*target);
        Ok(())
    }
}

/// Shards hosted on the test node
#[derive(Default)]
pub struct ShardMap {
    shards: Mutex<HashMap<ShardId, Arc<MockShard>>>,
}

impl ShardMap {
    pub fn insert(&self, shard: MockShard) -> Arc<MockShard> {
        let shard = Arc::new(shard);
        self.shards
            .lock()
            .unwrap()
            .insert(shard.shard_id().clone(), Arc::clone(&shard));
        shard
    }
}

impl ShardLookup for ShardMap {
    fn shard(&self, shard_id: &ShardId) -> Option<Arc<dyn LocalShard>> {
        self.shards
            .lock()
            .unwrap()
            .get(shard_id)
            .map(|shard| Arc::clone(shard) as Arc<dyn LocalShard>)
    }
}

// =============================================================================
// Target clients
// =============================================================================

/// Target client that records every call
#[derive(Default)]
pub struct RecordingClient {
    pub manifests: Mutex<Vec<FileManifest>>,
    pub chunks: Mutex<Vec<FileChunk>>,
    pub batches: Mutex<Vec<OpBatch>>,
    pub finalized: Mutex<Option<Option<u64>>>,
    pub handoffs: Mutex<Vec<PrimaryContext>>,
    pub cancelled: AtomicBool,
    fail_cancel: bool,
    reject_ops: bool,
    /// When set, `send_chunk` parks until the test adds permits
    chunk_gate: Option<Semaphore>,
    /// Signalled each time `send_chunk` is entered
    pub chunk_arrived: Notify,
    /// When set, `hand_off_primary_context` parks until permits are added
    handoff_gate: Option<Semaphore>,
    /// Signalled each time `hand_off_primary_context` is entered
    pub handoff_arrived: Notify,
}

impl RecordingClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `send_chunk` waits for [`RecordingClient::release_chunks`].
    pub fn gated() -> Self {
        Self {
            chunk_gate: Some(Semaphore::new(0)),
            ..Self::default()
        }
    }

    /// Every `hand_off_primary_context` waits for
    /// [`RecordingClient::release_handoff`].
    pub fn gated_handoff() -> Self {
        Self {
            handoff_gate: Some(Semaphore::new(0)),
            ..Self::default()
        }
    }

    pub fn release_handoff(&self) {
        if let Some(gate) = &self.handoff_gate {
            gate.add_permits(1);
        }
    }

    pub fn failing_cancel() -> Self {
        Self {
            fail_cancel: true,
            ..Self::default()
        }
    }

    pub fn rejecting_ops() -> Self {
        Self {
            reject_ops: true,
            ..Self::default()
        }
    }

    pub fn release_chunks(&self, count: usize) {
        if let Some(gate) = &self.chunk_gate {
            gate.add_permits(count);
        }
    }

    /// Sequence numbers of every operation received, in arrival order.
    pub fn received_seq_nos(&self) -> Vec<u64> {
        self.batches
            .lock()
            .unwrap()
            .iter()
            .flat_map(|batch| batch.operations.iter().map(|op| op.seq_no))
            .collect()
    }
}

#[async_trait]
impl RecoveryTargetClient for RecordingClient {
    async fn receive_file_info(&self, manifest: &FileManifest) -> ClientResult<()> {
        self.manifests.lock().unwrap().push(manifest.clone());
        Ok(())
    }

    async fn send_chunk(&self, chunk: FileChunk) -> ClientResult<()> {
        self.chunk_arrived.notify_one();
        if let Some(gate) = &self.chunk_gate {
            let permit = gate
                .acquire()
                .await
                .map_err(|_| ClientError::Transport("gate closed".into()))?;
            permit.forget();
        }
        self.chunks.lock().unwrap().push(chunk);
        Ok(())
    }

    async fn send_ops(&self, batch: OpBatch) -> ClientResult<()> {
        if self.reject_ops {
            return Err(ClientError::Protocol("target rejected operations".into()));
        }
        self.batches.lock().unwrap().push(batch);
        Ok(())
    }

    async fn finalize(&self, max_seq_no: Option<u64>) -> ClientResult<()> {
        *self.finalized.lock().unwrap() = Some(max_seq_no);
        Ok(())
    }

    async fn hand_off_primary_context(&self, context: PrimaryContext) -> ClientResult<()> {
        self.handoff_arrived.notify_one();
        if let Some(gate) = &self.handoff_gate {
            let permit = gate
                .acquire()
                .await
                .map_err(|_| ClientError::Transport("gate closed".into()))?;
            permit.forget();
        }
        self.handoffs.lock().unwrap().push(context);
        Ok(())
    }

    fn cancel(&self) -> ClientResult<()> {
        self.cancelled.store(true, Ordering::SeqCst);
        if self.fail_cancel {
            Err(ClientError::Transport("target unreachable".into()))
        } else {
            Ok(())
        }
    }
}

/// Hands out queued clients first, then fresh recording clients
#[derive(Default)]
pub struct QueuedClientFactory {
    queued: Mutex<VecDeque<Arc<RecordingClient>>>,
    handed_out: Mutex<Vec<Arc<RecordingClient>>>,
}

impl QueuedClientFactory {
    pub fn push(&self, client: Arc<RecordingClient>) {
        self.queued.lock().unwrap().push_back(client);
    }

    /// Clients handed out so far, in order.
    pub fn handed_out(&self) -> Vec<Arc<RecordingClient>> {
        self.handed_out.lock().unwrap().clone()
    }

    pub fn last(&self) -> Arc<RecordingClient> {
        self.handed_out
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no client handed out")
    }
}

impl TargetClientFactory for QueuedClientFactory {
    fn client_for(&self, _request: &RecoveryRequest, _node: &DiscoveryNode) -> Arc<dyn RecoveryTargetClient> {
        let client = self
            .queued
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Arc::new(RecordingClient::new()));
        self.handed_out.lock().unwrap().push(Arc::clone(&client));
        client
    }
}
