//! Recovery Session State Machine
//!
//! One in-flight recovery attempt for one shard:
//!
//! ```text
//! Created -> Running -> { Succeeded | Failed | Cancelled }
//! ```
//!
//! - Terminal states are final; a session is never reused or restarted
//! - `cancel` from Created or Running makes the terminal state Cancelled,
//!   unless the protocol already finished on its own
//! - Cancelling a terminal session is a no-op, not an error
//! - A handoff that finds the shard's gate already held never ran its
//!   protocol and also ends Cancelled

use super::cancellation::CancellationSignal;
use super::config::RecoverySettings;
use super::errors::{RecoveryError, RecoveryResult};
use super::protocol::{full_copy, handoff, ops_replay};
use super::registry::SessionRegistry;
use super::request::{RecoveryId, RecoveryKind, RecoveryParams, RecoveryRequest, RecoveryResponse};
use super::target_client::{ClientResult, RecoveryTargetClient};
use super::throttle::RateLimiter;
use crate::cluster::{AllocationId, NodeId, ShardId};
use crate::observability::{log_event_with_fields, RecoveryEvent, RecoveryMetrics};
use crate::shard::LocalShard;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Constructed, not yet run
    Created,
    /// Protocol in progress
    Running,
    /// Target acknowledged completion
    Succeeded,
    /// Ended by an error other than cancellation
    Failed,
    /// Ended by cancellation
    Cancelled,
}

impl SessionState {
    /// Check if no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    /// State name for observability.
    pub fn state_name(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.state_name())
    }
}

/// Everything a running session reads from its surroundings.
pub struct SessionContext {
    /// Local copy being recovered from
    pub shard: Arc<dyn LocalShard>,
    /// Registry the session is registered in (handoff uses its gate)
    pub registry: SessionRegistry,
    pub settings: RecoverySettings,
    /// Node-wide byte-rate limiter
    pub limiter: Arc<RateLimiter>,
    pub metrics: Arc<RecoveryMetrics>,
}

/// One recovery attempt
pub struct RecoverySession {
    id: RecoveryId,
    shard_id: ShardId,
    target_node: NodeId,
    target_allocation_id: AllocationId,
    params: RecoveryParams,
    client: Arc<dyn RecoveryTargetClient>,
    signal: CancellationSignal,
    state: Mutex<SessionState>,
    /// Set when `cancel_all` took the session out of its shard's active set
    detached: AtomicBool,
}

impl fmt::Debug for RecoverySession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoverySession")
            .field("id", &self.id)
            .field("shard_id", &self.shard_id)
            .field("kind", &self.kind())
            .field("state", &self.state())
            .finish()
    }
}

impl RecoverySession {
    /// Build the session for `request`; the request's parameters select
    /// the protocol it will run.
    pub fn for_request(request: &RecoveryRequest, client: Arc<dyn RecoveryTargetClient>) -> Arc<Self> {
        Arc::new(Self {
            id: request.recovery_id,
            shard_id: request.shard_id.clone(),
            target_node: request.target_node.clone(),
            target_allocation_id: request.target_allocation_id,
            params: request.params.clone(),
            client,
            signal: CancellationSignal::new(),
            state: Mutex::new(SessionState::Created),
            detached: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> RecoveryId {
        self.id
    }

    pub fn shard_id(&self) -> &ShardId {
        &self.shard_id
    }

    pub fn target_node(&self) -> &NodeId {
        &self.target_node
    }

    pub fn target_allocation_id(&self) -> &AllocationId {
        &self.target_allocation_id
    }

    pub fn kind(&self) -> RecoveryKind {
        self.params.kind()
    }

    pub(crate) fn client(&self) -> &dyn RecoveryTargetClient {
        self.client.as_ref()
    }

    pub(crate) fn signal(&self) -> &CancellationSignal {
        &self.signal
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        *self.lock_state()
    }

    /// Check if cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.signal.is_cancelled()
    }

    pub(crate) fn mark_detached(&self) {
        self.detached.store(true, Ordering::Release);
    }

    pub(crate) fn is_detached(&self) -> bool {
        self.detached.load(Ordering::Acquire)
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Request cancellation.
    ///
    /// Sets the signal observed by the run loop and tells the client to
    /// abort outstanding calls. Only the client abort can fail.
    pub fn cancel(&self, reason: &str) -> RecoveryResult<()> {
        if self.state().is_terminal() {
            return Ok(());
        }
        if !self.signal.cancel(reason) {
            return Ok(());
        }

        let id = self.id.to_string();
        let shard = self.shard_id.to_string();
        log_event_with_fields(
            RecoveryEvent::SessionCancelled,
            &[("recovery_id", &id), ("shard", &shard), ("reason", reason)],
        );

        self.client.cancel().map_err(RecoveryError::from)
    }

    /// Await a client call unless cancellation fires first.
    pub(crate) async fn call<T, F>(&self, future: F) -> RecoveryResult<T>
    where
        F: Future<Output = ClientResult<T>>,
    {
        self.signal.run(future).await?.map_err(RecoveryError::from)
    }

    /// Run the session's protocol to a terminal state.
    ///
    /// May be called once; a second call is an invariant violation.
    pub async fn run(&self, ctx: &SessionContext) -> RecoveryResult<RecoveryResponse> {
        self.begin()?;
        let mut guard = RunGuard {
            session: self,
            finished: false,
        };

        let started = Instant::now();
        let result = match &self.params {
            RecoveryParams::FullCopy { chunk_size } => {
                let chunk_size = chunk_size.unwrap_or(ctx.settings.chunk_size_bytes);
                full_copy::run(self, ctx, chunk_size).await
            }
            RecoveryParams::IncrementalOps { starting_seq_no } => {
                ops_replay::run(self, ctx, *starting_seq_no).await
            }
            RecoveryParams::PrimaryHandoff => handoff::run(self, ctx).await,
        };

        guard.finished = true;
        self.complete(result.map(|mut response| {
            response.took = started.elapsed();
            response
        }))
    }

    fn begin(&self) -> RecoveryResult<()> {
        let mut state = self.lock_state();
        if *state != SessionState::Created {
            return Err(RecoveryError::invariant(format!(
                "recovery [{}] cannot run from state {}; sessions are never restarted",
                self.id, *state
            )));
        }
        *state = SessionState::Running;
        Ok(())
    }

    fn complete(&self, result: RecoveryResult<RecoveryResponse>) -> RecoveryResult<RecoveryResponse> {
        let mut state = self.lock_state();
        match result {
            Ok(response) => {
                *state = SessionState::Succeeded;
                Ok(response)
            }
            Err(err @ RecoveryError::AlreadyBlocked { .. }) => {
                *state = SessionState::Cancelled;
                Err(err)
            }
            Err(err) if self.signal.is_cancelled() && !err.is_invariant_violation() => {
                *state = SessionState::Cancelled;
                let reason = self.signal.reason().unwrap_or_default();
                Err(RecoveryError::cancelled(reason))
            }
            Err(err) => {
                *state = SessionState::Failed;
                Err(err)
            }
        }
    }
}

/// Moves a session to Cancelled if the future driving `run` is dropped.
struct RunGuard<'a> {
    session: &'a RecoverySession,
    finished: bool,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.session.signal.cancel("recovery abandoned");
        let mut state = self.session.lock_state();
        if *state == SessionState::Running {
            *state = SessionState::Cancelled;
        }
    }
}
