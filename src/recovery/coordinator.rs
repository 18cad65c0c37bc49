//! Recovery Coordinator
//!
//! Entry point on the source node. For each inbound request it:
//!
//! 1. Validates the request against the local shard and the node's
//!    current routing view
//! 2. Builds a session and registers it with the shard's context
//! 3. Runs the session and unregisters it, whatever the result
//!
//! Preconditions that may still resolve (the routing view lagging the
//! target, an admission block) answer `RecoveryOutcome::Delayed` instead
//! of failing. Conditions that can never be legitimate are invariant
//! violations and are logged at FATAL.

use super::config::RecoverySettings;
use super::errors::{RecoveryError, RecoveryResult};
use super::registry::{Admission, SessionRegistry};
use super::request::{RecoveryKind, RecoveryOutcome, RecoveryRequest, RecoveryResponse};
use super::session::{RecoverySession, SessionContext};
use super::target_client::TargetClientFactory;
use super::throttle::RateLimiter;
use crate::cluster::{ClusterStateSource, DiscoveryNode, NodeId, ShardId};
use crate::observability::{log_event_with_fields, RecoveryEvent, RecoveryMetrics};
use crate::shard::{LocalShard, ShardLookup};
use std::sync::Arc;

/// Validation verdict for a request
enum Validation {
    Ready {
        shard: Arc<dyn LocalShard>,
        node: DiscoveryNode,
    },
    Delayed(String),
}

/// Accepts recovery requests for shards hosted on this node
pub struct RecoveryCoordinator {
    local_node: NodeId,
    cluster: Arc<dyn ClusterStateSource>,
    shards: Arc<dyn ShardLookup>,
    clients: Arc<dyn TargetClientFactory>,
    registry: SessionRegistry,
    settings: RecoverySettings,
    limiter: Arc<RateLimiter>,
    metrics: Arc<RecoveryMetrics>,
}

impl RecoveryCoordinator {
    /// Create a coordinator for `local_node`.
    ///
    /// Fails if `settings` do not validate.
    pub fn new(
        local_node: NodeId,
        settings: RecoverySettings,
        cluster: Arc<dyn ClusterStateSource>,
        shards: Arc<dyn ShardLookup>,
        clients: Arc<dyn TargetClientFactory>,
    ) -> RecoveryResult<Self> {
        settings.validate()?;
        let metrics = Arc::new(RecoveryMetrics::new());
        Ok(Self {
            local_node,
            cluster,
            shards,
            clients,
            registry: SessionRegistry::new(Arc::clone(&metrics)),
            limiter: Arc::new(RateLimiter::new(settings.max_bytes_per_sec)),
            settings,
            metrics,
        })
    }

    pub fn local_node(&self) -> &NodeId {
        &self.local_node
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn metrics(&self) -> &Arc<RecoveryMetrics> {
        &self.metrics
    }

    pub fn settings(&self) -> &RecoverySettings {
        &self.settings
    }

    /// Change the node-wide byte rate; takes effect for the next chunk.
    pub async fn set_max_bytes_per_sec(&self, bytes_per_sec: u64) {
        self.limiter.set_rate(bytes_per_sec).await;
    }

    /// Handle one recovery request to completion.
    ///
    /// Returns `Delayed` when the request should be retried later, the
    /// session's response when it succeeded, and an error otherwise. No
    /// session stays registered once this returns.
    pub async fn start_recovery(&self, request: RecoveryRequest) -> RecoveryResult<RecoveryOutcome> {
        let id = request.recovery_id.to_string();
        let shard = request.shard_id.to_string();
        let target = request.target_node.to_string();
        log_event_with_fields(
            RecoveryEvent::SourceRequest,
            &[("recovery_id", &id), ("shard", &shard), ("target_node", &target), ("kind", request.kind().as_str())],
        );

        let (local_shard, node) = match self.validate(&request) {
            Ok(Validation::Ready { shard, node }) => (shard, node),
            Ok(Validation::Delayed(reason)) => return Ok(self.delayed(&request, reason)),
            Err(err) => {
                self.log_rejection(&request, &err);
                return Err(err);
            }
        };

        let client = self.clients.client_for(&request, &node);
        let session = RecoverySession::for_request(&request, client);
        match self.registry.add_session(&session) {
            Ok(Admission::Admitted) => {}
            Ok(Admission::Delayed { reason }) => return Ok(self.delayed(&request, reason)),
            Err(err) => {
                self.log_rejection(&request, &err);
                return Err(err);
            }
        }

        let registration = Registration {
            registry: &self.registry,
            session: &session,
            done: false,
        };
        self.metrics.increment_sessions_started();
        log_event_with_fields(
            RecoveryEvent::SessionStart,
            &[("recovery_id", &id), ("shard", &shard), ("kind", request.kind().as_str())],
        );

        let ctx = SessionContext {
            shard: local_shard,
            registry: self.registry.clone(),
            settings: self.settings.clone(),
            limiter: Arc::clone(&self.limiter),
            metrics: Arc::clone(&self.metrics),
        };
        let result = session.run(&ctx).await;
        let unregistered = registration.finish();

        self.conclude(&request, result, unregistered)
    }

    /// Cancel every active recovery of `shard_id`.
    pub fn cancel_recoveries(&self, shard_id: &ShardId, reason: &str) -> RecoveryResult<()> {
        self.registry.cancel_all(shard_id, reason)
    }

    /// Lifecycle hook: the local copy of `shard_id` is about to close.
    ///
    /// Cancels its recoveries and drops its per-shard stats once nothing
    /// is registered for it any more.
    pub fn before_shard_closed(&self, shard_id: &ShardId) -> RecoveryResult<()> {
        let cancelled = self.cancel_recoveries(shard_id, "shard is closed");
        if !self.registry.has_context(shard_id) {
            self.metrics.remove_idle_shard(shard_id);
        }
        cancelled
    }

    fn validate(&self, request: &RecoveryRequest) -> RecoveryResult<Validation> {
        if let Some(problem) = request.validate_format() {
            return Err(RecoveryError::InvalidRequest(problem.to_string()));
        }

        let shard = self
            .shards
            .shard(&request.shard_id)
            .ok_or_else(|| RecoveryError::ShardNotFound(request.shard_id.clone()))?;

        let view = self.cluster.current_routing_view();
        let Some(node) = view.node(&request.target_node) else {
            return Ok(Validation::Delayed(format!(
                "source node does not yet know about target node [{}]",
                request.target_node
            )));
        };

        let Some(target) = view.shard_on_node(&request.shard_id, &request.target_node) else {
            return Ok(Validation::Delayed(format!(
                "routing table has no copy of {} on target node [{}] yet",
                request.shard_id, request.target_node
            )));
        };

        if !target.is_initializing() {
            return Ok(Validation::Delayed(format!(
                "copy of {} on target node [{}] is {}, not initializing",
                request.shard_id,
                request.target_node,
                target.state.as_str()
            )));
        }

        if target.allocation_id != request.target_allocation_id {
            return Ok(Validation::Delayed(format!(
                "copy of {} on target node [{}] has allocation id [{}], request is for [{}]",
                request.shard_id, request.target_node, target.allocation_id, request.target_allocation_id
            )));
        }

        if target.primary {
            let source = shard.routing_entry();
            if !source.is_relocating() || source.relocating_node_id.as_ref() != Some(&request.target_node) {
                return Err(RecoveryError::invariant(format!(
                    "primary recovery of {} requested by [{}] but the source copy is {} and not relocating to it",
                    request.shard_id,
                    request.target_node,
                    source.state.as_str()
                )));
            }
            if request.kind() == RecoveryKind::PrimaryHandoff
                && !shard.is_allocation_in_sync(&request.target_allocation_id)
            {
                return Err(RecoveryError::invariant(format!(
                    "primary handoff of {} to allocation [{}] which is not in sync",
                    request.shard_id, request.target_allocation_id
                )));
            }
        } else if request.kind() == RecoveryKind::PrimaryHandoff {
            return Err(RecoveryError::invariant(format!(
                "primary handoff of {} to [{}] whose routing entry is not primary",
                request.shard_id, request.target_node
            )));
        }

        Ok(Validation::Ready {
            shard,
            node: node.clone(),
        })
    }

    fn conclude(
        &self,
        request: &RecoveryRequest,
        result: RecoveryResult<RecoveryResponse>,
        unregistered: RecoveryResult<()>,
    ) -> RecoveryResult<RecoveryOutcome> {
        let id = request.recovery_id.to_string();
        let shard = request.shard_id.to_string();

        if let Err(err) = &unregistered {
            let message = err.to_string();
            log_event_with_fields(
                RecoveryEvent::InvariantViolation,
                &[("recovery_id", &id), ("shard", &shard), ("error", &message)],
            );
        }

        match result {
            Ok(response) => {
                unregistered?;
                self.metrics.increment_sessions_succeeded();
                let took = response.took.as_millis().to_string();
                log_event_with_fields(
                    RecoveryEvent::SessionComplete,
                    &[("recovery_id", &id), ("shard", &shard), ("took_ms", &took)],
                );
                Ok(RecoveryOutcome::Completed(response))
            }
            Err(RecoveryError::AlreadyBlocked { reason, .. }) => {
                unregistered?;
                // Started but never ran its protocol; the session ended Cancelled
                self.metrics.increment_sessions_cancelled();
                Ok(self.delayed(request, reason))
            }
            Err(err) if err.is_cancelled() => {
                self.metrics.increment_sessions_cancelled();
                Err(err)
            }
            Err(err) => {
                self.metrics.increment_sessions_failed();
                let message = err.to_string();
                let event = if err.is_invariant_violation() {
                    RecoveryEvent::InvariantViolation
                } else {
                    RecoveryEvent::SessionFailed
                };
                log_event_with_fields(event, &[("recovery_id", &id), ("shard", &shard), ("error", &message)]);
                Err(err)
            }
        }
    }

    fn delayed(&self, request: &RecoveryRequest, reason: String) -> RecoveryOutcome {
        self.metrics.increment_requests_delayed();
        let id = request.recovery_id.to_string();
        log_event_with_fields(RecoveryEvent::SourceDelayed, &[("recovery_id", &id), ("reason", &reason)]);
        RecoveryOutcome::Delayed { reason }
    }

    fn log_rejection(&self, request: &RecoveryRequest, err: &RecoveryError) {
        let id = request.recovery_id.to_string();
        let message = err.to_string();
        let event = if err.is_invariant_violation() {
            RecoveryEvent::InvariantViolation
        } else {
            RecoveryEvent::SourceRejected
        };
        log_event_with_fields(event, &[("recovery_id", &id), ("error", &message)]);
    }
}

/// Unregisters a session when the request future ends, including when it
/// is dropped mid-run.
struct Registration<'a> {
    registry: &'a SessionRegistry,
    session: &'a Arc<RecoverySession>,
    done: bool,
}

impl Registration<'_> {
    fn finish(mut self) -> RecoveryResult<()> {
        self.done = true;
        self.registry.remove_session(self.session)
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        if let Err(err) = self.registry.remove_session(self.session) {
            let id = self.session.id().to_string();
            let message = err.to_string();
            log_event_with_fields(RecoveryEvent::InvariantViolation, &[("recovery_id", &id), ("error", &message)]);
        }
    }
}
