//! Registry of active recovery sessions, keyed by shard.
//!
//! Per shard, a context holds the active sessions and an optional block
//! on new admissions. A context exists only while it has a session or a
//! pending block; the operation that leaves it with neither removes it.
//!
//! Locking: the shard map lock is held only for lookups and removals.
//! Each context has its own lock, and when both are held the context lock
//! is taken first. A context is marked retired before it leaves the map,
//! so a caller that fetched it just before removal retries with a fresh
//! one.

use super::errors::{CancellationFailure, CancellationFailures, RecoveryError, RecoveryResult};
use super::request::RecoveryId;
use super::session::RecoverySession;
use crate::cluster::ShardId;
use crate::observability::{log_event_with_fields, RecoveryEvent, RecoveryMetrics};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type ContextHandle = Arc<Mutex<ShardRecoveryContext>>;

/// Active sessions and admission block for one shard
#[derive(Debug, Default)]
struct ShardRecoveryContext {
    sessions: HashMap<RecoveryId, Arc<RecoverySession>>,
    block_reason: Option<String>,
    retired: bool,
}

impl ShardRecoveryContext {
    fn is_idle(&self) -> bool {
        self.sessions.is_empty() && self.block_reason.is_none()
    }
}

/// Result of trying to register a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Session is now active
    Admitted,
    /// New sessions are blocked; nothing was registered
    Delayed { reason: String },
}

/// Shared registry of recovery sessions
#[derive(Debug, Clone)]
pub struct SessionRegistry {
    shards: Arc<Mutex<HashMap<ShardId, ContextHandle>>>,
    metrics: Arc<RecoveryMetrics>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SessionRegistry {
    /// Create an empty registry reporting into `metrics`.
    pub fn new(metrics: Arc<RecoveryMetrics>) -> Self {
        Self {
            shards: Arc::new(Mutex::new(HashMap::new())),
            metrics,
        }
    }

    fn existing(&self, shard_id: &ShardId) -> Option<ContextHandle> {
        lock(&self.shards).get(shard_id).cloned()
    }

    fn get_or_create(&self, shard_id: &ShardId) -> ContextHandle {
        let mut shards = lock(&self.shards);
        Arc::clone(shards.entry(shard_id.clone()).or_default())
    }

    /// Mark `context` retired and drop it from the map. Caller holds the
    /// context lock.
    fn retire(&self, shard_id: &ShardId, handle: &ContextHandle, context: &mut ShardRecoveryContext) {
        context.retired = true;
        let mut shards = lock(&self.shards);
        if shards.get(shard_id).is_some_and(|current| Arc::ptr_eq(current, handle)) {
            shards.remove(shard_id);
        }
    }

    /// Register `session` under its shard.
    ///
    /// Returns `Delayed` without touching the registry if new sessions
    /// are blocked. Registering the same recovery id twice is an
    /// invariant violation.
    pub fn add_session(&self, session: &Arc<RecoverySession>) -> RecoveryResult<Admission> {
        let shard_id = session.shard_id();
        loop {
            let handle = self.get_or_create(shard_id);
            let mut context = lock(&handle);
            if context.retired {
                continue;
            }

            if let Some(reason) = &context.block_reason {
                return Ok(Admission::Delayed { reason: reason.clone() });
            }
            if context.sessions.contains_key(&session.id()) {
                return Err(RecoveryError::invariant(format!(
                    "recovery [{}] is already registered for {}",
                    session.id(),
                    shard_id
                )));
            }

            context.sessions.insert(session.id(), Arc::clone(session));
            self.metrics.shard(shard_id).increment_current_as_source();
            return Ok(Admission::Admitted);
        }
    }

    /// Unregister `session` once it reached a terminal state.
    ///
    /// A session already taken out by [`SessionRegistry::cancel_all`] is
    /// skipped. Any other unknown session is an invariant violation.
    pub fn remove_session(&self, session: &Arc<RecoverySession>) -> RecoveryResult<()> {
        let shard_id = session.shard_id();
        let not_registered = || {
            RecoveryError::invariant(format!(
                "recovery [{}] is not registered for {}",
                session.id(),
                shard_id
            ))
        };

        let Some(handle) = self.existing(shard_id) else {
            return if session.is_detached() { Ok(()) } else { Err(not_registered()) };
        };
        let mut context = lock(&handle);

        match context.sessions.get(&session.id()) {
            Some(registered) if Arc::ptr_eq(registered, session) => {
                context.sessions.remove(&session.id());
                self.metrics.shard(shard_id).decrement_current_as_source();
            }
            _ if session.is_detached() => return Ok(()),
            _ => return Err(not_registered()),
        }

        if context.sessions.is_empty() {
            if let Some(reason) = &context.block_reason {
                return Err(RecoveryError::invariant(format!(
                    "no active recoveries remain for {} while new recoveries are blocked: {}",
                    shard_id, reason
                )));
            }
            self.retire(shard_id, &handle, &mut context);
        }
        Ok(())
    }

    /// Cancel every active session of `shard_id`.
    ///
    /// Sessions leave the active set before any of them is cancelled, and
    /// each one is cancelled even if an earlier cancellation failed. All
    /// failures come back together.
    pub fn cancel_all(&self, shard_id: &ShardId, reason: &str) -> RecoveryResult<()> {
        let Some(handle) = self.existing(shard_id) else {
            return Ok(());
        };

        let sessions: Vec<Arc<RecoverySession>> = {
            let mut context = lock(&handle);
            if context.retired {
                return Ok(());
            }
            let stats = self.metrics.shard(shard_id);
            let sessions: Vec<_> = context.sessions.drain().map(|(_, session)| session).collect();
            for session in &sessions {
                session.mark_detached();
                stats.decrement_current_as_source();
            }
            if context.is_idle() {
                self.retire(shard_id, &handle, &mut context);
            }
            sessions
        };

        let mut failures = Vec::new();
        for session in &sessions {
            if let Err(err) = session.cancel(reason) {
                failures.push(CancellationFailure {
                    recovery_id: session.id(),
                    error: Box::new(err),
                });
            }
        }

        let shard = shard_id.to_string();
        let attempted = sessions.len().to_string();
        let failed = failures.len().to_string();
        log_event_with_fields(
            RecoveryEvent::ShardSessionsCancelled,
            &[("shard", &shard), ("reason", reason), ("sessions", &attempted), ("failures", &failed)],
        );

        if failures.is_empty() {
            Ok(())
        } else {
            Err(RecoveryError::AggregateCancellation(CancellationFailures {
                shard_id: shard_id.clone(),
                attempted: sessions.len(),
                failures,
            }))
        }
    }

    /// Block new sessions of `shard_id` until the returned guard is
    /// released or dropped. Existing sessions are unaffected.
    ///
    /// Fails with `AlreadyBlocked` if a block is already in place.
    pub fn block_new_sessions(&self, shard_id: &ShardId, reason: impl Into<String>) -> RecoveryResult<BlockGuard> {
        let reason = reason.into();
        loop {
            let handle = self.get_or_create(shard_id);
            let mut context = lock(&handle);
            if context.retired {
                continue;
            }

            if let Some(existing) = &context.block_reason {
                return Err(RecoveryError::AlreadyBlocked {
                    shard_id: shard_id.clone(),
                    reason: existing.clone(),
                });
            }
            context.block_reason = Some(reason.clone());
            drop(context);

            let shard = shard_id.to_string();
            log_event_with_fields(RecoveryEvent::SessionsBlocked, &[("shard", &shard), ("reason", &reason)]);

            return Ok(BlockGuard {
                registry: self.clone(),
                shard_id: shard_id.clone(),
                handle,
                released: AtomicBool::new(false),
            });
        }
    }

    /// Number of active sessions for `shard_id`.
    pub fn active_session_count(&self, shard_id: &ShardId) -> usize {
        self.existing(shard_id).map_or(0, |handle| {
            let context = lock(&handle);
            context.sessions.len()
        })
    }

    /// Check if `shard_id` currently has a context.
    pub fn has_context(&self, shard_id: &ShardId) -> bool {
        self.existing(shard_id).is_some()
    }

    /// Check if new sessions of `shard_id` are blocked.
    pub fn is_blocked(&self, shard_id: &ShardId) -> bool {
        self.existing(shard_id).is_some_and(|handle| {
            let context = lock(&handle);
            context.block_reason.is_some()
        })
    }

    /// Number of shards with a context.
    pub fn context_count(&self) -> usize {
        lock(&self.shards).len()
    }
}

/// Holds a shard's admission block. Releasing is idempotent; dropping
/// releases.
#[derive(Debug)]
pub struct BlockGuard {
    registry: SessionRegistry,
    shard_id: ShardId,
    handle: ContextHandle,
    released: AtomicBool,
}

impl BlockGuard {
    /// Shard this guard blocks.
    pub fn shard_id(&self) -> &ShardId {
        &self.shard_id
    }

    /// Lift the block. Later calls do nothing.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }

        let mut context = lock(&self.handle);
        context.block_reason = None;
        if context.sessions.is_empty() && !context.retired {
            self.registry.retire(&self.shard_id, &self.handle, &mut context);
        }
        drop(context);

        let shard = self.shard_id.to_string();
        log_event_with_fields(RecoveryEvent::SessionsUnblocked, &[("shard", &shard)]);
    }
}

impl Drop for BlockGuard {
    fn drop(&mut self) {
        self.release();
    }
}
