//! Recovery metrics
//!
//! - Global counters are monotonic
//! - `current_as_source` per shard moves up at session registration and
//!   down at session removal, nowhere else
//! - Thread-safe, lock-minimal: the shard map lock is only taken to look
//!   up or create a shard's stats handle

use crate::cluster::ShardId;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Per-shard recovery counters.
#[derive(Debug, Default)]
pub struct ShardRecoveryStats {
    /// Sessions currently registered with this shard as source
    current_as_source: AtomicU64,
    /// Time spent waiting on the byte-rate limiter, in nanoseconds
    throttle_time_nanos: AtomicU64,
}

impl ShardRecoveryStats {
    /// Increment recoveries-as-source.
    pub fn increment_current_as_source(&self) {
        self.current_as_source.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrement recoveries-as-source.
    pub fn decrement_current_as_source(&self) {
        // Saturate rather than wrap on an unbalanced decrement
        let _ = self
            .current_as_source
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
    }

    /// Sessions currently registered with this shard as source.
    pub fn current_as_source(&self) -> u64 {
        self.current_as_source.load(Ordering::Relaxed)
    }

    /// Account time spent throttled.
    pub fn add_throttle_time(&self, waited: Duration) {
        let nanos = u64::try_from(waited.as_nanos()).unwrap_or(u64::MAX);
        self.throttle_time_nanos.fetch_add(nanos, Ordering::Relaxed);
    }

    /// Total time spent throttled.
    pub fn throttle_time(&self) -> Duration {
        Duration::from_nanos(self.throttle_time_nanos.load(Ordering::Relaxed))
    }
}

/// Metrics registry for the recovery source
#[derive(Debug, Default)]
pub struct RecoveryMetrics {
    sessions_started: AtomicU64,
    sessions_succeeded: AtomicU64,
    sessions_failed: AtomicU64,
    sessions_cancelled: AtomicU64,
    requests_delayed: AtomicU64,
    chunks_sent: AtomicU64,
    bytes_sent: AtomicU64,
    ops_sent: AtomicU64,
    shards: Mutex<HashMap<ShardId, Arc<ShardRecoveryStats>>>,
}

impl RecoveryMetrics {
    /// Create a new registry with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Stats handle for `shard_id`, created on first use.
    pub fn shard(&self, shard_id: &ShardId) -> Arc<ShardRecoveryStats> {
        let mut shards = self.shards.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(shards.entry(shard_id.clone()).or_default())
    }

    /// Stats handle for `shard_id` if one exists. Never creates an entry.
    pub fn shard_stats(&self, shard_id: &ShardId) -> Option<Arc<ShardRecoveryStats>> {
        let shards = self.shards.lock().unwrap_or_else(PoisonError::into_inner);
        shards.get(shard_id).cloned()
    }

    /// Active source recoveries of `shard_id`; 0 when untracked.
    pub fn current_as_source(&self, shard_id: &ShardId) -> u64 {
        self.shard_stats(shard_id)
            .map_or(0, |stats| stats.current_as_source())
    }

    /// Number of shards with a stats entry.
    pub fn tracked_shard_count(&self) -> usize {
        self.shards.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Drop the entry for `shard_id` if no recovery is active on it.
    ///
    /// Returns `true` if an entry was removed.
    pub fn remove_idle_shard(&self, shard_id: &ShardId) -> bool {
        let mut shards = self.shards.lock().unwrap_or_else(PoisonError::into_inner);
        match shards.get(shard_id) {
            Some(stats) if stats.current_as_source() == 0 => {
                shards.remove(shard_id);
                true
            }
            _ => false,
        }
    }

    pub fn increment_sessions_started(&self) {
        self.sessions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_sessions_succeeded(&self) {
        self.sessions_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_sessions_failed(&self) {
        self.sessions_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_sessions_cancelled(&self) {
        self.sessions_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_requests_delayed(&self) {
        self.requests_delayed.fetch_add(1, Ordering::Relaxed);
    }

    /// Account one file chunk of `bytes` length.
    pub fn record_chunk(&self, bytes: u64) {
        self.chunks_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Account `count` operations sent.
    pub fn add_ops_sent(&self, count: u64) {
        self.ops_sent.fetch_add(count, Ordering::Relaxed);
    }

    /// Point-in-time copy of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let shards = self.shards.lock().unwrap_or_else(PoisonError::into_inner);
        let mut per_shard: Vec<ShardStatsSnapshot> = shards
            .iter()
            .map(|(id, stats)| ShardStatsSnapshot {
                shard: id.to_string(),
                current_as_source: stats.current_as_source(),
                throttle_time_millis: u64::try_from(stats.throttle_time().as_millis())
                    .unwrap_or(u64::MAX),
            })
            .collect();
        per_shard.sort_by(|a, b| a.shard.cmp(&b.shard));

        MetricsSnapshot {
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
            sessions_succeeded: self.sessions_succeeded.load(Ordering::Relaxed),
            sessions_failed: self.sessions_failed.load(Ordering::Relaxed),
            sessions_cancelled: self.sessions_cancelled.load(Ordering::Relaxed),
            requests_delayed: self.requests_delayed.load(Ordering::Relaxed),
            chunks_sent: self.chunks_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            ops_sent: self.ops_sent.load(Ordering::Relaxed),
            shards: per_shard,
        }
    }

    /// Current counters as JSON.
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.snapshot()).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Per-shard counters in a [`MetricsSnapshot`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShardStatsSnapshot {
    pub shard: String,
    pub current_as_source: u64,
    pub throttle_time_millis: u64,
}

/// A point-in-time snapshot of all metrics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub sessions_started: u64,
    pub sessions_succeeded: u64,
    pub sessions_failed: u64,
    pub sessions_cancelled: u64,
    pub requests_delayed: u64,
    pub chunks_sent: u64,
    pub bytes_sent: u64,
    pub ops_sent: u64,
    pub shards: Vec<ShardStatsSnapshot>,
}
