//! Byte-rate limiter for recovery traffic.
//!
//! One limiter is shared by every session of a coordinator, so the byte
//! budget is node-wide. Callers are told how long they were held back so
//! throttle time can be accounted separately from transfer time.

use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

/// Token-bucket limiter where one token is one byte.
///
/// The bucket holds at most one second's worth of bytes. A request larger
/// than the bucket is admitted by running the balance negative; the
/// caller sleeps until the balance is repaid.
#[derive(Debug)]
pub struct RateLimiter {
    bytes_per_sec: AtomicU64,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    available: f64,
    last_refill: Instant,
}

impl RateLimiter {
    /// Create a limiter. A rate of 0 disables throttling.
    pub fn new(bytes_per_sec: u64) -> Self {
        Self {
            bytes_per_sec: AtomicU64::new(bytes_per_sec),
            state: Mutex::new(BucketState {
                available: bytes_per_sec as f64,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Current rate; 0 means unlimited.
    pub fn rate(&self) -> u64 {
        self.bytes_per_sec.load(Ordering::Relaxed)
    }

    /// Change the rate at runtime.
    pub async fn set_rate(&self, bytes_per_sec: u64) {
        self.bytes_per_sec.store(bytes_per_sec, Ordering::Relaxed);
        let mut state = self.state.lock().await;
        state.available = state.available.min(bytes_per_sec as f64);
    }

    /// Consume `bytes` tokens, sleeping if the bucket is in debt.
    ///
    /// Returns the time spent sleeping.
    pub async fn acquire(&self, bytes: u64) -> Duration {
        let rate = self.rate();
        if rate == 0 || bytes == 0 {
            return Duration::ZERO;
        }

        let wait = {
            let mut state = self.state.lock().await;
            let now = Instant::now();
            let elapsed = now.duration_since(state.last_refill).as_secs_f64();
            state.available = (state.available + elapsed * rate as f64).min(rate as f64);
            state.last_refill = now;

            state.available -= bytes as f64;
            if state.available >= 0.0 {
                Duration::ZERO
            } else {
                Duration::from_secs_f64(-state.available / rate as f64)
            }
        };

        if wait.is_zero() {
            return wait;
        }
        let started = Instant::now();
        tokio::time::sleep(wait).await;
        started.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unlimited_never_waits() {
        let limiter = RateLimiter::new(0);
        assert_eq!(limiter.acquire(10_000_000).await, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_within_budget_does_not_wait() {
        let limiter = RateLimiter::new(1_000_000);
        assert_eq!(limiter.acquire(500_000).await, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_debt_is_repaid_by_waiting() {
        let limiter = RateLimiter::new(100_000);
        // Drain the initial one-second burst
        assert_eq!(limiter.acquire(100_000).await, Duration::ZERO);
        // 5_000 bytes at 100 KB/s is ~50 ms of debt
        let waited = limiter.acquire(5_000).await;
        assert!(waited >= Duration::from_millis(30), "waited {:?}", waited);
    }

    #[tokio::test]
    async fn test_set_rate() {
        let limiter = RateLimiter::new(1_000);
        limiter.set_rate(2_000).await;
        assert_eq!(limiter.rate(), 2_000);
        limiter.set_rate(0).await;
        assert_eq!(limiter.acquire(1_000_000).await, Duration::ZERO);
    }
}
