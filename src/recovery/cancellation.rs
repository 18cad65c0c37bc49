//! Cooperative cancellation for recovery sessions
//!
//! - The first `cancel` wins; its reason is kept
//! - Sessions check the signal at phase boundaries and before each chunk
//! - Network calls are raced against the signal so cancellation aborts
//!   them promptly; a call that completes first keeps its result

use super::errors::{RecoveryError, RecoveryResult};
use std::future::Future;
use tokio::sync::watch;

/// Cancellation signal shared by a session and whoever may cancel it
#[derive(Debug)]
pub struct CancellationSignal {
    sender: watch::Sender<Option<String>>,
}

impl Default for CancellationSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationSignal {
    /// Create an untriggered signal.
    pub fn new() -> Self {
        let (sender, _) = watch::channel(None);
        Self { sender }
    }

    /// Trigger the signal. Returns `false` if it was already triggered.
    pub fn cancel(&self, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        self.sender.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        })
    }

    /// Check if the signal was triggered.
    pub fn is_cancelled(&self) -> bool {
        self.sender.borrow().is_some()
    }

    /// Reason given by the first `cancel`, if any.
    pub fn reason(&self) -> Option<String> {
        self.sender.borrow().clone()
    }

    /// Fail with `Cancelled` if the signal was triggered.
    pub fn check(&self) -> RecoveryResult<()> {
        match self.reason() {
            Some(reason) => Err(RecoveryError::cancelled(reason)),
            None => Ok(()),
        }
    }

    /// Resolve once the signal is triggered, yielding the reason.
    pub async fn cancelled(&self) -> String {
        let mut receiver = self.sender.subscribe();
        loop {
            if let Some(reason) = receiver.borrow_and_update().clone() {
                return reason;
            }
            // The sender lives in `self`, so the channel cannot close here
            if receiver.changed().await.is_err() {
                return String::from("cancellation signal dropped");
            }
        }
    }

    /// Run `future` unless the signal fires first.
    pub async fn run<F, T>(&self, future: F) -> RecoveryResult<T>
    where
        F: Future<Output = T>,
    {
        self.check()?;
        tokio::select! {
            biased;
            output = future => Ok(output),
            reason = self.cancelled() => Err(RecoveryError::cancelled(reason)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_first_cancel_wins() {
        let signal = CancellationSignal::new();
        assert!(!signal.is_cancelled());
        assert!(signal.check().is_ok());

        assert!(signal.cancel("shard is closed"));
        assert!(!signal.cancel("second reason"));

        assert_eq!(signal.reason().as_deref(), Some("shard is closed"));
        assert!(matches!(
            signal.check(),
            Err(RecoveryError::Cancelled { reason }) if reason == "shard is closed"
        ));
    }

    #[tokio::test]
    async fn test_run_completes_without_cancel() {
        let signal = CancellationSignal::new();
        let value = signal.run(async { 7 }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_run_aborts_pending_future() {
        let signal = Arc::new(CancellationSignal::new());
        let canceller = Arc::clone(&signal);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel("stop");
        });

        let result = signal.run(std::future::pending::<()>()).await;
        assert!(matches!(result, Err(RecoveryError::Cancelled { .. })));
    }

    #[tokio::test]
    async fn test_run_refuses_after_cancel() {
        let signal = CancellationSignal::new();
        signal.cancel("done");
        let result = signal.run(async { 1 }).await;
        assert!(result.is_err());
    }
}
