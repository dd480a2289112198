//! Execution controls: per-operation timeout and cooperative cancellation.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::domain::{Result, StrataError};

/// Shared cancellation flag checked between artifacts.
///
/// Cloning shares the flag. Cancelling never interrupts an operation already
/// in flight; it only stops new ones from starting.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Optional wall-clock limit for one operation. `0` disables the limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timeout {
    secs: u64,
}

impl Timeout {
    pub fn from_secs(secs: u64) -> Self {
        Self { secs }
    }

    pub fn none() -> Self {
        Self { secs: 0 }
    }

    pub fn secs(&self) -> u64 {
        self.secs
    }

    pub fn is_enabled(&self) -> bool {
        self.secs > 0
    }
}

/// Run `fut`, failing with [`StrataError::Timeout`] if it outlives `limit`.
///
/// A timed out future is dropped; whatever it left behind is undefined and
/// must be redone from scratch.
pub async fn with_timeout<T, Fut>(operation: &str, limit: Timeout, fut: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    if !limit.is_enabled() {
        return fut.await;
    }
    match tokio::time::timeout(Duration::from_secs(limit.secs), fut).await {
        Ok(result) => result,
        Err(_elapsed) => Err(StrataError::Timeout {
            operation: operation.to_string(),
            secs: limit.secs,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_is_shared_across_clones() {
        let token = CancelToken::new();
        let other = token.clone();
        assert!(!other.is_cancelled());
        token.cancel();
        assert!(other.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_operation_times_out() {
        let result: Result<()> = with_timeout("materialize orders", Timeout::from_secs(5), async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await;
        match result {
            Err(StrataError::Timeout { operation, secs }) => {
                assert_eq!(operation, "materialize orders");
                assert_eq!(secs, 5);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn zero_disables_timeout() {
        let result = with_timeout("clone", Timeout::none(), async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(7)
        })
        .await
        .unwrap();
        assert_eq!(result, 7);
    }
}
