//! Shared success/failure counters
//!
//! Both counters live behind one mutex so that a reader never observes a
//! half-applied update and concurrent increments are never lost. The counters
//! are owned by whoever builds the pipeline and injected into the fetcher and
//! dispatcher, so every run (and every test) gets its own set.

use serde::Serialize;
use std::sync::{Mutex, PoisonError};

/// Point-in-time view of the counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    /// Items fetched successfully
    pub succeeded: u64,
    /// Items that failed definitively or timed out
    pub failed: u64,
}

impl CounterSnapshot {
    /// Items that reached a final outcome
    pub fn completed(&self) -> u64 {
        self.succeeded + self.failed
    }
}

/// Thread-safe, monotonically increasing success/failure counters
#[derive(Debug, Default)]
pub struct Counters {
    inner: Mutex<CounterSnapshot>,
}

impl Counters {
    /// Create a counter pair starting at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one successful item and return the updated values
    pub fn record_success(&self) -> CounterSnapshot {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        guard.succeeded += 1;
        *guard
    }

    /// Count one failed item and return the updated values
    pub fn record_failure(&self) -> CounterSnapshot {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        guard.failed += 1;
        *guard
    }

    /// Read both counters
    pub fn snapshot(&self) -> CounterSnapshot {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn starts_at_zero() {
        let counters = Counters::new();
        assert_eq!(counters.snapshot(), CounterSnapshot::default());
    }

    #[test]
    fn record_returns_updated_snapshot() {
        let counters = Counters::new();

        let after_success = counters.record_success();
        assert_eq!(after_success.succeeded, 1);
        assert_eq!(after_success.failed, 0);

        let after_failure = counters.record_failure();
        assert_eq!(after_failure.succeeded, 1);
        assert_eq!(after_failure.failed, 1);
        assert_eq!(after_failure.completed(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_updates_are_not_lost() {
        let counters = Arc::new(Counters::new());
        let mut handles = Vec::new();

        for task in 0..16 {
            let counters = Arc::clone(&counters);
            handles.push(tokio::spawn(async move {
                for _ in 0..250 {
                    if task % 2 == 0 {
                        counters.record_success();
                    } else {
                        counters.record_failure();
                    }
                    tokio::task::yield_now().await;
                }
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        let snapshot = counters.snapshot();
        assert_eq!(snapshot.succeeded, 8 * 250);
        assert_eq!(snapshot.failed, 8 * 250);
    }
}
