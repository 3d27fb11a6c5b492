//! Worker slot leasing
//!
//! A slot index binds an in-flight item to one session of the
//! [`SessionPool`](crate::session::SessionPool). The registry hands out at
//! most `slots` leases at once and never gives the same index to two holders.

use crate::error::{Error, Result};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Pool of worker slot indices `0..slots`
#[derive(Debug)]
pub(crate) struct SlotRegistry {
    permits: Arc<Semaphore>,
    free: Mutex<Vec<usize>>,
}

impl SlotRegistry {
    pub(crate) fn new(slots: usize) -> Arc<Self> {
        // Reversed so that slot 0 is handed out first
        let free = (0..slots).rev().collect();
        Arc::new(Self {
            permits: Arc::new(Semaphore::new(slots)),
            free: Mutex::new(free),
        })
    }

    /// Wait for a free slot
    pub(crate) async fn lease(self: &Arc<Self>) -> Result<SlotLease> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| Error::Dispatch("worker slots closed".to_string()))?;

        let slot = self
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .ok_or_else(|| Error::Dispatch("no free worker slot behind permit".to_string()))?;

        Ok(SlotLease {
            slot,
            registry: Arc::clone(self),
            _permit: permit,
        })
    }

    /// Slots not currently leased
    pub(crate) fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

/// Exclusive use of one slot index, returned to the registry on drop
#[derive(Debug)]
pub(crate) struct SlotLease {
    slot: usize,
    registry: Arc<SlotRegistry>,
    // Released after `drop` has put the index back
    _permit: OwnedSemaphorePermit,
}

impl SlotLease {
    pub(crate) fn slot(&self) -> usize {
        self.slot
    }
}

impl Drop for SlotLease {
    fn drop(&mut self) {
        self.registry
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(self.slot);
    }
}
