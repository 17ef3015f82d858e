//! Per-registration mutual exclusion.
//!
//! Enrollment, rotation and repair for one registration id run one at a
//! time inside this process. Different ids never contend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::device::RegistrationId;

/// Lock table keyed by registration id. Cloning shares the table.
#[derive(Debug, Clone, Default)]
pub struct RegistrationLocks {
    table: Arc<Mutex<HashMap<RegistrationId, Arc<AsyncMutex<()>>>>>,
}

/// Held for the duration of one orchestration call.
#[derive(Debug)]
pub struct RegistrationGuard {
    _guard: OwnedMutexGuard<()>,
}

impl RegistrationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `id`.
    pub async fn acquire(&self, id: &RegistrationId) -> RegistrationGuard {
        let lock = {
            let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
            // Entries only the table references are idle.
            table.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(table.entry(id.clone()).or_default())
        };

        RegistrationGuard {
            _guard: lock.lock_owned().await,
        }
    }

    /// Number of ids with a holder or waiter (plus any not yet pruned).
    pub fn len(&self) -> usize {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
