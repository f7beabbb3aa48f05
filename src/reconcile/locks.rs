//! Per-formation serialisation of reconcile passes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::model::FormationId;

/// Hands out one async mutex per formation.
///
/// Holding the guard returned by [`FormationLocks::acquire`] excludes every
/// other reconcile or teardown of the same formation. Guards for different
/// formations never contend.
#[derive(Debug, Default)]
pub struct FormationLocks {
    slots: Mutex<HashMap<FormationId, Arc<AsyncMutex<()>>>>,
}

impl FormationLocks {
    /// Creates an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `formation`.
    pub async fn acquire(&self, formation: &FormationId) -> OwnedMutexGuard<()> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(slots.entry(formation.clone()).or_default())
        };
        slot.lock_owned().await
    }

    /// Drops the slot of a deleted formation.
    pub fn forget(&self, formation: &FormationId) {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(formation);
    }
}
