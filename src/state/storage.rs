use std::sync::Arc;

use tokio::sync::{RwLock, watch};

use crate::{dao::tournament_store::TournamentStore, error::ServiceError};

/// Slot holding the durable store, empty while the backend is unreachable.
pub struct StorageHandle {
    store: RwLock<Option<Arc<dyn TournamentStore>>>,
    degraded: watch::Sender<bool>,
}

impl StorageHandle {
    /// Empty slot, starting in degraded mode.
    pub fn new() -> Self {
        let (degraded, _rx) = watch::channel(true);
        Self {
            store: RwLock::new(None),
            degraded,
        }
    }

    /// Slot already holding `store`.
    pub fn with_store(store: Arc<dyn TournamentStore>) -> Self {
        let (degraded, _rx) = watch::channel(false);
        Self {
            store: RwLock::new(Some(store)),
            degraded,
        }
    }

    /// Current store, or [`ServiceError::Degraded`] when none is installed.
    pub async fn store(&self) -> Result<Arc<dyn TournamentStore>, ServiceError> {
        let guard = self.store.read().await;
        guard.as_ref().cloned().ok_or(ServiceError::Degraded)
    }

    /// Install a new store implementation and leave degraded mode.
    pub async fn install(&self, store: Arc<dyn TournamentStore>) {
        {
            let mut guard = self.store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false);
    }

    /// Remove the current store and enter degraded mode.
    pub async fn clear(&self) {
        {
            let mut guard = self.store.write().await;
            guard.take();
        }
        self.update_degraded(true);
    }

    /// Current degraded flag.
    pub fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
    }
}

impl Default for StorageHandle {
    fn default() -> Self {
        Self::new()
    }
}
