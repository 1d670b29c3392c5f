//! Atomic publication of store instances under live readers.
//!
//! The swapper holds the "current" pointer as an `Arc<StoreInstance>` behind
//! a short-lived lock. Readers clone the `Arc` into a [`StoreHandle`]; the
//! handle pins that instance until it is released or dropped. `publish`
//! replaces the pointer and retires the displaced instance, which is
//! destroyed (and its file deleted) only when its last handle goes away.

use std::ops::Deref;
use std::sync::{Arc, Mutex, RwLock, Weak};

use crate::store::StoreInstance;

/// A reader's pin on one store instance.
#[derive(Debug, Clone)]
pub struct StoreHandle {
    store: Arc<StoreInstance>,
}

impl Deref for StoreHandle {
    type Target = StoreInstance;

    fn deref(&self) -> &StoreInstance {
        &self.store
    }
}

impl StoreHandle {
    /// True if both handles pin the same instance.
    pub fn same_store(&self, other: &StoreHandle) -> bool {
        Arc::ptr_eq(&self.store, &other.store)
    }
}

#[derive(Default)]
pub struct StoreSwapper {
    current: RwLock<Option<Arc<StoreInstance>>>,
    draining: Mutex<Vec<Weak<StoreInstance>>>,
}

impl StoreSwapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `store` current. Subsequent `current()` calls see it immediately.
    pub fn publish(&self, store: StoreInstance) {
        let next = Arc::new(store);
        let previous = {
            let mut slot = self.current.write().unwrap_or_else(|e| e.into_inner());
            slot.replace(next.clone())
        };

        tracing::info!(
            file = %next.manifest().file,
            fingerprint = %next.fingerprint().short(),
            "published store"
        );

        if let Some(previous) = previous {
            previous.retire();
            let mut draining = self.draining.lock().unwrap_or_else(|e| e.into_inner());
            draining.retain(|w| w.strong_count() > 0);
            draining.push(Arc::downgrade(&previous));
            tracing::debug!(
                file = %previous.manifest().file,
                readers = Arc::strong_count(&previous) - 1,
                "retired previous store"
            );
        }
    }

    /// Pin the current store, or `None` before the first publish.
    pub fn current(&self) -> Option<StoreHandle> {
        let slot = self.current.read().unwrap_or_else(|e| e.into_inner());
        slot.as_ref().map(|store| StoreHandle {
            store: store.clone(),
        })
    }

    /// Give a handle back. Equivalent to dropping it.
    pub fn release(&self, handle: StoreHandle) {
        drop(handle);
    }

    /// Retired instances still pinned by at least one reader.
    pub fn draining_count(&self) -> usize {
        let mut draining = self.draining.lock().unwrap_or_else(|e| e.into_inner());
        draining.retain(|w| w.strong_count() > 0);
        draining.len()
    }
}
