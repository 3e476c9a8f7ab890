//! Single slot registry enforcing one live indicator per area.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use log::debug;

use crate::error::{Error, Result};

const EMPTY: u64 = 0;

/// Tracks the one registered handle. Registration is a compare-and-set on the
/// slot id; the weak back-reference is only used to find the handle again.
pub struct IndicatorRegistry<T> {
    slot: AtomicU64,
    current: Mutex<Weak<T>>,
}

impl<T> IndicatorRegistry<T> {
    pub fn new() -> Self {
        Self {
            slot: AtomicU64::new(EMPTY),
            current: Mutex::new(Weak::new()),
        }
    }

    /// Claim the slot for `id`. Fails with [`Error::AlreadyExists`] if another
    /// handle holds it.
    pub fn register(&self, id: u64, handle: Weak<T>) -> Result<()> {
        debug_assert_ne!(id, EMPTY);
        let mut current = self.current.lock().unwrap();
        self.slot
            .compare_exchange(EMPTY, id, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::AlreadyExists)?;
        *current = handle;
        debug!("Registered indicator {id}");
        Ok(())
    }

    /// Release the slot if `id` holds it. Returns whether anything changed.
    pub fn unregister(&self, id: u64) -> bool {
        let mut current = self.current.lock().unwrap();
        let released = self
            .slot
            .compare_exchange(id, EMPTY, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if released {
            *current = Weak::new();
            debug!("Unregistered indicator {id}");
        }
        released
    }

    pub fn active_id(&self) -> Option<u64> {
        match self.slot.load(Ordering::Acquire) {
            EMPTY => None,
            id => Some(id),
        }
    }

    pub fn active(&self) -> Option<Arc<T>> {
        self.current.lock().unwrap().upgrade()
    }

    pub fn is_empty(&self) -> bool {
        self.active_id().is_none()
    }
}

impl<T> Default for IndicatorRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    #[test]
    fn second_registration_fails() {
        let registry = IndicatorRegistry::new();
        let first = Arc::new("first");
        let second = Arc::new("second");

        registry.register(1, Arc::downgrade(&first)).unwrap();
        let err = registry.register(2, Arc::downgrade(&second)).unwrap_err();

        assert!(matches!(err, Error::AlreadyExists));
        assert_eq!(registry.active_id(), Some(1));
        assert_eq!(registry.active().as_deref(), Some(&"first"));
    }

    #[test]
    fn unregister_is_idempotent() {
        let registry = IndicatorRegistry::<()>::new();
        registry.register(7, Weak::new()).unwrap();

        assert!(!registry.unregister(8));
        assert!(registry.unregister(7));
        assert!(!registry.unregister(7));
        assert!(registry.is_empty());
        assert!(registry.active().is_none());
    }

    #[test]
    fn slot_can_be_reused() {
        let registry = IndicatorRegistry::<()>::new();
        registry.register(1, Weak::new()).unwrap();
        registry.unregister(1);
        registry.register(2, Weak::new()).unwrap();
        assert_eq!(registry.active_id(), Some(2));
    }

    #[test]
    fn concurrent_registration_admits_one() {
        let registry = Arc::new(IndicatorRegistry::<()>::new());
        let start = Arc::new(Barrier::new(16));

        let handles: Vec<_> = (1..=16)
            .map(|id| {
                let registry = registry.clone();
                let start = start.clone();
                thread::spawn(move || {
                    start.wait();
                    registry.register(id, Weak::new()).is_ok()
                })
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();

        assert_eq!(winners, 1);
        assert!(registry.active_id().is_some());
    }
}
