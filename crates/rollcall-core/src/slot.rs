//! Single-value "latest wins" cell shared between a producer and a consumer.
//!
//! Writers replace, never queue: a value nobody read before the next
//! `publish` is simply dropped. Every accessor holds the lock only for the
//! duration of its own read/modify/write.

use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug)]
pub struct LatestSlot<T> {
    inner: Mutex<Option<T>>,
}

impl<T> Default for LatestSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> LatestSlot<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }

    // The slot holds a plain Option, so a panic in another holder cannot
    // leave it half-written; recover instead of propagating the poison.
    fn lock(&self) -> MutexGuard<'_, Option<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the current value, returning the one it displaced.
    pub fn publish(&self, value: T) -> Option<T> {
        self.lock().replace(value)
    }

    /// Remove and return the current value, leaving the slot empty.
    pub fn take(&self) -> Option<T> {
        self.lock().take()
    }

    pub fn clear(&self) {
        self.lock().take();
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_none()
    }

    /// Run `f` against the current value while holding the lock.
    pub fn with<R>(&self, f: impl FnOnce(Option<&T>) -> R) -> R {
        let guard = self.lock();
        f(guard.as_ref())
    }
}

impl<T: Clone> LatestSlot<T> {
    /// Copy of the current value, leaving it in place.
    pub fn snapshot(&self) -> Option<T> {
        self.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_starts_empty() {
        let slot: LatestSlot<u32> = LatestSlot::new();
        assert!(slot.is_empty());
        assert_eq!(slot.take(), None);
        assert_eq!(slot.snapshot(), None);
    }

    #[test]
    fn test_publish_overwrites_stale_value() {
        let slot = LatestSlot::new();
        assert_eq!(slot.publish(1), None);
        assert_eq!(slot.publish(2), Some(1));
        assert_eq!(slot.snapshot(), Some(2));
        assert!(!slot.is_empty());
    }

    #[test]
    fn test_take_empties_and_clear() {
        let slot = LatestSlot::new();
        slot.publish("frame");
        assert_eq!(slot.take(), Some("frame"));
        assert!(slot.is_empty());

        slot.publish("again");
        slot.clear();
        assert!(slot.is_empty());
    }

    #[test]
    fn test_with_sees_current_value() {
        let slot = LatestSlot::new();
        assert!(slot.with(|v| v.is_none()));
        slot.publish(vec![1, 2, 3]);
        assert_eq!(slot.with(|v| v.map(Vec::len)), Some(3));
    }

    #[test]
    fn test_concurrent_writers_leave_one_of_their_values() {
        let slot = Arc::new(LatestSlot::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let slot = Arc::clone(&slot);
                std::thread::spawn(move || {
                    for j in 0..100 {
                        slot.publish(i * 1000 + j);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let last = slot.take().unwrap();
        assert_eq!(last % 1000, 99);
    }

    #[test]
    fn test_survives_poisoned_lock() {
        let slot = Arc::new(LatestSlot::new());
        slot.publish(7);
        let poisoner = Arc::clone(&slot);
        let _ = std::thread::spawn(move || {
            poisoner.with(|_| panic!("boom"));
        })
        .join();
        assert_eq!(slot.snapshot(), Some(7));
    }
}
