//! Single-slot ownership of the live subscription.

use super::provider::StreamHandle;
use parking_lot::Mutex;

/// A subscription that has been opened and not yet closed.
pub struct ActiveSubscription {
    pub generation: u64,
    pub track: Vec<String>,
    handle: Box<dyn StreamHandle>,
}

impl ActiveSubscription {
    pub fn new(generation: u64, track: Vec<String>, handle: Box<dyn StreamHandle>) -> Self {
        Self {
            generation,
            track,
            handle,
        }
    }
}

/// Holds at most one live subscription.
///
/// The only way to change the slot is [`SubscriptionSlot::replace`], which
/// swaps the new value in and closes the previous one under the same guard.
#[derive(Default)]
pub struct SubscriptionSlot {
    current: Mutex<Option<ActiveSubscription>>,
}

impl SubscriptionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `next` and close whatever was there. Returns the generation
    /// of the closed subscription, if any.
    pub fn replace(&self, next: Option<ActiveSubscription>) -> Option<u64> {
        let mut current = self.current.lock();
        let previous = std::mem::replace(&mut *current, next);
        previous.map(|mut previous| {
            previous.handle.close();
            tracing::debug!(generation = previous.generation, "closed subscription");
            previous.generation
        })
    }

    /// Close the current subscription, if any.
    pub fn clear(&self) -> Option<u64> {
        self.replace(None)
    }

    pub fn is_open(&self) -> bool {
        self.current.lock().is_some()
    }

    pub fn generation(&self) -> Option<u64> {
        self.current.lock().as_ref().map(|s| s.generation)
    }

    pub fn track(&self) -> Option<Vec<String>> {
        self.current.lock().as_ref().map(|s| s.track.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingHandle {
        closed: Arc<AtomicUsize>,
    }

    impl StreamHandle for CountingHandle {
        fn close(&mut self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn subscription(generation: u64, closed: &Arc<AtomicUsize>) -> ActiveSubscription {
        ActiveSubscription::new(
            generation,
            vec!["storm".to_string()],
            Box::new(CountingHandle {
                closed: Arc::clone(closed),
            }),
        )
    }

    #[test]
    fn test_replace_closes_previous() {
        let closed = Arc::new(AtomicUsize::new(0));
        let slot = SubscriptionSlot::new();

        assert_eq!(slot.replace(Some(subscription(1, &closed))), None);
        assert_eq!(slot.generation(), Some(1));

        assert_eq!(slot.replace(Some(subscription(2, &closed))), Some(1));
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert_eq!(slot.generation(), Some(2));
        assert_eq!(slot.track(), Some(vec!["storm".to_string()]));

        assert_eq!(slot.clear(), Some(2));
        assert_eq!(closed.load(Ordering::SeqCst), 2);
        assert!(!slot.is_open());
        assert_eq!(slot.clear(), None);
    }

    #[test]
    fn test_concurrent_replace_closes_all_but_one() {
        let closed = Arc::new(AtomicUsize::new(0));
        let slot = Arc::new(SubscriptionSlot::new());

        let threads: Vec<_> = (0..8)
            .map(|i| {
                let slot = Arc::clone(&slot);
                let closed = Arc::clone(&closed);
                std::thread::spawn(move || {
                    slot.replace(Some(subscription(i, &closed)));
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        assert!(slot.is_open());
        assert_eq!(closed.load(Ordering::SeqCst), 7);
    }
}
