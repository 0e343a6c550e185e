//! Single-slot mailbox with overwrite semantics
//!
//! Holds at most one item. Publishing replaces whatever is buffered, so a
//! slow consumer always sees the freshest item and the producer never waits.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Capacity-one buffer that keeps only the latest item
#[derive(Debug)]
pub struct LatestSlot<T> {
    slot: Mutex<Option<T>>,
    ready: Condvar,
    published: AtomicU64,
    overwritten: AtomicU64,
}

impl<T> LatestSlot<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            ready: Condvar::new(),
            published: AtomicU64::new(0),
            overwritten: AtomicU64::new(0),
        }
    }

    /// Store `item`, returning the unconsumed item it displaced, if any.
    ///
    /// Never blocks beyond the slot lock, which is only held for a swap.
    pub fn publish(&self, item: T) -> Option<T> {
        let displaced = self.slot.lock().replace(item);
        self.published.fetch_add(1, Ordering::Relaxed);
        if displaced.is_some() {
            self.overwritten.fetch_add(1, Ordering::Relaxed);
        }
        self.ready.notify_one();
        displaced
    }

    /// Take the buffered item without waiting
    pub fn try_take(&self) -> Option<T> {
        self.slot.lock().take()
    }

    /// Wait up to `timeout` for an item.
    ///
    /// Only for adapters that turn a push-style decoder into a pull-style
    /// source; the detection tick uses [`try_take`](Self::try_take).
    ///
    /// A timeout too large to represent waits until an item arrives.
    pub fn take_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now().checked_add(timeout);
        let mut slot = self.slot.lock();
        loop {
            if let Some(item) = slot.take() {
                return Some(item);
            }
            match deadline {
                Some(deadline) => {
                    if self.ready.wait_until(&mut slot, deadline).timed_out() {
                        return slot.take();
                    }
                }
                None => self.ready.wait(&mut slot),
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.slot.lock().is_none()
    }

    /// Total items ever published
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Items discarded because a newer one replaced them before consumption
    pub fn overwritten(&self) -> u64 {
        self.overwritten.load(Ordering::Relaxed)
    }
}

impl<T> Default for LatestSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_take_returns_published_item() {
        let slot = LatestSlot::new();
        assert!(slot.try_take().is_none());

        assert!(slot.publish(1).is_none());
        assert_eq!(slot.try_take(), Some(1));
        assert!(slot.try_take().is_none());
        assert!(slot.is_empty());
    }

    #[test]
    fn test_publish_overwrites_unconsumed_item() {
        let slot = LatestSlot::new();
        slot.publish(1);
        assert_eq!(slot.publish(2), Some(1));
        assert_eq!(slot.publish(3), Some(2));

        assert_eq!(slot.try_take(), Some(3));
        assert!(slot.try_take().is_none());
        assert_eq!(slot.published(), 3);
        assert_eq!(slot.overwritten(), 2);
    }

    #[test]
    fn test_never_holds_more_than_one() {
        let slot = Arc::new(LatestSlot::new());
        let producer = {
            let slot = slot.clone();
            std::thread::spawn(move || {
                for i in 0..10_000u32 {
                    slot.publish(i);
                }
            })
        };

        let mut last_seen = None;
        while !producer.is_finished() {
            if let Some(value) = slot.try_take() {
                if let Some(previous) = last_seen {
                    assert!(value > previous);
                }
                last_seen = Some(value);
            }
        }
        producer.join().unwrap();

        // Whatever is left is the newest item and nothing queues behind it
        if let Some(value) = slot.try_take() {
            assert_eq!(value, 9_999);
        }
        assert!(slot.try_take().is_none());
        assert_eq!(slot.published(), 10_000);
    }

    #[test]
    fn test_take_timeout_wakes_on_publish() {
        let slot = Arc::new(LatestSlot::new());
        let consumer = {
            let slot = slot.clone();
            std::thread::spawn(move || slot.take_timeout(Duration::from_secs(5)))
        };

        std::thread::sleep(Duration::from_millis(50));
        slot.publish("frame");
        assert_eq!(consumer.join().unwrap(), Some("frame"));
    }

    #[test]
    fn test_take_timeout_accepts_unbounded_wait() {
        let slot = Arc::new(LatestSlot::new());
        slot.publish(1u8);
        assert_eq!(slot.take_timeout(Duration::MAX), Some(1));

        let consumer = {
            let slot = slot.clone();
            std::thread::spawn(move || slot.take_timeout(Duration::MAX))
        };
        std::thread::sleep(Duration::from_millis(20));
        slot.publish(2);
        assert_eq!(consumer.join().unwrap(), Some(2));
    }

    #[test]
    fn test_take_timeout_expires_when_empty() {
        let slot: LatestSlot<u8> = LatestSlot::new();
        let start = Instant::now();
        assert!(slot.take_timeout(Duration::from_millis(30)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(30));
    }
}
