//! Single-slot frame handoff between pipeline stages.
//!
//! [`FrameSlot`] is the only synchronization point in the pipeline: the
//! capture thread hands frames to the publish loop through one, and the
//! network receive callback hands packets to the render loop through
//! another. It holds at most one value. A write replaces whatever is
//! pending; a take drains the slot. Nothing ever blocks and nothing ever
//! queues, which is what bounds end-to-end latency: a slow reader always
//! gets the newest value available when it polls, never a backlog.

use std::sync::{Mutex, PoisonError};

/// Overwrite-on-write, take-and-clear handoff cell.
///
/// `write` and `take_if_present` are safe to call concurrently from any
/// number of threads. Neither operation can fail or block beyond the
/// momentary internal lock.
#[derive(Debug)]
pub struct FrameSlot<T> {
    inner: Mutex<Option<T>>,
}

impl<T> FrameSlot<T> {
    /// Creates an empty slot.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }

    /// Stores `value`, discarding any unread predecessor.
    ///
    /// Returns `true` if a pending value was displaced; that is the
    /// drop-old policy doing its job, and callers may count it.
    pub fn write(&self, value: T) -> bool {
        self.lock().replace(value).is_some()
    }

    /// Removes and returns the current value, leaving the slot empty.
    ///
    /// `None` means "no data yet" and is an ordinary outcome, not an
    /// error.
    pub fn take_if_present(&self) -> Option<T> {
        self.lock().take()
    }

    /// True when no value is pending.
    pub fn is_empty(&self) -> bool {
        self.lock().is_none()
    }

    // A poisoned lock still holds a usable Option; recover it rather
    // than propagate a panic from an unrelated thread.
    fn lock(&self) -> std::sync::MutexGuard<'_, Option<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Default for FrameSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn starts_empty() {
        let slot: FrameSlot<u32> = FrameSlot::new();
        assert!(slot.is_empty());
        assert_eq!(slot.take_if_present(), None);
    }

    #[test]
    fn take_returns_last_write() {
        let slot = FrameSlot::new();
        for i in 0..10 {
            slot.write(i);
        }
        assert_eq!(slot.take_if_present(), Some(9));
        assert_eq!(slot.take_if_present(), None);
    }

    #[test]
    fn write_reports_displacement() {
        let slot = FrameSlot::new();
        assert!(!slot.write("a"));
        assert!(slot.write("b"));
        assert_eq!(slot.take_if_present(), Some("b"));
        assert!(!slot.write("c"));
    }

    #[test]
    fn take_leaves_slot_empty() {
        let slot = FrameSlot::new();
        slot.write(42u64);
        assert_eq!(slot.take_if_present(), Some(42));
        assert!(slot.is_empty());
    }

    #[test]
    fn cross_thread_handoff() {
        let slot = Arc::new(FrameSlot::new());
        let writer = {
            let slot = Arc::clone(&slot);
            std::thread::spawn(move || {
                for i in 0..100u32 {
                    slot.write(i);
                }
            })
        };
        writer.join().expect("writer thread panicked");
        assert_eq!(slot.take_if_present(), Some(99));
        assert!(slot.is_empty());
    }
}
