//! Batch send queue (§4.A): a bounded, multi-producer / single-consumer
//! queue of outbound byte segments, drained in arrival order by the
//! session's send pump.

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// Bounded FIFO queue of byte segments. `enqueue` never blocks: it either
/// appends or reports overflow. The consumer side (`try_dequeue`) drains
/// everything currently queued, up to `capacity`, in one call.
#[derive(Debug)]
pub struct SendQueue {
    capacity: usize,
    segments: Mutex<VecDeque<Bytes>>,
    notify: Notify,
    closed: AtomicBool,
}

impl SendQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(crate::config::MIN_SEND_QUEUE_CAPACITY),
            segments: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Appends one segment. Returns `false` without mutating the queue if
    /// doing so would exceed capacity.
    pub fn enqueue(&self, segment: Bytes) -> bool {
        self.enqueue_all(std::iter::once(segment))
    }

    /// Appends a list of segments atomically: either the whole list fits
    /// and is appended contiguously, or none of it is.
    pub fn enqueue_all<I>(&self, segments: I) -> bool
    where
        I: IntoIterator<Item = Bytes>,
        I::IntoIter: ExactSizeIterator,
    {
        let iter = segments.into_iter();
        let mut guard = self.segments.lock();
        if guard.len() + iter.len() > self.capacity {
            return false;
        }
        guard.extend(iter);
        drop(guard);
        self.notify.notify_one();
        true
    }

    /// Drains everything currently queued, in FIFO order, into `out`.
    /// Returns `true` if anything was moved.
    pub fn try_dequeue(&self, out: &mut Vec<Bytes>) -> bool {
        let mut guard = self.segments.lock();
        if guard.is_empty() {
            return false;
        }
        out.extend(guard.drain(..));
        true
    }

    /// Resolves once the queue has been signalled since the last wait, or
    /// immediately if it is already non-empty. Used by the async send pump
    /// to avoid a busy loop while idle.
    pub async fn notified(&self) {
        if !self.segments.lock().is_empty() {
            return;
        }
        self.notify.notified().await;
    }

    pub fn len(&self) -> usize {
        self.segments.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Marks the queue closed and wakes any waiter so the send pump can
    /// observe shutdown and discard whatever remains (§5 resource lifecycle).
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueue_respects_capacity() {
        let q = SendQueue::new(3);
        assert!(q.enqueue(Bytes::from_static(b"a")));
        assert!(q.enqueue(Bytes::from_static(b"b")));
        assert!(q.enqueue(Bytes::from_static(b"c")));
        assert!(!q.enqueue(Bytes::from_static(b"d")));
        assert_eq!(q.len(), 3);
    }

    #[test]
    fn capacity_clamped_to_minimum() {
        let q = SendQueue::new(1);
        assert!(q.enqueue(Bytes::from_static(b"a")));
        assert!(q.enqueue(Bytes::from_static(b"b")));
        assert!(q.enqueue(Bytes::from_static(b"c")));
        assert!(!q.enqueue(Bytes::from_static(b"d")));
    }

    #[test]
    fn enqueue_all_is_atomic() {
        let q = SendQueue::new(3);
        assert!(q.enqueue(Bytes::from_static(b"a")));
        // Two more segments would exceed capacity (1 + 2 > 3 is false, but
        // adding a third existing entry first makes it so).
        assert!(q.enqueue(Bytes::from_static(b"b")));
        let batch = vec![Bytes::from_static(b"c"), Bytes::from_static(b"d")];
        assert!(!q.enqueue_all(batch));
        assert_eq!(q.len(), 2, "partial batch must not have been appended");
    }

    #[test]
    fn try_dequeue_drains_in_fifo_order() {
        let q = SendQueue::new(8);
        q.enqueue(Bytes::from_static(b"a"));
        q.enqueue(Bytes::from_static(b"b"));
        q.enqueue(Bytes::from_static(b"c"));

        let mut out = Vec::new();
        assert!(q.try_dequeue(&mut out));
        assert_eq!(out, vec![Bytes::from_static(b"a"), Bytes::from_static(b"b"), Bytes::from_static(b"c")]);
        assert!(q.is_empty());

        let mut out2 = Vec::new();
        assert!(!q.try_dequeue(&mut out2));
    }
}
