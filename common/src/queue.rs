use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Notify;
use tracing::debug;

use crate::frame::Payload;

/// Default number of payloads buffered between the fetch and render tasks.
pub const DEFAULT_CAPACITY: usize = 2;

/// Bounded hand-off buffer between the fetch task and the render task.
///
/// `push` never waits: when the queue is full the oldest payload is evicted
/// first, so the renderer is at most `capacity` frames behind the network.
/// The queue is its own synchronization boundary; callers share it through
/// an `Arc` without any extra locking.
pub struct FrameQueue {
    items: Mutex<VecDeque<Payload>>,
    capacity: usize,
    available: Notify,
    dropped: AtomicU64,
}

impl FrameQueue {
    /// A capacity of zero is bumped to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            available: Notify::new(),
            dropped: AtomicU64::new(0),
        }
    }

    /// Append a payload, evicting and returning the oldest one if the queue was full.
    pub fn push(&self, payload: Payload) -> Option<Payload> {
        let evicted = {
            let mut items = self.items.lock();
            let evicted = if items.len() >= self.capacity {
                items.pop_front()
            } else {
                None
            };
            items.push_back(payload);
            evicted
        };

        if let Some(old) = &evicted {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            debug!(seq = old.seq, "frame queue full, dropped oldest payload");
        }
        self.available.notify_one();
        evicted
    }

    /// Wait until a payload is available and remove the oldest one.
    ///
    /// Cancel safe: dropping the future before it completes never loses a payload.
    pub async fn take(&self) -> Payload {
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(payload) = self.items.lock().pop_front() {
                return payload;
            }
            notified.await;
        }
    }

    #[cfg(test)]
    fn try_take(&self) -> Option<Payload> {
        self.items.lock().pop_front()
    }

    pub fn clear(&self) {
        self.items.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Payloads evicted by the drop-oldest policy since construction.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for FrameQueue {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
