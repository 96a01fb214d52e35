//! Bounded freshest-wins queue between the scan worker and its handle.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Notify;

/// Bounded FIFO that never blocks the producer.
///
/// When full, [`push`](Self::push) evicts exactly one oldest entry before appending,
/// so the queue always holds the most recent `capacity` entries.
#[derive(Debug)]
pub struct FreshestQueue<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
    available: Notify,
}

impl<T> FreshestQueue<T> {
    /// Creates an empty queue. A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            available: Notify::new(),
        }
    }

    /// Append an entry. Returns the evicted entry when the queue was full.
    pub fn push(&self, item: T) -> Option<T> {
        let evicted = {
            let mut items = self.items.lock();
            let evicted = if items.len() >= self.capacity {
                items.pop_front()
            } else {
                None
            };
            items.push_back(item);
            evicted
        };
        self.available.notify_one();
        evicted
    }

    /// Remove the oldest entry without waiting.
    pub fn try_pop(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    /// Remove the oldest entry, waiting for one to arrive.
    pub async fn pop(&self) -> T {
        loop {
            let notified = self.available.notified();
            if let Some(item) = self.try_pop() {
                return item;
            }
            notified.await;
        }
    }

    /// Like [`pop`](Self::pop), giving up after `timeout`.
    pub async fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        tokio::time::timeout(timeout, self.pop()).await.ok()
    }

    /// Remove every entry.
    pub fn drain(&self) -> Vec<T> {
        self.items.lock().drain(..).collect()
    }

    /// Number of queued entries.
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Maximum number of entries held.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_overflow_keeps_newest() {
        let queue = FreshestQueue::new(10);
        for i in 0..10 {
            assert_eq!(queue.push(i), None);
        }
        assert_eq!(queue.push(10), Some(0));
        assert_eq!(queue.len(), 10);
        assert_eq!(queue.drain(), (1..=10).collect::<Vec<_>>());
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_pop_waits_for_producer() {
        let queue = Arc::new(FreshestQueue::new(2));
        let producer = Arc::clone(&queue);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.push("scan");
        });
        assert_eq!(queue.pop_timeout(Duration::from_secs(2)).await, Some("scan"));
    }

    #[tokio::test]
    async fn test_pop_timeout_on_empty_queue() {
        let queue: FreshestQueue<u8> = FreshestQueue::new(1);
        assert_eq!(queue.pop_timeout(Duration::from_millis(10)).await, None);
    }
}
