//! Bounded FIFO that evicts the oldest entry when full

use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::Notify;

/// Bounded work queue between a bus handler and a single worker.
///
/// `push` never blocks: when the queue is full the oldest pending item is
/// evicted and handed back to the caller, so the producer side decides
/// what to do with it (log it, clean up after it).
pub struct DropOldestQueue<T> {
    state: Mutex<QueueState<T>>,
    notify: Notify,
    capacity: usize,
}

struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Result of a push
#[derive(Debug, PartialEq, Eq)]
pub enum PushOutcome<T> {
    Queued,
    /// Queued after evicting the returned oldest item
    Evicted(T),
    /// The queue is closed; the item is handed back
    Rejected(T),
}

impl<T> DropOldestQueue<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            notify: Notify::new(),
            capacity,
        }
    }

    pub fn push(&self, item: T) -> PushOutcome<T> {
        let outcome = {
            let mut state = self.state.lock();
            if state.closed {
                return PushOutcome::Rejected(item);
            }
            let evicted = if state.items.len() >= self.capacity {
                state.items.pop_front()
            } else {
                None
            };
            state.items.push_back(item);
            match evicted {
                Some(old) => PushOutcome::Evicted(old),
                None => PushOutcome::Queued,
            }
        };
        self.notify.notify_one();
        outcome
    }

    /// Wait for the next item. Returns `None` once closed and drained.
    pub async fn pop(&self) -> Option<T> {
        loop {
            {
                let mut state = self.state.lock();
                if let Some(item) = state.items.pop_front() {
                    return Some(item);
                }
                if state.closed {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Stop accepting items; waiting `pop` calls drain what is left.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    /// Close and return everything still pending.
    pub fn close_and_drain(&self) -> Vec<T> {
        let drained = {
            let mut state = self.state.lock();
            state.closed = true;
            state.items.drain(..).collect()
        };
        self.notify.notify_waiters();
        self.notify.notify_one();
        drained
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_test::{assert_pending, assert_ready_eq, task};

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = DropOldestQueue::new(3);
        assert_eq!(queue.push(1), PushOutcome::Queued);
        assert_eq!(queue.push(2), PushOutcome::Queued);
        assert_eq!(queue.pop().await, Some(1));
        assert_eq!(queue.pop().await, Some(2));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_full_queue_evicts_oldest() {
        let queue = DropOldestQueue::new(2);
        queue.push("a");
        queue.push("b");
        assert_eq!(queue.push("c"), PushOutcome::Evicted("a"));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop().await, Some("b"));
        assert_eq!(queue.pop().await, Some("c"));
    }

    #[tokio::test]
    async fn test_zero_capacity_is_one() {
        let queue = DropOldestQueue::new(0);
        assert_eq!(queue.capacity(), 1);
        queue.push(1);
        assert_eq!(queue.push(2), PushOutcome::Evicted(1));
    }

    #[test]
    fn test_pop_waits_for_push() {
        let queue = DropOldestQueue::new(2);
        let mut pop = task::spawn(queue.pop());
        assert_pending!(pop.poll());
        queue.push(7);
        assert!(pop.is_woken());
        assert_ready_eq!(pop.poll(), Some(7));
    }

    #[tokio::test]
    async fn test_close_wakes_waiter_and_rejects() {
        let queue = Arc::new(DropOldestQueue::<u32>::new(2));
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();
        let popped = tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert_eq!(popped, None);
        assert_eq!(queue.push(5), PushOutcome::Rejected(5));
    }

    #[tokio::test]
    async fn test_close_drains_remaining_items() {
        let queue = DropOldestQueue::new(4);
        queue.push(1);
        queue.push(2);
        queue.close();
        assert_eq!(queue.pop().await, Some(1));
        assert_eq!(queue.pop().await, Some(2));
        assert_eq!(queue.pop().await, None);

        let queue = DropOldestQueue::new(4);
        queue.push(1);
        queue.push(2);
        assert_eq!(queue.close_and_drain(), vec![1, 2]);
        assert!(queue.is_closed());
    }
}
