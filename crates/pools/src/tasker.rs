//! Single-consumer task queue feeding one execution site.

use meridian_tasks::SiteTask;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

struct TaskerState {
    items: VecDeque<SiteTask>,
    closed: bool,
}

/// Unbounded FIFO between the scheduler (many producers) and one
/// execution site (single consumer).
///
/// `offer` never blocks; the consumer either polls or parks on `take`.
/// After `close`, offers are rejected and `take` drains the remainder
/// before returning `None`.
pub struct SiteTaskerQueue {
    state: Mutex<TaskerState>,
    ready: Condvar,
}

impl Default for SiteTaskerQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl SiteTaskerQueue {
    /// Create an empty, open queue.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TaskerState {
                items: VecDeque::new(),
                closed: false,
            }),
            ready: Condvar::new(),
        }
    }

    /// Append a task. Returns `false` if the queue has been closed.
    pub fn offer(&self, task: SiteTask) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        state.items.push_back(task);
        self.ready.notify_one();
        true
    }

    /// Take the head task without blocking.
    pub fn poll(&self) -> Option<SiteTask> {
        self.state.lock().items.pop_front()
    }

    /// Block until a task arrives or the queue closes.
    ///
    /// Returns `None` only once the queue is closed and drained.
    pub fn take(&self) -> Option<SiteTask> {
        let mut state = self.state.lock();
        loop {
            if let Some(task) = state.items.pop_front() {
                return Some(task);
            }
            if state.closed {
                return None;
            }
            self.ready.wait(&mut state);
        }
    }

    /// Number of queued tasks.
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    /// Close the queue and wake any parked consumer.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.ready.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_tasks::test_utils::mp_write;

    #[test]
    fn test_offer_then_poll_fifo() {
        let queue = SiteTaskerQueue::new();
        assert!(queue.offer(SiteTask::Txn(mp_write(1))));
        assert!(queue.offer(SiteTask::Txn(mp_write(2))));
        assert_eq!(queue.len(), 2);

        let first = queue.poll().unwrap();
        assert_eq!(first.txn_id().unwrap().sequence(), 1);
        let second = queue.poll().unwrap();
        assert_eq!(second.txn_id().unwrap().sequence(), 2);
        assert!(queue.poll().is_none());
    }

    #[test]
    fn test_offer_after_close_rejected() {
        let queue = SiteTaskerQueue::new();
        queue.close();
        assert!(!queue.offer(SiteTask::Txn(mp_write(1))));
    }

    #[test]
    fn test_take_drains_then_observes_close() {
        let queue = SiteTaskerQueue::new();
        queue.offer(SiteTask::Txn(mp_write(1)));
        queue.close();

        assert!(queue.take().is_some());
        assert!(queue.take().is_none());
    }

    #[test]
    fn test_take_parks_until_offer() {
        use std::sync::Arc;

        let queue = Arc::new(SiteTaskerQueue::new());
        let producer = Arc::clone(&queue);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            producer.offer(SiteTask::Txn(mp_write(7)));
        });

        let task = queue.take().expect("producer offers before close");
        assert_eq!(task.txn_id().unwrap().sequence(), 7);
        handle.join().unwrap();
    }
}
