//! FIFO queue of parked threads
use crate::threads::kthread::KThread;
use alloc::{collections::VecDeque, sync::Arc};

/// Threads waiting for something, earliest first
#[derive(Debug, Default)]
pub struct ThreadQueue {
    threads: VecDeque<Arc<KThread>>,
}

impl ThreadQueue {
    /// Construct an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `thread` to the back of the queue
    pub fn park(&mut self, thread: Arc<KThread>) {
        self.threads.push_back(thread);
    }

    /// Remove the thread that has waited longest
    pub fn next(&mut self) -> Option<Arc<KThread>> {
        self.threads.pop_front()
    }

    /// Number of waiting threads
    pub fn len(&self) -> usize {
        self.threads.len()
    }

    /// Return true if nobody is waiting
    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn first_in_first_out() {
        let mut queue = ThreadQueue::new();
        assert!(queue.is_empty());

        for id in 1..=3 {
            queue.park(Arc::new(KThread::new(id, "waiter", None)));
        }
        assert_eq!(queue.len(), 3);

        let order: Vec<u64> = core::iter::from_fn(|| queue.next())
            .map(|thread| thread.id())
            .collect();
        assert_eq!(order, [1, 2, 3]);
        assert!(queue.next().is_none());
    }
}
