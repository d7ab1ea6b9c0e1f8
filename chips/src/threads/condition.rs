//! Condition variables built directly on interrupt disabling
use crate::threads::{self, lock::Lock, queue::ThreadQueue};
use alloc::sync::Arc;
use spin::Mutex;

/// A condition variable with Mesa semantics
///
/// Every operation requires the calling thread to hold the associated lock.
pub struct Condition2 {
    lock: Arc<Lock>,
    wait_queue: Mutex<ThreadQueue>,
}

impl Condition2 {
    /// Construct a condition variable guarded by `lock`
    pub fn new(lock: Arc<Lock>) -> Self {
        Self {
            lock,
            wait_queue: Mutex::new(ThreadQueue::new()),
        }
    }

    /// The associated lock
    pub fn lock(&self) -> &Arc<Lock> {
        &self.lock
    }

    /// Atomically release the lock and sleep until woken, then re-acquire the lock
    pub fn sleep(&self) {
        assert!(
            self.lock.is_held_by_current_thread(),
            "Condition used without holding its lock"
        );

        let context = threads::context();
        let kernel = &context.kernel;
        let interrupt = kernel.interrupt();
        let status = interrupt.disable();
        self.lock.release();
        self.wait_queue.lock().park(context.thread.clone());
        kernel.scheduler().sleep(kernel, &context.thread);
        interrupt.restore(kernel, status);

        self.lock.acquire();
    }

    /// Wake the longest waiter, if any
    pub fn wake(&self) {
        assert!(
            self.lock.is_held_by_current_thread(),
            "Condition used without holding its lock"
        );

        let kernel = threads::current_kernel();
        let interrupt = kernel.interrupt();
        let status = interrupt.disable();
        let next = self.wait_queue.lock().next();
        if let Some(thread) = next {
            kernel.scheduler().ready(&kernel, &thread);
        }
        interrupt.restore(&kernel, status);
    }

    /// Wake every waiter
    pub fn wake_all(&self) {
        assert!(
            self.lock.is_held_by_current_thread(),
            "Condition used without holding its lock"
        );

        let kernel = threads::current_kernel();
        let interrupt = kernel.interrupt();
        let status = interrupt.disable();
        loop {
            let next = self.wait_queue.lock().next();
            match next {
                Some(thread) => kernel.scheduler().ready(&kernel, &thread),
                None => break,
            }
        }
        interrupt.restore(&kernel, status);
    }

    /// Number of sleeping threads
    pub fn waiters(&self) -> usize {
        self.wait_queue.lock().len()
    }
}
