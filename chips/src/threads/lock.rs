//! Blocking mutual exclusion
use crate::threads::{self, kthread::KThread, queue::ThreadQueue};
use alloc::sync::Arc;
use spin::Mutex;

/// A lock that parks waiters instead of spinning
///
/// Ownership passes straight from the releasing thread to the longest waiter.
#[derive(Debug, Default)]
pub struct Lock {
    holder: Mutex<Option<Arc<KThread>>>,
    wait_queue: Mutex<ThreadQueue>,
}

impl Lock {
    /// Construct an unheld lock
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock, sleeping until it is free
    ///
    /// # Panics
    /// If the current thread already holds the lock
    pub fn acquire(&self) {
        let context = threads::context();
        let kernel = &context.kernel;
        let current = &context.thread;
        assert!(
            !self.is_held_by(current),
            "{current} already holds this lock"
        );

        let interrupt = kernel.interrupt();
        let status = interrupt.disable();
        let must_wait = {
            let mut holder = self.holder.lock();
            if holder.is_none() {
                *holder = Some(current.clone());
            }
            !holder.as_ref().is_some_and(|holder| Arc::ptr_eq(holder, current))
        };
        if must_wait {
            self.wait_queue.lock().park(current.clone());
            kernel.scheduler().sleep(kernel, current);
        }
        assert!(self.is_held_by(current));
        interrupt.restore(kernel, status);
    }

    /// Release the lock, handing it to the longest waiter
    ///
    /// # Panics
    /// If the current thread does not hold the lock
    pub fn release(&self) {
        let context = threads::context();
        let kernel = &context.kernel;
        assert!(
            self.is_held_by(&context.thread),
            "{} released a lock it does not hold",
            context.thread
        );

        let interrupt = kernel.interrupt();
        let status = interrupt.disable();
        let next = self.wait_queue.lock().next();
        *self.holder.lock() = next.clone();
        if let Some(next) = next {
            kernel.scheduler().ready(kernel, &next);
        }
        interrupt.restore(kernel, status);
    }

    /// Return true if the current thread holds the lock
    pub fn is_held_by_current_thread(&self) -> bool {
        threads::try_context().is_some_and(|context| self.is_held_by(&context.thread))
    }

    fn is_held_by(&self, thread: &Arc<KThread>) -> bool {
        self.holder
            .lock()
            .as_ref()
            .is_some_and(|holder| Arc::ptr_eq(holder, thread))
    }
}
