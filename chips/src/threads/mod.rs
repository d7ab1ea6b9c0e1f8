//! Kernel threads and synchronization primitives
//!
//! The free functions here act on the kernel thread that calls them.
pub mod alarm;
pub mod communicator;
pub mod condition;
pub mod kthread;
pub mod lock;
pub mod queue;
pub mod scheduler;

pub use alarm::Alarm;
pub use communicator::Communicator;
pub use condition::Condition2;
pub use kthread::{KThread, ThreadStatus};
pub use lock::Lock;
pub use queue::ThreadQueue;
pub use scheduler::Scheduler;

use crate::{Kernel, KernelResult};
use alloc::{boxed::Box, sync::Arc};
use core::cell::RefCell;
use scheduler::ThreadDeath;
use std::panic;

/// The kernel and thread a host thread is running as
#[derive(Clone)]
pub struct ThreadContext {
    /// Kernel the thread belongs to
    pub kernel: Arc<Kernel>,
    /// The thread itself
    pub thread: Arc<KThread>,
}

std::thread_local! {
    static CONTEXT: RefCell<Option<ThreadContext>> = const { RefCell::new(None) };
}

pub(crate) fn install_context(context: ThreadContext) {
    CONTEXT.with(|current| *current.borrow_mut() = Some(context));
}

/// Context of the calling kernel thread, or `None` on a plain host thread
pub fn try_context() -> Option<ThreadContext> {
    CONTEXT
        .try_with(|current| current.borrow().clone())
        .ok()
        .flatten()
}

/// Context of the calling kernel thread
///
/// # Panics
/// If not called on a kernel thread
pub fn context() -> ThreadContext {
    try_context().expect("Not running on a kernel thread")
}

/// The calling kernel thread
pub fn current_thread() -> Arc<KThread> {
    context().thread
}

/// Kernel of the calling kernel thread
pub fn current_kernel() -> Arc<Kernel> {
    context().kernel
}

/// Fork a kernel thread running `body`
pub fn fork(name: &str, body: impl FnOnce() + Send + 'static) -> KernelResult<Arc<KThread>> {
    let kernel = current_kernel();
    kernel.scheduler().fork(&kernel, name, None, Box::new(body))
}

/// Let another ready thread run
pub fn yield_now() {
    let context = context();
    context
        .kernel
        .scheduler()
        .yield_now(&context.kernel, &context.thread);
}

/// Block the calling thread until it is readied. Interrupts must be disabled
pub fn sleep() {
    let context = context();
    context
        .kernel
        .scheduler()
        .sleep(&context.kernel, &context.thread);
}

/// Finish the calling thread, waking anybody joined on it
///
/// # Panics
/// On the boot thread
pub fn finish() -> ! {
    assert!(
        !current_thread().is_boot(),
        "The boot thread cannot finish"
    );
    panic::resume_unwind(Box::new(ThreadDeath::Finish))
}
