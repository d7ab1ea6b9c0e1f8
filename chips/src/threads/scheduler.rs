//! Round-robin scheduler
//!
//! All scheduling happens with interrupts disabled. A context switch hands the TCB baton to the
//! next thread and parks the current host thread until the baton comes back.
use crate::{
    machine::{tcb::Tcb, HaltReason},
    threads::{
        install_context,
        kthread::{KThread, ThreadStatus},
        queue::ThreadQueue,
        ThreadContext,
    },
    Kernel, KernelResult,
};
use alloc::{
    boxed::Box,
    string::{String, ToString},
    sync::Arc,
};
use chips_abi::Pid;
use core::{
    any::Any,
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
};
use log::{debug, error, trace};
use spin::Mutex;
use std::panic::{self, AssertUnwindSafe};

/// Payload used to unwind a kernel thread's host stack
pub(crate) enum ThreadDeath {
    /// Thread is done; wake its joiners and run somebody else
    Finish,
    /// Machine stopped; give control back to the boot thread
    Halt,
}

/// Body of a forked thread
pub type ThreadBody = Box<dyn FnOnce() + Send>;

/// Ready queue and thread bookkeeping
pub struct Scheduler {
    ready_queue: Mutex<ThreadQueue>,
    boot_thread: Arc<KThread>,
    next_id: AtomicU64,
    awaiting_halt: AtomicBool,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    /// Construct a scheduler whose only thread is the (running) boot thread
    pub fn new() -> Self {
        Self {
            ready_queue: Mutex::new(ThreadQueue::new()),
            boot_thread: Arc::new(KThread::boot()),
            next_id: AtomicU64::new(1),
            awaiting_halt: AtomicBool::new(false),
        }
    }

    /// The thread that booted the kernel
    pub fn boot_thread(&self) -> &Arc<KThread> {
        &self.boot_thread
    }

    /// Number of threads waiting to run
    pub fn ready_count(&self) -> usize {
        self.ready_queue.lock().len()
    }

    pub(crate) fn set_awaiting_halt(&self, awaiting: bool) {
        self.awaiting_halt.store(awaiting, Ordering::SeqCst);
    }

    /// Create a thread running `body` and make it ready
    pub fn fork(
        &self,
        kernel: &Arc<Kernel>,
        name: &str,
        process: Option<Pid>,
        body: ThreadBody,
    ) -> KernelResult<Arc<KThread>> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let thread = Arc::new(KThread::new(id, name, process));
        debug!("Forking {thread}");

        {
            let kernel = kernel.clone();
            let thread = thread.clone();
            Tcb::start(name, move || thread_main(kernel, thread, body))?;
        }

        let interrupt = kernel.interrupt();
        let status = interrupt.disable();
        self.ready(kernel, &thread);
        interrupt.restore(kernel, status);
        Ok(thread)
    }

    /// Put `thread` on the ready queue
    ///
    /// Interrupts must be disabled
    pub fn ready(&self, kernel: &Kernel, thread: &Arc<KThread>) {
        assert!(
            !kernel.interrupt().enabled(),
            "Readying a thread with interrupts enabled"
        );
        let status = thread.status();
        assert!(
            status != ThreadStatus::Ready && status != ThreadStatus::Finished,
            "Cannot ready {thread} from {status:?}"
        );

        trace!("Ready {thread}");
        thread.set_status(ThreadStatus::Ready);
        self.ready_queue.lock().park(thread.clone());
    }

    /// Give up the processor to the next ready thread, if any
    ///
    /// Deferred until the handlers return when called from an interrupt handler
    pub fn yield_now(&self, kernel: &Kernel, current: &Arc<KThread>) {
        if kernel.machine().is_halted() {
            return;
        }

        let interrupt = kernel.interrupt();
        if interrupt.in_handler() {
            interrupt.yield_on_return();
            return;
        }

        let status = interrupt.disable();
        self.ready(kernel, current);
        self.run_next_thread(kernel, current);
        interrupt.restore(kernel, status);
    }

    /// Block the current thread until somebody readies it
    ///
    /// Interrupts must be disabled, and the caller must already have parked the thread somewhere
    /// it will be found
    pub fn sleep(&self, kernel: &Kernel, current: &Arc<KThread>) {
        assert!(
            !kernel.interrupt().enabled(),
            "Sleeping with interrupts enabled"
        );
        current.set_status(ThreadStatus::Blocked);
        self.run_next_thread(kernel, current);
    }

    /// Block `current` until `target` finishes
    pub fn join(&self, kernel: &Kernel, current: &Arc<KThread>, target: &Arc<KThread>) {
        assert!(!Arc::ptr_eq(current, target), "A thread cannot join itself");

        let interrupt = kernel.interrupt();
        let status = interrupt.disable();
        if target.status() != ThreadStatus::Finished {
            target.join_queue().lock().park(current.clone());
            self.sleep(kernel, current);
        }
        interrupt.restore(kernel, status);
    }

    // Pick the next thread, idling the clock forward while only sleepers could become ready
    fn next_thread(&self, kernel: &Kernel) -> Option<Arc<KThread>> {
        loop {
            let next = self.ready_queue.lock().next();
            if next.is_some() {
                return next;
            }

            if kernel.alarm().sleepers() == 0 || !kernel.interrupt().idle(kernel) {
                return None;
            }
        }
    }

    fn run_next_thread(&self, kernel: &Kernel, current: &Arc<KThread>) {
        match self.next_thread(kernel) {
            Some(next) if Arc::ptr_eq(&next, current) => current.set_status(ThreadStatus::Running),
            Some(next) => {
                trace!("Switching from {current} to {next}");
                kernel.save_state(current);
                next.tcb().give_baton();
                current.tcb().wait_for_baton();
                self.resume(kernel, current);
            }
            None => self.deadlock(kernel, current),
        }
    }

    fn deadlock(&self, kernel: &Kernel, current: &Arc<KThread>) {
        error!("Deadlock: no thread can ever run again");
        kernel.machine().halt(HaltReason::Deadlock);

        if !current.is_boot() {
            panic::resume_unwind(Box::new(ThreadDeath::Halt));
        }
        if !self.awaiting_halt.load(Ordering::SeqCst) {
            panic!("Deadlock: no thread can ever run again");
        }
    }

    // Back on the processor after a context switch
    fn resume(&self, kernel: &Kernel, current: &Arc<KThread>) {
        if let Some(reason) = kernel.machine().halt_reason() {
            // Only the boot thread is ever given the baton after a halt
            if self.awaiting_halt.load(Ordering::SeqCst) {
                return;
            }
            panic!("Machine stopped unexpectedly ({reason})");
        }

        current.set_status(ThreadStatus::Running);
        kernel.restore_state(current);
    }

    // First time on the processor
    fn begin(&self, kernel: &Kernel, current: &Arc<KThread>) {
        current.set_status(ThreadStatus::Running);
        kernel.restore_state(current);
        kernel.interrupt().enable(kernel);
    }

    fn retire(&self, kernel: &Kernel, current: &Arc<KThread>) {
        kernel.interrupt().disable();
        debug!("Finishing {current}");
        current.set_status(ThreadStatus::Finished);

        loop {
            let joiner = current.join_queue().lock().next();
            match joiner {
                Some(joiner) => self.ready(kernel, &joiner),
                None => break,
            }
        }

        match self.next_thread(kernel) {
            Some(next) => next.tcb().give_baton(),
            None => {
                error!("Deadlock: no thread can ever run again");
                kernel.machine().halt(HaltReason::Deadlock);
                self.boot_thread.tcb().give_baton();
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        String::from("unknown panic")
    }
}

// Entry point of the host thread behind every forked kernel thread
fn thread_main(kernel: Arc<Kernel>, thread: Arc<KThread>, body: ThreadBody) {
    install_context(ThreadContext {
        kernel: kernel.clone(),
        thread: thread.clone(),
    });
    thread.tcb().wait_for_baton();

    let scheduler = kernel.scheduler();
    scheduler.begin(&kernel, &thread);

    let outcome = panic::catch_unwind(AssertUnwindSafe(body));
    let death = match outcome {
        Ok(()) => ThreadDeath::Finish,
        Err(payload) => match payload.downcast::<ThreadDeath>() {
            Ok(death) => *death,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!("{thread} panicked: {message}");
                kernel.machine().halt(HaltReason::Panic(message));
                ThreadDeath::Halt
            }
        },
    };

    match death {
        ThreadDeath::Finish => scheduler.retire(&kernel, &thread),
        ThreadDeath::Halt => scheduler.boot_thread().tcb().give_baton(),
    }
}
