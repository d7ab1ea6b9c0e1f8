//! Kernel thread handles
use crate::{
    machine::tcb::Tcb,
    threads::{self, queue::ThreadQueue},
};
use alloc::{string::String, sync::Arc};
use chips_abi::Pid;
use core::fmt::{self, Debug, Display};
use spin::Mutex;

/// Scheduling state of a kernel thread
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ThreadStatus {
    /// Forked but never run
    New,
    /// Waiting in the ready queue
    Ready,
    /// Currently executing
    Running,
    /// Parked on some wait queue
    Blocked,
    /// Done; will never run again
    Finished,
}

/// A kernel thread
pub struct KThread {
    id: u64,
    name: String,
    status: Mutex<ThreadStatus>,
    tcb: Tcb,
    join_queue: Mutex<ThreadQueue>,
    process: Option<Pid>,
    boot: bool,
}

impl KThread {
    pub(crate) fn new(id: u64, name: &str, process: Option<Pid>) -> Self {
        Self {
            id,
            name: name.into(),
            status: Mutex::new(ThreadStatus::New),
            tcb: Tcb::new(),
            join_queue: Mutex::new(ThreadQueue::new()),
            process,
            boot: false,
        }
    }

    /// The thread that booted the kernel. It is already running
    pub(crate) fn boot() -> Self {
        Self {
            status: Mutex::new(ThreadStatus::Running),
            boot: true,
            ..Self::new(0, "main", None)
        }
    }

    /// Unique ID
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Name given at fork
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Scheduling state
    pub fn status(&self) -> ThreadStatus {
        *self.status.lock()
    }

    pub(crate) fn set_status(&self, status: ThreadStatus) {
        *self.status.lock() = status;
    }

    /// PID of the user process this thread runs, if any
    pub fn process(&self) -> Option<Pid> {
        self.process
    }

    /// Return true for the thread that booted the kernel
    pub fn is_boot(&self) -> bool {
        self.boot
    }

    pub(crate) fn tcb(&self) -> &Tcb {
        &self.tcb
    }

    pub(crate) fn join_queue(&self) -> &Mutex<ThreadQueue> {
        &self.join_queue
    }

    /// Block the current thread until this thread has finished
    ///
    /// Returns immediately if it already has
    pub fn join(self: &Arc<Self>) {
        let context = threads::context();
        context
            .kernel
            .scheduler()
            .join(&context.kernel, &context.thread, self);
    }
}

impl Display for KThread {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} (#{})", self.name, self.id)
    }
}

impl Debug for KThread {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("KThread")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("status", &self.status())
            .field("process", &self.process)
            .finish()
    }
}
