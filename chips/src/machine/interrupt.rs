//! Simulated interrupt controller
//!
//! Owns the simulated clock. Time advances whenever interrupts are re-enabled and whenever user
//! code makes a system call; pending interrupts whose time has come fire at those points.
use crate::Kernel;
use alloc::{collections::BTreeMap, sync::Arc};
use core::{
    cmp::Reverse,
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
};
use log::trace;
use spin::{Mutex, RwLock};
use std::collections::BinaryHeap;

/// Source of a simulated interrupt
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum InterruptId {
    /// Periodic hardware timer
    Timer,
}

/// Callback run when an interrupt fires
pub type InterruptHandler = Arc<dyn Fn(&Kernel) + Send + Sync>;

// Field order gives (time, sequence) ordering
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct PendingInterrupt {
    time: u64,
    sequence: u64,
    id: InterruptId,
}

/// Interrupt controller and clock
pub struct Interrupt {
    enabled: AtomicBool,
    in_handler: AtomicBool,
    yield_on_return: AtomicBool,
    clock: AtomicU64,
    next_sequence: AtomicU64,
    kernel_tick: u64,
    user_tick: u64,
    pending: Mutex<BinaryHeap<Reverse<PendingInterrupt>>>,
    handlers: RwLock<BTreeMap<InterruptId, InterruptHandler>>,
}

impl Interrupt {
    /// Construct a controller with interrupts disabled and the clock at 0
    pub fn new(kernel_tick: u64, user_tick: u64) -> Self {
        Self {
            enabled: AtomicBool::new(false),
            in_handler: AtomicBool::new(false),
            yield_on_return: AtomicBool::new(false),
            clock: AtomicU64::new(0),
            next_sequence: AtomicU64::new(0),
            kernel_tick,
            user_tick,
            pending: Mutex::new(BinaryHeap::new()),
            handlers: RwLock::new(BTreeMap::new()),
        }
    }

    /// Register interrupt handler
    pub fn register_handler(&self, id: InterruptId, handler: InterruptHandler) {
        let mut handlers = self.handlers.write();

        if handlers.contains_key(&id) {
            panic!("Interrupt handler already registered!");
        }

        handlers.insert(id, handler);
    }

    /// Current simulated time, in ticks
    pub fn time(&self) -> u64 {
        self.clock.load(Ordering::SeqCst)
    }

    /// Return true if interrupts are enabled
    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Return true while interrupt handlers are running
    pub fn in_handler(&self) -> bool {
        self.in_handler.load(Ordering::SeqCst)
    }

    /// Disable interrupts, returning whether they were enabled before
    pub fn disable(&self) -> bool {
        self.enabled.swap(false, Ordering::SeqCst)
    }

    /// Enable interrupts
    pub fn enable(&self, kernel: &Kernel) {
        self.restore(kernel, true);
    }

    /// Restore the interrupt state returned by [Interrupt::disable]
    ///
    /// Re-enabling interrupts advances the clock, which may fire pending interrupts and switch
    /// threads
    pub fn restore(&self, kernel: &Kernel, status: bool) {
        let old_status = self.enabled.swap(status, Ordering::SeqCst);
        if status && !old_status {
            self.tick(kernel, false);
        }
    }

    /// Ask for the current thread to yield once the running handlers return
    pub fn yield_on_return(&self) {
        assert!(self.in_handler(), "Can only defer a yield from a handler");
        self.yield_on_return.store(true, Ordering::SeqCst);
    }

    /// Schedule `id` to fire `delay` ticks from now
    pub fn schedule(&self, delay: u64, id: InterruptId) {
        assert!(delay > 0, "Interrupt must be scheduled in the future");
        let interrupt = PendingInterrupt {
            time: self.time() + delay,
            sequence: self.next_sequence.fetch_add(1, Ordering::SeqCst),
            id,
        };
        trace!("Scheduling {id:?} for tick {}", interrupt.time);
        self.pending.lock().push(Reverse(interrupt));
    }

    /// Advance the clock by one kernel tick (or one user tick) and fire whatever came due
    pub fn tick(&self, kernel: &Kernel, user_mode: bool) {
        if kernel.machine().is_halted() {
            return;
        }

        let ticks = if user_mode {
            self.user_tick
        } else {
            self.kernel_tick
        };
        self.clock.fetch_add(ticks, Ordering::SeqCst);
        self.check_if_due(kernel);
    }

    fn next_due(&self, now: u64) -> Option<InterruptId> {
        let mut pending = self.pending.lock();
        match pending.peek() {
            Some(Reverse(interrupt)) if interrupt.time <= now => {
                pending.pop().map(|Reverse(interrupt)| interrupt.id)
            }
            _ => None,
        }
    }

    fn check_if_due(&self, kernel: &Kernel) {
        let now = self.time();
        let Some(id) = self.next_due(now) else {
            return;
        };

        let status = self.disable();
        self.in_handler.store(true, Ordering::SeqCst);
        self.run_handler(kernel, id);
        while let Some(id) = self.next_due(now) {
            self.run_handler(kernel, id);
        }
        self.in_handler.store(false, Ordering::SeqCst);
        self.enabled.store(status, Ordering::SeqCst);

        if self.yield_on_return.swap(false, Ordering::SeqCst) {
            crate::threads::yield_now();
        }
    }

    // Run interrupt handler
    fn run_handler(&self, kernel: &Kernel, id: InterruptId) {
        trace!("Firing {id:?}");
        let handler = self.handlers.read().get(&id).cloned();
        match handler {
            Some(handler) => handler(kernel),
            None => panic!("No handler registered for {id:?}"),
        }
    }

    /// Fast-forward the clock to the next pending interrupt and fire it
    ///
    /// Called with interrupts disabled when no thread is ready to run. Returns false if nothing is
    /// pending.
    pub fn idle(&self, kernel: &Kernel) -> bool {
        assert!(!self.enabled(), "Idling with interrupts enabled");

        let next = self.pending.lock().peek().map(|Reverse(interrupt)| interrupt.time);
        let Some(next) = next else {
            return false;
        };
        self.clock.fetch_max(next, Ordering::SeqCst);

        self.in_handler.store(true, Ordering::SeqCst);
        while let Some(id) = self.next_due(self.time()) {
            self.run_handler(kernel, id);
        }
        self.in_handler.store(false, Ordering::SeqCst);
        // Nothing to yield from when idle
        self.yield_on_return.store(false, Ordering::SeqCst);
        true
    }
}
