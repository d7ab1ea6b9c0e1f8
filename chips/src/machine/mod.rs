//! The simulated machine the kernel runs on
pub mod frame;
pub mod interrupt;
pub mod processor;
pub mod tcb;
pub mod timer;

use derive_more::Display;
use interrupt::Interrupt;
use processor::Processor;
use spin::Mutex;
use timer::Timer;

/// Why the machine stopped
#[derive(Clone, Debug, Display, PartialEq, Eq)]
pub enum HaltReason {
    /// Root process called `halt`
    #[display("halted")]
    Halt,
    /// Root process exited
    #[display("root process exited with status {_0}")]
    Exit(i32),
    /// Root process finished without calling `exit`
    #[display("root process crashed")]
    Crash,
    /// Nothing could ever run again
    #[display("deadlock")]
    Deadlock,
    /// A kernel thread panicked
    #[display("kernel panic: {_0}")]
    Panic(String),
}

/// Interrupt controller, timer and processor
pub struct Machine {
    interrupt: Interrupt,
    timer: Timer,
    processor: Processor,
    halted: Mutex<Option<HaltReason>>,
}

impl Machine {
    /// Build a machine from its parts
    pub fn new(interrupt: Interrupt, timer: Timer, processor: Processor) -> Self {
        Self {
            interrupt,
            timer,
            processor,
            halted: Mutex::new(None),
        }
    }

    /// Interrupt controller
    pub fn interrupt(&self) -> &Interrupt {
        &self.interrupt
    }

    /// Hardware timer
    pub fn timer(&self) -> &Timer {
        &self.timer
    }

    /// Processor
    pub fn processor(&self) -> &Processor {
        &self.processor
    }

    /// Stop the machine. Only the first reason sticks
    pub fn halt(&self, reason: HaltReason) {
        let mut halted = self.halted.lock();
        if halted.is_none() {
            *halted = Some(reason);
        }
    }

    /// Return true once the machine has stopped
    pub fn is_halted(&self) -> bool {
        self.halted.lock().is_some()
    }

    /// Why the machine stopped, if it has
    pub fn halt_reason(&self) -> Option<HaltReason> {
        self.halted.lock().clone()
    }
}
