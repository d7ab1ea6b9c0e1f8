//! Periodic hardware timer
use crate::{
    machine::interrupt::{Interrupt, InterruptHandler, InterruptId},
    Kernel,
};
use alloc::sync::Arc;
use spin::RwLock;

/// Fires [InterruptId::Timer] every `period` ticks
pub struct Timer {
    period: u64,
    handler: RwLock<Option<InterruptHandler>>,
}

impl Timer {
    /// Construct a stopped timer
    pub fn new(period: u64) -> Self {
        assert!(period > 0, "Timer period must be nonzero");
        Self {
            period,
            handler: RwLock::new(None),
        }
    }

    /// Ticks between interrupts
    pub fn period(&self) -> u64 {
        self.period
    }

    /// Set the callback run on every timer interrupt
    pub fn set_interrupt_handler(&self, handler: InterruptHandler) {
        *self.handler.write() = Some(handler);
    }

    /// Hook the timer into the interrupt controller and schedule the first interrupt
    pub fn start(&self, interrupt: &Interrupt) {
        interrupt.register_handler(
            InterruptId::Timer,
            Arc::new(|kernel: &Kernel| kernel.machine().timer().fire(kernel)),
        );
        interrupt.schedule(self.period, InterruptId::Timer);
    }

    fn fire(&self, kernel: &Kernel) {
        kernel.interrupt().schedule(self.period, InterruptId::Timer);
        let handler = self.handler.read().clone();
        if let Some(handler) = handler {
            handler(kernel);
        }
    }
}
