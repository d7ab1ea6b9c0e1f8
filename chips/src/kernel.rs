//! The kernel: everything a running system owns
//!
//! A [Kernel] is booted on the calling host thread, which becomes the kernel's boot thread. There
//! are no globals; every kernel thread reaches its kernel through [threads::context].
use crate::{
    config::KernelConfig,
    machine::{interrupt::Interrupt, processor::Processor, timer::Timer, HaltReason, Machine},
    threads::{self, scheduler::ThreadDeath, Alarm, KThread, Scheduler, ThreadContext},
    userprog::{
        files::{Console, FileSystem, MemoryFileSystem},
        frames::FramePool,
        image::{Image, ImageLibrary},
        process::UserProcess,
        table::ProcessTable,
    },
    KernelResult,
};
use alloc::{boxed::Box, string::String, sync::Arc};
use log::{debug, info};
use std::panic;

/// A booted kernel
pub struct Kernel {
    config: KernelConfig,
    machine: Machine,
    scheduler: Scheduler,
    alarm: Alarm,
    frames: FramePool,
    images: ImageLibrary,
    processes: ProcessTable,
    console: Console,
    file_system: Arc<dyn FileSystem>,
}

impl Kernel {
    /// Boot a kernel with an empty in-memory file system
    pub fn boot(config: KernelConfig) -> Arc<Self> {
        Self::boot_with_file_system(config, Arc::new(MemoryFileSystem::new()))
    }

    /// Boot a kernel on top of `file_system`
    ///
    /// The calling host thread becomes the boot thread. Interrupts are enabled and the timer is
    /// running by the time this returns.
    pub fn boot_with_file_system(
        config: KernelConfig,
        file_system: Arc<dyn FileSystem>,
    ) -> Arc<Self> {
        let machine = Machine::new(
            Interrupt::new(config.kernel_tick, config.user_tick),
            Timer::new(config.timer_period),
            Processor::new(config.num_phys_pages),
        );
        let kernel = Arc::new(Self {
            frames: FramePool::new(config.num_phys_pages),
            config,
            machine,
            scheduler: Scheduler::new(),
            alarm: Alarm::new(),
            images: ImageLibrary::new(),
            processes: ProcessTable::new(),
            console: Console::new(),
            file_system,
        });

        threads::install_context(ThreadContext {
            kernel: kernel.clone(),
            thread: kernel.scheduler.boot_thread().clone(),
        });

        let timer = kernel.machine.timer();
        timer.set_interrupt_handler(Arc::new(|kernel: &Kernel| {
            kernel.alarm().timer_interrupt(kernel)
        }));
        timer.start(kernel.interrupt());
        kernel.interrupt().enable(&kernel);

        info!(
            "Booted with {} frames, timer every {} ticks",
            kernel.config.num_phys_pages, kernel.config.timer_period
        );
        kernel
    }

    /// Configuration the kernel was booted with
    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// The simulated machine
    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    /// Interrupt controller
    pub fn interrupt(&self) -> &Interrupt {
        self.machine.interrupt()
    }

    /// Processor
    pub fn processor(&self) -> &Processor {
        self.machine.processor()
    }

    /// Simulated clock, in ticks
    pub fn time(&self) -> u64 {
        self.interrupt().time()
    }

    /// Thread scheduler
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Timer-driven sleeping
    pub fn alarm(&self) -> &Alarm {
        &self.alarm
    }

    /// Free physical frames
    pub fn frames(&self) -> &FramePool {
        &self.frames
    }

    /// Installed executables
    pub fn images(&self) -> &ImageLibrary {
        &self.images
    }

    /// Live processes
    pub fn processes(&self) -> &ProcessTable {
        &self.processes
    }

    /// Console shared by every process
    pub fn console(&self) -> &Console {
        &self.console
    }

    /// File system behind `creat`, `open` and `unlink`
    pub fn file_system(&self) -> &dyn FileSystem {
        self.file_system.as_ref()
    }

    /// Install an executable
    pub fn install(&self, name: &str, image: Image) {
        debug!("Installing {name}");
        self.images.install(name, image);
    }

    /// Create an empty process
    pub fn new_process(&self) -> Arc<UserProcess> {
        self.processes
            .create(&self.config, &self.console, self.processor().num_phys_pages())
    }

    /// Run `name` as the root of a process tree and wait for the machine to halt
    pub fn run(self: &Arc<Self>, name: &str, args: &[String]) -> KernelResult<HaltReason> {
        let process = self.new_process();
        process.execute(self, name, args)?;
        Ok(self.wait_for_halt())
    }

    /// Block the boot thread until the machine halts
    pub fn wait_for_halt(&self) -> HaltReason {
        assert!(
            threads::current_thread().is_boot(),
            "Only the boot thread waits for a halt"
        );
        self.scheduler.set_awaiting_halt(true);
        let interrupt = self.interrupt();
        let status = interrupt.disable();
        let reason = loop {
            if let Some(reason) = self.machine.halt_reason() {
                break reason;
            }
            threads::sleep();
        };
        interrupt.restore(self, status);
        self.scheduler.set_awaiting_halt(false);

        info!("Machine stopped: {reason}");
        reason
    }

    /// Stop the machine and leave the calling kernel thread
    ///
    /// # Panics
    /// On the boot thread, which has nowhere to go
    pub fn halt(&self, reason: HaltReason) -> ! {
        info!("Halting: {reason}");
        self.machine.halt(reason);
        if threads::current_thread().is_boot() {
            panic!("The boot thread halted the machine");
        }
        panic::resume_unwind(Box::new(ThreadDeath::Halt))
    }

    /// Deliver a user exception to the current process
    ///
    /// # Panics
    /// If the current thread doesn't belong to a process
    pub fn exception_handler(self: &Arc<Self>, cause: i32) {
        let thread = threads::current_thread();
        let Some(process) = thread.process().and_then(|pid| self.processes.get(pid)) else {
            panic!("Exception {cause} on {thread}, which has no process");
        };
        process.handle_exception(self, cause);
    }

    /// Save user state of `thread` before it leaves the processor
    pub fn save_state(&self, thread: &Arc<KThread>) {
        if let Some(process) = thread.process().and_then(|pid| self.processes.get(pid)) {
            process.save_state(self);
        }
    }

    /// Restore user state of `thread` as it comes back on the processor
    pub fn restore_state(&self, thread: &Arc<KThread>) {
        if let Some(process) = thread.process().and_then(|pid| self.processes.get(pid)) {
            process.restore_state(self);
        }
    }
}
