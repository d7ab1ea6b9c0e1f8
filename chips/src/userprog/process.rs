//! User processes
use crate::{
    config::KernelConfig,
    machine::{
        frame::{TrapFrame, REG_A0, REG_A1, REG_A2, REG_A3, REG_V0},
        processor::PAGE_SIZE,
        HaltReason,
    },
    threads::{self, KThread, Lock},
    userprog::{
        address_space::{AddressSpace, PagedMemory},
        context::UserContext,
        files::{Console, FileTable},
        image::Image,
    },
    Kernel, KernelError, KernelResult,
};
use alloc::{boxed::Box, collections::BTreeMap, string::String, sync::Arc, vec::Vec};
use chips_abi::{ExceptionCause, Pid};
use core::fmt::{self, Debug};
use log::{debug, error, info, warn};
use spin::Mutex;

/// Lifecycle of a process
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ProcessState {
    /// Has a PID but nothing loaded
    Created,
    /// Image loaded, thread not yet forked
    Loaded,
    /// Thread forked
    Running,
    /// Finished; resources released
    Exited,
}

/// Where a freshly loaded program starts
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ProgramStart {
    /// Initial program counter
    pub pc: u32,
    /// Initial stack pointer (top of the stack)
    pub sp: u32,
    /// Number of arguments
    pub argc: i32,
    /// Address of the argument pointer array
    pub argv: u32,
}

/// A user process
pub struct UserProcess {
    pid: Pid,
    state: Mutex<ProcessState>,
    pub(super) memory: Mutex<Box<dyn AddressSpace>>,
    pub(super) files: Mutex<FileTable>,
    parent: Mutex<Option<Pid>>,
    pub(super) children: Mutex<Vec<Pid>>,
    status_lock: Lock,
    exit_statuses: Mutex<BTreeMap<Pid, i32>>,
    image: Mutex<Option<Arc<Image>>>,
    thread: Mutex<Option<Arc<KThread>>>,
    start: Mutex<ProgramStart>,
    registers: Mutex<TrapFrame>,
}

impl UserProcess {
    /// Construct an empty process
    ///
    /// Processes should be created through the process table, which hands out PIDs
    pub fn new(pid: Pid, config: &KernelConfig, console: &Console, num_phys_pages: usize) -> Self {
        Self {
            pid,
            state: Mutex::new(ProcessState::Created),
            memory: Mutex::new(Box::new(PagedMemory::new(num_phys_pages))),
            files: Mutex::new(FileTable::new(config.max_open_files, console)),
            parent: Mutex::new(None),
            children: Mutex::new(Vec::new()),
            status_lock: Lock::new(),
            exit_statuses: Mutex::new(BTreeMap::new()),
            image: Mutex::new(None),
            thread: Mutex::new(None),
            start: Mutex::new(ProgramStart::default()),
            registers: Mutex::new(TrapFrame::default()),
        }
    }

    /// Process ID
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Lifecycle state
    pub fn state(&self) -> ProcessState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: ProcessState) {
        *self.state.lock() = state;
    }

    /// Parent process, unless orphaned
    pub fn parent(&self) -> Option<Pid> {
        *self.parent.lock()
    }

    pub(crate) fn set_parent(&self, parent: Option<Pid>) {
        *self.parent.lock() = parent;
    }

    /// Children not yet joined
    pub fn children(&self) -> Vec<Pid> {
        self.children.lock().clone()
    }

    /// Thread running the program, once forked
    pub fn thread(&self) -> Option<Arc<KThread>> {
        self.thread.lock().clone()
    }

    /// Loaded image
    pub fn image(&self) -> Option<Arc<Image>> {
        self.image.lock().clone()
    }

    /// Entry state computed by the loader
    pub fn start(&self) -> ProgramStart {
        *self.start.lock()
    }

    /// Number of allocated pages
    pub fn num_pages(&self) -> usize {
        self.memory.lock().num_pages()
    }

    /// Number of open file descriptors
    pub fn open_files(&self) -> usize {
        self.files.lock().open_count()
    }

    /// Read user memory. See [AddressSpace::read_virtual_memory]
    pub fn read_virtual_memory(&self, kernel: &Kernel, vaddr: i32, data: &mut [u8]) -> usize {
        self.memory.lock().read(kernel.processor(), vaddr, data)
    }

    /// Write user memory. See [AddressSpace::write_virtual_memory]
    pub fn write_virtual_memory(&self, kernel: &Kernel, vaddr: i32, data: &[u8]) -> usize {
        self.memory.lock().write(kernel.processor(), vaddr, data)
    }

    /// Read a NUL-terminated string from user memory
    pub fn read_virtual_memory_string(
        &self,
        kernel: &Kernel,
        vaddr: i32,
        max_length: usize,
    ) -> Option<String> {
        self.memory
            .lock()
            .read_string(kernel.processor(), vaddr, max_length)
    }

    /// Back `count` pages at `vpn` with fresh frames
    pub fn allocate(&self, kernel: &Kernel, vpn: usize, count: usize, read_only: bool) -> KernelResult {
        self.memory
            .lock()
            .allocate(kernel.processor(), kernel.frames(), vpn, count, read_only)
    }

    /// Give back every frame
    pub fn release_resources(&self, kernel: &Kernel) {
        self.memory.lock().release(kernel.frames());
    }

    /// Load executable `name` with `args` and fork a thread to run it
    ///
    /// On failure everything acquired is released and the process leaves the process table
    pub fn execute(&self, kernel: &Arc<Kernel>, name: &str, args: &[String]) -> KernelResult {
        assert_eq!(
            self.state(),
            ProcessState::Created,
            "Process {} executed twice",
            self.pid
        );

        if let Err(error) = self.load(kernel, name, args) {
            warn!("Process {} could not load {name}: {error}", self.pid);
            self.discard(kernel);
            return Err(error);
        }

        self.set_state(ProcessState::Running);
        let pid = self.pid;
        let forked = kernel.scheduler().fork(
            kernel,
            name,
            Some(pid),
            Box::new(move || run_program(pid)),
        );
        match forked {
            Ok(thread) => {
                *self.thread.lock() = Some(thread);
                Ok(())
            }
            Err(error) => {
                self.discard(kernel);
                Err(error)
            }
        }
    }

    fn discard(&self, kernel: &Kernel) {
        self.unload(kernel);
        self.set_state(ProcessState::Exited);
        kernel.processes().remove(self.pid);
    }

    fn load(&self, kernel: &Kernel, name: &str, args: &[String]) -> KernelResult {
        debug!("Loading {name} into process {}", self.pid);
        let image = kernel
            .images()
            .open(name)
            .ok_or_else(|| KernelError::NoSuchExecutable(name.into()))?;

        // Sections must tile the address space from page 0
        let mut num_pages = 0;
        for section in image.sections() {
            if section.first_vpn() != num_pages {
                return Err(KernelError::FragmentedExecutable);
            }
            num_pages += section.num_pages();
        }

        // Pointer plus NUL-terminated string per argument
        let args_size: usize = args.iter().map(|arg| 4 + arg.len() + 1).sum();
        if args_size > PAGE_SIZE {
            return Err(KernelError::ArgumentsTooLong);
        }

        let processor = kernel.processor();
        let frames = kernel.frames();
        let stack_pages = kernel.config().stack_pages;
        let total_pages = num_pages + stack_pages + 1;
        if total_pages > processor.num_phys_pages() {
            return Err(KernelError::OutOfMemory);
        }

        let mut memory = self.memory.lock();
        for section in image.sections() {
            debug!(
                "Section {} at page {}: {} pages",
                section.name(),
                section.first_vpn(),
                section.num_pages()
            );
            memory.allocate(
                processor,
                frames,
                section.first_vpn(),
                section.num_pages(),
                section.is_read_only(),
            )?;

            for index in 0..section.num_pages() {
                let vpn = section.first_vpn() + index;
                let entry = memory
                    .translate(vpn)
                    .filter(|entry| entry.valid)
                    .ok_or(KernelError::InvalidVirtualPage(vpn))?;
                processor.with_memory(|physical| {
                    section.load_page(index, &mut physical[entry.ppn * PAGE_SIZE..][..PAGE_SIZE])
                });
            }
        }

        // Stack, then one page for the arguments
        memory.allocate(processor, frames, num_pages, stack_pages, false)?;
        memory.allocate(processor, frames, num_pages + stack_pages, 1, false)?;

        let argv = (total_pages - 1) * PAGE_SIZE;
        let mut entry_offset = argv;
        let mut string_offset = argv + args.len() * 4;
        for arg in args {
            let pointer = (string_offset as u32).to_le_bytes();
            assert_eq!(memory.write(processor, entry_offset as i32, &pointer), 4);
            entry_offset += 4;
            assert_eq!(
                memory.write(processor, string_offset as i32, arg.as_bytes()),
                arg.len()
            );
            string_offset += arg.len();
            assert_eq!(memory.write(processor, string_offset as i32, &[0]), 1);
            string_offset += 1;
        }
        drop(memory);

        *self.start.lock() = ProgramStart {
            pc: image.entry_point(),
            sp: ((num_pages + stack_pages) * PAGE_SIZE) as u32,
            argc: args.len() as i32,
            argv: argv as u32,
        };
        *self.image.lock() = Some(image);
        self.set_state(ProcessState::Loaded);
        Ok(())
    }

    /// Release memory and close every file
    pub fn unload(&self, kernel: &Kernel) {
        self.release_resources(kernel);
        self.files.lock().close_all();
    }

    /// Set up the processor's registers for program entry
    pub fn init_registers(&self, kernel: &Kernel) {
        let start = self.start();
        let mut frame = TrapFrame::default();
        frame.set_program_counter(start.pc as i32);
        frame.set_stack_pointer(start.sp as i32);
        frame.set_arguments(start.argc, start.argv as i32);
        kernel.processor().set_registers(&frame);
    }

    /// Save the processor's user state before switching away
    pub fn save_state(&self, kernel: &Kernel) {
        *self.registers.lock() = kernel.processor().registers();
    }

    /// Restore this process's user state after switching back
    pub fn restore_state(&self, kernel: &Kernel) {
        let page_table = self.memory.lock().page_table();
        let processor = kernel.processor();
        processor.set_page_table(Some(page_table));
        processor.set_registers(&self.registers.lock());
    }

    /// Handle a user exception
    ///
    /// # Panics
    /// On anything but a system call
    pub fn handle_exception(&self, kernel: &Arc<Kernel>, cause: i32) {
        let processor = kernel.processor();
        match ExceptionCause::n(cause) {
            Some(ExceptionCause::Syscall) => {
                let call = processor.read_register(REG_V0);
                let args = [REG_A0, REG_A1, REG_A2, REG_A3].map(|reg| processor.read_register(reg));
                let result = self.handle_syscall(kernel, call, args);
                processor.write_register(REG_V0, result);
                processor.advance_pc();
            }
            cause => {
                error!("Process {}: unexpected exception {cause:?}", self.pid);
                panic!("Unexpected exception: {cause:?}");
            }
        }
    }

    /// Record a child's exit status
    pub(crate) fn record_exit_status(&self, child: Pid, status: i32) {
        self.status_lock.acquire();
        self.exit_statuses.lock().insert(child, status);
        self.status_lock.release();
    }

    /// Remove and return a child's exit status
    pub(crate) fn take_exit_status(&self, child: Pid) -> Option<i32> {
        self.status_lock.acquire();
        let status = self.exit_statuses.lock().remove(&child);
        self.status_lock.release();
        status
    }

    /// Detach every child. Children that already finished leave the process table
    pub(crate) fn orphan_children(&self, kernel: &Kernel) {
        let children = core::mem::take(&mut *self.children.lock());
        for pid in children {
            if let Some(child) = kernel.processes().get(pid) {
                child.set_parent(None);
                if child.state() == ProcessState::Exited {
                    kernel.processes().remove(pid);
                }
            }
        }
    }

    // Program returned without calling exit
    fn abandon(&self, kernel: &Kernel) {
        warn!("Process {} finished without calling exit", self.pid);
        self.unload(kernel);
        self.orphan_children(kernel);
        self.set_state(ProcessState::Exited);
        if self.parent().is_none() {
            kernel.processes().remove(self.pid);
        }

        if self.pid.is_root() {
            kernel.halt(HaltReason::Crash);
        }
    }
}

impl Debug for UserProcess {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("UserProcess")
            .field("pid", &self.pid)
            .field("state", &self.state())
            .field("parent", &self.parent())
            .field("children", &self.children())
            .finish_non_exhaustive()
    }
}

// Body of every user thread
fn run_program(pid: Pid) {
    let kernel = threads::current_kernel();
    let Some(process) = kernel.processes().get(pid) else {
        error!("Process {pid} vanished before it could run");
        return;
    };
    let Some(image) = process.image() else {
        error!("Process {pid} has no image");
        return;
    };

    info!("Process {pid} starting");
    process.init_registers(&kernel);
    let mut context = UserContext::new(&kernel, &process);
    (image.program())(&mut context);
    process.abandon(&kernel);
}
