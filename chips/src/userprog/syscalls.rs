//! System call handlers
//!
//! Failures caused by the user program come back as [KernelError]s and are turned into the
//! syscall's error value (-1) at the dispatcher. Nothing a user program passes in can bring down
//! the kernel.
use crate::{
    machine::{processor::PAGE_SIZE, HaltReason},
    threads,
    userprog::process::{ProcessState, UserProcess},
    Kernel, KernelError, KernelResult,
};
use alloc::{string::String, sync::Arc, vec, vec::Vec};
use chips_abi::{FileDescriptor, Pid, Syscall};
use log::{debug, info, trace, warn};

impl UserProcess {
    /// Dispatch system call `call` and return the value for `v0`
    ///
    /// # Panics
    /// On an unknown system call number
    pub fn handle_syscall(&self, kernel: &Arc<Kernel>, call: i32, args: [i32; 4]) -> i32 {
        let Some(syscall) = Syscall::n(call) else {
            panic!("Unknown system call {call}");
        };
        trace!("Process {}: {syscall:?}{args:?}", self.pid());

        let [a0, a1, a2, _] = args;
        let result = match syscall {
            Syscall::Halt => Ok(self.syscall_halt(kernel)),
            Syscall::Exit => self.syscall_exit(kernel, a0),
            Syscall::Exec => self.syscall_exec(kernel, a0, a1, a2),
            Syscall::Join => self.syscall_join(kernel, a0, a1),
            Syscall::Create => self.syscall_open(kernel, a0, true),
            Syscall::Open => self.syscall_open(kernel, a0, false),
            Syscall::Read => self.syscall_read(kernel, a0, a1, a2),
            Syscall::Write => self.syscall_write(kernel, a0, a1, a2),
            Syscall::Close => self.syscall_close(a0),
            Syscall::Unlink => self.syscall_unlink(kernel, a0),
        };

        result.unwrap_or_else(|error| {
            debug!("Process {}: {syscall:?} failed: {error}", self.pid());
            -1
        })
    }

    fn syscall_halt(&self, kernel: &Kernel) -> i32 {
        if !self.pid().is_root() {
            warn!("Process {} may not halt the machine", self.pid());
            return 0;
        }
        info!("Machine halted by process {}", self.pid());
        kernel.halt(HaltReason::Halt)
    }

    fn syscall_exit(&self, kernel: &Kernel, status: i32) -> KernelResult<i32> {
        info!("Process {} exiting with status {status}", self.pid());
        if let Some(parent) = self.parent().and_then(|pid| kernel.processes().get(pid)) {
            parent.record_exit_status(self.pid(), status);
        }

        self.unload(kernel);
        self.orphan_children(kernel);
        self.set_state(ProcessState::Exited);
        // The parent may have exited while we were recording our status
        if self.parent().is_none() {
            kernel.processes().remove(self.pid());
        }

        if self.pid().is_root() {
            kernel.halt(HaltReason::Exit(status));
        }
        threads::finish()
    }

    fn syscall_exec(
        &self,
        kernel: &Arc<Kernel>,
        name_addr: i32,
        argc: i32,
        argv_addr: i32,
    ) -> KernelResult<i32> {
        if name_addr < 0 || argc < 0 || argv_addr < 0 {
            return Err(KernelError::InvalidArguments);
        }

        let max_length = kernel.config().max_string_length;
        let name = self
            .read_virtual_memory_string(kernel, name_addr, max_length)
            .ok_or(KernelError::InvalidArguments)?;
        if !name.ends_with(kernel.config().executable_suffix.as_str()) {
            return Err(KernelError::NoSuchExecutable(name));
        }

        let mut args = Vec::new();
        for index in 0..argc {
            let pointer_addr = index
                .checked_mul(4)
                .and_then(|offset| argv_addr.checked_add(offset))
                .ok_or(KernelError::InvalidArguments)?;
            let mut pointer = [0; 4];
            if self.read_virtual_memory(kernel, pointer_addr, &mut pointer) != pointer.len() {
                return Err(KernelError::InvalidArguments);
            }
            let arg = self
                .read_virtual_memory_string(kernel, i32::from_le_bytes(pointer), max_length)
                .ok_or(KernelError::InvalidArguments)?;
            args.push(arg);
        }

        let child = kernel.new_process();
        child.set_parent(Some(self.pid()));
        self.children.lock().push(child.pid());
        if let Err(error) = child.execute(kernel, &name, &args) {
            self.children.lock().retain(|&pid| pid != child.pid());
            return Err(error);
        }

        debug!("Process {} exec'd {name} as {}", self.pid(), child.pid());
        Ok(i32::try_from(child.pid())?)
    }

    fn syscall_join(&self, kernel: &Kernel, pid: i32, status_addr: i32) -> KernelResult<i32> {
        if status_addr < 0 {
            return Err(KernelError::InvalidArguments);
        }
        let pid = Pid::try_from(pid)?;
        if !self.children.lock().contains(&pid) {
            return Err(KernelError::NoSuchProcess(pid));
        }
        let child = kernel
            .processes()
            .get(pid)
            .ok_or(KernelError::NoSuchProcess(pid))?;

        if let Some(thread) = child.thread() {
            thread.join();
        }

        self.children.lock().retain(|&other| other != pid);
        child.set_parent(None);
        kernel.processes().remove(pid);

        let Some(status) = self.take_exit_status(pid) else {
            debug!("Process {pid} never exited normally");
            return Ok(0);
        };
        let bytes = status.to_le_bytes();
        if self.write_virtual_memory(kernel, status_addr, &bytes) == bytes.len() {
            Ok(1)
        } else {
            debug!("Could not write the exit status of {pid}");
            Ok(0)
        }
    }

    fn read_name(&self, kernel: &Kernel, name_addr: i32) -> KernelResult<String> {
        if name_addr < 0 {
            return Err(KernelError::InvalidArguments);
        }
        self.read_virtual_memory_string(kernel, name_addr, kernel.config().max_string_length)
            .ok_or(KernelError::InvalidArguments)
    }

    fn syscall_open(&self, kernel: &Kernel, name_addr: i32, create: bool) -> KernelResult<i32> {
        let name = self.read_name(kernel, name_addr)?;
        let file = kernel
            .file_system()
            .open(&name, create)
            .ok_or_else(|| KernelError::Io(name.clone()))?;

        let fd = self
            .files
            .lock()
            .insert(file)
            .map_err(|mut file| {
                file.close();
                KernelError::Io(name)
            })?;
        Ok(fd.into())
    }

    // Scratch buffers never exceed the process's address space
    fn transfer_size(&self, size: i32) -> KernelResult<usize> {
        let size = usize::try_from(size).map_err(|_| KernelError::InvalidArguments)?;
        Ok(size.min(self.num_pages() * PAGE_SIZE))
    }

    fn syscall_read(&self, kernel: &Kernel, fd: i32, buffer: i32, size: i32) -> KernelResult<i32> {
        let fd = FileDescriptor::try_from(fd)?;
        let mut scratch = vec![0; self.transfer_size(size)?];

        let length = {
            let mut files = self.files.lock();
            let file = files.get_mut(fd).ok_or(KernelError::InvalidArguments)?;
            file.read(&mut scratch)?
        };
        let written = self.write_virtual_memory(kernel, buffer, &scratch[..length]);
        Ok(written as i32)
    }

    fn syscall_write(&self, kernel: &Kernel, fd: i32, buffer: i32, size: i32) -> KernelResult<i32> {
        let fd = FileDescriptor::try_from(fd)?;
        let mut scratch = vec![0; self.transfer_size(size)?];
        let length = self.read_virtual_memory(kernel, buffer, &mut scratch);

        let mut files = self.files.lock();
        let file = files.get_mut(fd).ok_or(KernelError::InvalidArguments)?;
        let written = file.write(&scratch[..length])?;
        Ok(written as i32)
    }

    fn syscall_close(&self, fd: i32) -> KernelResult<i32> {
        let fd = FileDescriptor::try_from(fd)?;
        if self.files.lock().close(fd) {
            Ok(0)
        } else {
            Err(KernelError::InvalidArguments)
        }
    }

    fn syscall_unlink(&self, kernel: &Kernel, name_addr: i32) -> KernelResult<i32> {
        let name = self.read_name(kernel, name_addr)?;
        if kernel.file_system().remove(&name) {
            Ok(0)
        } else {
            Err(KernelError::Io(name))
        }
    }
}
