//! A user program's view of the machine
use crate::{
    machine::frame::{REG_A0, REG_A1, REG_A2, REG_A3, REG_V0},
    userprog::process::UserProcess,
    Kernel,
};
use alloc::{string::String, sync::Arc, vec, vec::Vec};
use chips_abi::{ExceptionCause, Pid, Syscall};

/// Handed to a running user program
///
/// Every memory access goes through the processor's page table, like a load or store
/// instruction would. A fault is delivered to the kernel as an exception.
pub struct UserContext<'a> {
    kernel: &'a Arc<Kernel>,
    process: &'a Arc<UserProcess>,
}

impl<'a> UserContext<'a> {
    pub(crate) fn new(kernel: &'a Arc<Kernel>, process: &'a Arc<UserProcess>) -> Self {
        Self { kernel, process }
    }

    /// PID of the running process
    pub fn pid(&self) -> Pid {
        self.process.pid()
    }

    /// Trap into the kernel
    pub fn syscall(&mut self, call: Syscall, args: [i32; 4]) -> i32 {
        self.syscall_raw(call as i32, args)
    }

    /// Trap into the kernel with any call number, known or not
    pub fn syscall_raw(&mut self, call: i32, args: [i32; 4]) -> i32 {
        let processor = self.kernel.processor();
        processor.write_register(REG_V0, call);
        for (register, arg) in [REG_A0, REG_A1, REG_A2, REG_A3].into_iter().zip(args) {
            processor.write_register(register, arg);
        }

        self.kernel.interrupt().tick(self.kernel, true);
        self.kernel.exception_handler(ExceptionCause::Syscall as i32);
        self.kernel.processor().read_register(REG_V0)
    }

    /// Current value of a register
    pub fn register(&self, register: usize) -> i32 {
        self.kernel.processor().read_register(register)
    }

    /// Stack pointer the program started with
    pub fn stack_pointer(&self) -> u32 {
        self.process.start().sp
    }

    /// Program arguments, read back out of user memory through `argc` and `argv`
    pub fn args(&mut self) -> Vec<String> {
        let start = self.process.start();
        (0..start.argc as u32)
            .map(|index| {
                let pointer = self.read_word(start.argv + index * 4);
                self.read_string(pointer as u32)
            })
            .collect()
    }

    /// Load `buffer.len()` bytes from `vaddr`
    pub fn read_bytes(&mut self, vaddr: u32, buffer: &mut [u8]) {
        if let Err(cause) = self.kernel.processor().read_memory(vaddr, buffer) {
            self.fault(cause, vaddr);
        }
    }

    /// Store `data` at `vaddr`
    pub fn write_bytes(&mut self, vaddr: u32, data: &[u8]) {
        if let Err(cause) = self.kernel.processor().write_memory(vaddr, data) {
            self.fault(cause, vaddr);
        }
    }

    /// Load a little-endian word
    pub fn read_word(&mut self, vaddr: u32) -> i32 {
        let mut bytes = [0; 4];
        self.read_bytes(vaddr, &mut bytes);
        i32::from_le_bytes(bytes)
    }

    /// Store a little-endian word
    pub fn write_word(&mut self, vaddr: u32, value: i32) {
        self.write_bytes(vaddr, &value.to_le_bytes());
    }

    /// Load a NUL-terminated string. Invalid UTF-8 is replaced
    pub fn read_string(&mut self, vaddr: u32) -> String {
        let mut bytes = Vec::new();
        let mut byte = [0];
        for address in vaddr.. {
            self.read_bytes(address, &mut byte);
            if byte[0] == 0 {
                break;
            }
            bytes.push(byte[0]);
        }
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Store `string` with a NUL terminator
    pub fn write_string(&mut self, vaddr: u32, string: &str) {
        let mut bytes = vec![0; string.len() + 1];
        bytes[..string.len()].copy_from_slice(string.as_bytes());
        self.write_bytes(vaddr, &bytes);
    }

    fn fault(&mut self, cause: ExceptionCause, vaddr: u32) -> ! {
        self.kernel.exception_handler(cause as i32);
        unreachable!("Exception {cause:?} at {vaddr:#x} returned");
    }
}
