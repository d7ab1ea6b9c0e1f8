//! Error and Result type for use in this crate
use chips_abi::{ChipsAbiError, Pid};
use core::result::Result;
use derive_more::Display;
use std::io::Error as IoError;

/// Error type for use in the Kernel
#[derive(Debug, Display)]
pub enum KernelError {
    /// Argument is invalid
    #[display("Invalid arguments")]
    InvalidArguments,
    /// Virtual page is outside the page table
    #[display("Invalid virtual page: {_0}")]
    InvalidVirtualPage(usize),
    /// Virtual page is already backed by a frame
    #[display("Virtual page already mapped: {_0}")]
    PageInUse(usize),
    /// No free physical frames
    #[display("Out of physical memory")]
    OutOfMemory,
    /// No executable image installed under this name
    #[display("No such executable: {_0}")]
    NoSuchExecutable(String),
    /// Executable sections are not contiguous from virtual page 0
    #[display("Fragmented executable")]
    FragmentedExecutable,
    /// argv does not fit in a single page
    #[display("Arguments too long")]
    ArgumentsTooLong,
    /// PID is not in the process table
    #[display("No such process: {_0}")]
    NoSuchProcess(Pid),
    /// A file operation failed
    #[display("I/O error on {_0}")]
    Io(String),
    /// Bad line in a configuration file
    #[display("Invalid config line {_0}: {_1}")]
    InvalidConfig(usize, String),
    /// Could not create the host thread backing a kernel thread
    #[display("Host thread error: {_0}")]
    HostThread(IoError),
    /// Converted from [chips_abi::ChipsAbiError]
    #[display("{_0}")]
    AbiError(ChipsAbiError),
}

impl std::error::Error for KernelError {}

impl From<ChipsAbiError> for KernelError {
    fn from(error: ChipsAbiError) -> Self {
        KernelError::AbiError(error)
    }
}

impl From<IoError> for KernelError {
    fn from(error: IoError) -> Self {
        KernelError::HostThread(error)
    }
}

/// Result type for use in this crate
pub type KernelResult<T = ()> = Result<T, KernelError>;
