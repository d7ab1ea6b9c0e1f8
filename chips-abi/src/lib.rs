//! Common types between Chips user programs and the kernel
#![cfg_attr(not(test), no_std)]

mod error;
mod fs;
mod pid;
mod sys;

pub use error::ChipsAbiError;
pub use fs::FileDescriptor;
pub use pid::Pid;
pub use sys::{ExceptionCause, Syscall};
