//! Chips kernel
//!
//! A teaching kernel running on a simulated single-core machine: kernel threads with timer
//! preemption, blocking synchronization, and user processes with paged address spaces and
//! system calls.
// Make sure everything's documented by warning when docs are missing
#![warn(missing_docs)]

extern crate alloc;

pub mod config;
pub mod errors;
pub mod kernel;
pub mod logger;
pub mod machine;
pub mod threads;
pub mod userprog;
pub mod util;

#[cfg(test)]
mod test;

pub use crate::{
    config::KernelConfig,
    errors::{KernelError, KernelResult},
    kernel::Kernel,
};
