//! User processes: address spaces, executables, files and system calls
pub mod address_space;
pub mod context;
pub mod files;
pub mod frames;
pub mod image;
pub mod process;
mod syscalls;
pub mod table;

pub use address_space::{AddressSpace, PagedMemory};
pub use context::UserContext;
pub use files::{Console, FileSystem, MemoryFileSystem, OpenFile};
pub use image::{Image, ImageLibrary, Section, UserProgram};
pub use process::{ProcessState, ProgramStart, UserProcess};
pub use table::ProcessTable;

#[cfg(test)]
mod test;
