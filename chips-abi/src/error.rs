use core::{
    fmt::{self, Display},
    result::Result,
};

/// Chips-abi error type
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum ChipsAbiError {
    InvalidPid(i32),
    InvalidFileDescriptor(i32),
}

impl Display for ChipsAbiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            Self::InvalidPid(pid) => {
                write!(f, "Invalid PID: {pid}")
            }
            Self::InvalidFileDescriptor(fd) => {
                write!(f, "Invalid file descriptor: {fd}")
            }
        }
    }
}
