use crate::ChipsAbiError;
use core::{
    fmt::{self, Display},
    result::Result,
};

/// Process ID type
///
/// PIDs are handed out by the kernel's process table, starting at [Pid::ROOT].
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(u32);

impl From<Pid> for u32 {
    fn from(pid: Pid) -> Self {
        pid.0
    }
}

impl From<Pid> for usize {
    fn from(pid: Pid) -> Self {
        pid.0 as usize
    }
}

impl TryFrom<Pid> for i32 {
    type Error = ChipsAbiError;
    fn try_from(pid: Pid) -> Result<Self, ChipsAbiError> {
        pid.0
            .try_into()
            .map_err(|_| ChipsAbiError::InvalidPid(i32::MAX))
    }
}

impl TryFrom<i32> for Pid {
    type Error = ChipsAbiError;
    fn try_from(pid: i32) -> Result<Self, ChipsAbiError> {
        let val: u32 = pid.try_into().map_err(|_| ChipsAbiError::InvalidPid(pid))?;
        Ok(Self(val))
    }
}

impl Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        self.0.fmt(f)
    }
}

impl Pid {
    /// The first process created by the kernel. Only it may halt the machine
    pub const ROOT: Self = Self(0);

    /// Construct a PID from its raw value
    pub const fn new(val: u32) -> Self {
        Self(val)
    }

    /// True if this is [Pid::ROOT]
    pub const fn is_root(self) -> bool {
        self.0 == 0
    }

    /// The PID that follows this one
    pub fn next(self) -> Self {
        Self(self.0.checked_add(1).expect("PID space exhausted"))
    }
}
