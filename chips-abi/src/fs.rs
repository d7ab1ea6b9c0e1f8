use crate::ChipsAbiError;
use core::fmt::{self, Display};

/// File descriptor type
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileDescriptor(u16);

impl FileDescriptor {
    /// Console input, bound when a process is created
    pub const STDIN: Self = Self(0);
    /// Console output, bound when a process is created
    pub const STDOUT: Self = Self(1);
}

impl From<FileDescriptor> for usize {
    fn from(fd: FileDescriptor) -> Self {
        fd.0.into()
    }
}

impl From<FileDescriptor> for i32 {
    fn from(fd: FileDescriptor) -> Self {
        fd.0.into()
    }
}

impl TryFrom<usize> for FileDescriptor {
    type Error = ChipsAbiError;
    fn try_from(fd: usize) -> Result<Self, ChipsAbiError> {
        Ok(Self(fd.try_into().map_err(|_| {
            ChipsAbiError::InvalidFileDescriptor(i32::try_from(fd).unwrap_or(i32::MAX))
        })?))
    }
}

impl TryFrom<i32> for FileDescriptor {
    type Error = ChipsAbiError;
    fn try_from(fd: i32) -> Result<Self, ChipsAbiError> {
        Ok(Self(
            fd.try_into()
                .map_err(|_| ChipsAbiError::InvalidFileDescriptor(fd))?,
        ))
    }
}

impl Display for FileDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn negative_descriptors_are_rejected() {
        assert_eq!(
            FileDescriptor::try_from(-1),
            Err(ChipsAbiError::InvalidFileDescriptor(-1))
        );
        assert_eq!(FileDescriptor::try_from(1), Ok(FileDescriptor::STDOUT));
        assert_eq!(usize::from(FileDescriptor::try_from(15).unwrap()), 15);
    }
}
