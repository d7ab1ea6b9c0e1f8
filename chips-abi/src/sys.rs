/// Syscall number, as placed in `v0` by a user program
#[derive(Copy, Clone, Debug, PartialEq, Eq, enumn::N)]
#[repr(i32)]
pub enum Syscall {
    Halt = 0,
    Exit = 1,
    Exec = 2,
    Join = 3,
    Create = 4,
    Open = 5,
    Read = 6,
    Write = 7,
    Close = 8,
    Unlink = 9,
}

/// Cause of a user-mode exception, as reported by the processor
#[derive(Copy, Clone, Debug, PartialEq, Eq, enumn::N)]
#[repr(i32)]
pub enum ExceptionCause {
    Syscall = 0,
    PageFault = 1,
    TlbMiss = 2,
    ReadOnly = 3,
    BusError = 4,
    AddressError = 5,
    Overflow = 6,
    IllegalInstruction = 7,
}
