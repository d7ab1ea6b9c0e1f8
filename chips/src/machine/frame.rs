//! User register file

/// Number of registers a user thread saves and restores
pub const NUM_USER_REGISTERS: usize = 40;

/// Return value of a system call
pub const REG_V0: usize = 2;
/// First system call argument
pub const REG_A0: usize = 4;
/// Second system call argument
pub const REG_A1: usize = 5;
/// Third system call argument
pub const REG_A2: usize = 6;
/// Fourth system call argument
pub const REG_A3: usize = 7;
/// Stack pointer
pub const REG_SP: usize = 29;
/// Return address
pub const REG_RA: usize = 31;
/// Program counter
pub const REG_PC: usize = 34;
/// Next program counter
pub const REG_NEXT_PC: usize = 35;
/// Cause of the last exception
pub const REG_CAUSE: usize = 36;
/// Faulting virtual address of the last exception
pub const REG_BAD_VADDR: usize = 37;

/// Register frame of a user thread
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrapFrame {
    /// General purpose and special registers
    pub regs: [i32; NUM_USER_REGISTERS],
}

impl Default for TrapFrame {
    fn default() -> Self {
        Self {
            regs: [0; NUM_USER_REGISTERS],
        }
    }
}

impl TrapFrame {
    /// Set the stack pointer
    pub fn set_stack_pointer(&mut self, val: i32) {
        self.regs[REG_SP] = val
    }

    /// Point execution at `pc`
    pub fn set_program_counter(&mut self, pc: i32) {
        self.regs[REG_PC] = pc;
        self.regs[REG_NEXT_PC] = pc.wrapping_add(4);
    }

    /// Move past the current instruction
    pub fn advance_pc(&mut self) {
        self.regs[REG_PC] = self.regs[REG_NEXT_PC];
        self.regs[REG_NEXT_PC] = self.regs[REG_NEXT_PC].wrapping_add(4);
    }

    /// Set `argc` and `argv` for program entry
    pub fn set_arguments(&mut self, argc: i32, argv: i32) {
        self.regs[REG_A0] = argc;
        self.regs[REG_A1] = argv;
    }
}
