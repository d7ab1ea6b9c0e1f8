//! Simulated processor: physical memory, registers and address translation
use crate::machine::frame::TrapFrame;
use alloc::{sync::Arc, vec, vec::Vec};
use bilge::prelude::*;
use chips_abi::ExceptionCause;
use spin::Mutex;

/// Size of a page (and a physical frame), in bytes
pub const PAGE_SIZE: usize = 0x400;

/// 32-bit user virtual address
#[bitsize(32)]
#[derive(FromBits, Copy, Clone, DebugBits, PartialEq, Eq)]
pub struct VirtualAddress {
    page_offset: u10,
    vpn: u22,
}

/// Build an address from a page number and an offset into the page
///
/// # Panics
/// If `offset` is not less than [PAGE_SIZE] or `page` needs more than 22 bits
pub fn make_address(page: usize, offset: usize) -> u32 {
    assert!(offset < PAGE_SIZE, "Offset {offset:#x} outside page");
    assert!(page < 1 << 22, "Page {page:#x} outside address space");
    VirtualAddress::new(u10::new(offset as u16), u22::new(page as u32)).value
}

/// Page number of `address`
pub fn page_from_address(address: u32) -> usize {
    VirtualAddress::from(address).vpn().value() as usize
}

/// Offset of `address` into its page
pub fn offset_from_address(address: u32) -> usize {
    VirtualAddress::from(address).page_offset().value() as usize
}

/// One page-table entry
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct TranslationEntry {
    /// Virtual page number
    pub vpn: usize,
    /// Physical page number
    pub ppn: usize,
    /// Entry maps a frame
    pub valid: bool,
    /// Writes are refused
    pub read_only: bool,
    /// Page has been accessed
    pub used: bool,
    /// Page has been written
    pub dirty: bool,
}

impl TranslationEntry {
    /// Valid mapping of `vpn` to `ppn`
    pub const fn new(vpn: usize, ppn: usize, read_only: bool) -> Self {
        Self {
            vpn,
            ppn,
            valid: true,
            read_only,
            used: false,
            dirty: false,
        }
    }

    /// Entry mapping nothing
    pub const fn invalid(vpn: usize) -> Self {
        Self {
            vpn,
            ppn: 0,
            valid: false,
            read_only: false,
            used: false,
            dirty: false,
        }
    }
}

/// Page table shared between a process and the processor
pub type PageTable = Arc<Mutex<Vec<TranslationEntry>>>;

/// The processor of the simulated machine
pub struct Processor {
    memory: Mutex<Vec<u8>>,
    registers: Mutex<TrapFrame>,
    page_table: Mutex<Option<PageTable>>,
    num_phys_pages: usize,
}

impl Processor {
    /// Construct a processor with `num_phys_pages` zeroed frames of memory
    pub fn new(num_phys_pages: usize) -> Self {
        Self {
            memory: Mutex::new(vec![0; num_phys_pages * PAGE_SIZE]),
            registers: Mutex::new(TrapFrame::default()),
            page_table: Mutex::new(None),
            num_phys_pages,
        }
    }

    /// Number of physical frames
    pub fn num_phys_pages(&self) -> usize {
        self.num_phys_pages
    }

    /// Read one register
    pub fn read_register(&self, register: usize) -> i32 {
        self.registers.lock().regs[register]
    }

    /// Write one register
    pub fn write_register(&self, register: usize, value: i32) {
        self.registers.lock().regs[register] = value;
    }

    /// Snapshot of the whole register file
    pub fn registers(&self) -> TrapFrame {
        self.registers.lock().clone()
    }

    /// Replace the whole register file
    pub fn set_registers(&self, frame: &TrapFrame) {
        self.registers.lock().clone_from(frame);
    }

    /// Move past the current instruction
    pub fn advance_pc(&self) {
        self.registers.lock().advance_pc();
    }

    /// Page table used to translate user addresses
    pub fn page_table(&self) -> Option<PageTable> {
        self.page_table.lock().clone()
    }

    /// Install the page table used to translate user addresses
    pub fn set_page_table(&self, page_table: Option<PageTable>) {
        *self.page_table.lock() = page_table;
    }

    /// Run `f` with exclusive access to physical memory
    pub fn with_memory<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        f(&mut self.memory.lock())
    }

    /// Fill physical frame `ppn` with zeroes
    pub fn zero_frame(&self, ppn: usize) {
        self.with_memory(|memory| memory[ppn * PAGE_SIZE..][..PAGE_SIZE].fill(0));
    }

    /// Translate a user virtual address to a physical address
    ///
    /// Marks the page used (and dirty when `writing`)
    pub fn translate(&self, vaddr: u32, writing: bool) -> Result<usize, ExceptionCause> {
        let address = VirtualAddress::from(vaddr);
        let vpn = address.vpn().value() as usize;
        let offset = address.page_offset().value() as usize;

        let page_table = self.page_table().ok_or(ExceptionCause::PageFault)?;
        let mut page_table = page_table.lock();
        let entry = page_table
            .get_mut(vpn)
            .filter(|entry| entry.valid)
            .ok_or(ExceptionCause::PageFault)?;
        if writing && entry.read_only {
            return Err(ExceptionCause::ReadOnly);
        }
        if entry.ppn >= self.num_phys_pages {
            return Err(ExceptionCause::BusError);
        }

        entry.used = true;
        if writing {
            entry.dirty = true;
        }
        Ok(entry.ppn * PAGE_SIZE + offset)
    }

    /// Read user memory through the current page table
    pub fn read_memory(&self, vaddr: u32, buffer: &mut [u8]) -> Result<(), ExceptionCause> {
        for (index, byte) in buffer.iter_mut().enumerate() {
            let vaddr = self.byte_address(vaddr, index)?;
            let paddr = self.translate(vaddr, false)?;
            *byte = self.memory.lock()[paddr];
        }
        Ok(())
    }

    /// Write user memory through the current page table
    pub fn write_memory(&self, vaddr: u32, data: &[u8]) -> Result<(), ExceptionCause> {
        for (index, byte) in data.iter().enumerate() {
            let vaddr = self.byte_address(vaddr, index)?;
            let paddr = self.translate(vaddr, true)?;
            self.memory.lock()[paddr] = *byte;
        }
        Ok(())
    }

    fn byte_address(&self, base: u32, index: usize) -> Result<u32, ExceptionCause> {
        u32::try_from(index)
            .ok()
            .and_then(|index| base.checked_add(index))
            .ok_or(ExceptionCause::AddressError)
    }
}
