//! User address spaces
//!
//! Translation is done in software: the kernel walks the process page table itself whenever it
//! copies data in or out of user memory.
use crate::{
    machine::processor::{
        make_address, offset_from_address, page_from_address, PageTable, Processor,
        TranslationEntry, PAGE_SIZE,
    },
    userprog::frames::FramePool,
    KernelError, KernelResult,
};
use alloc::{string::String, sync::Arc, vec, vec::Vec};
use log::trace;
use spin::Mutex;

/// Memory-management capability of a user process
pub trait AddressSpace: Send {
    /// Number of allocated pages. The accessible range is `[0, num_pages * PAGE_SIZE)`
    fn num_pages(&self) -> usize;

    /// Page table to install in the processor
    fn page_table(&self) -> PageTable;

    /// Entry for `vpn`, if it is inside the page table
    fn translate(&self, vpn: usize) -> Option<TranslationEntry>;

    /// Copy `length` bytes at `vaddr` into `data[offset..]`
    ///
    /// Returns the number of bytes copied, which is 0 if the range is bad and short if an unmapped
    /// page is hit
    fn read_virtual_memory(
        &self,
        processor: &Processor,
        vaddr: i32,
        data: &mut [u8],
        offset: usize,
        length: usize,
    ) -> usize;

    /// Copy `length` bytes from `data[offset..]` to `vaddr`
    ///
    /// Like [AddressSpace::read_virtual_memory], but also stops at read-only pages
    fn write_virtual_memory(
        &self,
        processor: &Processor,
        vaddr: i32,
        data: &[u8],
        offset: usize,
        length: usize,
    ) -> usize;

    /// Back `count` pages starting at `vpn` with fresh zeroed frames
    ///
    /// All or nothing: on failure every frame taken by this call is given back
    fn allocate(
        &mut self,
        processor: &Processor,
        frames: &FramePool,
        vpn: usize,
        count: usize,
        read_only: bool,
    ) -> KernelResult;

    /// Give every frame back and invalidate the whole page table
    fn release(&mut self, frames: &FramePool);

    /// Read into all of `data`
    fn read(&self, processor: &Processor, vaddr: i32, data: &mut [u8]) -> usize {
        let length = data.len();
        self.read_virtual_memory(processor, vaddr, data, 0, length)
    }

    /// Write all of `data`
    fn write(&self, processor: &Processor, vaddr: i32, data: &[u8]) -> usize {
        self.write_virtual_memory(processor, vaddr, data, 0, data.len())
    }

    /// Read a NUL-terminated string of at most `max_length` bytes
    ///
    /// Returns `None` if no terminator is found or the bytes are not UTF-8
    fn read_string(&self, processor: &Processor, vaddr: i32, max_length: usize) -> Option<String> {
        let start = usize::try_from(vaddr).ok()?;
        let available = (self.num_pages() * PAGE_SIZE).checked_sub(start)?;
        let mut bytes = vec![0; available.min(max_length + 1)];
        let read = self.read(processor, vaddr, &mut bytes);
        let end = bytes[..read].iter().position(|&byte| byte == 0)?;
        bytes.truncate(end);
        String::from_utf8(bytes).ok()
    }
}

// Physically contiguous piece of a transfer
struct Segment {
    paddr: usize,
    amount: usize,
}

/// Address space backed by a linear page table
#[derive(Debug)]
pub struct PagedMemory {
    page_table: PageTable,
    num_pages: usize,
}

impl PagedMemory {
    /// Construct an empty address space with room for `num_entries` pages
    pub fn new(num_entries: usize) -> Self {
        let entries = (0..num_entries).map(TranslationEntry::invalid).collect();
        Self {
            page_table: Arc::new(Mutex::new(entries)),
            num_pages: 0,
        }
    }

    // Split a transfer into per-page pieces, stopping at the first page we may not touch
    fn segments(&self, vaddr: i32, length: usize, writing: bool) -> Vec<Segment> {
        let Ok(start) = u32::try_from(vaddr) else {
            return Vec::new();
        };
        if length == 0 {
            return Vec::new();
        }
        let limit = self.num_pages * PAGE_SIZE;
        let end = match (start as usize).checked_add(length - 1) {
            Some(end) if end < limit => end as u32,
            _ => return Vec::new(),
        };

        let mut page_table = self.page_table.lock();
        let mut segments = Vec::new();
        for vpn in page_from_address(start)..=page_from_address(end) {
            let Some(entry) = page_table.get_mut(vpn) else {
                break;
            };
            if !entry.valid || (writing && entry.read_only) {
                break;
            }

            let first = if vpn == page_from_address(start) {
                offset_from_address(start)
            } else {
                0
            };
            let last = if vpn == page_from_address(end) {
                offset_from_address(end)
            } else {
                PAGE_SIZE - 1
            };

            entry.used = true;
            if writing {
                entry.dirty = true;
            }
            segments.push(Segment {
                paddr: make_address(entry.ppn, first) as usize,
                amount: last - first + 1,
            });
        }
        segments
    }
}

fn bounds_ok(buffer_length: usize, offset: usize, length: usize) -> bool {
    offset
        .checked_add(length)
        .is_some_and(|end| end <= buffer_length)
}

impl AddressSpace for PagedMemory {
    fn num_pages(&self) -> usize {
        self.num_pages
    }

    fn page_table(&self) -> PageTable {
        self.page_table.clone()
    }

    fn translate(&self, vpn: usize) -> Option<TranslationEntry> {
        self.page_table.lock().get(vpn).copied()
    }

    fn read_virtual_memory(
        &self,
        processor: &Processor,
        vaddr: i32,
        data: &mut [u8],
        offset: usize,
        length: usize,
    ) -> usize {
        if !bounds_ok(data.len(), offset, length) {
            return 0;
        }

        let segments = self.segments(vaddr, length, false);
        processor.with_memory(|memory| {
            let mut transferred = 0;
            for Segment { paddr, amount } in segments {
                let destination = offset + transferred;
                data[destination..destination + amount]
                    .copy_from_slice(&memory[paddr..paddr + amount]);
                transferred += amount;
            }
            transferred
        })
    }

    fn write_virtual_memory(
        &self,
        processor: &Processor,
        vaddr: i32,
        data: &[u8],
        offset: usize,
        length: usize,
    ) -> usize {
        if !bounds_ok(data.len(), offset, length) {
            return 0;
        }

        let segments = self.segments(vaddr, length, true);
        processor.with_memory(|memory| {
            let mut transferred = 0;
            for Segment { paddr, amount } in segments {
                let source = offset + transferred;
                memory[paddr..paddr + amount].copy_from_slice(&data[source..source + amount]);
                transferred += amount;
            }
            transferred
        })
    }

    fn allocate(
        &mut self,
        processor: &Processor,
        frames: &FramePool,
        vpn: usize,
        count: usize,
        read_only: bool,
    ) -> KernelResult {
        let mut page_table = self.page_table.lock();
        let mut allocated = Vec::new();

        for vpn in vpn..vpn.saturating_add(count) {
            let result = match page_table.get(vpn) {
                None => Err(KernelError::InvalidVirtualPage(vpn)),
                Some(entry) if entry.valid => Err(KernelError::PageInUse(vpn)),
                Some(_) => frames.new_page().ok_or(KernelError::OutOfMemory),
            };

            match result {
                Ok(ppn) => {
                    processor.zero_frame(ppn);
                    page_table[vpn] = TranslationEntry::new(vpn, ppn, read_only);
                    allocated.push(vpn);
                }
                Err(error) => {
                    trace!("Allocation failed at page {vpn}: {error}; rolling back");
                    for vpn in allocated {
                        frames.delete_page(page_table[vpn].ppn);
                        page_table[vpn] = TranslationEntry::invalid(vpn);
                    }
                    return Err(error);
                }
            }
        }

        self.num_pages += allocated.len();
        Ok(())
    }

    fn release(&mut self, frames: &FramePool) {
        let mut page_table = self.page_table.lock();
        for (vpn, entry) in page_table.iter_mut().enumerate() {
            if entry.valid {
                frames.delete_page(entry.ppn);
            }
            *entry = TranslationEntry::invalid(vpn);
        }
        self.num_pages = 0;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const FRAMES: usize = 8;

    fn machine() -> (Processor, FramePool, PagedMemory) {
        (
            Processor::new(FRAMES),
            FramePool::new(FRAMES),
            PagedMemory::new(FRAMES),
        )
    }

    #[test]
    fn round_trip_across_pages() {
        let (processor, frames, mut memory) = machine();
        memory.allocate(&processor, &frames, 0, 4, false).unwrap();
        assert_eq!(memory.num_pages(), 4);

        let data: Vec<u8> = (0..3000).map(|i| (i % 251) as u8).collect();
        assert_eq!(memory.write(&processor, 500, &data), 3000);

        let mut back = vec![0; 3000];
        assert_eq!(memory.read(&processor, 500, &mut back), 3000);
        assert_eq!(back, data);

        for vpn in 0..4 {
            let entry = memory.translate(vpn).unwrap();
            assert!(entry.used && entry.dirty);
        }
    }

    #[test]
    fn fresh_pages_are_zeroed() {
        let (processor, frames, mut memory) = machine();
        processor.with_memory(|memory| memory.fill(0xaa));
        memory.allocate(&processor, &frames, 0, 1, false).unwrap();

        let mut back = [0xff; 16];
        assert_eq!(memory.read(&processor, 100, &mut back), 16);
        assert_eq!(back, [0; 16]);
    }

    #[test]
    fn bad_ranges_transfer_nothing() {
        let (processor, frames, mut memory) = machine();
        memory.allocate(&processor, &frames, 0, 2, false).unwrap();
        let mut buffer = [0; 32];

        assert_eq!(memory.read(&processor, -1, &mut buffer), 0);
        assert_eq!(memory.read(&processor, 2 * PAGE_SIZE as i32 - 16, &mut buffer), 0);
        assert_eq!(memory.read_virtual_memory(&processor, 0, &mut buffer, 20, 20), 0);
        assert_eq!(memory.read_virtual_memory(&processor, 0, &mut buffer, 0, 0), 0);
        assert_eq!(
            memory.write_virtual_memory(&processor, 0, &buffer, usize::MAX, 2),
            0
        );
        assert_eq!(memory.read_virtual_memory(&processor, 0, &mut buffer, 16, 16), 16);
    }

    #[test]
    fn stops_at_unmapped_page() {
        let (processor, frames, mut memory) = machine();
        memory.allocate(&processor, &frames, 0, 1, false).unwrap();
        memory.allocate(&processor, &frames, 2, 1, false).unwrap();
        // Pages 0 and 2 are mapped, so the range is [0, 2 pages) with a hole at page 1
        assert_eq!(memory.num_pages(), 2);

        let mut buffer = vec![0; 2 * PAGE_SIZE];
        assert_eq!(memory.read(&processor, 0, &mut buffer), PAGE_SIZE);
        assert_eq!(memory.read(&processor, PAGE_SIZE as i32, &mut buffer[..8]), 0);
    }

    #[test]
    fn read_only_pages_refuse_writes() {
        let (processor, frames, mut memory) = machine();
        memory.allocate(&processor, &frames, 0, 1, false).unwrap();
        memory.allocate(&processor, &frames, 1, 1, true).unwrap();

        let data = [0x55; 64];
        // Only the part before the read-only page lands
        let start = PAGE_SIZE as i32 - 16;
        assert_eq!(memory.write(&processor, start, &data), 16);

        let mut back = [0xff; 64];
        assert_eq!(memory.read(&processor, start, &mut back), 64);
        assert_eq!(back[..16], [0x55; 16]);
        assert_eq!(back[16..], [0; 48]);
        assert!(!memory.translate(1).unwrap().dirty);
    }

    #[test]
    fn allocate_rolls_back_when_out_of_frames() {
        let (processor, frames, mut memory) = machine();
        let stolen = frames.new_page().unwrap();

        assert!(matches!(
            memory.allocate(&processor, &frames, 0, FRAMES, false),
            Err(KernelError::OutOfMemory)
        ));
        assert_eq!(frames.num_free(), FRAMES - 1);
        assert_eq!(memory.num_pages(), 0);
        assert!((0..FRAMES).all(|vpn| !memory.translate(vpn).unwrap().valid));

        frames.delete_page(stolen);
    }

    #[test]
    fn allocate_rolls_back_past_page_table() {
        let (processor, frames, mut memory) = machine();

        assert!(matches!(
            memory.allocate(&processor, &frames, FRAMES - 2, 4, false),
            Err(KernelError::InvalidVirtualPage(vpn)) if vpn == FRAMES
        ));
        assert_eq!(frames.num_free(), FRAMES);
        assert_eq!(memory.num_pages(), 0);

        memory.allocate(&processor, &frames, 0, 1, false).unwrap();
        assert!(matches!(
            memory.allocate(&processor, &frames, 0, 1, false),
            Err(KernelError::PageInUse(0))
        ));
    }

    #[test]
    fn release_is_idempotent() {
        let (processor, frames, mut memory) = machine();
        memory.allocate(&processor, &frames, 0, 3, false).unwrap();
        assert_eq!(frames.num_free(), FRAMES - 3);

        memory.release(&frames);
        assert_eq!(frames.num_free(), FRAMES);
        assert_eq!(memory.num_pages(), 0);
        memory.release(&frames);
        assert_eq!(frames.num_free(), FRAMES);
    }

    #[test]
    fn strings() {
        let (processor, frames, mut memory) = machine();
        memory.allocate(&processor, &frames, 0, 1, false).unwrap();

        memory.write(&processor, 0x100, b"hello\0");
        assert_eq!(
            memory.read_string(&processor, 0x100, 256).as_deref(),
            Some("hello")
        );
        // Terminator beyond the maximum
        assert_eq!(memory.read_string(&processor, 0x100, 3), None);
        // Near the end of the address space
        let end = PAGE_SIZE as i32 - 3;
        memory.write(&processor, end, b"ok\0");
        assert_eq!(memory.read_string(&processor, end, 256).as_deref(), Some("ok"));
        assert_eq!(memory.read_string(&processor, -4, 256), None);
    }
}
