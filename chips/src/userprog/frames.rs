//! Kernel-owned pool of free physical frames
use frame_alloc::FrameAllocator;
use log::trace;
use spin::Mutex;

/// Hands out physical frames to address spaces
#[derive(Debug)]
pub struct FramePool {
    allocator: Mutex<FrameAllocator>,
}

impl FramePool {
    /// Construct a pool owning frames `0..num_frames`
    pub fn new(num_frames: usize) -> Self {
        Self {
            allocator: Mutex::new(FrameAllocator::new(num_frames)),
        }
    }

    /// Take a free frame
    pub fn new_page(&self) -> Option<usize> {
        let frame = self.allocator.lock().allocate();
        trace!("new_page -> {frame:?}");
        frame
    }

    /// Give a frame back
    ///
    /// # Panics
    /// If the frame is not currently taken
    pub fn delete_page(&self, ppn: usize) {
        trace!("delete_page({ppn})");
        self.allocator.lock().deallocate(ppn);
    }

    /// Number of frames available
    pub fn num_free(&self) -> usize {
        self.allocator.lock().num_free()
    }

    /// Total number of frames
    pub fn num_frames(&self) -> usize {
        self.allocator.lock().num_frames()
    }
}
