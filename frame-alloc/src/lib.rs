//! A frame-grain allocator for simulated physical memory
//!
//! Frames are identified by their physical page number. Each frame has a one-bit bookkeeping
//! record, packed eight to a byte.
#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]
extern crate alloc;

mod record;
use alloc::{vec, vec::Vec};
use record::Record;

/// Tracks which physical frames are in use
#[derive(Clone, Debug)]
pub struct FrameAllocator {
    records: Vec<u8>,
    num_frames: usize,
    num_free: usize,
}

impl FrameAllocator {
    /// Create an allocator managing frames `0..num_frames`, all initially free
    pub fn new(num_frames: usize) -> Self {
        let num_bytes = num_frames.div_ceil(Record::PER_BYTE);
        Self {
            records: vec![0; num_bytes],
            num_frames,
            num_free: num_frames,
        }
    }

    fn get_record(&self, index: usize) -> Record {
        let byte_index = index / Record::PER_BYTE;
        Record::from_byte(self.records[byte_index])[index % Record::PER_BYTE]
    }

    fn set_record(&mut self, index: usize, record: Record) {
        let byte_index = index / Record::PER_BYTE;
        let mut records = Record::from_byte(self.records[byte_index]);
        records[index % Record::PER_BYTE] = record;
        self.records[byte_index] = Record::to_byte(records);
    }

    /// Total number of frames managed
    pub fn num_frames(&self) -> usize {
        self.num_frames
    }

    /// Number of frames not currently allocated
    pub fn num_free(&self) -> usize {
        self.num_free
    }

    /// Return true if `frame` is currently allocated
    ///
    /// # Panics
    /// If `frame` is out of range
    pub fn is_taken(&self, frame: usize) -> bool {
        assert!(frame < self.num_frames, "Frame out of range");
        self.get_record(frame).taken
    }

    /// Allocate the lowest-numbered free frame
    ///
    /// # Returns
    /// The physical page number of the frame, or `None` if every frame is taken
    pub fn allocate(&mut self) -> Option<usize> {
        if self.num_free == 0 {
            return None;
        }

        for byte_index in 0..self.records.len() {
            // Whole byte taken, skip it
            if self.records[byte_index] == u8::MAX {
                continue;
            }

            let first = byte_index * Record::PER_BYTE;
            let last = (first + Record::PER_BYTE).min(self.num_frames);
            for frame in first..last {
                if !self.get_record(frame).taken {
                    self.set_record(frame, Record { taken: true });
                    self.num_free -= 1;
                    return Some(frame);
                }
            }
        }

        unreachable!("Free count out of sync with records");
    }

    /// Return a frame to the pool
    ///
    /// # Panics
    /// * If `frame` is out of range
    /// * If `frame` is not currently allocated
    pub fn deallocate(&mut self, frame: usize) {
        assert!(frame < self.num_frames, "Frame above range");
        assert!(self.get_record(frame).taken, "Double free!");
        self.set_record(frame, Record { taken: false });
        self.num_free += 1;
    }
}
