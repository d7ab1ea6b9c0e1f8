//! Synchronous word exchange between speakers and listeners
use crate::threads::{condition::Condition2, lock::Lock};
use alloc::sync::Arc;
use spin::Mutex;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Slot {
    Empty,
    Full(i32),
}

/// A rendezvous: every word spoken is heard by exactly one listener
///
/// `speak` does not return until its word has been taken by a listener.
pub struct Communicator {
    lock: Arc<Lock>,
    speaker: Condition2,
    listener: Condition2,
    slot: Mutex<Slot>,
}

impl Default for Communicator {
    fn default() -> Self {
        Self::new()
    }
}

impl Communicator {
    /// Construct a communicator with nobody waiting
    pub fn new() -> Self {
        let lock = Arc::new(Lock::new());
        Self {
            speaker: Condition2::new(lock.clone()),
            listener: Condition2::new(lock.clone()),
            lock,
            slot: Mutex::new(Slot::Empty),
        }
    }

    fn slot(&self) -> Slot {
        *self.slot.lock()
    }

    /// Wait for a listener and hand it `word`
    pub fn speak(&self, word: i32) {
        self.lock.acquire();

        // Somebody else's word is still waiting to be heard
        while self.slot() != Slot::Empty {
            self.listener.wake_all();
            self.speaker.sleep();
        }

        *self.slot.lock() = Slot::Full(word);
        self.listener.wake_all();
        // Only a listener that took our word wakes speakers
        self.speaker.sleep();

        self.lock.release();
    }

    /// Wait for a speaker and return its word
    pub fn listen(&self) -> i32 {
        self.lock.acquire();

        let word = loop {
            if let Slot::Full(word) = self.slot() {
                break word;
            }
            self.listener.sleep();
        };
        *self.slot.lock() = Slot::Empty;
        self.speaker.wake_all();

        self.lock.release();
        word
    }
}
