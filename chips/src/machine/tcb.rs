//! Thread control blocks
//!
//! Every kernel thread runs on its own host thread, but only one of them may execute at a time.
//! Control moves between them by passing a baton: the running thread hands the baton to the next
//! thread and then waits until somebody hands it back.
use crate::KernelResult;
use std::{
    sync::{Condvar, Mutex, PoisonError},
    thread::Builder,
};

/// Host-side execution context of a kernel thread
#[derive(Debug, Default)]
pub struct Tcb {
    baton: Mutex<bool>,
    handoff: Condvar,
}

impl Tcb {
    /// Construct a TCB whose thread is not yet allowed to run
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow this TCB's thread to run
    pub fn give_baton(&self) {
        let mut baton = self.baton.lock().unwrap_or_else(PoisonError::into_inner);
        *baton = true;
        self.handoff.notify_one();
    }

    /// Block the calling host thread until the baton is handed to this TCB
    pub fn wait_for_baton(&self) {
        let mut baton = self.baton.lock().unwrap_or_else(PoisonError::into_inner);
        while !*baton {
            baton = self
                .handoff
                .wait(baton)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *baton = false;
    }

    /// Spawn the host thread that backs a kernel thread
    ///
    /// `body` is responsible for waiting for the baton before touching kernel state
    pub fn start(name: &str, body: impl FnOnce() + Send + 'static) -> KernelResult {
        // The host thread is detached; it exits when its kernel thread finishes
        Builder::new().name(name.into()).spawn(body)?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    #[test]
    fn baton_alternates() {
        let main = Arc::new(Tcb::new());
        let other = Arc::new(Tcb::new());
        let counter = Arc::new(AtomicUsize::new(0));

        {
            let main = main.clone();
            let other = other.clone();
            let counter = counter.clone();
            Tcb::start("other", move || {
                for _ in 0..3 {
                    other.wait_for_baton();
                    counter.fetch_add(1, Ordering::SeqCst);
                    main.give_baton();
                }
            })
            .unwrap();
        }

        for round in 1..=3 {
            other.give_baton();
            main.wait_for_baton();
            assert_eq!(counter.load(Ordering::SeqCst), round);
        }
    }
}
