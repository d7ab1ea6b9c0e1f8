//! Timed sleep driven by the timer interrupt
use crate::{
    threads::{self, kthread::KThread},
    Kernel,
};
use alloc::{collections::BTreeMap, sync::Arc};
use core::sync::atomic::{AtomicU64, Ordering};
use log::trace;
use spin::Mutex;

/// Wakes sleeping threads once their deadline has passed
#[derive(Debug, Default)]
pub struct Alarm {
    // Keyed by (deadline, arrival) so equal deadlines wake in arrival order
    sleepers: Mutex<BTreeMap<(u64, u64), Arc<KThread>>>,
    next_arrival: AtomicU64,
}

impl Alarm {
    /// Construct an alarm with no sleepers
    pub fn new() -> Self {
        Self::default()
    }

    /// Timer interrupt handler
    ///
    /// Readies every thread whose deadline has passed, then yields the current thread
    pub fn timer_interrupt(&self, kernel: &Kernel) {
        let interrupt = kernel.interrupt();
        let status = interrupt.disable();
        let now = interrupt.time();

        loop {
            let due = {
                let mut sleepers = self.sleepers.lock();
                match sleepers.first_key_value() {
                    Some((&(deadline, _), _)) if deadline <= now => {
                        sleepers.pop_first().map(|(_, thread)| thread)
                    }
                    _ => None,
                }
            };
            let Some(thread) = due else {
                break;
            };
            trace!("Waking {thread} at tick {now}");
            kernel.scheduler().ready(kernel, &thread);
        }

        kernel
            .scheduler()
            .yield_now(kernel, &threads::current_thread());
        interrupt.restore(kernel, status);
    }

    /// Put the current thread to sleep for at least `ticks` ticks
    ///
    /// The thread wakes on the first timer interrupt at or after the deadline. Returns
    /// immediately if `ticks` is not positive.
    pub fn wait_until(&self, ticks: i64) {
        let Ok(ticks) = u64::try_from(ticks) else {
            return;
        };
        if ticks == 0 {
            return;
        }

        let context = threads::context();
        let kernel = &context.kernel;
        let interrupt = kernel.interrupt();
        let status = interrupt.disable();
        let deadline = interrupt.time().saturating_add(ticks);
        let arrival = self.next_arrival.fetch_add(1, Ordering::SeqCst);
        trace!("{} sleeping until tick {deadline}", context.thread);
        self.sleepers
            .lock()
            .insert((deadline, arrival), context.thread.clone());
        kernel.scheduler().sleep(kernel, &context.thread);
        interrupt.restore(kernel, status);
    }

    /// Number of sleeping threads
    pub fn sleepers(&self) -> usize {
        self.sleepers.lock().len()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test::boot;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    #[test]
    fn never_wakes_early() {
        let kernel = boot();
        let start = kernel.time();
        kernel.alarm().wait_until(1200);
        assert!(kernel.time() >= start + 1200);
        assert_eq!(kernel.alarm().sleepers(), 0);
    }

    #[test]
    fn nonpositive_returns_immediately() {
        let kernel = boot();
        let start = kernel.time();
        kernel.alarm().wait_until(0);
        kernel.alarm().wait_until(-40);
        assert_eq!(kernel.time(), start);
    }

    #[test]
    fn wakes_soon_after_deadline() {
        let kernel = boot();
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let woken = Arc::new(Mutex::new(Vec::new()));

        let sleepers: Vec<_> = (0..8)
            .map(|_| {
                let delay: i64 = rng.gen_range(1..5000);
                let woken = woken.clone();
                threads::fork("sleeper", move || {
                    let kernel = threads::current_kernel();
                    let start = kernel.time();
                    kernel.alarm().wait_until(delay);
                    let now = kernel.time();
                    assert!(now >= start + delay as u64, "Woke early");
                    woken.lock().push((start + delay as u64, now));
                })
                .unwrap()
            })
            .collect();

        for sleeper in &sleepers {
            sleeper.join();
        }

        let woken = woken.lock();
        assert_eq!(woken.len(), 8);
        // Each timer interrupt wakes everybody due, and nobody misses their first chance
        let period = kernel.config().timer_period;
        for &(deadline, now) in woken.iter() {
            assert!(now < deadline + period + 100 * kernel.config().kernel_tick);
        }
    }
}
