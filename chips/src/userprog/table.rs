//! Process table
//!
//! The table owns every live process. Parents and children only refer to each other by PID, so a
//! process disappears as soon as the table lets go of it and nobody is running it.
use crate::{
    config::KernelConfig,
    userprog::{files::Console, process::UserProcess},
};
use alloc::{collections::BTreeMap, sync::Arc, vec::Vec};
use chips_abi::Pid;
use log::trace;
use spin::Mutex;

#[derive(Debug)]
struct TableInner {
    next_pid: Pid,
    processes: BTreeMap<Pid, Arc<UserProcess>>,
}

/// Every process the kernel knows about, by PID
#[derive(Debug)]
pub struct ProcessTable {
    inner: Mutex<TableInner>,
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable {
    /// Construct an empty table. The first process created gets [Pid::ROOT]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(TableInner {
                next_pid: Pid::ROOT,
                processes: BTreeMap::new(),
            }),
        }
    }

    /// Create a process with a fresh PID
    pub fn create(
        &self,
        config: &KernelConfig,
        console: &Console,
        num_phys_pages: usize,
    ) -> Arc<UserProcess> {
        let mut inner = self.inner.lock();
        let pid = inner.next_pid;
        inner.next_pid = pid.next();

        let process = Arc::new(UserProcess::new(pid, config, console, num_phys_pages));
        inner.processes.insert(pid, process.clone());
        trace!("Created process {pid}");
        process
    }

    /// Look up a process
    pub fn get(&self, pid: Pid) -> Option<Arc<UserProcess>> {
        self.inner.lock().processes.get(&pid).cloned()
    }

    /// Drop the table's hold on a process
    pub fn remove(&self, pid: Pid) -> Option<Arc<UserProcess>> {
        trace!("Removing process {pid}");
        self.inner.lock().processes.remove(&pid)
    }

    /// Return true if `pid` is in the table
    pub fn contains(&self, pid: Pid) -> bool {
        self.inner.lock().processes.contains_key(&pid)
    }

    /// PIDs of every process in the table
    pub fn pids(&self) -> Vec<Pid> {
        self.inner.lock().processes.keys().copied().collect()
    }

    /// Number of processes in the table
    pub fn len(&self) -> usize {
        self.inner.lock().processes.len()
    }

    /// Return true if the table is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
