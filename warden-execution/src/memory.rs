//! Resident memory sampling for process trees

use std::collections::HashMap;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

const BYTES_PER_GIB: f64 = (1u64 << 30) as f64;

/// Convert a byte count to GiB
pub fn bytes_to_gib(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_GIB
}

/// Samples the resident memory of a process and all of its descendants.
///
/// Keeps one `System` alive between samples so repeated refreshes only pay
/// for the process table, not for setup.
pub struct MemoryProbe {
    system: System,
}

impl MemoryProbe {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }

    /// Take a fresh snapshot of the process table
    pub fn refresh(&mut self) {
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing().with_memory(),
        );
    }

    /// Resident bytes of `pid` alone, as of the last [`refresh`](Self::refresh)
    pub fn process_rss_bytes(&self, pid: u32) -> Option<u64> {
        self.system
            .processes()
            .get(&Pid::from_u32(pid))
            .map(|process| process.memory())
    }

    /// Resident bytes of `root` and its descendants, as of the last
    /// [`refresh`](Self::refresh).
    ///
    /// Returns `None` when `root` is not in the snapshot.
    pub fn sampled_tree_rss_bytes(&self, root: u32) -> Option<u64> {
        let root = Pid::from_u32(root);
        let processes = self.system.processes();
        let root_process = processes.get(&root)?;

        let mut children: HashMap<Pid, Vec<Pid>> = HashMap::new();
        for (pid, process) in processes {
            // Threads share their parent's memory
            if process.thread_kind().is_some() {
                continue;
            }
            if let Some(parent) = process.parent() {
                children.entry(parent).or_default().push(*pid);
            }
        }

        let mut total = root_process.memory();
        let mut stack: Vec<Pid> = children.get(&root).cloned().unwrap_or_default();
        while let Some(pid) = stack.pop() {
            if let Some(process) = processes.get(&pid) {
                total += process.memory();
            }
            if let Some(grandchildren) = children.get(&pid) {
                stack.extend(grandchildren.iter().copied());
            }
        }

        Some(total)
    }

    /// Refresh, then total resident bytes of `root` and its descendants.
    ///
    /// Returns `None` when `root` no longer exists.
    pub fn tree_rss_bytes(&mut self, root: u32) -> Option<u64> {
        self.refresh();
        self.sampled_tree_rss_bytes(root)
    }

    /// Like [`tree_rss_bytes`](Self::tree_rss_bytes), in GiB. A vanished root reads as zero.
    pub fn tree_rss_gib(&mut self, root: u32) -> f64 {
        self.tree_rss_bytes(root).map(bytes_to_gib).unwrap_or(0.0)
    }
}

impl Default for MemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}
