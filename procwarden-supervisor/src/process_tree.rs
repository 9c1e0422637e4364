use parking_lot::RwLock;
use procwarden_core::{ProcessEntry, ProcessTree, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use sysinfo::{ProcessesToUpdate, System};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::platform;

/// Process table backed by `sysinfo`, with a snapshot that is refreshed on a
/// timer and consulted when a live query is inconclusive.
#[derive(Debug, Default)]
pub struct SystemProcessTree {
    snapshot: RwLock<Vec<ProcessEntry>>,
}

impl SystemProcessTree {
    pub fn new() -> Self {
        Self::default()
    }

    fn query() -> Vec<ProcessEntry> {
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::All, true);
        system
            .processes()
            .iter()
            .filter(|(_, process)| process.thread_kind().is_none())
            .map(|(pid, process)| ProcessEntry {
                pid: pid.as_u32(),
                parent: process.parent().map(|p| p.as_u32()),
                exe: process.name().to_string_lossy().into_owned(),
            })
            .collect()
    }

    /// Replaces the snapshot with a fresh listing, returning its size.
    pub fn refresh(&self) -> usize {
        let entries = Self::query();
        let count = entries.len();
        *self.snapshot.write() = entries;
        count
    }

    pub fn in_snapshot(&self, pid: u32) -> bool {
        self.snapshot.read().iter().any(|entry| entry.pid == pid)
    }

    pub fn spawn_refresher(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let tree = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                let worker = tree.clone();
                match tokio::task::spawn_blocking(move || worker.refresh()).await {
                    Ok(count) => debug!("Process snapshot refreshed, {} entries", count),
                    Err(e) => warn!("Failed to list all processes: {}", e),
                }
            }
        })
    }
}

impl ProcessTree for SystemProcessTree {
    fn list(&self) -> Result<Vec<ProcessEntry>> {
        let entries = Self::query();
        *self.snapshot.write() = entries.clone();
        Ok(entries)
    }

    fn kill_one(&self, pid: u32) -> Result<()> {
        platform::kill_pid(pid)
    }

    fn is_alive(&self, pid: u32) -> bool {
        platform::probe(pid).unwrap_or_else(|| self.in_snapshot(pid))
    }
}

/// Kills `pid` and all of its descendants, children before parents.
///
/// Returns the pids in the order they were killed. Only a failure to kill
/// `pid` itself is an error; descendant failures are logged.
pub fn kill_tree(tree: &dyn ProcessTree, pid: u32) -> Result<Vec<u32>> {
    let entries = match tree.list() {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Failed to list processes, killing pid {} alone: {}", pid, e);
            tree.kill_one(pid)?;
            return Ok(vec![pid]);
        }
    };

    let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
    for entry in &entries {
        if let Some(parent) = entry.parent
            && parent != entry.pid
        {
            children.entry(parent).or_default().push(entry.pid);
        }
    }

    let mut order = Vec::new();
    let mut visited = HashSet::new();
    collect_post_order(pid, &children, &mut visited, &mut order);

    for &child in &order[..order.len().saturating_sub(1)] {
        if let Err(e) = tree.kill_one(child) {
            debug!("Failed to kill descendant {} of {}: {}", child, pid, e);
        }
    }
    tree.kill_one(pid)?;

    Ok(order)
}

fn collect_post_order(
    pid: u32,
    children: &HashMap<u32, Vec<u32>>,
    visited: &mut HashSet<u32>,
    order: &mut Vec<u32>,
) {
    if !visited.insert(pid) {
        return;
    }
    if let Some(kids) = children.get(&pid) {
        for &kid in kids {
            collect_post_order(kid, children, visited, order);
        }
    }
    order.push(pid);
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct FakeTree {
        entries: Vec<ProcessEntry>,
        killed: Mutex<Vec<u32>>,
        fail_list: bool,
    }

    impl FakeTree {
        fn new(pairs: &[(u32, Option<u32>)]) -> Self {
            Self {
                entries: pairs
                    .iter()
                    .map(|&(pid, parent)| ProcessEntry {
                        pid,
                        parent,
                        exe: format!("proc{}", pid),
                    })
                    .collect(),
                killed: Mutex::new(Vec::new()),
                fail_list: false,
            }
        }
    }

    impl ProcessTree for FakeTree {
        fn list(&self) -> Result<Vec<ProcessEntry>> {
            if self.fail_list {
                return Err(procwarden_core::Error::Signal("no process table".into()));
            }
            Ok(self.entries.clone())
        }

        fn kill_one(&self, pid: u32) -> Result<()> {
            self.killed.lock().push(pid);
            Ok(())
        }

        fn is_alive(&self, pid: u32) -> bool {
            !self.killed.lock().contains(&pid)
        }
    }

    #[test]
    fn test_kill_tree_post_order() {
        // 10 -> 11 -> 13
        //    -> 12
        let tree = FakeTree::new(&[
            (1, None),
            (10, Some(1)),
            (11, Some(10)),
            (12, Some(10)),
            (13, Some(11)),
            (20, Some(1)),
        ]);

        let order = kill_tree(&tree, 10).unwrap();
        assert_eq!(order, vec![13, 11, 12, 10]);
        assert_eq!(*tree.killed.lock(), vec![13, 11, 12, 10]);
        assert!(tree.is_alive(20));
    }

    #[test]
    fn test_kill_tree_leaf() {
        let tree = FakeTree::new(&[(1, None), (5, Some(1))]);
        assert_eq!(kill_tree(&tree, 5).unwrap(), vec![5]);
    }

    #[test]
    fn test_kill_tree_tolerates_cycles() {
        let tree = FakeTree::new(&[(7, Some(8)), (8, Some(7))]);
        let order = kill_tree(&tree, 7).unwrap();
        assert_eq!(order, vec![8, 7]);
    }

    #[test]
    fn test_kill_tree_without_listing() {
        let mut tree = FakeTree::new(&[(5, Some(1))]);
        tree.fail_list = true;
        assert_eq!(kill_tree(&tree, 5).unwrap(), vec![5]);
    }

    #[test]
    fn test_system_tree_sees_self() {
        let tree = SystemProcessTree::new();
        let me = std::process::id();
        assert!(tree.is_alive(me));

        let entries = tree.list().unwrap();
        assert!(entries.iter().any(|e| e.pid == me));
        assert!(tree.in_snapshot(me));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_system_tree_skips_threads() {
        let me = std::process::id();
        let threads: Vec<u32> = std::fs::read_dir("/proc/self/task")
            .unwrap()
            .filter_map(|entry| entry.ok()?.file_name().to_str()?.parse().ok())
            .filter(|&tid| tid != me)
            .collect();
        assert!(!threads.is_empty());

        let entries = SystemProcessTree::new().list().unwrap();
        assert!(entries.iter().any(|e| e.pid == me));
        for tid in threads {
            assert!(
                !entries.iter().any(|e| e.pid == tid),
                "thread {} listed as a process",
                tid
            );
        }
    }
}
