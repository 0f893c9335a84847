//! Shared monitor state
//!
//! All maps the monitor works with live in one struct behind one mutex:
//! the refresh path mutates several of them atomically, so per-map locks
//! would only invite ordering bugs.

use std::collections::{HashMap, HashSet};

use nix::unistd::Pid;
use procgate_proc::MntNsId;
use procgate_rules::RuleStore;

/// Process-wide monitor state.
///
/// A PID is never in the attach set and the detach set at the same time;
/// the mutators below maintain that.
#[derive(Debug, Default)]
pub struct MonitorState {
    /// Rule table and the UID → process-name map
    pub rules: RuleStore,
    /// Traced spawners and their mount-namespace identity at attach time
    spawners: HashMap<Pid, MntNsId>,
    /// Children awaiting classification on their next clone event
    attaches: HashSet<Pid>,
    /// Threads whose next stop must cause an immediate detach
    detaches: HashSet<Pid>,
}

impl MonitorState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_spawner(&self, pid: Pid) -> bool {
        self.spawners.contains_key(&pid)
    }

    /// Insert or update a spawner's namespace identity.
    pub fn insert_spawner(&mut self, pid: Pid, ns: MntNsId) {
        self.spawners.insert(pid, ns);
    }

    pub fn remove_spawner(&mut self, pid: Pid) -> bool {
        self.spawners.remove(&pid).is_some()
    }

    pub fn spawner_ns(&self, pid: Pid) -> Option<MntNsId> {
        self.spawners.get(&pid).copied()
    }

    pub fn spawner_count(&self) -> usize {
        self.spawners.len()
    }

    /// True if `ns` is the mount namespace of any registered spawner,
    /// i.e. the child has not yet been given a namespace of its own.
    pub fn ns_is_spawner(&self, ns: MntNsId) -> bool {
        self.spawners.values().any(|s| *s == ns)
    }

    pub fn spawner_ns_ids(&self) -> Vec<MntNsId> {
        self.spawners.values().copied().collect()
    }

    /// Mark a freshly forked child for classification on its next clone.
    pub fn expect_attach(&mut self, pid: Pid) {
        self.detaches.remove(&pid);
        self.attaches.insert(pid);
    }

    pub fn is_attach_pending(&self, pid: Pid) -> bool {
        self.attaches.contains(&pid)
    }

    /// Mark a thread for unconditional detach on its next stop.
    pub fn expect_detach(&mut self, tid: Pid) {
        self.attaches.remove(&tid);
        self.detaches.insert(tid);
    }

    pub fn is_detach_pending(&self, tid: Pid) -> bool {
        self.detaches.contains(&tid)
    }

    /// Drop a PID from both transient sets.
    pub fn forget(&mut self, pid: Pid) {
        self.attaches.remove(&pid);
        self.detaches.remove(&pid);
    }

    /// Teardown: drop every rule, spawner, and transient marker.
    pub fn clear_all(&mut self) {
        self.rules.clear();
        self.spawners.clear();
        self.attaches.clear();
        self.detaches.clear();
    }
}
