//! Spawner discovery and the attach protocol
//!
//! A spawner is a long-lived process whose command line starts with the
//! configured prefix and whose parent is PID 1. Registering one attaches to
//! it with fork/vfork/exit stop events enabled, so every child it creates
//! surfaces in the trace loop.

use log::debug;
use nix::sys::ptrace::{self, Options};
use nix::sys::wait::{WaitPidFlag, waitpid};
use nix::unistd::Pid;

use procgate_proc as procfs;

use crate::config::MonitorConfig;
use crate::state::MonitorState;

/// Scan all of /proc and register every spawner found.
///
/// Idempotent: already-registered spawners only get their namespace
/// identity refreshed.
pub fn discover_all(config: &MonitorConfig, state: &mut MonitorState) {
    procfs::for_each_pid(|pid| {
        let Some(name) = procfs::name_of(pid) else {
            return;
        };
        if !name.starts_with(&config.spawner_prefix) {
            return;
        }
        if procfs::parent_of(pid) != Some(Pid::from_raw(1)) {
            return;
        }
        register(state, pid);
    });
}

/// Register one spawner.
///
/// Attach protocol: stat the mount namespace, attach, consume the initial
/// stop, enable fork/vfork/exit stops, resume. The registry entry is made
/// only once the options are in place, so every registered PID is
/// guaranteed to be generating events.
pub fn register(state: &mut MonitorState, pid: Pid) {
    let Some(ns) = procfs::mnt_ns_of(pid) else {
        return;
    };

    if state.is_spawner(pid) {
        // The spawner re-exec'd; refresh the namespace identity
        state.insert_spawner(pid, ns);
        return;
    }

    debug!("spawner: attaching to pid={}", pid);
    if let Err(e) = ptrace::attach(pid) {
        debug!("spawner: attach pid={}: {}", pid, e);
        return;
    }
    if let Err(e) = waitpid(pid, Some(WaitPidFlag::__WALL | WaitPidFlag::__WNOTHREAD)) {
        debug!("spawner: initial stop pid={}: {}", pid, e);
        let _ = ptrace::detach(pid, None);
        return;
    }
    let options =
        Options::PTRACE_O_TRACEFORK | Options::PTRACE_O_TRACEVFORK | Options::PTRACE_O_TRACEEXIT;
    if let Err(e) = ptrace::setoptions(pid, options) {
        debug!("spawner: setoptions pid={}: {}", pid, e);
        let _ = ptrace::detach(pid, None);
        return;
    }

    state.insert_spawner(pid, ns);

    if let Err(e) = ptrace::cont(pid, None) {
        debug!("spawner: resume pid={}: {}", pid, e);
    }
}

/// The kernel delivered an exit event for this spawner. The trace link is
/// already severed; only the registry entry needs to go.
pub fn on_exit(state: &mut MonitorState, pid: Pid) {
    if state.remove_spawner(pid) {
        debug!("spawner: pid={} exited", pid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_vanished_pid_is_a_noop() {
        let mut state = MonitorState::new();
        register(&mut state, Pid::from_raw(9_999_999));
        assert_eq!(state.spawner_count(), 0);
    }

    #[test]
    fn on_exit_unknown_pid_is_a_noop() {
        let mut state = MonitorState::new();
        on_exit(&mut state, Pid::from_raw(9_999_999));
        assert_eq!(state.spawner_count(), 0);
    }

    #[test]
    fn discover_all_skips_non_matching_processes() {
        // No process on a test host is named like this, so the scan must
        // simply come back empty without touching the registry.
        let config = MonitorConfig::builder()
            .agent("/tmp/agent")
            .spawner_prefix("procgate-test-no-such-spawner")
            .build()
            .unwrap();
        let mut state = MonitorState::new();
        discover_all(&config, &mut state);
        assert_eq!(state.spawner_count(), 0);
    }
}
