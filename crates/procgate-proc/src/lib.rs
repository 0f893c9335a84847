//! procgate-proc: best-effort readers over the process filesystem
//!
//! Every function here tolerates the process vanishing mid-query: a missing
//! or unreadable entry yields `None` (or an empty iteration), never an
//! error. The trace loop calls these on every event, often for processes
//! that are a few microseconds from being reaped.

use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use nix::unistd::Pid;

/// Identity of a mount namespace, taken from the stat of `/proc/PID/ns/mnt`.
///
/// Two processes share a mount namespace iff their identities are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MntNsId {
    pub dev: u64,
    pub ino: u64,
}

/// Read the parent PID from `/proc/PID/stat`.
///
/// The comm field may contain spaces or parentheses, so fields are taken
/// after the last `)` rather than by naive whitespace splitting.
pub fn parent_of(pid: Pid) -> Option<Pid> {
    let stat = fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
    let (_, rest) = stat.rsplit_once(')')?;
    // rest: " STATE PPID PGRP ..."
    let ppid = rest.split_whitespace().nth(1)?;
    ppid.parse().ok().map(Pid::from_raw)
}

/// Read the canonical process name: the first NUL-terminated token of
/// `/proc/PID/cmdline`. Kernel threads (empty cmdline) yield `None`.
pub fn name_of(pid: Pid) -> Option<String> {
    let raw = fs::read(format!("/proc/{}/cmdline", pid)).ok()?;
    let first = raw.split(|&b| b == 0).next()?;
    if first.is_empty() {
        return None;
    }
    Some(String::from_utf8_lossy(first).into_owned())
}

/// Owning UID of the process, from the `/proc/PID` directory inode.
pub fn uid_of(pid: Pid) -> Option<u32> {
    let meta = fs::metadata(format!("/proc/{}", pid)).ok()?;
    Some(meta.uid())
}

/// Mount-namespace identity of the process.
pub fn mnt_ns_of(pid: Pid) -> Option<MntNsId> {
    let meta = fs::metadata(format!("/proc/{}/ns/mnt", pid)).ok()?;
    Some(MntNsId {
        dev: meta.dev(),
        ino: meta.ino(),
    })
}

/// All thread IDs of a process, from `/proc/PID/task`. Includes the main
/// thread. Empty if the process is gone.
pub fn threads_of(pid: Pid) -> Vec<Pid> {
    numeric_entries(&format!("/proc/{}/task", pid))
}

/// Invoke `f` for every live PID, in directory order.
pub fn for_each_pid<F: FnMut(Pid)>(mut f: F) {
    for pid in numeric_entries("/proc") {
        f(pid);
    }
}

fn numeric_entries(dir: impl AsRef<Path>) -> Vec<Pid> {
    let mut pids = Vec::new();
    let Ok(entries) = fs::read_dir(dir) else {
        return pids;
    };
    for entry in entries.flatten() {
        if let Some(name) = entry.file_name().to_str()
            && let Ok(pid) = name.parse::<i32>()
        {
            pids.push(Pid::from_raw(pid));
        }
    }
    pids
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::{getpid, getppid};

    #[test]
    fn parent_of_self_matches_getppid() {
        assert_eq!(parent_of(getpid()), Some(getppid()));
    }

    #[test]
    fn parent_of_missing_pid_is_none() {
        assert_eq!(parent_of(Pid::from_raw(9_999_999)), None);
    }

    #[test]
    fn name_of_self_is_present() {
        let name = name_of(getpid()).unwrap();
        assert!(!name.is_empty());
    }

    #[test]
    fn name_of_missing_pid_is_none() {
        assert_eq!(name_of(Pid::from_raw(9_999_999)), None);
    }

    #[test]
    fn uid_of_self_matches_euid() {
        let uid = uid_of(getpid()).unwrap();
        assert_eq!(uid, unsafe { libc::geteuid() });
    }

    #[test]
    fn mnt_ns_of_self_is_stable() {
        let a = mnt_ns_of(getpid()).unwrap();
        let b = mnt_ns_of(getpid()).unwrap();
        assert_eq!(a, b);
        assert!(a.ino != 0);
    }

    #[test]
    fn mnt_ns_of_parent_matches_self() {
        // The test runner and its child live in the same mount namespace
        assert_eq!(mnt_ns_of(getpid()), mnt_ns_of(getppid()));
    }

    #[test]
    fn threads_of_self_contains_main() {
        let tids = threads_of(getpid());
        assert!(tids.contains(&getpid()));
    }

    #[test]
    fn threads_of_missing_pid_is_empty() {
        assert!(threads_of(Pid::from_raw(9_999_999)).is_empty());
    }

    #[test]
    fn for_each_pid_sees_self() {
        let mut seen = false;
        for_each_pid(|pid| {
            if pid == getpid() {
                seen = true;
            }
        });
        assert!(seen);
    }

    #[test]
    fn stat_parse_survives_hostile_comm() {
        // Not a live read, but the parser itself must take fields after the
        // last ')' so a comm like "a) S 1" cannot shift the PPID field.
        let line = "4242 (a) S 1) S 777 4242 4242 0 -1";
        let (_, rest) = line.rsplit_once(')').unwrap();
        let ppid: i32 = rest.split_whitespace().nth(1).unwrap().parse().unwrap();
        assert_eq!(ppid, 777);
    }
}
