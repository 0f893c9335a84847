//! Runtime detection of available system capabilities
//!
//! Probes the running kernel and system configuration to determine whether
//! the process monitor can actually do its job on this host, so the CLI can
//! report problems up front instead of failing mid-trace.

use std::path::Path;

/// Detected system capabilities for process monitoring
#[derive(Debug, Clone)]
pub struct SystemCapabilities {
    /// Running as root (euid == 0)
    pub has_root: bool,
    /// A process filesystem is mounted at /proc
    pub has_procfs: bool,
    /// Attaching to arbitrary processes is permitted
    pub has_ptrace: bool,
    /// An inotify instance can be created
    pub has_inotify: bool,
    /// Yama ptrace_scope sysctl value, if the LSM is present
    pub yama_scope: Option<u32>,
}

impl SystemCapabilities {
    /// Detect all available capabilities on the current system
    pub fn detect() -> Self {
        let has_root = detect_root();
        let yama_scope = read_yama_scope();
        Self {
            has_root,
            has_procfs: detect_procfs(),
            has_ptrace: detect_ptrace(has_root, yama_scope),
            has_inotify: detect_inotify(),
            yama_scope,
        }
    }

    /// Check if the monitor can run at all on this host
    pub fn can_monitor(&self) -> bool {
        self.has_procfs && self.has_ptrace && self.has_inotify
    }

    /// Get a human-readable summary of capabilities
    pub fn summary(&self) -> String {
        let mut lines = Vec::new();
        let check = |available: bool| if available { "[ok]" } else { "[--]" };

        lines.push(format!("{} Root privileges", check(self.has_root)));
        lines.push(format!("{} Process filesystem", check(self.has_procfs)));
        lines.push(format!("{} Ptrace attach", check(self.has_ptrace)));
        lines.push(format!("{} Inotify", check(self.has_inotify)));
        if let Some(scope) = self.yama_scope {
            lines.push(format!("     Yama ptrace_scope = {}", scope));
        }

        lines.join("\n")
    }
}

fn detect_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

fn detect_procfs() -> bool {
    Path::new("/proc/self/stat").exists()
}

fn read_yama_scope() -> Option<u32> {
    let content = std::fs::read_to_string("/proc/sys/kernel/yama/ptrace_scope").ok()?;
    content.trim().parse().ok()
}

fn detect_ptrace(has_root: bool, yama_scope: Option<u32>) -> bool {
    // Scope 3 disables attach entirely, even for root. Attaching to
    // arbitrary processes below that requires CAP_SYS_PTRACE.
    match yama_scope {
        Some(3) => false,
        _ => has_root,
    }
}

fn detect_inotify() -> bool {
    let fd = unsafe { libc::inotify_init1(libc::IN_CLOEXEC) };
    if fd >= 0 {
        unsafe { libc::close(fd) };
        return true;
    }
    false
}
