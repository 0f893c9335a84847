//! Filesystem watcher driving rule refresh and spawner rediscovery
//!
//! One inotify instance watches the directory holding the package database
//! (close-after-write) and the interpreter binaries (any access). The
//! descriptor runs in O_ASYNC mode with ownership pinned to the trace-loop
//! thread, so readiness arrives as SIGIO there; the loop then drains the
//! descriptor completely without ever blocking.

use std::ffi::OsString;
use std::io;
use std::os::fd::{AsFd, AsRawFd};
use std::path::Path;

use log::{debug, warn};
use nix::sys::inotify::{AddWatchFlags, InitFlags, Inotify};
use nix::unistd::gettid;

use procgate_core::{ProcGateError, Result};

use crate::config::MonitorConfig;

// This libc version doesn't expose these for glibc targets; values are the
// kernel's uapi/linux/fcntl.h definitions.
#[allow(non_camel_case_types)]
#[repr(C)]
struct f_owner_ex {
    type_: libc::c_int,
    pid: libc::pid_t,
}
const F_OWNER_TID: libc::c_int = 0;
const F_SETOWN_EX: libc::c_int = 15;

/// Summary of one full drain of the inotify descriptor.
#[derive(Debug, Default, Clone, Copy)]
pub struct Drained {
    /// Total events read
    pub events: usize,
    /// A close-after-write of the package database file was among them
    pub db_updated: bool,
}

pub struct Watcher {
    inner: Inotify,
    db_name: OsString,
}

impl Watcher {
    /// Set up all watches. Failure to create the instance or to watch the
    /// package database directory is fatal; a missing interpreter binary
    /// only costs rediscovery triggers and is logged.
    pub fn new(config: &MonitorConfig) -> Result<Self> {
        let inner = Inotify::init(InitFlags::IN_NONBLOCK | InitFlags::IN_CLOEXEC)
            .map_err(|e| ProcGateError::Watcher(format!("inotify_init: {}", e)))?;

        let db_dir = config.package_db.parent().unwrap_or(Path::new("/"));
        inner
            .add_watch(db_dir, AddWatchFlags::IN_CLOSE_WRITE)
            .map_err(|e| {
                ProcGateError::Watcher(format!("watch {}: {}", db_dir.display(), e))
            })?;

        for path in config.interpreter_candidates() {
            match inner.add_watch(&path, AddWatchFlags::IN_ACCESS) {
                Ok(_) => debug!("watcher: watching {}", path.display()),
                Err(e) => warn!("watcher: cannot watch {}: {}", path.display(), e),
            }
        }

        let db_name = config
            .package_db
            .file_name()
            .unwrap_or_default()
            .to_os_string();

        Ok(Self { inner, db_name })
    }

    /// Route descriptor readiness as SIGIO to the calling thread.
    ///
    /// nix has no F_SETOWN_EX wrapper, so the whole setup uses the raw
    /// calls.
    pub fn deliver_to_current_thread(&self) -> Result<()> {
        let fd = self.inner.as_fd().as_raw_fd();

        let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
        if flags < 0 {
            return Err(ProcGateError::Watcher(format!(
                "F_GETFL: {}",
                io::Error::last_os_error()
            )));
        }
        if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_ASYNC) } < 0 {
            return Err(ProcGateError::Watcher(format!(
                "F_SETFL: {}",
                io::Error::last_os_error()
            )));
        }

        let owner = f_owner_ex {
            type_: F_OWNER_TID,
            pid: gettid().as_raw(),
        };
        if unsafe { libc::fcntl(fd, F_SETOWN_EX, &owner) } < 0 {
            return Err(ProcGateError::Watcher(format!(
                "F_SETOWN_EX: {}",
                io::Error::last_os_error()
            )));
        }
        Ok(())
    }

    /// Read every pending event. Returns immediately when nothing is
    /// readable, so a spurious wake costs one failed read.
    pub fn drain(&self) -> Drained {
        let mut drained = Drained::default();
        loop {
            let events = match self.inner.read_events() {
                Ok(events) => events,
                Err(_) => break, // EAGAIN: descriptor is dry
            };
            for event in events {
                drained.events += 1;
                if event.mask.contains(AddWatchFlags::IN_CLOSE_WRITE)
                    && event.name.as_deref() == Some(self.db_name.as_os_str())
                {
                    drained.db_updated = true;
                }
            }
        }
        drained
    }
}
