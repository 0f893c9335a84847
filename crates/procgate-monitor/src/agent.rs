//! Detached launch of the hand-off agent
//!
//! When a target is found it is left stopped and untraced; the agent
//! process takes over from there and is responsible for resuming it. The
//! agent must not become a waitable child of the monitor: the trace loop
//! reaps with `waitpid(-1)` and would otherwise observe agent exits.

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use log::debug;
use nix::sys::wait::waitpid;
use nix::unistd::{ForkResult, Pid, execv, fork};

use procgate_core::{ProcGateError, Result};

/// Launch `program <pid>` reparented to init.
///
/// Double-forks: the intermediate child exits immediately and is reaped
/// here, the grandchild execs the agent. Exec failures surface only in the
/// agent's exit status; by then the process is not ours to observe.
pub fn launch(program: &Path, target: Pid) -> Result<()> {
    let prog = CString::new(program.as_os_str().as_bytes())
        .map_err(|_| ProcGateError::Agent("agent path contains a NUL byte".to_string()))?;
    let pid_arg = CString::new(target.as_raw().to_string())
        .map_err(|_| ProcGateError::Agent("unrepresentable target pid".to_string()))?;

    match unsafe { fork() }.map_err(|e| ProcGateError::Agent(format!("fork: {}", e)))? {
        ForkResult::Parent { child } => {
            if let Err(e) = waitpid(child, None) {
                debug!("agent: reaping intermediate {}: {}", child, e);
            }
            Ok(())
        }
        ForkResult::Child => match unsafe { fork() } {
            Ok(ForkResult::Child) => {
                let _ = execv(&prog, &[prog.as_c_str(), pid_arg.as_c_str()]);
                unsafe { libc::_exit(127) }
            }
            Ok(ForkResult::Parent { .. }) => unsafe { libc::_exit(0) },
            Err(_) => unsafe { libc::_exit(1) },
        },
    }
}
