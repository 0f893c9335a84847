//! The trace loop
//!
//! One thread owns every tracee. It waits for any traced descendant to
//! change state, interprets the stop, and either re-arms the tracee,
//! classifies it, or lets it go. Asynchronous signals are the only way in
//! from outside: SIGIO wakes the loop for watcher work, SIGUSR2 terminates
//! it. Handlers do nothing but set flags; all real work happens in loop
//! context under the state mutex.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, info, warn};
use nix::errno::Errno;
use nix::sys::ptrace::{self, Options};
use nix::sys::signal::{
    SaFlags, SigAction, SigHandler, SigSet, Signal, SigmaskHow, pthread_sigmask, sigaction,
};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::{Pid, pause};

use procgate_core::{ProcGateError, Result};
use procgate_proc as procfs;
use procgate_proc::MntNsId;
use procgate_rules::RuleStore;

use crate::agent;
use crate::config::MonitorConfig;
use crate::spawner;
use crate::state::MonitorState;
use crate::watcher::Watcher;

/// Delivered by the watcher when the inotify descriptor becomes readable.
pub const REFRESH_SIGNAL: Signal = Signal::SIGIO;
/// Ends the trace loop cooperatively.
pub const TERMINATE_SIGNAL: Signal = Signal::SIGUSR2;

static WATCH_PENDING: AtomicBool = AtomicBool::new(false);
static TERMINATE: AtomicBool = AtomicBool::new(false);

extern "C" fn on_refresh_signal(_: libc::c_int) {
    WATCH_PENDING.store(true, Ordering::SeqCst);
}

extern "C" fn on_terminate_signal(_: libc::c_int) {
    TERMINATE.store(true, Ordering::SeqCst);
}

/// Register the terminate disposition for an additional signal, so an
/// embedding daemon can route e.g. SIGTERM into the monitor's shutdown.
pub fn bind_shutdown_signal(signal: Signal) -> Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(on_terminate_signal),
        SaFlags::empty(),
        SigSet::empty(),
    );
    unsafe { sigaction(signal, &action) }
        .map_err(|e| ProcGateError::Syscall(format!("sigaction {}: {}", signal, e)))?;
    Ok(())
}

fn install_signal_handlers() -> Result<()> {
    // No SA_RESTART: the wait and the idle pause must come back with EINTR
    // so flag work gets serviced.
    let refresh = SigAction::new(
        SigHandler::Handler(on_refresh_signal),
        SaFlags::empty(),
        SigSet::empty(),
    );
    let terminate = SigAction::new(
        SigHandler::Handler(on_terminate_signal),
        SaFlags::empty(),
        SigSet::empty(),
    );
    unsafe {
        sigaction(REFRESH_SIGNAL, &refresh)
            .map_err(|e| ProcGateError::Syscall(format!("sigaction SIGIO: {}", e)))?;
        sigaction(TERMINATE_SIGNAL, &terminate)
            .map_err(|e| ProcGateError::Syscall(format!("sigaction SIGUSR2: {}", e)))?;
    }

    let mut unblock = SigSet::empty();
    unblock.add(REFRESH_SIGNAL);
    unblock.add(TERMINATE_SIGNAL);
    pthread_sigmask(SigmaskHow::SIG_UNBLOCK, Some(&unblock), None)
        .map_err(|e| ProcGateError::Syscall(format!("pthread_sigmask: {}", e)))?;
    Ok(())
}

/// What classification did to the inspected child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Classify {
    /// Not a target; the whole thread group has been released.
    Detached,
    /// Target: detached with SIGSTOP delivered, agent launched.
    HandedOff,
}

/// The pure classification decision, over facts already read from /proc.
/// Any missing fact means the process vanished mid-query and cannot be a
/// target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision {
    Target,
    NotTarget,
}

fn decide(
    name: Option<&str>,
    uid: Option<u32>,
    mnt_ns: Option<MntNsId>,
    spawner_prefix: &str,
    rules: &RuleStore,
    spawner_ns: &[MntNsId],
) -> Decision {
    let Some(name) = name else {
        return Decision::NotTarget;
    };
    // A spawner variant is never a target; discovery picks it up instead
    if name.starts_with(spawner_prefix) {
        return Decision::NotTarget;
    }
    let Some(uid) = uid else {
        return Decision::NotTarget;
    };
    if !rules.matches(uid % 100000, name) {
        return Decision::NotTarget;
    }
    let Some(mnt_ns) = mnt_ns else {
        return Decision::NotTarget;
    };
    // Still in a spawner's mount namespace: the unshare has not happened
    // yet, a later event will re-run this check
    if spawner_ns.contains(&mnt_ns) {
        return Decision::NotTarget;
    }
    Decision::Target
}

/// The tracing supervisor. `run` owns the calling thread until the
/// terminate signal arrives.
pub struct Monitor {
    config: MonitorConfig,
    state: Arc<Mutex<MonitorState>>,
}

impl Monitor {
    pub fn new(config: MonitorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            state: Arc::new(Mutex::new(MonitorState::new())),
        })
    }

    /// Shared handle to the monitor state, for rule updates from other
    /// threads. Never hold the lock across anything that blocks.
    pub fn state(&self) -> Arc<Mutex<MonitorState>> {
        Arc::clone(&self.state)
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Run the trace loop on the current thread.
    ///
    /// Returns `Ok(())` after the terminate signal, or an error if the
    /// watcher cannot be set up at all.
    pub fn run(self) -> Result<()> {
        let watcher = Watcher::new(&self.config)?;
        install_signal_handlers()?;
        watcher.deliver_to_current_thread()?;

        {
            let mut st = self.state.lock().expect("monitor lock poisoned");
            st.rules.refresh_from_package_db(&self.config.package_db);
            spawner::discover_all(&self.config, &mut st);
            info!("monitor: started with {} spawner(s)", st.spawner_count());
        }

        let flags = WaitPidFlag::__WALL | WaitPidFlag::__WNOTHREAD;
        loop {
            if TERMINATE.swap(false, Ordering::SeqCst) {
                self.teardown();
                return Ok(());
            }
            if WATCH_PENDING.swap(false, Ordering::SeqCst) {
                self.service_watch(&watcher);
            }

            match waitpid(None::<Pid>, Some(flags)) {
                Ok(status) => self.dispatch(status),
                Err(Errno::ECHILD) => {
                    // True quiescence: nothing traced anywhere. Park until
                    // a signal (watcher or terminate) wakes us.
                    debug!("monitor: nothing to trace, waiting for a signal");
                    pause();
                }
                Err(Errno::EINTR) => {}
                Err(e) => debug!("monitor: wait: {}", e),
            }
        }
    }

    /// One watcher wake: drain everything readable, rebuild the UID map if
    /// the package database was rewritten, re-scan for spawners. A wake
    /// with nothing readable is spurious and costs nothing further.
    fn service_watch(&self, watcher: &Watcher) {
        let drained = watcher.drain();
        if drained.events == 0 {
            return;
        }

        let mut st = self.state.lock().expect("monitor lock poisoned");
        if drained.db_updated {
            debug!("monitor: package database changed, rebuilding uid map");
            st.rules.refresh_from_package_db(&self.config.package_db);
        }
        spawner::discover_all(&self.config, &mut st);
    }

    fn dispatch(&self, status: WaitStatus) {
        let Some(pid) = status.pid() else {
            return;
        };
        let mut st = self.state.lock().expect("monitor lock poisoned");

        // Anything that is not a ptrace-stop, and any thread already
        // sentenced to detach, is let go unconditionally.
        let is_stop = matches!(
            status,
            WaitStatus::Stopped(..) | WaitStatus::PtraceEvent(..) | WaitStatus::PtraceSyscall(..)
        );
        if !is_stop || st.is_detach_pending(pid) {
            release(&mut st, pid);
            return;
        }

        match status {
            WaitStatus::PtraceEvent(_, Signal::SIGTRAP, event) => {
                if st.is_spawner(pid) {
                    self.spawner_event(&mut st, pid, event);
                } else {
                    self.tracee_event(&mut st, pid, event);
                }
            }
            WaitStatus::Stopped(_, Signal::SIGSTOP) => {
                // First stop of a freshly attached child. Arm it so its
                // first clone, once the spawner finished specializing it,
                // produces an event we can classify on.
                let options = Options::PTRACE_O_TRACECLONE
                    | Options::PTRACE_O_TRACEEXEC
                    | Options::PTRACE_O_TRACEEXIT;
                if let Err(e) = ptrace::setoptions(pid, options) {
                    debug!("monitor: setoptions pid={}: {}", pid, e);
                }
                resume(pid, None);
            }
            WaitStatus::Stopped(_, sig) => {
                // Not caused by us; transport the signal to the tracee
                resume(pid, Some(sig));
            }
            _ => release(&mut st, pid),
        }
    }

    fn spawner_event(&self, st: &mut MonitorState, pid: Pid, event: i32) {
        match event {
            libc::PTRACE_EVENT_FORK | libc::PTRACE_EVENT_VFORK => {
                match ptrace::getevent(pid) {
                    Ok(msg) => {
                        let child = Pid::from_raw(msg as i32);
                        debug!("monitor: spawner {} forked {}", pid, child);
                        st.expect_attach(child);
                    }
                    Err(e) => debug!("monitor: getevent pid={}: {}", pid, e),
                }
                // The child surfaces in a later wait; only the spawner is
                // resumed here
                resume(pid, None);
            }
            libc::PTRACE_EVENT_EXIT => {
                spawner::on_exit(st, pid);
                release(st, pid);
            }
            _ => {
                // Detaching breaks the trace link, so the registration
                // cannot outlive it
                st.remove_spawner(pid);
                release(st, pid);
            }
        }
    }

    fn tracee_event(&self, st: &mut MonitorState, pid: Pid, event: i32) {
        match event {
            libc::PTRACE_EVENT_CLONE => {
                if st.is_attach_pending(pid) {
                    // Classification always ends with the pid detached or
                    // handed off; neither outcome is resumed here
                    self.classify(st, pid);
                } else {
                    resume(pid, None);
                }
            }
            // Exec and exit make the tracee uninteresting
            _ => release(st, pid),
        }
    }

    /// Inspect a child that just produced its first clone event.
    fn classify(&self, st: &mut MonitorState, pid: Pid) -> Classify {
        let name = procfs::name_of(pid);
        let uid = procfs::uid_of(pid);
        let mnt_ns = procfs::mnt_ns_of(pid);
        let spawner_ns = st.spawner_ns_ids();

        match decide(
            name.as_deref(),
            uid,
            mnt_ns,
            &self.config.spawner_prefix,
            &st.rules,
            &spawner_ns,
        ) {
            Decision::NotTarget => {
                debug!("monitor: pid={} is not a target", pid);
                detach_tree(st, pid, None);
                Classify::Detached
            }
            Decision::Target => {
                info!(
                    "monitor: target [{}] pid={} uid={}",
                    name.as_deref().unwrap_or("?"),
                    pid,
                    uid.unwrap_or(0) % 100000
                );
                // Detach but leave the target stopped; the agent resumes it
                detach_tree(st, pid, Some(Signal::SIGSTOP));
                if let Err(e) = agent::launch(&self.config.agent, pid) {
                    warn!("monitor: agent launch for pid={}: {}", pid, e);
                }
                Classify::HandedOff
            }
        }
    }

    fn teardown(&self) {
        debug!("monitor: cleaning up");
        let mut st = self.state.lock().expect("monitor lock poisoned");
        st.clear_all();
        info!("monitor: terminated");
    }
}

fn resume(pid: Pid, sig: Option<Signal>) {
    if let Err(e) = ptrace::cont(pid, sig) {
        debug!("monitor: resume pid={}: {}", pid, e);
    }
}

/// Unconditional single-thread release: clear both transient sets and
/// detach best-effort. Used for everything rule (1) catches.
fn release(st: &mut MonitorState, pid: Pid) {
    st.forget(pid);
    if let Err(e) = ptrace::detach(pid, None) {
        debug!("monitor: detach pid={}: {}", pid, e);
    }
}

/// Release an entire thread group from the trace. The main thread is
/// detached directly (optionally with a signal left pending); sibling
/// threads that are already waitable are detached on the spot, the rest
/// are marked for detach and nudged with a thread-directed SIGSTOP so
/// their next stop falls to the DetachSet rule.
fn detach_tree(st: &mut MonitorState, pid: Pid, sig: Option<Signal>) {
    st.forget(pid);
    if let Err(e) = ptrace::detach(pid, sig) {
        debug!("monitor: detach pid={}: {}", pid, e);
    }

    for tid in procfs::threads_of(pid) {
        if tid == pid {
            continue;
        }
        let flags = WaitPidFlag::WNOHANG | WaitPidFlag::__WALL | WaitPidFlag::__WNOTHREAD;
        match waitpid(tid, Some(flags)) {
            Ok(WaitStatus::StillAlive) => {
                // Not waitable yet; force a stop we can catch later
                st.expect_detach(tid);
                let rc = unsafe { libc::tgkill(pid.as_raw(), tid.as_raw(), libc::SIGSTOP) };
                if rc < 0 {
                    debug!(
                        "monitor: tgkill tid={}: {}",
                        tid,
                        std::io::Error::last_os_error()
                    );
                }
            }
            Ok(_) => {
                debug!("monitor: detach thread tid={}", tid);
                if let Err(e) = ptrace::detach(tid, None) {
                    debug!("monitor: detach tid={}: {}", tid, e);
                }
            }
            Err(e) => debug!("monitor: wait tid={}: {}", tid, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use procgate_rules::Rule;

    fn ns(dev: u64, ino: u64) -> MntNsId {
        MntNsId { dev, ino }
    }

    fn rules_for_com_x() -> RuleStore {
        let mut rules = RuleStore::new();
        rules.set_rules([Rule::new("com.x", "com.x")]);
        let db = std::env::temp_dir().join(format!(
            "procgate-monitor-test-db-{}-{:?}",
            std::process::id(),
            std::thread::current().id()
        ));
        std::fs::write(&db, "<package name=\"com.x\" userId=\"10123\">\n").unwrap();
        rules.refresh_from_package_db(&db);
        std::fs::remove_file(&db).unwrap();
        rules
    }

    #[test]
    fn baseline_match_is_a_target() {
        let rules = rules_for_com_x();
        let decision = decide(
            Some("com.x"),
            Some(1010123),
            Some(ns(5, 9)),
            "zygote",
            &rules,
            &[ns(5, 7)],
        );
        assert_eq!(decision, Decision::Target);
    }

    #[test]
    fn shared_namespace_child_is_not_a_target() {
        let rules = rules_for_com_x();
        let decision = decide(
            Some("com.x"),
            Some(1010123),
            Some(ns(5, 7)),
            "zygote",
            &rules,
            &[ns(5, 7)],
        );
        assert_eq!(decision, Decision::NotTarget);
    }

    #[test]
    fn spawner_named_child_is_not_a_target() {
        let rules = rules_for_com_x();
        let decision = decide(
            Some("zygote64"),
            Some(0),
            Some(ns(5, 9)),
            "zygote",
            &rules,
            &[ns(5, 7)],
        );
        assert_eq!(decision, Decision::NotTarget);
    }

    #[test]
    fn unrelated_uid_is_not_a_target() {
        let rules = rules_for_com_x();
        let decision = decide(
            Some("com.x"),
            Some(1099999),
            Some(ns(5, 9)),
            "zygote",
            &rules,
            &[ns(5, 7)],
        );
        assert_eq!(decision, Decision::NotTarget);
    }

    #[test]
    fn wrong_process_name_is_not_a_target() {
        let rules = rules_for_com_x();
        let decision = decide(
            Some("com.x:push"),
            Some(1010123),
            Some(ns(5, 9)),
            "zygote",
            &rules,
            &[ns(5, 7)],
        );
        assert_eq!(decision, Decision::NotTarget);
    }

    #[test]
    fn vanished_process_is_not_a_target() {
        let rules = rules_for_com_x();
        assert_eq!(
            decide(None, Some(1010123), Some(ns(5, 9)), "zygote", &rules, &[]),
            Decision::NotTarget
        );
        assert_eq!(
            decide(Some("com.x"), None, Some(ns(5, 9)), "zygote", &rules, &[]),
            Decision::NotTarget
        );
        assert_eq!(
            decide(Some("com.x"), Some(1010123), None, "zygote", &rules, &[]),
            Decision::NotTarget
        );
    }

    #[test]
    fn target_requires_distinct_ns_from_every_spawner() {
        let rules = rules_for_com_x();
        // Two spawners registered; matching either namespace blocks
        for blocked in [ns(5, 7), ns(5, 8)] {
            assert_eq!(
                decide(
                    Some("com.x"),
                    Some(1010123),
                    Some(blocked),
                    "zygote",
                    &rules,
                    &[ns(5, 7), ns(5, 8)],
                ),
                Decision::NotTarget
            );
        }
        assert_eq!(
            decide(
                Some("com.x"),
                Some(1010123),
                Some(ns(5, 9)),
                "zygote",
                &rules,
                &[ns(5, 7), ns(5, 8)],
            ),
            Decision::Target
        );
    }

    #[test]
    fn monitor_new_rejects_invalid_config() {
        assert!(Monitor::new(MonitorConfig::default()).is_err());
    }

    #[test]
    fn monitor_state_is_shared() {
        let config = MonitorConfig::builder().agent("/tmp/agent").build().unwrap();
        let monitor = Monitor::new(config).unwrap();
        let state = monitor.state();
        state
            .lock()
            .unwrap()
            .rules
            .set_rules([Rule::new("com.x", "com.x")]);
        assert!(!monitor.state().lock().unwrap().rules.is_empty());
    }

    #[test]
    fn refresh_and_terminate_signals_differ() {
        assert_ne!(REFRESH_SIGNAL, TERMINATE_SIGNAL);
    }

    // Dispatch tests below use PIDs that cannot exist, so the ptrace side
    // of each transition fails harmlessly while the set bookkeeping is
    // still observable.

    fn test_monitor() -> Monitor {
        let config = MonitorConfig::builder().agent("/tmp/agent").build().unwrap();
        Monitor::new(config).unwrap()
    }

    #[test]
    fn detach_marked_thread_is_released_on_next_stop() {
        let monitor = test_monitor();
        let tid = Pid::from_raw(9_999_998);
        monitor.state().lock().unwrap().expect_detach(tid);

        monitor.dispatch(WaitStatus::Stopped(tid, Signal::SIGSTOP));

        let st = monitor.state();
        let st = st.lock().unwrap();
        assert!(!st.is_detach_pending(tid));
        assert!(!st.is_attach_pending(tid));
    }

    #[test]
    fn non_stop_status_clears_transient_membership() {
        let monitor = test_monitor();
        let pid = Pid::from_raw(9_999_997);
        monitor.state().lock().unwrap().expect_attach(pid);

        monitor.dispatch(WaitStatus::Exited(pid, 0));

        assert!(!monitor.state().lock().unwrap().is_attach_pending(pid));
    }

    #[test]
    fn spawner_exit_event_unregisters() {
        let monitor = test_monitor();
        let pid = Pid::from_raw(9_999_996);
        monitor
            .state()
            .lock()
            .unwrap()
            .insert_spawner(pid, ns(5, 7));

        monitor.dispatch(WaitStatus::PtraceEvent(
            pid,
            Signal::SIGTRAP,
            libc::PTRACE_EVENT_EXIT,
        ));

        assert!(!monitor.state().lock().unwrap().is_spawner(pid));
    }

    #[test]
    fn unexpected_spawner_event_detaches_and_unregisters() {
        let monitor = test_monitor();
        let pid = Pid::from_raw(9_999_995);
        monitor
            .state()
            .lock()
            .unwrap()
            .insert_spawner(pid, ns(5, 7));

        monitor.dispatch(WaitStatus::PtraceEvent(
            pid,
            Signal::SIGTRAP,
            libc::PTRACE_EVENT_VFORK_DONE,
        ));

        assert!(!monitor.state().lock().unwrap().is_spawner(pid));
    }
}
