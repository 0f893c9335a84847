//! procgate-monitor: the tracing supervisor
//!
//! A single-threaded ptrace supervisor that attaches to every zygote-like
//! spawner, observes the forks they perform, classifies each child against
//! a UID/process-name rule table, and hands matching children — stopped,
//! already in their own mount namespace — to an external agent process.
//!
//! # Example
//!
//! ```ignore
//! use procgate_monitor::{Monitor, MonitorConfig, Rule};
//!
//! let config = MonitorConfig::builder()
//!     .agent("/usr/libexec/procgate-agent")
//!     .build()?;
//! let monitor = Monitor::new(config)?;
//!
//! let state = monitor.state();
//! state.lock().unwrap().rules.set_rules([Rule::new("com.x", "com.x")]);
//!
//! monitor.run()?; // blocks until the terminate signal
//! ```

pub mod agent;
pub mod config;
pub mod monitor;
pub mod spawner;
pub mod state;
pub mod watcher;

// Re-export sub-crate types for convenience
pub use nix::sys::signal::Signal;
pub use procgate_core::{ProcGateError, Result};
pub use procgate_proc::MntNsId;
pub use procgate_rules::{Rule, RuleStore};

pub use config::{MonitorConfig, MonitorConfigBuilder};
pub use monitor::{Monitor, REFRESH_SIGNAL, TERMINATE_SIGNAL, bind_shutdown_signal};
pub use state::MonitorState;
