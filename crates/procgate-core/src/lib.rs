//! procgate-core: shared types, errors, and capability detection for procgate
//!
//! This crate provides the foundational types used by all procgate sub-crates:
//! - Error types and Result alias
//! - Runtime capability detection (root, ptrace reachability, procfs, inotify)

pub mod capabilities;
pub mod error;

pub use error::{ProcGateError, Result};
