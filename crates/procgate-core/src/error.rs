//! Error types for process gate operations

use std::io;
use thiserror::Error;

/// Result type for procgate operations
pub type Result<T> = std::result::Result<T, ProcGateError>;

/// Errors that can occur while setting up or running the process monitor
#[derive(Error, Debug)]
pub enum ProcGateError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Syscall error: {0}")]
    Syscall(String),

    #[error("Watcher error: {0}")]
    Watcher(String),

    #[error("Trace error: {0}")]
    Trace(String),

    #[error("Agent error: {0}")]
    Agent(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProcGateError::Watcher("inotify_init refused".to_string());
        assert!(err.to_string().contains("inotify_init refused"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let gate_err = ProcGateError::from(io_err);
        assert!(gate_err.to_string().contains("IO error"));
    }

    #[test]
    fn test_result_type() {
        fn returns_result() -> Result<i32> {
            Ok(42)
        }
        assert_eq!(returns_result().unwrap(), 42);
    }

    #[test]
    fn test_result_error() {
        fn returns_error() -> Result<i32> {
            Err(ProcGateError::InvalidConfig("no agent".to_string()))
        }
        assert!(returns_error().is_err());
    }
}
