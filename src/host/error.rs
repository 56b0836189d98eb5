//! Error types for process execution

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors returned by [`ProcessRunner::start`](super::ProcessRunner::start)
#[derive(Error, Debug)]
pub enum StartError {
    #[error("a process is already running")]
    AlreadyRunning,

    #[error("failed to launch '{}': {source}", executable.display())]
    Spawn {
        executable: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StartError {
    pub(crate) fn spawn(executable: impl Into<PathBuf>, source: io::Error) -> Self {
        StartError::Spawn {
            executable: executable.into(),
            source,
        }
    }
}

/// Errors returned by [`ProcessRunner::cancel`](super::ProcessRunner::cancel)
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelError {
    #[error("no process is running")]
    NotRunning,
}

/// Errors returned by [`ProcessRunner::reset`](super::ProcessRunner::reset)
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetError {
    #[error("cannot reset while a process is still running")]
    StillRunning,
}

/// Mid-run output failures. These never abort a run.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("output truncated: {0}")]
    TruncatedOutput(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_error_names_executable() {
        let err = StartError::spawn(
            "/nope/build.command",
            io::Error::new(io::ErrorKind::NotFound, "not found"),
        );
        let msg = err.to_string();
        assert!(msg.contains("/nope/build.command"));
        assert!(msg.contains("not found"));
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            StartError::AlreadyRunning.to_string(),
            "a process is already running"
        );
        assert_eq!(CancelError::NotRunning.to_string(), "no process is running");
        assert!(ResetError::StillRunning.to_string().contains("still running"));
    }

    #[test]
    fn test_truncated_output_from_io() {
        let err = RelayError::from(io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed"));
        assert!(err.to_string().starts_with("output truncated"));
    }
}
