//! Error types shared by the probes, the restart orchestrator and the task installer.

use std::fmt;

use thiserror::Error;

/// Which bounded wait ran out of attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitPhase {
    Stop,
    Start,
}

impl fmt::Display for WaitPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitPhase::Stop => f.write_str("stop"),
            WaitPhase::Start => f.write_str("start"),
        }
    }
}

#[derive(Debug, Error)]
pub enum MonitorError {
    /// The executable is not on PATH. Callers treat this as a reason to fall back.
    #[error("command `{program}` not found")]
    CommandNotFound { program: String },

    #[error("command `{program}` failed: {message}")]
    Command { program: String, message: String },

    #[error("failed to parse {what}: {detail}")]
    Parse { what: &'static str, detail: String },

    #[error("service {service} did not {phase} in time")]
    Timeout { service: String, phase: WaitPhase },

    #[error("administrator privileges are required to {0}; re-run from an elevated prompt")]
    PermissionDenied(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MonitorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_names_the_phase() {
        let err = MonitorError::Timeout {
            service: "tokens".to_string(),
            phase: WaitPhase::Stop,
        };
        assert_eq!(err.to_string(), "service tokens did not stop in time");
    }
}
