// Error kinds shared across the core
//
// Each seam gets its own small enum so callers can match on the kind
// instead of string-probing an anyhow chain. Application edges (config,
// knowledge I/O, MCP setup) still use anyhow.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reserved exit code reported when a command hit its timeout.
pub const EXIT_CODE_TIMEOUT: i32 = -101;

/// Reserved exit code reported when a command was cancelled.
pub const EXIT_CODE_CANCELLED: i32 = -102;

/// How a command run ended abnormally.
///
/// A non-zero exit code is not an error kind: it is surfaced to the Brain
/// through the outcome record so it can adjust its plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunErrorKind {
    /// Tool binary not found on PATH; detected before spawn.
    NotFound,
    /// The OS refused to spawn the process.
    SpawnFailed,
    /// Local I/O failure while pumping output.
    Io,
    /// The per-command timeout elapsed.
    Timeout,
    /// The run was cancelled from above.
    Cancelled,
}

impl std::fmt::Display for RunErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunErrorKind::NotFound => "not found",
            RunErrorKind::SpawnFailed => "spawn failed",
            RunErrorKind::Io => "io failed",
            RunErrorKind::Timeout => "timeout",
            RunErrorKind::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Failures of the Brain seam.
#[derive(Debug, Error)]
pub enum BrainError {
    /// Network trouble, rate limiting, 5xx. Retried with backoff; becomes
    /// fatal once the retry cap is exhausted.
    #[error("transient brain failure: {0}")]
    Transient(String),

    /// Auth failure or an unusable response. Ends the loop.
    #[error("fatal brain failure: {0}")]
    Fatal(String),

    /// The reply parsed but is not a valid Action (missing `action`,
    /// unknown kind, missing required fields).
    #[error("malformed action: {0}")]
    MalformedAction(String),
}

impl BrainError {
    pub fn is_transient(&self) -> bool {
        matches!(self, BrainError::Transient(_))
    }
}

/// Failures of the sub-task scheduler seam.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    /// The per-loop cap of concurrently running sub-tasks is hit.
    /// Returned to the Brain as an observation, never an event.
    #[error("sub-task capacity exceeded: {running}/{max} running")]
    CapacityExceeded { running: usize, max: usize },

    /// No live sub-task with that id.
    #[error("unknown sub-task id {0}")]
    UnknownTask(u64),
}

/// Failures of the team seam.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TeamError {
    /// A target with the same host (case-insensitive) is already active.
    #[error("target '{0}' already exists")]
    DuplicateTarget(String),

    /// No target with that id.
    #[error("unknown target id {0}")]
    UnknownTarget(u64),

    /// The host string failed validation.
    #[error("invalid host '{0}'")]
    InvalidHost(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&RunErrorKind::NotFound).unwrap();
        assert_eq!(json, "\"not_found\"");
        let back: RunErrorKind = serde_json::from_str("\"cancelled\"").unwrap();
        assert_eq!(back, RunErrorKind::Cancelled);
    }

    #[test]
    fn test_reserved_exit_codes_are_distinct_negatives() {
        assert!(EXIT_CODE_TIMEOUT < 0);
        assert!(EXIT_CODE_CANCELLED < 0);
        assert_ne!(EXIT_CODE_TIMEOUT, EXIT_CODE_CANCELLED);
    }

    #[test]
    fn test_brain_error_transient_classification() {
        assert!(BrainError::Transient("503".into()).is_transient());
        assert!(!BrainError::Fatal("bad key".into()).is_transient());
        assert!(!BrainError::MalformedAction("no action".into()).is_transient());
    }

    #[test]
    fn test_capacity_error_message_carries_counts() {
        let e = SchedulerError::CapacityExceeded { running: 2, max: 2 };
        assert!(e.to_string().contains("2/2"));
    }
}
