//! Error taxonomy. Every submission resolves into either an `Ok` value or
//! one of these kinds — never a raw `anyhow::Error` — so hosts can match on
//! `kind` without parsing message strings.

use serde::{Deserialize, Serialize};

/// The closed set of ways a submission can fail to produce a value.
///
/// Kept as a plain enum (not `thiserror`'s per-variant messages) because the
/// *kind* is the contract the host switches on; the human-readable text
/// lives alongside it in [`ExecutionError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// `transform(code, opts)` returned an error before a pool was touched.
    Transpile,
    /// The request's language tag isn't in the registry.
    UnknownLanguage,
    /// Cooperative cancel completed before the force timer fired.
    Cancelled,
    /// The soft timer fired; cooperative cancel was started on its behalf.
    Timeout,
    /// Cooperative cancel did not resolve the task in time; the handle was
    /// killed.
    CancelError,
    /// The assigned handle exited non-zero, or its transport broke, while a
    /// task was assigned to it.
    WorkerCrash,
    /// The pool's queue was already at its ceiling.
    QueueFull,
    /// The executor itself reported an `error` terminal message.
    Execution,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transpile => "transpile",
            Self::UnknownLanguage => "unknown-language",
            Self::Cancelled => "cancelled",
            Self::Timeout => "timeout",
            Self::CancelError => "cancel-error",
            Self::WorkerCrash => "worker-crash",
            Self::QueueFull => "queue-full",
            Self::Execution => "execution",
        }
    }

    /// §7 propagation policy: everything except these three also emits a
    /// host message on `code-execution-result` so the UI stays consistent
    /// with the submitter's own view of the task.
    pub fn notifies_host(self) -> bool {
        !matches!(
            self,
            Self::Transpile | Self::UnknownLanguage | Self::QueueFull
        )
    }

    /// §7: these two also remove the handle from its pool and re-run
    /// dispatch, since they indicate the handle itself is no longer usable.
    pub fn retires_handle(self) -> bool {
        matches!(self, Self::WorkerCrash | Self::CancelError)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `err` side of a submission's result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ExecutionError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "task cancelled")
    }

    pub fn cancel_error() -> Self {
        Self::new(ErrorKind::CancelError, "forcibly terminated")
    }

    pub fn timeout() -> Self {
        Self::new(ErrorKind::Timeout, "execution timed out")
    }

    pub fn worker_crash(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::WorkerCrash, detail.into())
    }

    pub fn queue_full() -> Self {
        Self::new(ErrorKind::QueueFull, "language queue is full")
    }

    pub fn unknown_language(tag: impl std::fmt::Display) -> Self {
        Self::new(ErrorKind::UnknownLanguage, format!("unknown language: {tag}"))
    }

    pub fn transpile(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transpile, detail.into())
    }
}

impl std::fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ExecutionError {}

/// Outcome delivered through a task's completion slot.
pub type ExecutionResult = Result<serde_json::Value, ExecutionError>;

/// Errors returned directly by orchestrator methods that never reach a task
/// (submitting to a draining orchestrator, an unknown task id, etc). These
/// are distinct from [`ExecutionError`], which is always the resolution of
/// a specific task id.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("orchestrator is draining, new submissions are rejected")]
    Draining,
    #[error("orchestrator has shut down")]
    ShutDown,
    #[error("no handle is assigned to task {0}")]
    NoAssignedHandle(String),
}
