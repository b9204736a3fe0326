use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PhasegateError {
    #[error("not initialized: run 'phasegate init'")]
    NotInitialized,

    #[error("work item not found: {0}")]
    WorkItemNotFound(String),

    #[error("work item already exists: {0}")]
    WorkItemExists(String),

    #[error("handoff not found: {0}")]
    HandoffNotFound(String),

    #[error("violation not found: {0}")]
    ViolationNotFound(String),

    #[error("record not found: {0}")]
    RecordNotFound(String),

    #[error("invalid work item key '{0}': must be uppercase alphanumeric segments joined by hyphens")]
    InvalidKey(String),

    #[error("invalid phase: {0}")]
    InvalidPhase(String),

    #[error("invalid transition from {from} to {to}: {reason}")]
    InvalidTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("handoff field '{0}' is required and must not be empty")]
    MissingField(&'static str),

    #[error("missing required artifact '{artifact}' for phase '{phase}'")]
    MissingArtifact { artifact: String, phase: String },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("handoff {id} is already {status}")]
    AlreadyResolved { id: String, status: String },

    #[error("datastore did not respond within the deadline during {operation}")]
    UpstreamTimeout { operation: String },

    #[error("store error: {0}")]
    Store(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PhasegateError>;

// ---------------------------------------------------------------------------
// ErrorKind
// ---------------------------------------------------------------------------

/// Caller-facing classification of a [`PhasegateError`].
///
/// Callers branch on the kind, never on the concrete variant: validation and
/// not-found errors need corrected input, conflicts and timeouts need a fresh
/// read followed by a retry decided by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Conflict,
    NotFound,
    AlreadyResolved,
    UpstreamTimeout,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Conflict => "conflict",
            ErrorKind::NotFound => "not_found",
            ErrorKind::AlreadyResolved => "already_resolved",
            ErrorKind::UpstreamTimeout => "upstream_timeout",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PhasegateError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PhasegateError::InvalidKey(_)
            | PhasegateError::InvalidPhase(_)
            | PhasegateError::InvalidTransition { .. }
            | PhasegateError::MissingField(_)
            | PhasegateError::MissingArtifact { .. }
            | PhasegateError::Validation(_)
            | PhasegateError::WorkItemExists(_) => ErrorKind::Validation,
            PhasegateError::Conflict(_) => ErrorKind::Conflict,
            PhasegateError::WorkItemNotFound(_)
            | PhasegateError::HandoffNotFound(_)
            | PhasegateError::ViolationNotFound(_)
            | PhasegateError::RecordNotFound(_) => ErrorKind::NotFound,
            PhasegateError::AlreadyResolved { .. } => ErrorKind::AlreadyResolved,
            PhasegateError::UpstreamTimeout { .. } => ErrorKind::UpstreamTimeout,
            PhasegateError::NotInitialized
            | PhasegateError::Store(_)
            | PhasegateError::Io(_)
            | PhasegateError::Yaml(_)
            | PhasegateError::Json(_) => ErrorKind::Internal,
        }
    }

    /// True when re-reading current state and retrying may succeed.
    /// The engine never retries on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Conflict | ErrorKind::UpstreamTimeout
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
