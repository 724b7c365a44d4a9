//! Error taxonomy
//!
//! Every failure the orchestrator can report maps to exactly one
//! [`ErrorKind`]. Per-actor failures are carried as data inside results;
//! only validation errors and total unavailability abort a whole run.

use thiserror::Error;

use crate::topology::NodeId;

/// Result alias used throughout isoprobe.
pub type ProbeResult<T> = Result<T, ProbeError>;

/// Stable classification of a [`ProbeError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Node unreachable.
    Connection,
    /// Record absent on a node.
    NotFound,
    /// Node session pool at capacity.
    PoolExhausted,
    /// Engine reported a lock wait timeout or deadlock.
    Conflict,
    /// Scenario exceeded its deadline.
    Timeout,
    /// Malformed request.
    Validation,
    /// Orchestrator invariant breached.
    Internal,
}

impl ErrorKind {
    /// Name used in JSON bodies and log fields.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Connection => "ConnectionError",
            ErrorKind::NotFound => "NotFoundError",
            ErrorKind::PoolExhausted => "PoolExhausted",
            ErrorKind::Conflict => "ConflictError",
            ErrorKind::Timeout => "TimeoutError",
            ErrorKind::Validation => "ValidationError",
            ErrorKind::Internal => "InternalError",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by the pool, sessions, runners and controller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    /// Node unreachable (offline, refused, or unknown).
    #[error("connection error on {node}: {reason}")]
    Connection {
        /// Node that could not be reached
        node: NodeId,
        /// What went wrong
        reason: String,
    },

    /// Record absent.
    #[error("title {tconst} not found on {location}")]
    NotFound {
        /// Target record identifier
        tconst: String,
        /// Node name, or a description such as "any node"
        location: String,
    },

    /// No session permit became available in time.
    #[error("session pool exhausted on {node} (capacity {capacity})")]
    PoolExhausted {
        /// Node whose pool is at capacity
        node: NodeId,
        /// Configured concurrent session bound
        capacity: usize,
    },

    /// Lock wait timeout or deadlock reported by the engine.
    #[error("conflict on {node}: {reason}")]
    Conflict {
        /// Node where the conflict happened
        node: NodeId,
        /// Engine-provided detail
        reason: String,
    },

    /// The scenario ran past its deadline.
    #[error("scenario timed out after {elapsed_ms}ms")]
    Timeout {
        /// Deadline that expired, in milliseconds
        elapsed_ms: u64,
    },

    /// Malformed request.
    #[error("validation error: {reason}")]
    Validation {
        /// Human-readable reason
        reason: String,
    },

    /// Orchestrator invariant breached.
    #[error("internal error: {reason}")]
    Internal {
        /// Human-readable reason
        reason: String,
    },
}

impl ProbeError {
    /// Build a [`ProbeError::Validation`].
    pub fn validation(reason: impl Into<String>) -> Self {
        ProbeError::Validation {
            reason: reason.into(),
        }
    }

    /// Build a [`ProbeError::Connection`].
    pub fn connection(node: &NodeId, reason: impl Into<String>) -> Self {
        ProbeError::Connection {
            node: node.clone(),
            reason: reason.into(),
        }
    }

    /// Build a [`ProbeError::Conflict`].
    pub fn conflict(node: &NodeId, reason: impl Into<String>) -> Self {
        ProbeError::Conflict {
            node: node.clone(),
            reason: reason.into(),
        }
    }

    /// Build a [`ProbeError::NotFound`] scoped to one node.
    pub fn not_found_on(tconst: &str, node: &NodeId) -> Self {
        ProbeError::NotFound {
            tconst: tconst.to_string(),
            location: node.to_string(),
        }
    }

    /// Build a [`ProbeError::Internal`].
    pub fn internal(reason: impl Into<String>) -> Self {
        ProbeError::Internal {
            reason: reason.into(),
        }
    }

    /// Classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProbeError::Connection { .. } => ErrorKind::Connection,
            ProbeError::NotFound { .. } => ErrorKind::NotFound,
            ProbeError::PoolExhausted { .. } => ErrorKind::PoolExhausted,
            ProbeError::Conflict { .. } => ErrorKind::Conflict,
            ProbeError::Timeout { .. } => ErrorKind::Timeout,
            ProbeError::Validation { .. } => ErrorKind::Validation,
            ProbeError::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// True for failures meaning the node could not be used at all.
    pub fn is_unavailability(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Connection | ErrorKind::PoolExhausted
        )
    }
}
