//! Error types for the mirror engine.

use crate::engine::ReconciliationSummary;
use crate::executor::Intent;
use listmirror_protocol::{ListHandle, Subject};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Result type for calls to the remote service.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Result type for engine operations.
pub type MirrorResult<T> = Result<T, MirrorError>;

/// Failure signatures distinguished at the service boundary.
///
/// Every failure is classified exactly once, where the response is decoded.
/// Callers match on the kind and never re-inspect messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The record already exists.
    Duplicate,
    /// The record does not exist.
    NotFound,
    /// The service is throttling this account.
    RateLimited,
    /// Anything else.
    Other,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureKind::Duplicate => "duplicate",
            FailureKind::NotFound => "not found",
            FailureKind::RateLimited => "rate limited",
            FailureKind::Other => "error",
        })
    }
}

/// A classified failure reported by the remote service.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("{kind}: {message}")]
pub struct ServiceError {
    /// Failure signature.
    pub kind: FailureKind,
    /// Detail reported by the service.
    pub message: String,
}

impl ServiceError {
    /// Creates an error of the given kind.
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// The record already exists.
    pub fn duplicate(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Duplicate, message)
    }

    /// The record does not exist.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(FailureKind::NotFound, message)
    }

    /// The service is throttling requests.
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(FailureKind::RateLimited, message)
    }

    /// Any other failure.
    pub fn other(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Other, message)
    }

    /// Returns true if the service asked us to slow down.
    pub fn is_rate_limited(&self) -> bool {
        self.kind == FailureKind::RateLimited
    }
}

/// A single addition or removal that failed for a reason other than
/// throttling. Recorded in the run summary; never aborts the run.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("{action} {subject} failed: {source}")]
pub struct PerItemError {
    /// The member being added or removed.
    pub subject: Subject,
    /// What was attempted.
    pub action: Intent,
    /// The service failure.
    #[serde(rename = "error")]
    pub source: ServiceError,
}

/// Errors that end a reconciliation run.
#[derive(Error, Debug)]
pub enum MirrorError {
    /// A membership read could not complete. No partial set is trusted.
    #[error("failed to read list {list}: {source}")]
    Retrieval {
        /// The list being read.
        list: ListHandle,
        /// The failure that stopped the read.
        source: ServiceError,
    },

    /// The mirror list could not be found or created.
    #[error("failed to resolve mirror list {name:?}: {reason}")]
    Resolution {
        /// The mirror name being resolved.
        name: String,
        /// What went wrong.
        reason: String,
        /// Underlying service failure, if any.
        source: Option<ServiceError>,
    },

    /// The service kept throttling; the run stopped early.
    ///
    /// This is an expected operating condition. The next scheduled run
    /// picks up where this one stopped.
    #[error("rate limited {attempts} times in a row during {operation}; run stopped early")]
    ThrottleExhausted {
        /// The call that was being retried.
        operation: String,
        /// Consecutive throttled attempts.
        attempts: u32,
        /// Progress made before the run stopped.
        summary: Box<ReconciliationSummary>,
    },

    /// Authentication failed.
    #[error("session error: {0}")]
    Session(String),

    /// The configuration is unusable.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A run was requested while another is in progress.
    #[error("invalid state transition from {from:?} to {to:?}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },
}

impl MirrorError {
    /// Throttle exhaustion with no progress recorded yet.
    pub fn throttle_exhausted(operation: impl Into<String>, attempts: u32) -> Self {
        Self::ThrottleExhausted {
            operation: operation.into(),
            attempts,
            summary: Box::default(),
        }
    }

    /// Resolution failure caused by the service.
    pub fn resolution(name: impl Into<String>, source: ServiceError) -> Self {
        Self::Resolution {
            name: name.into(),
            reason: source.to_string(),
            source: Some(source),
        }
    }

    /// Returns true if the run should be reported as a non-failure.
    pub fn is_benign(&self) -> bool {
        matches!(self, MirrorError::ThrottleExhausted { .. })
    }

    /// The partial summary carried by a throttle abort.
    pub fn partial_summary(&self) -> Option<&ReconciliationSummary> {
        match self {
            MirrorError::ThrottleExhausted { summary, .. } => Some(summary),
            _ => None,
        }
    }
}
