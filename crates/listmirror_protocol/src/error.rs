//! Error types for protocol parsing.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while parsing protocol values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The string is not a well-formed `at://` URI.
    #[error("invalid AT-URI {uri:?}: {reason}")]
    InvalidUri {
        /// The rejected input.
        uri: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// The URI does not point at the expected collection.
    #[error("expected a record in {expected}, got {actual}")]
    WrongCollection {
        /// Collection NSID that was required.
        expected: &'static str,
        /// Collection NSID found in the URI.
        actual: String,
    },

    /// The identity string is empty or malformed.
    #[error("invalid identity: {0:?}")]
    InvalidIdentity(String),

    /// A stored record value does not match its collection's schema.
    #[error("unreadable record {uri}: {reason}")]
    InvalidRecord {
        /// URI of the record, as reported by the service.
        uri: String,
        /// Why it was rejected.
        reason: String,
    },
}
