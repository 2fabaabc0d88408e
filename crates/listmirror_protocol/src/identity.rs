//! Account identities.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A list member.
///
/// Subjects are compared by exact string identity: two values built from the
/// same identity string are always equal, and no normalisation is applied.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Subject(String);

impl Subject {
    /// Creates a subject from its identity string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identity string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Subject {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for Subject {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// The DID of the authenticated account that owns the mirror repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Did(String);

impl Did {
    /// Parses a DID, requiring the `did:<method>:<id>` shape.
    pub fn parse(value: impl Into<String>) -> ProtocolResult<Self> {
        let value = value.into();
        let mut parts = value.splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some("did"), Some(method), Some(id)) if !method.is_empty() && !id.is_empty() => {
                Ok(Self(value))
            }
            _ => Err(ProtocolError::InvalidIdentity(value)),
        }
    }

    /// Returns the DID string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Did {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<Did> for String {
    fn from(did: Did) -> Self {
        did.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn subject_identity_is_exact() {
        let a = Subject::new("did:plc:abc");
        let b = Subject::from("did:plc:abc".to_string());
        let c = Subject::new("did:plc:ABC");
        assert_eq!(a, b);
        assert_ne!(a, c);

        let set: HashSet<_> = [a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn subject_serializes_as_plain_string() {
        let json = serde_json::to_string(&Subject::new("did:plc:xyz")).unwrap();
        assert_eq!(json, "\"did:plc:xyz\"");
    }

    #[test]
    fn did_parsing() {
        assert!(Did::parse("did:plc:k3lft27u2pjqp2ptidkne7xr").is_ok());
        assert!(Did::parse("did:web:example.com").is_ok());
        assert!(Did::parse("plc:abc").is_err());
        assert!(Did::parse("did::abc").is_err());
        assert!(Did::parse("did:plc:").is_err());
    }

    #[test]
    fn did_deserialization_is_validated() {
        let did: Did = serde_json::from_str("\"did:plc:abc\"").unwrap();
        assert_eq!(did.as_str(), "did:plc:abc");
        assert_eq!(serde_json::to_string(&did).unwrap(), "\"did:plc:abc\"");

        assert!(serde_json::from_str::<Did>("\"alice.bsky.social\"").is_err());
    }
}
