//! AT-URI parsing and list handles.

use crate::error::{ProtocolError, ProtocolResult};
use crate::record::Collection;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const SCHEME: &str = "at://";

/// The key of a record inside a repository collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordKey(String);

impl RecordKey {
    /// Creates a record key.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Returns the key string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A record URI of the form `at://<authority>/<collection>/<rkey>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AtUri {
    authority: String,
    collection: String,
    rkey: RecordKey,
}

impl AtUri {
    /// Builds a URI from its parts.
    pub fn new(
        authority: impl Into<String>,
        collection: impl Into<String>,
        rkey: RecordKey,
    ) -> Self {
        Self {
            authority: authority.into(),
            collection: collection.into(),
            rkey,
        }
    }

    /// Parses a record URI.
    pub fn parse(uri: &str) -> ProtocolResult<Self> {
        let invalid = |reason| ProtocolError::InvalidUri {
            uri: uri.to_string(),
            reason,
        };

        let rest = uri
            .strip_prefix(SCHEME)
            .ok_or_else(|| invalid("missing at:// scheme"))?;

        let mut segments = rest.split('/');
        let authority = segments.next().unwrap_or_default();
        let collection = segments.next().unwrap_or_default();
        let rkey = segments.next().unwrap_or_default();

        if authority.is_empty() {
            return Err(invalid("missing authority"));
        }
        if collection.is_empty() {
            return Err(invalid("missing collection"));
        }
        if rkey.is_empty() {
            return Err(invalid("missing record key"));
        }
        if segments.next().is_some() {
            return Err(invalid("too many path segments"));
        }

        Ok(Self::new(authority, collection, RecordKey::new(rkey)))
    }

    /// The repository (DID or handle) holding the record.
    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// The collection NSID.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// The record key, i.e. the last path segment.
    pub fn rkey(&self) -> &RecordKey {
        &self.rkey
    }
}

impl fmt::Display for AtUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{SCHEME}{}/{}/{}",
            self.authority, self.collection, self.rkey
        )
    }
}

impl FromStr for AtUri {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for AtUri {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<AtUri> for String {
    fn from(uri: AtUri) -> Self {
        uri.to_string()
    }
}

/// A resolved reference to a list record.
///
/// Handles are immutable: once the mirror has been resolved in a run the
/// same handle is used for every read and write of that run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "AtUri", into = "AtUri")]
pub struct ListHandle(AtUri);

impl ListHandle {
    /// Wraps a URI, checking it points at a list record.
    pub fn new(uri: AtUri) -> ProtocolResult<Self> {
        let expected = Collection::List.nsid();
        if uri.collection() != expected {
            return Err(ProtocolError::WrongCollection {
                expected,
                actual: uri.collection().to_string(),
            });
        }
        Ok(Self(uri))
    }

    /// Builds the handle of list `rkey` in repository `authority`.
    pub fn in_repo(authority: impl Into<String>, rkey: RecordKey) -> Self {
        Self(AtUri::new(authority, Collection::List.nsid(), rkey))
    }

    /// Parses a list URI.
    pub fn parse(uri: &str) -> ProtocolResult<Self> {
        Self::new(AtUri::parse(uri)?)
    }

    /// The list record URI.
    pub fn uri(&self) -> &AtUri {
        &self.0
    }

    /// The list record key.
    pub fn rkey(&self) -> &RecordKey {
        self.0.rkey()
    }
}

impl fmt::Display for ListHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ListHandle {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<AtUri> for ListHandle {
    type Error = ProtocolError;

    fn try_from(uri: AtUri) -> Result<Self, Self::Error> {
        Self::new(uri)
    }
}

impl From<ListHandle> for AtUri {
    fn from(handle: ListHandle) -> Self {
        handle.0
    }
}
