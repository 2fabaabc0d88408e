//! # listmirror protocol
//!
//! AT Protocol types for listmirror.
//!
//! This crate provides:
//! - `Subject` and `Did` identities
//! - `AtUri` and `ListHandle` record references
//! - `ListRecord` / `ListItemRecord` payloads and the `Record` union
//! - XRPC request and response bodies
//! - Page types returned by paginated reads
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod identity;
mod record;
mod uri;
pub mod xrpc;

pub use error::{ProtocolError, ProtocolResult};
pub use identity::{Did, Subject};
pub use record::{
    Collection, ListItem, ListItemRecord, ListPage, ListRecord, Record, RecordPage, StoredRecord,
    CURATELIST_PURPOSE, MODLIST_PURPOSE,
};
pub use uri::{AtUri, ListHandle, RecordKey};
