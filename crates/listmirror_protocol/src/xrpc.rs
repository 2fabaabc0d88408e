//! XRPC request and response bodies.
//!
//! Only the fields the mirror reads are modelled; everything else in the
//! service's responses is ignored on decode.

use crate::error::{ProtocolError, ProtocolResult};
use crate::identity::{Did, Subject};
use crate::record::{ListItem, ListPage, Record, RecordPage, StoredRecord};
use crate::uri::{AtUri, RecordKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `com.atproto.server.createSession`
pub const CREATE_SESSION: &str = "com.atproto.server.createSession";
/// `app.bsky.graph.getList`
pub const GET_LIST: &str = "app.bsky.graph.getList";
/// `com.atproto.repo.listRecords`
pub const LIST_RECORDS: &str = "com.atproto.repo.listRecords";
/// `com.atproto.repo.createRecord`
pub const CREATE_RECORD: &str = "com.atproto.repo.createRecord";
/// `com.atproto.repo.deleteRecord`
pub const DELETE_RECORD: &str = "com.atproto.repo.deleteRecord";

/// Largest `limit` accepted by paginated reads.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Login request.
#[derive(Debug, Clone, Serialize)]
pub struct CreateSessionInput<'a> {
    /// Handle, email or DID.
    pub identifier: &'a str,
    /// Account or app password.
    pub password: &'a str,
}

/// Login response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionOutput {
    /// Bearer token for authenticated calls.
    pub access_jwt: String,
    /// Token for refreshing the session.
    pub refresh_jwt: String,
    /// Account DID.
    pub did: Did,
    /// Account handle.
    pub handle: String,
}

/// `getList` response.
#[derive(Debug, Clone, Deserialize)]
pub struct GetListOutput {
    /// Continuation cursor.
    #[serde(default)]
    pub cursor: Option<String>,
    /// Members on this page.
    pub items: Vec<ListItemView>,
}

/// A membership as rendered by `getList`.
#[derive(Debug, Clone, Deserialize)]
pub struct ListItemView {
    /// Membership record URI.
    pub uri: AtUri,
    /// Member profile.
    pub subject: ProfileView,
}

/// The subset of a profile view needed to identify a member.
#[derive(Debug, Clone, Deserialize)]
pub struct ProfileView {
    /// Member DID.
    pub did: Subject,
    /// Member handle.
    #[serde(default)]
    pub handle: Option<String>,
}

impl From<GetListOutput> for ListPage {
    fn from(output: GetListOutput) -> Self {
        ListPage {
            items: output
                .items
                .into_iter()
                .map(|view| ListItem {
                    uri: view.uri,
                    subject: view.subject.did,
                })
                .collect(),
            cursor: output.cursor,
        }
    }
}

/// `listRecords` response.
///
/// Record values are kept raw until [`into_page`](Self::into_page), so one
/// unreadable record does not reject the whole page.
#[derive(Debug, Clone, Deserialize)]
pub struct ListRecordsOutput {
    /// Continuation cursor.
    #[serde(default)]
    pub cursor: Option<String>,
    /// Records on this page.
    pub records: Vec<RawRecord>,
}

impl ListRecordsOutput {
    /// Converts to a page, keeping the records that decode and returning
    /// the reasons the others were dropped.
    pub fn into_page(self) -> (RecordPage, Vec<ProtocolError>) {
        let mut records = Vec::with_capacity(self.records.len());
        let mut rejected = Vec::new();
        for raw in self.records {
            match StoredRecord::try_from(raw) {
                Ok(record) => records.push(record),
                Err(err) => rejected.push(err),
            }
        }
        let page = RecordPage {
            records,
            cursor: self.cursor,
        };
        (page, rejected)
    }
}

/// An enumerated record whose value has not been checked yet.
#[derive(Debug, Clone, Deserialize)]
pub struct RawRecord {
    /// Record URI.
    pub uri: String,
    /// Content hash.
    #[serde(default)]
    pub cid: Option<String>,
    /// Record value as sent by the service.
    #[serde(default)]
    pub value: Value,
}

impl TryFrom<RawRecord> for StoredRecord {
    type Error = ProtocolError;

    fn try_from(raw: RawRecord) -> ProtocolResult<Self> {
        let RawRecord { uri, cid, mut value } = raw;
        let parsed = AtUri::parse(&uri)?;

        // Values without a `$type` take it from the collection they sit in.
        if let Some(fields) = value.as_object_mut() {
            fields
                .entry("$type")
                .or_insert_with(|| Value::from(parsed.collection()));
        }
        let value = serde_json::from_value(value).map_err(|e| ProtocolError::InvalidRecord {
            uri,
            reason: e.to_string(),
        })?;

        Ok(StoredRecord {
            uri: parsed,
            cid,
            value,
        })
    }
}

/// `createRecord` request.
#[derive(Debug, Clone, Serialize)]
pub struct CreateRecordInput<'a> {
    /// Repository DID.
    pub repo: &'a Did,
    /// Collection NSID.
    pub collection: &'static str,
    /// Record value.
    pub record: &'a Record,
}

/// `createRecord` response.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateRecordOutput {
    /// URI of the new record.
    pub uri: AtUri,
    /// Content hash of the new record.
    #[serde(default)]
    pub cid: Option<String>,
}

/// `deleteRecord` request.
#[derive(Debug, Clone, Serialize)]
pub struct DeleteRecordInput<'a> {
    /// Repository DID.
    pub repo: &'a Did,
    /// Collection NSID.
    pub collection: &'static str,
    /// Key of the record to delete.
    pub rkey: &'a RecordKey,
}

/// Error body returned by XRPC endpoints on failure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct XrpcErrorBody {
    /// Machine-readable error name, e.g. `RateLimitExceeded`.
    #[serde(default)]
    pub error: Option<String>,
    /// Human-readable message.
    #[serde(default)]
    pub message: Option<String>,
}
