//! Repository records and page types.

use crate::identity::Subject;
use crate::uri::{AtUri, ListHandle};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// List purpose marking a moderation list.
pub const MODLIST_PURPOSE: &str = "app.bsky.graph.defs#modlist";

/// List purpose marking a curation list.
pub const CURATELIST_PURPOSE: &str = "app.bsky.graph.defs#curatelist";

/// Repository collections touched by the mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    /// `app.bsky.graph.list`: list declarations.
    List,
    /// `app.bsky.graph.listitem`: membership records.
    ListItem,
}

impl Collection {
    /// Returns the collection NSID.
    pub fn nsid(&self) -> &'static str {
        match self {
            Collection::List => "app.bsky.graph.list",
            Collection::ListItem => "app.bsky.graph.listitem",
        }
    }
}

/// An `app.bsky.graph.list` record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListRecord {
    /// List purpose (`MODLIST_PURPOSE`, `CURATELIST_PURPOSE`, ...).
    pub purpose: String,
    /// Display name.
    pub name: String,
    /// Free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Client-declared creation time. Absent on some third-party records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl ListRecord {
    /// Creates a moderation list declaration.
    pub fn modlist(
        name: impl Into<String>,
        description: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            purpose: MODLIST_PURPOSE.to_string(),
            name: name.into(),
            description: Some(description.into()),
            created_at: Some(created_at),
        }
    }

    /// Returns true if this is a moderation list named `name`.
    pub fn is_modlist_named(&self, name: &str) -> bool {
        self.purpose == MODLIST_PURPOSE && self.name == name
    }
}

/// An `app.bsky.graph.listitem` record: one membership of `subject` in `list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListItemRecord {
    /// The member.
    pub subject: Subject,
    /// The list the membership belongs to.
    pub list: AtUri,
    /// Client-declared creation time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl ListItemRecord {
    /// Creates a membership record for `subject` in `list`.
    pub fn new(subject: Subject, list: &ListHandle, created_at: DateTime<Utc>) -> Self {
        Self {
            subject,
            list: list.uri().clone(),
            created_at: Some(created_at),
        }
    }

    /// Returns true if this record places `subject` in `list`.
    pub fn places(&self, subject: &Subject, list: &ListHandle) -> bool {
        &self.subject == subject && &self.list == list.uri()
    }
}

/// A record value, tagged with its `$type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "$type")]
pub enum Record {
    /// A list declaration.
    #[serde(rename = "app.bsky.graph.list")]
    List(ListRecord),
    /// A list membership.
    #[serde(rename = "app.bsky.graph.listitem")]
    ListItem(ListItemRecord),
}

impl Record {
    /// The collection the record is stored in.
    pub fn collection(&self) -> Collection {
        match self {
            Record::List(_) => Collection::List,
            Record::ListItem(_) => Collection::ListItem,
        }
    }
}

/// A record as returned by repository enumeration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    /// Record URI.
    pub uri: AtUri,
    /// Content hash, when the service reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
    /// Record value.
    pub value: Record,
}

impl StoredRecord {
    /// Returns the list declaration, if this is one.
    pub fn as_list(&self) -> Option<&ListRecord> {
        match &self.value {
            Record::List(list) => Some(list),
            Record::ListItem(_) => None,
        }
    }

    /// Returns the membership record, if this is one.
    pub fn as_list_item(&self) -> Option<&ListItemRecord> {
        match &self.value {
            Record::ListItem(item) => Some(item),
            Record::List(_) => None,
        }
    }
}

/// One member of a list, as reported by a membership read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListItem {
    /// URI of the membership record.
    pub uri: AtUri,
    /// The member.
    pub subject: Subject,
}

/// One page of list members.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    /// Members on this page.
    pub items: Vec<ListItem>,
    /// Continuation cursor; `None` on the last page.
    pub cursor: Option<String>,
}

/// One page of repository records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordPage {
    /// Records on this page.
    pub records: Vec<StoredRecord>,
    /// Continuation cursor; `None` on the last page.
    pub cursor: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn created_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 4, 21, 12, 0, 0).unwrap()
    }

    #[test]
    fn modlist_record_wire_format() {
        let record = Record::List(ListRecord::modlist(
            "Verified Accounts (modlist)",
            "Auto-synced verified account modlist",
            created_at(),
        ));

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["$type"], "app.bsky.graph.list");
        assert_eq!(json["purpose"], MODLIST_PURPOSE);
        assert_eq!(json["name"], "Verified Accounts (modlist)");
        assert_eq!(json["createdAt"], "2025-04-21T12:00:00Z");
        assert_eq!(record.collection(), Collection::List);
    }

    #[test]
    fn list_item_record_from_service_json() {
        let json = serde_json::json!({
            "uri": "at://did:plc:me/app.bsky.graph.listitem/3kabc",
            "cid": "bafyrei",
            "value": {
                "$type": "app.bsky.graph.listitem",
                "subject": "did:plc:member",
                "list": "at://did:plc:me/app.bsky.graph.list/3lmod",
                "createdAt": "2025-04-21T12:00:00.000Z"
            }
        });

        let stored: StoredRecord = serde_json::from_value(json).unwrap();
        let item = stored.as_list_item().unwrap();
        let list = ListHandle::parse("at://did:plc:me/app.bsky.graph.list/3lmod").unwrap();
        assert!(item.places(&Subject::new("did:plc:member"), &list));
        assert!(!item.places(&Subject::new("did:plc:other"), &list));
        assert!(stored.as_list().is_none());
    }

    #[test]
    fn modlist_match_checks_purpose_and_name() {
        let mut record = ListRecord::modlist("Mirror", "d", created_at());
        assert!(record.is_modlist_named("Mirror"));
        assert!(!record.is_modlist_named("mirror"));

        record.purpose = CURATELIST_PURPOSE.to_string();
        assert!(!record.is_modlist_named("Mirror"));
    }

    #[test]
    fn list_record_without_description() {
        let json = serde_json::json!({
            "$type": "app.bsky.graph.list",
            "purpose": CURATELIST_PURPOSE,
            "name": "Verified",
            "createdAt": "2025-01-01T00:00:00Z"
        });
        let record: Record = serde_json::from_value(json).unwrap();
        match record {
            Record::List(list) => assert!(list.description.is_none()),
            other => panic!("unexpected record: {other:?}"),
        }
    }

    #[test]
    fn list_item_without_created_at() {
        let json = serde_json::json!({
            "$type": "app.bsky.graph.listitem",
            "subject": "did:plc:member",
            "list": "at://did:plc:me/app.bsky.graph.list/3lmod"
        });
        let record: Record = serde_json::from_value(json).unwrap();
        let item = match record {
            Record::ListItem(item) => item,
            other => panic!("unexpected record: {other:?}"),
        };
        assert!(item.created_at.is_none());

        let written = serde_json::to_value(Record::ListItem(item)).unwrap();
        assert!(written.get("createdAt").is_none());
    }
}
