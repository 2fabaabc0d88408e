//! Remote list-and-record service abstraction.

use crate::error::ServiceResult;
use async_trait::async_trait;
use listmirror_protocol::{AtUri, Collection, Did, ListHandle, ListPage, Record, RecordKey, RecordPage};
use std::fmt;

/// The remote service holding lists and records.
///
/// This trait abstracts the network layer, allowing for different
/// implementations (XRPC over HTTPS, in-memory for testing, etc.).
/// Implementations classify every failure into a
/// [`FailureKind`](crate::FailureKind) before returning it.
#[async_trait]
pub trait ListService: Send + Sync {
    /// Reads one page of a list's members.
    async fn get_list_page(
        &self,
        list: &ListHandle,
        cursor: Option<&str>,
        limit: u32,
    ) -> ServiceResult<ListPage>;

    /// Enumerates one page of the records `repo` holds in `collection`.
    async fn list_records(
        &self,
        repo: &Did,
        collection: Collection,
        cursor: Option<&str>,
        limit: u32,
    ) -> ServiceResult<RecordPage>;

    /// Creates a record in `repo`, returning its URI.
    async fn create_record(&self, repo: &Did, record: &Record) -> ServiceResult<AtUri>;

    /// Deletes a record from `repo`.
    async fn delete_record(
        &self,
        repo: &Did,
        collection: Collection,
        rkey: &RecordKey,
    ) -> ServiceResult<()>;
}

/// The calls a [`ListService`] exposes, for logging and accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceOp {
    /// [`ListService::get_list_page`]
    GetList,
    /// [`ListService::list_records`]
    ListRecords,
    /// [`ListService::create_record`]
    CreateRecord,
    /// [`ListService::delete_record`]
    DeleteRecord,
}

impl ServiceOp {
    /// Returns true for calls that change remote state.
    pub fn is_mutation(&self) -> bool {
        matches!(self, ServiceOp::CreateRecord | ServiceOp::DeleteRecord)
    }

    /// The XRPC method name.
    pub fn name(&self) -> &'static str {
        match self {
            ServiceOp::GetList => "getList",
            ServiceOp::ListRecords => "listRecords",
            ServiceOp::CreateRecord => "createRecord",
            ServiceOp::DeleteRecord => "deleteRecord",
        }
    }
}

impl fmt::Display for ServiceOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
