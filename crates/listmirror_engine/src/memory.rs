//! In-memory list service for testing.
//!
//! Models one service instance: lists owned by other accounts (seeded
//! directly) plus repositories of records owned by authenticated accounts.
//! Failures can be injected per call type or per subject, and every call is
//! counted.

use crate::error::{ServiceError, ServiceResult};
use crate::service::{ListService, ServiceOp};
use async_trait::async_trait;
use listmirror_protocol::{
    AtUri, Collection, Did, ListHandle, ListItem, ListItemRecord, ListPage, ListRecord, Record,
    RecordKey, RecordPage, StoredRecord, Subject,
};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

/// An injected failure.
#[derive(Debug, Clone)]
struct Fault {
    op: ServiceOp,
    error: ServiceError,
    /// `None` fails forever.
    remaining: Option<u32>,
}

#[derive(Debug, Default)]
struct MemoryState {
    foreign_lists: HashMap<ListHandle, Vec<Subject>>,
    records: Vec<StoredRecord>,
    next_rkey: u64,
    faults: VecDeque<Fault>,
    subject_faults: HashMap<Subject, ServiceError>,
    calls: HashMap<ServiceOp, u64>,
    repeat_boundary_items: bool,
}

impl MemoryState {
    fn mint_rkey(&mut self) -> RecordKey {
        self.next_rkey += 1;
        RecordKey::new(format!("3lm{:010}", self.next_rkey))
    }

    fn mint_uri(&mut self, repo: &Did, collection: Collection) -> AtUri {
        let rkey = self.mint_rkey();
        AtUri::new(repo.as_str(), collection.nsid(), rkey)
    }

    fn take_fault(&mut self, op: ServiceOp) -> Option<ServiceError> {
        let index = self.faults.iter().position(|fault| fault.op == op)?;
        let fault = &mut self.faults[index];
        let error = fault.error.clone();
        let exhausted = match &mut fault.remaining {
            Some(remaining) => {
                *remaining -= 1;
                *remaining == 0
            }
            None => false,
        };
        if exhausted {
            self.faults.remove(index);
        }
        Some(error)
    }

    fn begin(&mut self, op: ServiceOp) -> ServiceResult<()> {
        *self.calls.entry(op).or_default() += 1;
        match self.take_fault(op) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn owns_list(&self, list: &ListHandle) -> bool {
        self.records
            .iter()
            .any(|record| &record.uri == list.uri() && record.as_list().is_some())
    }

    fn list_items(&self, list: &ListHandle) -> Option<Vec<ListItem>> {
        if let Some(members) = self.foreign_lists.get(list) {
            let items = members
                .iter()
                .enumerate()
                .map(|(index, subject)| ListItem {
                    uri: AtUri::new(
                        list.uri().authority(),
                        Collection::ListItem.nsid(),
                        RecordKey::new(format!("src{index:06}")),
                    ),
                    subject: subject.clone(),
                })
                .collect();
            return Some(items);
        }

        if !self.owns_list(list) {
            return None;
        }

        Some(
            self.records
                .iter()
                .filter_map(|record| {
                    let item = record.as_list_item()?;
                    (&item.list == list.uri()).then(|| ListItem {
                        uri: record.uri.clone(),
                        subject: item.subject.clone(),
                    })
                })
                .collect(),
        )
    }

    fn page<T: Clone>(
        &self,
        all: &[T],
        cursor: Option<&str>,
        limit: u32,
    ) -> ServiceResult<(Vec<T>, Option<String>)> {
        let offset = match cursor {
            Some(cursor) => cursor.parse::<usize>().map_err(|_| {
                ServiceError::other(format!("InvalidRequest: bad cursor {cursor:?}"))
            })?,
            None => 0,
        };
        let offset = offset.min(all.len());
        let end = offset.saturating_add(limit as usize).min(all.len());
        let start = if self.repeat_boundary_items && offset > 0 {
            offset - 1
        } else {
            offset
        };
        let next = (end < all.len()).then(|| end.to_string());
        Ok((all[start..end].to_vec(), next))
    }
}

/// An in-memory [`ListService`].
///
/// Cloning shares the underlying state, so a test can keep a handle for
/// inspection after handing a clone to the engine.
#[derive(Debug, Clone, Default)]
pub struct MemoryListService {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryListService {
    /// Creates an empty service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes a list owned by another account with the given members.
    /// Replaces the members if the list already exists.
    pub fn set_foreign_list(
        &self,
        list: &ListHandle,
        members: impl IntoIterator<Item = Subject>,
    ) {
        self.state
            .lock()
            .foreign_lists
            .insert(list.clone(), members.into_iter().collect());
    }

    /// Stores a list declaration in `repo` without going through the API.
    pub fn insert_list(&self, repo: &Did, record: ListRecord) -> ListHandle {
        let mut state = self.state.lock();
        let handle = ListHandle::in_repo(repo.as_str(), state.mint_rkey());
        state.records.push(StoredRecord {
            uri: handle.uri().clone(),
            cid: None,
            value: Record::List(record),
        });
        handle
    }

    /// Stores a membership record in `repo` without going through the API.
    pub fn insert_member(&self, repo: &Did, list: &ListHandle, subject: Subject) -> AtUri {
        let mut state = self.state.lock();
        let uri = state.mint_uri(repo, Collection::ListItem);
        state.records.push(StoredRecord {
            uri: uri.clone(),
            cid: None,
            value: Record::ListItem(ListItemRecord::new(subject, list, chrono::Utc::now())),
        });
        uri
    }

    /// Current members of a list.
    pub fn members(&self, list: &ListHandle) -> BTreeSet<Subject> {
        self.state
            .lock()
            .list_items(list)
            .unwrap_or_default()
            .into_iter()
            .map(|item| item.subject)
            .collect()
    }

    /// Lists declared in `repo`, in creation order.
    pub fn lists(&self, repo: &Did) -> Vec<(ListHandle, ListRecord)> {
        self.state
            .lock()
            .records
            .iter()
            .filter(|record| record.uri.authority() == repo.as_str())
            .filter_map(|record| {
                let list = record.as_list()?;
                let handle = ListHandle::new(record.uri.clone()).ok()?;
                Some((handle, list.clone()))
            })
            .collect()
    }

    /// Fails the next `times` calls of type `op` with `error`.
    pub fn fail_next(&self, op: ServiceOp, error: ServiceError, times: u32) {
        if times == 0 {
            return;
        }
        self.state.lock().faults.push_back(Fault {
            op,
            error,
            remaining: Some(times),
        });
    }

    /// Fails every call of type `op` with `error`.
    pub fn fail_always(&self, op: ServiceOp, error: ServiceError) {
        self.state.lock().faults.push_back(Fault {
            op,
            error,
            remaining: None,
        });
    }

    /// Rejects every attempt to add `subject` to a list with `error`.
    pub fn reject_subject(&self, subject: Subject, error: ServiceError) {
        self.state.lock().subject_faults.insert(subject, error);
    }

    /// Removes all injected failures.
    pub fn clear_faults(&self) {
        let mut state = self.state.lock();
        state.faults.clear();
        state.subject_faults.clear();
    }

    /// Makes every page after the first repeat the last item of the
    /// previous page.
    pub fn set_repeat_boundary_items(&self, repeat: bool) {
        self.state.lock().repeat_boundary_items = repeat;
    }

    /// Number of calls of type `op` received so far.
    pub fn calls(&self, op: ServiceOp) -> u64 {
        self.state.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Number of mutating calls received so far.
    pub fn mutation_calls(&self) -> u64 {
        let state = self.state.lock();
        state
            .calls
            .iter()
            .filter(|(op, _)| op.is_mutation())
            .map(|(_, count)| count)
            .sum()
    }

    /// Resets all call counters.
    pub fn reset_calls(&self) {
        self.state.lock().calls.clear();
    }
}

#[async_trait]
impl ListService for MemoryListService {
    async fn get_list_page(
        &self,
        list: &ListHandle,
        cursor: Option<&str>,
        limit: u32,
    ) -> ServiceResult<ListPage> {
        let mut state = self.state.lock();
        state.begin(ServiceOp::GetList)?;

        let items = state
            .list_items(list)
            .ok_or_else(|| ServiceError::other("InvalidRequest: List not found"))?;
        let (items, cursor) = state.page(&items, cursor, limit)?;
        Ok(ListPage { items, cursor })
    }

    async fn list_records(
        &self,
        repo: &Did,
        collection: Collection,
        cursor: Option<&str>,
        limit: u32,
    ) -> ServiceResult<RecordPage> {
        let mut state = self.state.lock();
        state.begin(ServiceOp::ListRecords)?;

        let records: Vec<StoredRecord> = state
            .records
            .iter()
            .filter(|record| {
                record.uri.authority() == repo.as_str()
                    && record.uri.collection() == collection.nsid()
            })
            .cloned()
            .collect();
        let (records, cursor) = state.page(&records, cursor, limit)?;
        Ok(RecordPage { records, cursor })
    }

    async fn create_record(&self, repo: &Did, record: &Record) -> ServiceResult<AtUri> {
        let mut state = self.state.lock();
        state.begin(ServiceOp::CreateRecord)?;

        if let Record::ListItem(item) = record {
            if let Some(error) = state.subject_faults.get(&item.subject) {
                return Err(error.clone());
            }
            let exists = state.records.iter().any(|stored| {
                stored.uri.authority() == repo.as_str()
                    && stored.as_list_item().is_some_and(|existing| {
                        existing.subject == item.subject && existing.list == item.list
                    })
            });
            if exists {
                return Err(ServiceError::duplicate(format!(
                    "duplicate list item for {}",
                    item.subject
                )));
            }
        }

        let uri = state.mint_uri(repo, record.collection());
        state.records.push(StoredRecord {
            uri: uri.clone(),
            cid: None,
            value: record.clone(),
        });
        Ok(uri)
    }

    async fn delete_record(
        &self,
        repo: &Did,
        collection: Collection,
        rkey: &RecordKey,
    ) -> ServiceResult<()> {
        let mut state = self.state.lock();
        state.begin(ServiceOp::DeleteRecord)?;

        let position = state.records.iter().position(|record| {
            record.uri.authority() == repo.as_str()
                && record.uri.collection() == collection.nsid()
                && record.uri.rkey() == rkey
        });
        match position {
            Some(index) => {
                state.records.remove(index);
                Ok(())
            }
            None => Err(ServiceError::not_found(format!(
                "RecordNotFound: Could not locate record {rkey}"
            ))),
        }
    }
}
