//! Paginated membership reads.

use crate::diff::MembershipSet;
use crate::error::{MirrorError, MirrorResult};
use crate::executor::{Intent, Interrupted, RateLimitedExecutor, ThrottleState};
use crate::service::{ListService, ServiceOp};
use listmirror_protocol::ListHandle;
use std::collections::HashSet;
use tracing::{debug, warn};

/// What a paginated walk does after a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum NextPage {
    /// Request the page at this cursor.
    Fetch(String),
    /// The service reported no further pages.
    Done,
    /// The service handed back a cursor it already gave out.
    Revisited(String),
}

/// Cursors handed out during one paginated walk.
#[derive(Debug, Default)]
pub(crate) struct CursorTrail {
    seen: HashSet<String>,
}

impl CursorTrail {
    /// Decides the next step from the cursor a page returned. A missing or
    /// empty cursor ends the walk, and so does any cursor seen before.
    pub(crate) fn advance(&mut self, next: Option<String>) -> NextPage {
        match next {
            None => NextPage::Done,
            Some(next) if next.is_empty() => NextPage::Done,
            Some(next) if self.seen.contains(&next) => NextPage::Revisited(next),
            Some(next) => {
                self.seen.insert(next.clone());
                NextPage::Fetch(next)
            }
        }
    }
}

/// Reads the complete membership of a list.
pub struct ListReader<'a, S: ListService + ?Sized> {
    service: &'a S,
    executor: &'a RateLimitedExecutor,
    page_size: u32,
}

impl<'a, S: ListService + ?Sized> ListReader<'a, S> {
    /// Creates a reader issuing calls through `executor`.
    pub fn new(service: &'a S, executor: &'a RateLimitedExecutor, page_size: u32) -> Self {
        Self {
            service,
            executor,
            page_size,
        }
    }

    /// Fetches every member of `list`, following the cursor until the
    /// service stops returning one.
    ///
    /// Either the whole set is returned or an error; a partially read list
    /// is never returned.
    pub async fn fetch_membership(&self, list: &ListHandle) -> MirrorResult<MembershipSet> {
        self.fetch_membership_with(list, &mut ThrottleState::default())
            .await
    }

    /// Like [`fetch_membership`](Self::fetch_membership), recording
    /// throttling in `throttle`.
    pub async fn fetch_membership_with(
        &self,
        list: &ListHandle,
        throttle: &mut ThrottleState,
    ) -> MirrorResult<MembershipSet> {
        let operation = ServiceOp::GetList.name();
        let mut members = MembershipSet::new();
        let mut cursor: Option<String> = None;
        let mut trail = CursorTrail::default();
        let mut pages = 0u32;
        let mut repeated = 0usize;

        loop {
            let page = self
                .executor
                .execute(Intent::Read, throttle, operation, || {
                    self.service
                        .get_list_page(list, cursor.as_deref(), self.page_size)
                })
                .await
                .into_result();

            let page = match page {
                Ok(page) => page,
                Err(Interrupted::Failed(source)) => {
                    return Err(MirrorError::Retrieval {
                        list: list.clone(),
                        source,
                    });
                }
                Err(Interrupted::Halted(_)) => {
                    return Err(self.executor.exhausted_error(operation));
                }
            };

            pages += 1;
            let received = page.items.len();
            for item in page.items {
                if !members.insert(item.subject) {
                    repeated += 1;
                }
            }
            debug!(
                list = %list,
                page = pages,
                received,
                total = members.len(),
                "Fetched list page"
            );

            match trail.advance(page.cursor) {
                NextPage::Fetch(next) => cursor = Some(next),
                NextPage::Done => break,
                NextPage::Revisited(next) => {
                    warn!(list = %list, cursor = %next, "Cursor was already visited, stopping read");
                    break;
                }
            }
        }

        if repeated > 0 {
            debug!(list = %list, repeated, "Dropped repeated members");
        }
        debug!(list = %list, pages, members = members.len(), "Read list membership");
        Ok(members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ThrottlePolicy;
    use crate::error::{ServiceError, ServiceResult};
    use crate::memory::MemoryListService;
    use async_trait::async_trait;
    use listmirror_protocol::{
        AtUri, Collection, Did, ListItem, ListPage, Record, RecordKey, RecordPage, Subject,
    };
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Serves one new member per page with cursors that cycle `a`, `b`, `a`.
    #[derive(Default)]
    struct CyclingCursor {
        calls: AtomicU32,
    }

    #[async_trait]
    impl ListService for CyclingCursor {
        async fn get_list_page(
            &self,
            list: &ListHandle,
            cursor: Option<&str>,
            _limit: u32,
        ) -> ServiceResult<ListPage> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let next = match cursor {
                Some("a") => "b",
                _ => "a",
            };
            Ok(ListPage {
                items: vec![ListItem {
                    uri: AtUri::new(
                        list.uri().authority(),
                        Collection::ListItem.nsid(),
                        RecordKey::new(format!("item{call}")),
                    ),
                    subject: Subject::new(format!("did:plc:member{call:04}")),
                }],
                cursor: Some(next.to_string()),
            })
        }

        async fn list_records(
            &self,
            _repo: &Did,
            _collection: Collection,
            _cursor: Option<&str>,
            _limit: u32,
        ) -> ServiceResult<RecordPage> {
            Ok(RecordPage::default())
        }

        async fn create_record(&self, _repo: &Did, _record: &Record) -> ServiceResult<AtUri> {
            Err(ServiceError::other("read only"))
        }

        async fn delete_record(
            &self,
            _repo: &Did,
            _collection: Collection,
            _rkey: &RecordKey,
        ) -> ServiceResult<()> {
            Err(ServiceError::other("read only"))
        }
    }

    fn source() -> ListHandle {
        ListHandle::parse("at://did:plc:curator/app.bsky.graph.list/verified").unwrap()
    }

    fn members(count: usize) -> Vec<Subject> {
        (0..count)
            .map(|i| Subject::new(format!("did:plc:member{i:04}")))
            .collect()
    }

    #[tokio::test]
    async fn follows_cursor_to_the_end() {
        let service = MemoryListService::new();
        service.set_foreign_list(&source(), members(250));
        let executor = RateLimitedExecutor::new(ThrottlePolicy::no_wait(3));

        let reader = ListReader::new(&service, &executor, 100);
        let set = reader.fetch_membership(&source()).await.unwrap();

        assert_eq!(set.len(), 250);
        assert_eq!(service.calls(ServiceOp::GetList), 3);
    }

    #[tokio::test]
    async fn repeated_boundary_items_are_deduplicated() {
        let service = MemoryListService::new();
        service.set_foreign_list(&source(), members(250));
        service.set_repeat_boundary_items(true);
        let executor = RateLimitedExecutor::new(ThrottlePolicy::no_wait(3));

        let set = ListReader::new(&service, &executor, 100)
            .fetch_membership(&source())
            .await
            .unwrap();
        assert_eq!(set.len(), 250);
    }

    #[tokio::test]
    async fn empty_list_reads_one_page() {
        let service = MemoryListService::new();
        service.set_foreign_list(&source(), Vec::new());
        let executor = RateLimitedExecutor::new(ThrottlePolicy::no_wait(3));

        let set = ListReader::new(&service, &executor, 100)
            .fetch_membership(&source())
            .await
            .unwrap();
        assert!(set.is_empty());
        assert_eq!(service.calls(ServiceOp::GetList), 1);
    }

    #[tokio::test]
    async fn failed_page_is_a_retrieval_error() {
        let service = MemoryListService::new();
        service.set_foreign_list(&source(), members(150));
        service.fail_always(ServiceOp::GetList, ServiceError::other("HTTP 500"));
        let executor = RateLimitedExecutor::new(ThrottlePolicy::no_wait(3));

        let err = ListReader::new(&service, &executor, 100)
            .fetch_membership(&source())
            .await
            .unwrap_err();
        assert!(matches!(err, MirrorError::Retrieval { .. }));
        assert_eq!(service.calls(ServiceOp::GetList), 1);
    }

    #[tokio::test]
    async fn throttled_reads_are_retried() {
        let service = MemoryListService::new();
        service.set_foreign_list(&source(), members(10));
        service.fail_next(ServiceOp::GetList, ServiceError::rate_limited("429"), 2);
        let executor = RateLimitedExecutor::new(ThrottlePolicy::no_wait(3));
        let mut throttle = ThrottleState::default();

        let set = ListReader::new(&service, &executor, 100)
            .fetch_membership_with(&source(), &mut throttle)
            .await
            .unwrap();
        assert_eq!(set.len(), 10);
        assert_eq!(throttle.total, 2);
    }

    #[tokio::test]
    async fn sustained_throttling_ends_the_read() {
        let service = MemoryListService::new();
        service.set_foreign_list(&source(), members(10));
        service.fail_always(ServiceOp::GetList, ServiceError::rate_limited("429"));
        let executor = RateLimitedExecutor::new(ThrottlePolicy::no_wait(3));

        let err = ListReader::new(&service, &executor, 100)
            .fetch_membership(&source())
            .await
            .unwrap_err();
        assert!(err.is_benign());
        assert_eq!(service.calls(ServiceOp::GetList), 3);
        assert!(executor.is_halted());
    }

    #[tokio::test]
    async fn cycling_cursor_ends_the_read() {
        let service = CyclingCursor::default();
        let executor = RateLimitedExecutor::new(ThrottlePolicy::no_wait(3));

        let set = ListReader::new(&service, &executor, 100)
            .fetch_membership(&source())
            .await
            .unwrap();

        // Pages at no cursor, `a` and `b`; the second `a` stops the walk.
        assert_eq!(service.calls.load(Ordering::SeqCst), 3);
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn cursor_trail_steps() {
        let mut trail = CursorTrail::default();
        assert_eq!(trail.advance(Some("a".into())), NextPage::Fetch("a".into()));
        assert_eq!(trail.advance(Some("b".into())), NextPage::Fetch("b".into()));
        assert_eq!(trail.advance(Some("a".into())), NextPage::Revisited("a".into()));
        assert_eq!(trail.advance(Some(String::new())), NextPage::Done);
        assert_eq!(trail.advance(None), NextPage::Done);
    }
}
