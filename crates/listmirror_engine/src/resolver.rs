//! Finding or creating the mirror list.

use crate::config::{DuplicateMirrorPolicy, MirrorConfig};
use crate::error::{MirrorError, MirrorResult};
use crate::executor::{Intent, Interrupted, RateLimitedExecutor, ThrottleState};
use crate::reader::{CursorTrail, NextPage};
use crate::service::{ListService, ServiceOp};
use chrono::Utc;
use listmirror_protocol::{AtUri, Collection, Did, ListHandle, ListRecord, Record};
use tracing::{debug, info, warn};

/// A mirror list handle and how it was obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMirror {
    /// The mirror list.
    pub handle: ListHandle,
    /// True if the list was created by this resolution.
    pub created: bool,
}

/// Locates the account's mirror list by name, creating it when missing.
pub struct MirrorResolver<'a, S: ListService + ?Sized> {
    service: &'a S,
    executor: &'a RateLimitedExecutor,
    account: &'a Did,
    config: &'a MirrorConfig,
}

impl<'a, S: ListService + ?Sized> MirrorResolver<'a, S> {
    /// Creates a resolver for lists owned by `account`.
    pub fn new(
        service: &'a S,
        executor: &'a RateLimitedExecutor,
        account: &'a Did,
        config: &'a MirrorConfig,
    ) -> Self {
        Self {
            service,
            executor,
            account,
            config,
        }
    }

    /// Returns the moderation list named `name`, creating it if the account
    /// has none.
    pub async fn resolve_or_create(&self, name: &str) -> MirrorResult<ResolvedMirror> {
        self.resolve_or_create_with(name, &mut ThrottleState::default())
            .await
    }

    /// Like [`resolve_or_create`](Self::resolve_or_create), recording
    /// throttling in `throttle`.
    pub async fn resolve_or_create_with(
        &self,
        name: &str,
        throttle: &mut ThrottleState,
    ) -> MirrorResult<ResolvedMirror> {
        let matches = self.find_named(name, throttle).await?;

        let uri = match matches.len() {
            0 => return self.create(name, throttle).await,
            1 => &matches[0],
            count => match self.config.duplicate_policy {
                DuplicateMirrorPolicy::FirstMatch => {
                    let uris: Vec<String> = matches.iter().map(ToString::to_string).collect();
                    warn!(
                        mirror_name = name,
                        count,
                        matches = ?uris,
                        "Several lists match the mirror name, using the oldest"
                    );
                    &matches[0]
                }
                DuplicateMirrorPolicy::Fail => {
                    return Err(MirrorError::Resolution {
                        name: name.to_string(),
                        reason: format!("{count} moderation lists share this name"),
                        source: None,
                    });
                }
            },
        };

        let handle = into_handle(name, uri.clone())?;
        info!(mirror = %handle, "Found existing mirror list");
        Ok(ResolvedMirror {
            handle,
            created: false,
        })
    }

    /// Enumerates every list the account owns and keeps those matching.
    async fn find_named(
        &self,
        name: &str,
        throttle: &mut ThrottleState,
    ) -> MirrorResult<Vec<AtUri>> {
        let operation = ServiceOp::ListRecords.name();
        let mut matches = Vec::new();
        let mut cursor: Option<String> = None;
        let mut trail = CursorTrail::default();
        let mut scanned = 0usize;

        loop {
            let page = self
                .executor
                .execute(Intent::Read, throttle, operation, || {
                    self.service.list_records(
                        self.account,
                        Collection::List,
                        cursor.as_deref(),
                        self.config.page_size,
                    )
                })
                .await
                .into_result()
                .map_err(|interrupted| self.interrupted(name, operation, interrupted))?;

            scanned += page.records.len();
            matches.extend(page.records.into_iter().filter_map(|record| {
                let created_at = record
                    .as_list()
                    .filter(|list| list.is_modlist_named(name))?
                    .created_at;
                Some((created_at, record.uri))
            }));

            match trail.advance(page.cursor) {
                NextPage::Fetch(next) => cursor = Some(next),
                NextPage::Done => break,
                NextPage::Revisited(next) => {
                    warn!(cursor = %next, "Cursor was already visited, stopping list scan");
                    break;
                }
            }
        }

        debug!(
            mirror_name = name,
            scanned,
            matched = matches.len(),
            "Enumerated owned lists"
        );

        // Oldest first; lists without a timestamp go last, in service order.
        matches.sort_by_key(|(created_at, _)| (created_at.is_none(), *created_at));
        Ok(matches.into_iter().map(|(_, uri)| uri).collect())
    }

    async fn create(
        &self,
        name: &str,
        throttle: &mut ThrottleState,
    ) -> MirrorResult<ResolvedMirror> {
        let operation = ServiceOp::CreateRecord.name();
        let record = Record::List(ListRecord::modlist(
            name,
            self.config.mirror_description.as_str(),
            Utc::now(),
        ));

        let uri = self
            .executor
            .execute(Intent::Create, throttle, operation, || {
                self.service.create_record(self.account, &record)
            })
            .await
            .into_result()
            .map_err(|interrupted| self.interrupted(name, operation, interrupted))?;

        let handle = into_handle(name, uri)?;
        info!(mirror = %handle, mirror_name = name, "Created mirror list");
        Ok(ResolvedMirror {
            handle,
            created: true,
        })
    }

    fn interrupted(&self, name: &str, operation: &str, interrupted: Interrupted) -> MirrorError {
        match interrupted {
            Interrupted::Failed(source) => MirrorError::resolution(name, source),
            Interrupted::Halted(_) => self.executor.exhausted_error(operation),
        }
    }
}

fn into_handle(name: &str, uri: AtUri) -> MirrorResult<ListHandle> {
    ListHandle::new(uri).map_err(|err| MirrorError::Resolution {
        name: name.to_string(),
        reason: err.to_string(),
        source: None,
    })
}
