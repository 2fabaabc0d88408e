//! Test fixtures for mirror scenarios.
//!
//! Provides an in-memory service seeded with a source list, plus helpers to
//! run the engine against it and check the outcome.

use chrono::Utc;
use listmirror_engine::{
    MemoryListService, MirrorConfig, MirrorEngine, MirrorResult, ReconciliationSummary,
    ThrottlePolicy,
};
use listmirror_protocol::{Did, ListHandle, ListRecord, Subject};
use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;

/// Source list used by fixtures.
pub const SOURCE_LIST: &str = "at://did:plc:curator/app.bsky.graph.list/3lsource";

/// Mirror name used by fixtures.
pub const MIRROR_NAME: &str = "Verified Accounts (modlist)";

/// Account that owns the mirror in fixtures.
pub const MIRROR_ACCOUNT: &str = "did:plc:mirrorowner";

/// A source list and an account sharing one in-memory service.
#[derive(Debug, Clone)]
pub struct MirrorFixture {
    /// The service. Clones share its state.
    pub service: MemoryListService,
    /// The source list.
    pub source: ListHandle,
    /// The account that owns the mirror.
    pub account: Did,
}

impl MirrorFixture {
    /// Creates a fixture with an empty source and no mirror.
    pub fn new() -> Self {
        let fixture = Self {
            service: MemoryListService::new(),
            source: ListHandle::parse(SOURCE_LIST).expect("Invalid fixture list"),
            account: Did::parse(MIRROR_ACCOUNT).expect("Invalid fixture account"),
        };
        fixture.set_source(Vec::new());
        fixture
    }

    /// Replaces the source membership.
    pub fn set_source(&self, members: impl IntoIterator<Item = Subject>) {
        self.service.set_foreign_list(&self.source, members);
    }

    /// Creates the mirror list with the given members.
    pub fn create_mirror(&self, members: impl IntoIterator<Item = Subject>) -> ListHandle {
        let mirror = self.service.insert_list(
            &self.account,
            ListRecord::modlist(MIRROR_NAME, "fixture mirror", Utc::now()),
        );
        for subject in members {
            self.service.insert_member(&self.account, &mirror, subject);
        }
        mirror
    }

    /// A configuration that never sleeps.
    pub fn config(&self) -> MirrorConfig {
        MirrorConfig::new(self.source.clone(), MIRROR_NAME)
            .with_batch_pause(Duration::ZERO)
            .with_throttle(ThrottlePolicy::no_wait(3))
    }

    /// An engine over this fixture's service.
    pub fn engine(&self, config: MirrorConfig) -> MirrorEngine<MemoryListService> {
        MirrorEngine::new(config, self.service.clone(), self.account.clone())
    }

    /// Runs one reconciliation with [`config`](Self::config).
    pub fn run(&self) -> MirrorResult<ReconciliationSummary> {
        block_on(self.engine(self.config()).run())
    }

    /// Current source members.
    pub fn source_members(&self) -> BTreeSet<Subject> {
        self.service.members(&self.source)
    }

    /// The mirror list, if the account has one.
    pub fn mirror(&self) -> Option<ListHandle> {
        self.service
            .lists(&self.account)
            .into_iter()
            .find(|(_, record)| record.is_modlist_named(MIRROR_NAME))
            .map(|(handle, _)| handle)
    }

    /// Current mirror members; empty if there is no mirror.
    pub fn mirror_members(&self) -> BTreeSet<Subject> {
        self.mirror()
            .map(|mirror| self.service.members(&mirror))
            .unwrap_or_default()
    }

    /// Asserts the mirror holds exactly the source's members.
    pub fn assert_converged(&self) {
        assert_eq!(
            self.mirror_members(),
            self.source_members(),
            "Mirror membership differs from source"
        );
    }
}

impl Default for MirrorFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds `count` distinct subjects.
pub fn subjects(count: usize) -> Vec<Subject> {
    (0..count)
        .map(|i| Subject::new(format!("did:plc:subject{i:06}")))
        .collect()
}

/// Drives a future to completion on a fresh current-thread runtime.
pub fn block_on<F: Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("Failed to build runtime")
        .block_on(future)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixture_starts_without_mirror() {
        let fixture = MirrorFixture::new();
        assert!(fixture.mirror().is_none());
        assert!(fixture.source_members().is_empty());
        assert!(fixture.mirror_members().is_empty());
    }

    #[test]
    fn fixture_mirror_is_found() {
        let fixture = MirrorFixture::new();
        let mirror = fixture.create_mirror(subjects(3));
        assert_eq!(fixture.mirror(), Some(mirror));
        assert_eq!(fixture.mirror_members().len(), 3);
    }

    #[test]
    fn run_converges() {
        let fixture = MirrorFixture::new();
        fixture.set_source(subjects(4));
        let summary = fixture.run().unwrap();
        assert_eq!(summary.added, 4);
        fixture.assert_converged();
    }
}
