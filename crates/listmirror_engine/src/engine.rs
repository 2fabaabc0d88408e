//! Reconciliation engine state machine.

use crate::batch::{BatchReport, BatchRunner};
use crate::config::MirrorConfig;
use crate::diff::{diff, MembershipSet};
use crate::error::{MirrorError, MirrorResult, PerItemError};
use crate::executor::{Execution, Intent, Interrupted, RateLimitedExecutor, ThrottleState};
use crate::reader::{CursorTrail, ListReader, NextPage};
use crate::resolver::MirrorResolver;
use crate::service::{ListService, ServiceOp};
use chrono::Utc;
use listmirror_protocol::{Collection, Did, ListHandle, ListItemRecord, Record, RecordKey, Subject};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// The current state of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    /// No run has started.
    Idle,
    /// Finding or creating the mirror list.
    Resolving,
    /// Reading source and mirror membership.
    Reading,
    /// Adding missing members.
    Adding,
    /// Removing extra members.
    Removing,
    /// The last run finished.
    Completed,
    /// The last run stopped early under sustained throttling.
    Aborted,
    /// The last run failed.
    Failed,
}

impl EngineState {
    /// Returns true while a run is in progress.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            EngineState::Resolving
                | EngineState::Reading
                | EngineState::Adding
                | EngineState::Removing
        )
    }

    /// Returns true if a new run can start.
    pub fn can_start_run(&self) -> bool {
        !self.is_active()
    }
}

/// Result of one attempted addition or removal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome {
    /// The change was made.
    Applied,
    /// The service reported the change was already in place.
    AlreadyInDesiredState,
    /// The change failed and was not retried.
    FailedPermanently(PerItemError),
    /// The run was halted by throttling before the change was made.
    SkippedThrottleExhausted,
}

/// What a reconciliation run did.
///
/// Counts cover only work finished before the run ended. When a run is
/// aborted by throttling, `skipped` holds everything that was planned but
/// not attempted.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconciliationSummary {
    /// The mirror list, once resolved.
    pub mirror: Option<ListHandle>,
    /// True if the mirror was created during this run.
    pub mirror_created: bool,
    /// Members read from the source.
    pub source_count: usize,
    /// Members read from the mirror.
    pub mirror_count: usize,
    /// Members missing from the mirror.
    pub planned_additions: usize,
    /// Mirror members absent from the source.
    pub planned_removals: usize,
    /// Members added.
    pub added: usize,
    /// Members removed.
    pub removed: usize,
    /// Additions the service reported as already present.
    pub already_present: usize,
    /// Removals whose record was already gone.
    pub already_absent: usize,
    /// Additions and removals that failed.
    pub failed: Vec<PerItemError>,
    /// Planned changes never made because the run was halted.
    pub skipped: usize,
    /// Rate-limited responses seen during the run.
    pub throttle_hits: u32,
    /// True if throttling ended the run early.
    pub aborted: bool,
    /// True if no changes were applied by design.
    pub dry_run: bool,
    /// Wall-clock duration of the run.
    pub duration_ms: u64,
}

impl ReconciliationSummary {
    /// Returns true if the mirror now matches the source as far as this run
    /// can tell.
    pub fn is_converged(&self) -> bool {
        !self.aborted
            && !self.dry_run
            && self.failed.is_empty()
            && self.skipped == 0
    }

    fn record(&mut self, intent: Intent, outcome: MutationOutcome) {
        match (outcome, intent) {
            (MutationOutcome::Applied, Intent::Remove) => self.removed += 1,
            (MutationOutcome::Applied, _) => self.added += 1,
            (MutationOutcome::AlreadyInDesiredState, Intent::Remove) => self.already_absent += 1,
            (MutationOutcome::AlreadyInDesiredState, _) => self.already_present += 1,
            (MutationOutcome::FailedPermanently(failure), _) => self.failed.push(failure),
            (MutationOutcome::SkippedThrottleExhausted, _) => self.skipped += 1,
        }
    }

    fn fold(&mut self, intent: Intent, report: BatchReport<ItemReport>) {
        for item in report.results {
            self.throttle_hits += item.throttle_hits;
            self.record(intent, item.outcome);
        }
        self.skipped += report.unattempted;
    }
}

/// Outcome of one per-subject task.
#[derive(Debug)]
struct ItemReport {
    outcome: MutationOutcome,
    throttle_hits: u32,
}

/// Marks a run in progress. A run future dropped before it finishes leaves
/// the engine `Failed` instead of stuck in an active state.
struct RunGuard<'a> {
    state: &'a RwLock<EngineState>,
    finished: bool,
}

impl RunGuard<'_> {
    fn finish(mut self, state: EngineState) {
        *self.state.write() = state;
        self.finished = true;
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            let mut state = self.state.write();
            warn!(state = ?*state, "Run cancelled before it finished");
            *state = EngineState::Failed;
        }
    }
}

/// Keeps a mirror list's membership equal to a source list's.
///
/// Each call to [`run`](Self::run) reads both lists from scratch, computes
/// the difference and applies it. Nothing is carried between runs; the
/// remote lists are the system of record.
pub struct MirrorEngine<S: ListService> {
    config: MirrorConfig,
    service: Arc<S>,
    account: Did,
    state: RwLock<EngineState>,
}

impl<S: ListService> MirrorEngine<S> {
    /// Creates an engine acting as `account`.
    pub fn new(config: MirrorConfig, service: S, account: Did) -> Self {
        Self::with_shared_service(config, Arc::new(service), account)
    }

    /// Creates an engine over a shared service.
    pub fn with_shared_service(config: MirrorConfig, service: Arc<S>, account: Did) -> Self {
        Self {
            config,
            service,
            account,
            state: RwLock::new(EngineState::Idle),
        }
    }

    /// Gets the current state.
    pub fn state(&self) -> EngineState {
        *self.state.read()
    }

    /// The run configuration.
    pub fn config(&self) -> &MirrorConfig {
        &self.config
    }

    /// The account that owns the mirror.
    pub fn account(&self) -> &Did {
        &self.account
    }

    fn set_state(&self, state: EngineState) {
        *self.state.write() = state;
    }

    fn begin_run(&self) -> MirrorResult<RunGuard<'_>> {
        let mut state = self.state.write();
        if !state.can_start_run() {
            return Err(MirrorError::InvalidStateTransition {
                from: format!("{:?}", *state),
                to: format!("{:?}", EngineState::Resolving),
            });
        }
        *state = EngineState::Resolving;
        Ok(RunGuard {
            state: &self.state,
            finished: false,
        })
    }

    /// Performs one reconciliation run.
    ///
    /// Returns the summary on success. When sustained throttling ends the
    /// run early the error is [`MirrorError::ThrottleExhausted`], which
    /// carries the partial summary and is [benign](MirrorError::is_benign).
    pub async fn run(&self) -> MirrorResult<ReconciliationSummary> {
        self.config.validate()?;
        let guard = self.begin_run()?;

        let start = Instant::now();
        let executor = RateLimitedExecutor::new(self.config.throttle.clone());
        let mut summary = ReconciliationSummary {
            dry_run: self.config.dry_run,
            ..Default::default()
        };

        info!(
            source = %self.config.source_list,
            mirror_name = %self.config.mirror_name,
            dry_run = self.config.dry_run,
            "Starting reconciliation"
        );
        let result = self.reconcile(&executor, &mut summary).await;
        summary.duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(()) => {
                guard.finish(EngineState::Completed);
                info!(
                    added = summary.added,
                    removed = summary.removed,
                    already_present = summary.already_present,
                    already_absent = summary.already_absent,
                    failed = summary.failed.len(),
                    duration_ms = summary.duration_ms,
                    "Reconciliation complete"
                );
                Ok(summary)
            }
            Err(MirrorError::ThrottleExhausted {
                operation,
                attempts,
                ..
            }) => {
                summary.aborted = true;
                guard.finish(EngineState::Aborted);
                warn!(
                    operation = %operation,
                    attempts,
                    added = summary.added,
                    removed = summary.removed,
                    skipped = summary.skipped,
                    "Reconciliation stopped early by rate limiting"
                );
                Err(MirrorError::ThrottleExhausted {
                    operation,
                    attempts,
                    summary: Box::new(summary),
                })
            }
            Err(err) => {
                guard.finish(EngineState::Failed);
                error!(error = %err, "Reconciliation failed");
                Err(err)
            }
        }
    }

    async fn reconcile(
        &self,
        executor: &RateLimitedExecutor,
        summary: &mut ReconciliationSummary,
    ) -> MirrorResult<()> {
        let config = &self.config;
        let service = self.service.as_ref();

        // Resolve the mirror once; the handle is reused for the whole run.
        let mut throttle = ThrottleState::default();
        let resolved = MirrorResolver::new(service, executor, &self.account, config)
            .resolve_or_create_with(&config.mirror_name, &mut throttle)
            .await;
        summary.throttle_hits += throttle.total;
        let mirror = resolved?;
        summary.mirror = Some(mirror.handle.clone());
        summary.mirror_created = mirror.created;

        self.set_state(EngineState::Reading);
        let reader = ListReader::new(service, executor, config.page_size);
        let source = self.read(&reader, &config.source_list, summary).await?;
        let current = if mirror.created {
            debug!(mirror = %mirror.handle, "Mirror was just created, treating it as empty");
            MembershipSet::new()
        } else {
            self.read(&reader, &mirror.handle, summary).await?
        };
        summary.source_count = source.len();
        summary.mirror_count = current.len();

        let plan = diff(&source, &current);
        summary.planned_additions = plan.to_add().len();
        summary.planned_removals = plan.to_remove().len();
        info!(
            source_members = source.len(),
            mirror_members = current.len(),
            to_add = summary.planned_additions,
            to_remove = summary.planned_removals,
            "Computed membership diff"
        );

        if config.dry_run {
            for subject in plan.to_add() {
                info!(subject = %subject, "Would add");
            }
            for subject in plan.to_remove() {
                info!(subject = %subject, "Would remove");
            }
            return Ok(());
        }

        let (to_add, to_remove) = plan.into_parts();
        let runner = BatchRunner::new(config.batch_size, config.batch_pause);
        let handle = &mirror.handle;

        if !to_add.is_empty() {
            self.set_state(EngineState::Adding);
            let report = runner
                .run(
                    to_add,
                    || executor.is_halted(),
                    |subject| self.add_member(executor, handle, subject),
                )
                .await;
            debug!(batches = report.batches, "Additions submitted");
            summary.fold(Intent::Add, report);
        }

        if executor.is_halted() {
            summary.skipped += to_remove.len();
            return Err(executor.exhausted_error(ServiceOp::CreateRecord.name()));
        }

        if !to_remove.is_empty() {
            self.set_state(EngineState::Removing);
            let report = runner
                .run(
                    to_remove,
                    || executor.is_halted(),
                    |subject| self.remove_member(executor, handle, subject),
                )
                .await;
            debug!(batches = report.batches, "Removals submitted");
            summary.fold(Intent::Remove, report);
        }

        if executor.is_halted() {
            return Err(executor.exhausted_error(ServiceOp::DeleteRecord.name()));
        }
        Ok(())
    }

    async fn read(
        &self,
        reader: &ListReader<'_, S>,
        list: &ListHandle,
        summary: &mut ReconciliationSummary,
    ) -> MirrorResult<MembershipSet> {
        let mut throttle = ThrottleState::default();
        let members = reader.fetch_membership_with(list, &mut throttle).await;
        summary.throttle_hits += throttle.total;
        members
    }

    async fn add_member(
        &self,
        executor: &RateLimitedExecutor,
        mirror: &ListHandle,
        subject: Subject,
    ) -> ItemReport {
        let record = Record::ListItem(ListItemRecord::new(subject.clone(), mirror, Utc::now()));
        let mut throttle = ThrottleState::default();

        let execution = executor
            .execute(
                Intent::Add,
                &mut throttle,
                ServiceOp::CreateRecord.name(),
                || self.service.create_record(&self.account, &record),
            )
            .await;

        ItemReport {
            outcome: settle(Intent::Add, subject, execution),
            throttle_hits: throttle.total,
        }
    }

    async fn remove_member(
        &self,
        executor: &RateLimitedExecutor,
        mirror: &ListHandle,
        subject: Subject,
    ) -> ItemReport {
        let mut throttle = ThrottleState::default();

        let outcome = match self
            .locate_member(executor, &mut throttle, mirror, &subject)
            .await
        {
            Ok(Some(rkey)) => {
                let execution = executor
                    .execute(
                        Intent::Remove,
                        &mut throttle,
                        ServiceOp::DeleteRecord.name(),
                        || {
                            self.service
                                .delete_record(&self.account, Collection::ListItem, &rkey)
                        },
                    )
                    .await;
                settle(Intent::Remove, subject, execution)
            }
            Ok(None) => {
                debug!(subject = %subject, "No membership record to delete");
                MutationOutcome::AlreadyInDesiredState
            }
            Err(Interrupted::Failed(source)) => {
                settle(Intent::Remove, subject, Execution::<()>::Failed(source))
            }
            Err(Interrupted::Halted(halt)) => {
                settle(Intent::Remove, subject, Execution::<()>::Halted(halt))
            }
        };

        ItemReport {
            outcome,
            throttle_hits: throttle.total,
        }
    }

    /// Finds the key of the record placing `subject` in `mirror`, reading
    /// the account's membership records until the first match.
    async fn locate_member(
        &self,
        executor: &RateLimitedExecutor,
        throttle: &mut ThrottleState,
        mirror: &ListHandle,
        subject: &Subject,
    ) -> Result<Option<RecordKey>, Interrupted> {
        let mut cursor: Option<String> = None;
        let mut trail = CursorTrail::default();

        loop {
            let page = executor
                .execute(
                    Intent::Read,
                    throttle,
                    ServiceOp::ListRecords.name(),
                    || {
                        self.service.list_records(
                            &self.account,
                            Collection::ListItem,
                            cursor.as_deref(),
                            self.config.page_size,
                        )
                    },
                )
                .await
                .into_result()?;

            let found = page.records.iter().find(|record| {
                record
                    .as_list_item()
                    .is_some_and(|item| item.places(subject, mirror))
            });
            if let Some(record) = found {
                return Ok(Some(record.uri.rkey().clone()));
            }

            match trail.advance(page.cursor) {
                NextPage::Fetch(next) => cursor = Some(next),
                NextPage::Done => return Ok(None),
                NextPage::Revisited(next) => {
                    warn!(cursor = %next, "Cursor was already visited, stopping record lookup");
                    return Ok(None);
                }
            }
        }
    }
}

/// Maps an executed mutation to its outcome, logging failures.
fn settle<T>(intent: Intent, subject: Subject, execution: Execution<T>) -> MutationOutcome {
    match execution {
        Execution::Done(_) => {
            debug!(subject = %subject, %intent, "Applied");
            MutationOutcome::Applied
        }
        Execution::AlreadySatisfied(_) => MutationOutcome::AlreadyInDesiredState,
        Execution::Failed(source) => {
            warn!(subject = %subject, %intent, error = %source, "Change failed");
            MutationOutcome::FailedPermanently(PerItemError {
                subject,
                action: intent,
                source,
            })
        }
        Execution::Halted(_) => MutationOutcome::SkippedThrottleExhausted,
    }
}
