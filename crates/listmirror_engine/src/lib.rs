//! # listmirror engine
//!
//! Reconciliation engine that keeps a mirror list's membership equal to a
//! source list's.
//!
//! This crate provides:
//! - Membership reads that follow pagination (`ListReader`)
//! - Mirror lookup and creation (`MirrorResolver`)
//! - Set difference of two memberships (`diff`)
//! - Rate-limit-aware call execution (`RateLimitedExecutor`)
//! - Batched application of changes (`BatchRunner`)
//! - The run state machine (`MirrorEngine`)
//! - An XRPC client and an in-memory service behind the `ListService` trait
//!
//! ## Architecture
//!
//! A run is strictly sequential at the top level:
//! 1. Resolve the mirror handle
//! 2. Read the source, then the mirror
//! 3. Compute the difference
//! 4. Apply additions, then removals, in batches
//!
//! ## Key Invariants
//!
//! - Reads complete before any mutation
//! - The mirror handle is resolved once per run
//! - Adding a present member or removing an absent one is not an error
//! - Sustained throttling stops the run; it is reported as a partial success
//! - Nothing is cached between runs

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod batch;
mod config;
mod diff;
mod engine;
mod error;
mod executor;
mod http;
mod memory;
mod reader;
mod resolver;
mod service;

pub use batch::{BatchReport, BatchRunner};
pub use config::{DuplicateMirrorPolicy, MirrorConfig, ThrottlePolicy, DEFAULT_MIRROR_DESCRIPTION};
pub use diff::{diff, MembershipDiff, MembershipSet};
pub use engine::{EngineState, MirrorEngine, MutationOutcome, ReconciliationSummary};
pub use error::{
    FailureKind, MirrorError, MirrorResult, PerItemError, ServiceError, ServiceResult,
};
pub use executor::{Execution, Halt, Intent, Interrupted, RateLimitedExecutor, ThrottleState};
pub use http::{classify_failure, Session, XrpcClient};
pub use memory::MemoryListService;
pub use reader::ListReader;
pub use resolver::{MirrorResolver, ResolvedMirror};
pub use service::{ListService, ServiceOp};
