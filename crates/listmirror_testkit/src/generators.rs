//! Property-based test generators using proptest.
//!
//! Provides strategies for subjects and membership sets.

use listmirror_engine::MembershipSet;
use listmirror_protocol::Subject;
use proptest::prelude::*;

/// Strategy for generating `did:plc` subjects.
pub fn subject_strategy() -> impl Strategy<Value = Subject> {
    prop::string::string_regex("did:plc:[a-z2-7]{24}")
        .expect("Invalid regex")
        .prop_map(Subject::new)
}

/// Strategy for generating subjects from a small pool, so that
/// independently generated sets overlap.
pub fn pooled_subject_strategy(pool: usize) -> impl Strategy<Value = Subject> {
    (0..pool.max(1)).prop_map(|i| Subject::new(format!("did:plc:pool{i:06}")))
}

/// Strategy for generating membership sets with up to `max` members.
pub fn membership_strategy(
    subjects: impl Strategy<Value = Subject>,
    max: usize,
) -> impl Strategy<Value = MembershipSet> {
    prop::collection::vec(subjects, 0..=max).prop_map(|members| members.into_iter().collect())
}

/// Strategy for generating a `(source, mirror)` pair drawn from a shared
/// pool of `pool` subjects.
pub fn membership_pair_strategy(
    pool: usize,
    max: usize,
) -> impl Strategy<Value = (MembershipSet, MembershipSet)> {
    (
        membership_strategy(pooled_subject_strategy(pool), max),
        membership_strategy(pooled_subject_strategy(pool), max),
    )
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
