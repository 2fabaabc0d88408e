//! Configuration for the mirror engine.

use crate::error::{MirrorError, MirrorResult};
use listmirror_protocol::xrpc::MAX_PAGE_SIZE;
use listmirror_protocol::ListHandle;
use std::time::Duration;

/// Description written on a mirror list created by the engine.
pub const DEFAULT_MIRROR_DESCRIPTION: &str = "Auto-synced verified account modlist";

/// What to do when more than one owned list matches the mirror name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicateMirrorPolicy {
    /// Use the first match in enumeration order and log the others.
    #[default]
    FirstMatch,
    /// Refuse to pick and fail resolution.
    Fail,
}

/// Configuration for a reconciliation run.
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    /// The list whose membership is mirrored.
    pub source_list: ListHandle,
    /// Name of the mirror moderation list.
    pub mirror_name: String,
    /// Description used when the mirror has to be created.
    pub mirror_description: String,
    /// Items requested per page on paginated reads.
    pub page_size: u32,
    /// Mutations issued concurrently per batch.
    pub batch_size: usize,
    /// Pause between batches.
    pub batch_pause: Duration,
    /// Throttle handling.
    pub throttle: ThrottlePolicy,
    /// Tie-break for ambiguous mirror names.
    pub duplicate_policy: DuplicateMirrorPolicy,
    /// Compute and report the diff without mutating anything.
    pub dry_run: bool,
}

impl MirrorConfig {
    /// Creates a configuration with default tuning.
    pub fn new(source_list: ListHandle, mirror_name: impl Into<String>) -> Self {
        Self {
            source_list,
            mirror_name: mirror_name.into(),
            mirror_description: DEFAULT_MIRROR_DESCRIPTION.to_string(),
            page_size: MAX_PAGE_SIZE,
            batch_size: 10,
            batch_pause: Duration::from_secs(1),
            throttle: ThrottlePolicy::default(),
            duplicate_policy: DuplicateMirrorPolicy::default(),
            dry_run: false,
        }
    }

    /// Sets the description used when creating the mirror.
    pub fn with_mirror_description(mut self, description: impl Into<String>) -> Self {
        self.mirror_description = description.into();
        self
    }

    /// Sets the page size for paginated reads.
    pub fn with_page_size(mut self, size: u32) -> Self {
        self.page_size = size;
        self
    }

    /// Sets the number of mutations per batch.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Sets the pause between batches.
    pub fn with_batch_pause(mut self, pause: Duration) -> Self {
        self.batch_pause = pause;
        self
    }

    /// Sets the throttle policy.
    pub fn with_throttle(mut self, throttle: ThrottlePolicy) -> Self {
        self.throttle = throttle;
        self
    }

    /// Sets the tie-break for ambiguous mirror names.
    pub fn with_duplicate_policy(mut self, policy: DuplicateMirrorPolicy) -> Self {
        self.duplicate_policy = policy;
        self
    }

    /// Enables or disables dry-run mode.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Checks the configuration is usable.
    pub fn validate(&self) -> MirrorResult<()> {
        if self.mirror_name.trim().is_empty() {
            return Err(MirrorError::Config("mirror name must not be empty".into()));
        }
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(MirrorError::Config(format!(
                "page size must be between 1 and {MAX_PAGE_SIZE}, got {}",
                self.page_size
            )));
        }
        if self.batch_size == 0 {
            return Err(MirrorError::Config("batch size must be at least 1".into()));
        }
        if self.throttle.max_consecutive == 0 {
            return Err(MirrorError::Config(
                "throttle limit must allow at least one attempt".into(),
            ));
        }
        Ok(())
    }
}

/// How rate-limited calls are retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrottlePolicy {
    /// Consecutive rate-limited responses that end the run.
    pub max_consecutive: u32,
    /// Fixed wait before retrying a rate-limited call.
    pub backoff: Duration,
}

impl ThrottlePolicy {
    /// Creates a policy.
    pub fn new(max_consecutive: u32, backoff: Duration) -> Self {
        Self {
            max_consecutive,
            backoff,
        }
    }

    /// A policy that retries without waiting.
    pub fn no_wait(max_consecutive: u32) -> Self {
        Self::new(max_consecutive, Duration::ZERO)
    }
}

impl Default for ThrottlePolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> ListHandle {
        ListHandle::parse("at://did:plc:k3lft27u2pjqp2ptidkne7xr/app.bsky.graph.list/3lngcmewutk2z")
            .unwrap()
    }

    #[test]
    fn mirror_config_defaults() {
        let config = MirrorConfig::new(source(), "Verified Accounts (modlist)");
        assert_eq!(config.page_size, 100);
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.throttle.max_consecutive, 3);
        assert_eq!(config.mirror_description, DEFAULT_MIRROR_DESCRIPTION);
        assert_eq!(config.duplicate_policy, DuplicateMirrorPolicy::FirstMatch);
        assert!(!config.dry_run);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn mirror_config_builder() {
        let config = MirrorConfig::new(source(), "Mirror")
            .with_page_size(50)
            .with_batch_size(25)
            .with_batch_pause(Duration::from_millis(200))
            .with_throttle(ThrottlePolicy::no_wait(5))
            .with_duplicate_policy(DuplicateMirrorPolicy::Fail)
            .with_dry_run(true);

        assert_eq!(config.page_size, 50);
        assert_eq!(config.batch_size, 25);
        assert_eq!(config.batch_pause, Duration::from_millis(200));
        assert_eq!(config.throttle, ThrottlePolicy::new(5, Duration::ZERO));
        assert_eq!(config.duplicate_policy, DuplicateMirrorPolicy::Fail);
        assert!(config.dry_run);
    }

    #[test]
    fn validation_rejects_bad_values() {
        assert!(MirrorConfig::new(source(), "  ").validate().is_err());
        assert!(MirrorConfig::new(source(), "m").with_page_size(0).validate().is_err());
        assert!(MirrorConfig::new(source(), "m").with_page_size(101).validate().is_err());
        assert!(MirrorConfig::new(source(), "m").with_batch_size(0).validate().is_err());
        assert!(MirrorConfig::new(source(), "m")
            .with_throttle(ThrottlePolicy::no_wait(0))
            .validate()
            .is_err());
    }
}
