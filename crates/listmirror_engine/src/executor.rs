//! Rate-limit-aware execution of single remote calls.
//!
//! Every remote call made during a run goes through a
//! [`RateLimitedExecutor`]. It separates three kinds of outcome:
//!
//! - idempotent no-ops (`Duplicate` on add, `NotFound` on remove) are
//!   successes, not errors
//! - throttling is retried after a fixed backoff, up to a bounded number of
//!   consecutive hits, after which the whole run is halted
//! - every other failure is returned immediately without retry
//!
//! The consecutive-throttle counter lives in a [`ThrottleState`] owned by the
//! caller and passed into each invocation.

use crate::config::ThrottlePolicy;
use crate::error::{FailureKind, MirrorError, ServiceError, ServiceResult};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

/// What a call is trying to achieve. Decides which failures are no-ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    /// A read. No failure counts as success.
    Read,
    /// Creating a record whose URI is needed. No failure counts as success.
    Create,
    /// Adding a member. `Duplicate` means it is already there.
    Add,
    /// Removing a member. `NotFound` means it is already gone.
    Remove,
}

impl Intent {
    /// Returns true if a failure of `kind` means the desired state holds.
    pub fn is_satisfied_by(&self, kind: FailureKind) -> bool {
        matches!(
            (self, kind),
            (Intent::Add, FailureKind::Duplicate) | (Intent::Remove, FailureKind::NotFound)
        )
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Intent::Read => "read",
            Intent::Create => "create",
            Intent::Add => "add",
            Intent::Remove => "remove",
        })
    }
}

/// Throttle bookkeeping threaded through executor calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThrottleState {
    /// Rate-limited responses since the last other response.
    pub consecutive: u32,
    /// Rate-limited responses seen in total.
    pub total: u32,
}

impl ThrottleState {
    fn record_throttle(&mut self) -> u32 {
        self.consecutive += 1;
        self.total += 1;
        self.consecutive
    }

    fn record_response(&mut self) {
        self.consecutive = 0;
    }
}

/// Why a call stopped without reaching the service's answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Halt {
    /// This call hit the consecutive-throttle limit and halted the run.
    ThrottleExhausted {
        /// Consecutive throttled attempts.
        attempts: u32,
    },
    /// The run had already been halted; the call was never issued.
    Aborted,
}

/// Outcome of one executed call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Execution<T> {
    /// The call succeeded.
    Done(T),
    /// The call failed in a way that confirms the desired state.
    AlreadySatisfied(ServiceError),
    /// The call failed and will not be retried.
    Failed(ServiceError),
    /// The run was halted by throttling.
    Halted(Halt),
}

/// An [`Execution`] that did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interrupted {
    /// The service reported a failure.
    Failed(ServiceError),
    /// The run was halted by throttling.
    Halted(Halt),
}

impl<T> Execution<T> {
    /// Collapses into a result. An idempotent no-op has no value, so it is
    /// reported as the failure that signalled it.
    pub fn into_result(self) -> Result<T, Interrupted> {
        match self {
            Execution::Done(value) => Ok(value),
            Execution::AlreadySatisfied(error) | Execution::Failed(error) => {
                Err(Interrupted::Failed(error))
            }
            Execution::Halted(halt) => Err(Interrupted::Halted(halt)),
        }
    }
}

/// Executes remote calls with bounded retry on throttling.
///
/// One executor serves one run. When any call exhausts the throttle budget
/// the executor halts, and every later call returns [`Halt::Aborted`]
/// without touching the service.
#[derive(Debug)]
pub struct RateLimitedExecutor {
    policy: ThrottlePolicy,
    halted: AtomicBool,
    halted_by: Mutex<Option<String>>,
}

impl RateLimitedExecutor {
    /// Creates an executor for one run.
    pub fn new(policy: ThrottlePolicy) -> Self {
        Self {
            policy,
            halted: AtomicBool::new(false),
            halted_by: Mutex::new(None),
        }
    }

    /// The throttle policy in force.
    pub fn policy(&self) -> &ThrottlePolicy {
        &self.policy
    }

    /// Returns true once throttling has halted the run.
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    fn halt(&self, operation: &str) {
        self.halted_by
            .lock()
            .get_or_insert_with(|| operation.to_string());
        self.halted.store(true, Ordering::SeqCst);
    }

    /// The error that ends a run halted by throttling. Names the call that
    /// exhausted the budget, or `operation` if none has.
    pub fn exhausted_error(&self, operation: &str) -> MirrorError {
        let operation = self
            .halted_by
            .lock()
            .clone()
            .unwrap_or_else(|| operation.to_string());
        MirrorError::throttle_exhausted(operation, self.policy.max_consecutive)
    }

    /// Runs `call` until it produces an answer other than throttling, or the
    /// throttle budget runs out.
    ///
    /// `call` is invoked again for each retry and must issue the same
    /// idempotent request every time.
    pub async fn execute<F, Fut, T>(
        &self,
        intent: Intent,
        throttle: &mut ThrottleState,
        operation: &str,
        mut call: F,
    ) -> Execution<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ServiceResult<T>>,
    {
        loop {
            if self.is_halted() {
                return Execution::Halted(Halt::Aborted);
            }

            match call().await {
                Ok(value) => {
                    if throttle.consecutive > 0 {
                        debug!(
                            operation,
                            throttled = throttle.consecutive,
                            "Call succeeded after throttling"
                        );
                    }
                    throttle.record_response();
                    return Execution::Done(value);
                }
                Err(error) if intent.is_satisfied_by(error.kind) => {
                    throttle.record_response();
                    debug!(operation, %intent, reason = %error, "Already in desired state");
                    return Execution::AlreadySatisfied(error);
                }
                Err(error) if error.is_rate_limited() => {
                    let hits = throttle.record_throttle();
                    if hits >= self.policy.max_consecutive {
                        self.halt(operation);
                        warn!(
                            operation,
                            attempts = hits,
                            error = %error,
                            "Rate limit budget exhausted, halting run"
                        );
                        return Execution::Halted(Halt::ThrottleExhausted { attempts: hits });
                    }

                    warn!(
                        operation,
                        attempt = hits,
                        max_attempts = self.policy.max_consecutive,
                        backoff_ms = self.policy.backoff.as_millis() as u64,
                        "Rate limited, backing off"
                    );
                    if !self.policy.backoff.is_zero() {
                        tokio::time::sleep(self.policy.backoff).await;
                    }
                }
                Err(error) => {
                    throttle.record_response();
                    return Execution::Failed(error);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;

    fn counting<T: Clone>(
        counter: &Arc<AtomicU32>,
        responses: Vec<ServiceResult<T>>,
    ) -> impl FnMut() -> std::future::Ready<ServiceResult<T>> {
        let counter = Arc::clone(counter);
        move || {
            let index = counter.fetch_add(1, Ordering::SeqCst) as usize;
            let response = responses
                .get(index)
                .or_else(|| responses.last())
                .cloned()
                .expect("at least one response");
            std::future::ready(response)
        }
    }

    #[test]
    fn intent_no_op_table() {
        assert!(Intent::Add.is_satisfied_by(FailureKind::Duplicate));
        assert!(Intent::Remove.is_satisfied_by(FailureKind::NotFound));
        assert!(!Intent::Add.is_satisfied_by(FailureKind::NotFound));
        assert!(!Intent::Remove.is_satisfied_by(FailureKind::Duplicate));
        assert!(!Intent::Read.is_satisfied_by(FailureKind::NotFound));
        assert!(!Intent::Create.is_satisfied_by(FailureKind::Duplicate));
    }

    #[tokio::test]
    async fn success_resets_consecutive_counter() {
        let executor = RateLimitedExecutor::new(ThrottlePolicy::no_wait(3));
        let calls = Arc::new(AtomicU32::new(0));
        let mut throttle = ThrottleState::default();

        let result = executor
            .execute(
                Intent::Add,
                &mut throttle,
                "createRecord",
                counting(
                    &calls,
                    vec![
                        Err(ServiceError::rate_limited("slow down")),
                        Err(ServiceError::rate_limited("slow down")),
                        Ok(7),
                    ],
                ),
            )
            .await;

        assert_eq!(result, Execution::Done(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(throttle.consecutive, 0);
        assert_eq!(throttle.total, 2);
        assert!(!executor.is_halted());
    }

    #[tokio::test]
    async fn duplicate_on_add_is_satisfied() {
        let executor = RateLimitedExecutor::new(ThrottlePolicy::no_wait(3));
        let calls = Arc::new(AtomicU32::new(0));
        let mut throttle = ThrottleState::default();

        let result: Execution<()> = executor
            .execute(
                Intent::Add,
                &mut throttle,
                "createRecord",
                counting(&calls, vec![Err(ServiceError::duplicate("duplicate"))]),
            )
            .await;

        assert!(matches!(result, Execution::AlreadySatisfied(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn not_found_on_remove_is_satisfied() {
        let executor = RateLimitedExecutor::new(ThrottlePolicy::no_wait(3));
        let calls = Arc::new(AtomicU32::new(0));
        let mut throttle = ThrottleState::default();

        let result: Execution<()> = executor
            .execute(
                Intent::Remove,
                &mut throttle,
                "deleteRecord",
                counting(&calls, vec![Err(ServiceError::not_found("gone"))]),
            )
            .await;

        assert!(matches!(result, Execution::AlreadySatisfied(_)));
    }

    #[tokio::test]
    async fn not_found_on_read_is_a_failure() {
        let executor = RateLimitedExecutor::new(ThrottlePolicy::no_wait(3));
        let calls = Arc::new(AtomicU32::new(0));
        let mut throttle = ThrottleState::default();

        let result: Execution<()> = executor
            .execute(
                Intent::Read,
                &mut throttle,
                "getList",
                counting(&calls, vec![Err(ServiceError::not_found("no list"))]),
            )
            .await;

        assert_eq!(
            result.into_result(),
            Err(Interrupted::Failed(ServiceError::not_found("no list")))
        );
    }

    #[tokio::test]
    async fn other_failures_are_not_retried() {
        let executor = RateLimitedExecutor::new(ThrottlePolicy::no_wait(3));
        let calls = Arc::new(AtomicU32::new(0));
        let mut throttle = ThrottleState::default();

        let result: Execution<()> = executor
            .execute(
                Intent::Add,
                &mut throttle,
                "createRecord",
                counting(&calls, vec![Err(ServiceError::other("HTTP 500"))]),
            )
            .await;

        assert_eq!(result, Execution::Failed(ServiceError::other("HTTP 500")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!executor.is_halted());
    }

    #[tokio::test]
    async fn sustained_throttling_halts_after_limit() {
        let executor = RateLimitedExecutor::new(ThrottlePolicy::no_wait(3));
        let calls = Arc::new(AtomicU32::new(0));
        let mut throttle = ThrottleState::default();

        let result: Execution<()> = executor
            .execute(
                Intent::Add,
                &mut throttle,
                "createRecord",
                counting(&calls, vec![Err(ServiceError::rate_limited("429"))]),
            )
            .await;

        assert_eq!(
            result,
            Execution::Halted(Halt::ThrottleExhausted { attempts: 3 })
        );
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(executor.is_halted());

        // Later calls never reach the service.
        let later_calls = Arc::new(AtomicU32::new(0));
        let later: Execution<u8> = executor
            .execute(
                Intent::Remove,
                &mut ThrottleState::default(),
                "deleteRecord",
                counting(&later_calls, vec![Ok(1)]),
            )
            .await;
        assert_eq!(later, Execution::Halted(Halt::Aborted));
        assert_eq!(later_calls.load(Ordering::SeqCst), 0);

        match executor.exhausted_error("deleteRecord") {
            MirrorError::ThrottleExhausted {
                operation,
                attempts,
                ..
            } => {
                assert_eq!(operation, "createRecord");
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn intervening_failure_breaks_the_streak() {
        let executor = RateLimitedExecutor::new(ThrottlePolicy::no_wait(2));
        let mut throttle = ThrottleState::default();

        let calls = Arc::new(AtomicU32::new(0));
        let first: Execution<()> = executor
            .execute(
                Intent::Read,
                &mut throttle,
                "getList",
                counting(
                    &calls,
                    vec![
                        Err(ServiceError::rate_limited("429")),
                        Err(ServiceError::other("bad cursor")),
                    ],
                ),
            )
            .await;
        assert!(matches!(first, Execution::Failed(_)));
        assert_eq!(throttle.consecutive, 0);
        assert_eq!(throttle.total, 1);

        let calls = Arc::new(AtomicU32::new(0));
        let second = executor
            .execute(
                Intent::Read,
                &mut throttle,
                "getList",
                counting(&calls, vec![Err(ServiceError::rate_limited("429")), Ok(5)]),
            )
            .await;
        assert_eq!(second, Execution::Done(5));
        assert!(!executor.is_halted());
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_waits_between_attempts() {
        let backoff = std::time::Duration::from_secs(30);
        let executor = RateLimitedExecutor::new(ThrottlePolicy::new(3, backoff));
        let calls = Arc::new(AtomicU32::new(0));
        let mut throttle = ThrottleState::default();

        let started = tokio::time::Instant::now();
        let result = executor
            .execute(
                Intent::Add,
                &mut throttle,
                "createRecord",
                counting(
                    &calls,
                    vec![Err(ServiceError::rate_limited("429")), Ok(())],
                ),
            )
            .await;

        assert_eq!(result, Execution::Done(()));
        assert!(started.elapsed() >= backoff);
    }
}
