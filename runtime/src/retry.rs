//! Retry logic with exponential backoff.
//!
//! Two loops live here:
//!
//! - [`retry_with_predicate`] re-runs a fallible async operation while a
//!   predicate says the error is transient (webhook delivery uses it).
//! - [`run_optimistic`] drives an optimistic transaction: begin, run the
//!   body, commit, and start over on [`StoreError::Conflict`]. Every
//!   `DocumentStore` adapter delegates to it so retry behaviour is identical
//!   across backends.
//!
//! # Example
//!
//! ```rust
//! use fidelidad_runtime::retry::{RetryPolicy, retry_with_predicate};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), String> {
//! let policy = RetryPolicy::builder()
//!     .max_retries(5)
//!     .initial_delay(Duration::from_millis(100))
//!     .max_delay(Duration::from_secs(10))
//!     .multiplier(2.0)
//!     .build();
//!
//! let result = retry_with_predicate(
//!     policy,
//!     || async { Ok::<_, String>(42) },
//!     |err: &String| err.contains("timeout"),
//! )
//! .await?;
//! assert_eq!(result, 42);
//! # Ok(())
//! # }
//! ```

use crate::metrics::TransactionMetrics;
use fidelidad_core::error::StoreError;
use futures::future::BoxFuture;
use rand::Rng;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::sleep;

/// Retry policy configuration for exponential backoff.
///
/// # Default Values
///
/// - `max_retries`: 3
/// - `initial_delay`: 100ms
/// - `max_delay`: 30 seconds
/// - `multiplier`: 2.0 (delay doubles each retry)
/// - `jitter`: false
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts after the first one
    pub max_retries: usize,
    /// Initial delay before first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries (cap for exponential backoff)
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
    /// Scale each delay by a random factor in `[0.5, 1.0]`
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: false,
        }
    }
}

impl RetryPolicy {
    /// Create a new policy builder.
    #[must_use]
    pub const fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            max_retries: Some(3),
            initial_delay: Some(Duration::from_millis(100)),
            max_delay: Some(Duration::from_secs(30)),
            multiplier: Some(2.0),
            jitter: false,
        }
    }

    /// Policy for re-running conflicting store transactions.
    ///
    /// Conflicts clear quickly, so delays are short and jittered to spread
    /// out contenders on the same member or coupon.
    #[must_use]
    pub const fn for_transactions() -> Self {
        Self {
            max_retries: 10,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(200),
            multiplier: 2.0,
            jitter: true,
        }
    }

    /// Calculate delay for a given attempt number.
    ///
    /// Uses exponential backoff: delay = initial_delay * (multiplier ^ attempt)
    /// Capped at `max_delay`. Jitter is not applied here.
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_possible_wrap)]
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return self.initial_delay.min(self.max_delay);
        }

        let delay_ms =
            self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt.min(64) as i32);

        if delay_ms >= self.max_delay.as_millis() as f64 {
            self.max_delay
        } else {
            Duration::from_millis(delay_ms as u64)
        }
    }

    /// The delay to actually sleep before retry `attempt`.
    #[must_use]
    pub fn backoff(&self, attempt: usize) -> Duration {
        let delay = self.delay_for_attempt(attempt);
        if self.jitter {
            delay.mul_f64(rand::thread_rng().gen_range(0.5..=1.0))
        } else {
            delay
        }
    }

    /// Total executions allowed, the first one included.
    #[must_use]
    pub const fn max_attempts(&self) -> usize {
        self.max_retries.saturating_add(1)
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    max_retries: Option<usize>,
    initial_delay: Option<Duration>,
    max_delay: Option<Duration>,
    multiplier: Option<f64>,
    jitter: bool,
}

impl RetryPolicyBuilder {
    /// Set maximum number of retries.
    #[must_use]
    pub const fn max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Set initial delay before first retry.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = Some(delay);
        self
    }

    /// Set maximum delay (cap for exponential backoff).
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    /// Set multiplier for exponential backoff.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = Some(multiplier);
        self
    }

    /// Enable or disable jitter.
    #[must_use]
    pub const fn jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Build the [`RetryPolicy`].
    #[must_use]
    pub fn build(self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries.unwrap_or(3),
            initial_delay: self.initial_delay.unwrap_or(Duration::from_millis(100)),
            max_delay: self.max_delay.unwrap_or(Duration::from_secs(30)),
            multiplier: self.multiplier.unwrap_or(2.0),
            jitter: self.jitter,
        }
    }
}

/// Retry an async operation with custom retry logic.
///
/// Errors for which `is_retryable` returns `false` are returned immediately.
///
/// # Errors
///
/// Returns the last error once `policy.max_retries` retries are used up, or
/// the first non-retryable error.
pub async fn retry_with_predicate<F, Fut, T, E, P>(
    policy: RetryPolicy,
    mut operation: F,
    is_retryable: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(err) => {
                if !is_retryable(&err) {
                    tracing::warn!(error = %err, "Error is not retryable, failing immediately");
                    return Err(err);
                }

                if attempt >= policy.max_retries {
                    tracing::error!(attempt, error = %err, "Operation failed after max retries");
                    return Err(err);
                }

                let delay = policy.backoff(attempt);
                tracing::warn!(
                    attempt,
                    delay_ms = delay.as_millis(),
                    error = %err,
                    "Operation failed, retrying..."
                );

                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Drive one optimistic transaction to completion.
///
/// Each attempt calls `begin` for a fresh handle, runs `body` against it and,
/// if the body succeeded, hands the handle to `commit`. A
/// [`StoreError::Conflict`] from the body or the commit drops the handle
/// (discarding its buffered writes) and starts a new attempt after a backoff
/// delay. Any other error ends the transaction immediately.
///
/// # Errors
///
/// - [`StoreError::RetriesExhausted`] after `policy.max_attempts()` conflicting attempts
/// - the first non-conflict error from `begin`, `body` or `commit`
pub async fn run_optimistic<Tx, T, B, BFut, F, C, CFut>(
    policy: &RetryPolicy,
    mut begin: B,
    mut body: F,
    mut commit: C,
) -> Result<T, StoreError>
where
    B: FnMut() -> BFut,
    BFut: Future<Output = Result<Tx, StoreError>>,
    F: for<'t> FnMut(&'t mut Tx) -> BoxFuture<'t, Result<T, StoreError>>,
    C: FnMut(Tx) -> CFut,
    CFut: Future<Output = Result<(), StoreError>>,
{
    let started = Instant::now();
    let mut attempts = 0;

    loop {
        attempts += 1;
        TransactionMetrics::record_attempt();

        let mut tx = begin().await?;
        let result = body(&mut tx).await;
        let outcome = match result {
            Ok(value) => commit(tx).await.map(|()| value),
            Err(err) => Err(err),
        };

        match outcome {
            Ok(value) => {
                TransactionMetrics::record_commit(attempts, started.elapsed());
                if attempts > 1 {
                    tracing::debug!(attempts, "Transaction committed after conflicts");
                }
                return Ok(value);
            }
            Err(StoreError::Conflict { detail }) => {
                TransactionMetrics::record_conflict();
                if attempts >= policy.max_attempts() {
                    TransactionMetrics::record_exhausted();
                    tracing::warn!(attempts, %detail, "Transaction retries exhausted");
                    return Err(StoreError::RetriesExhausted { attempts });
                }

                let delay = policy.backoff(attempts - 1);
                tracing::debug!(
                    attempts,
                    %detail,
                    delay_ms = delay.as_millis(),
                    "Transaction conflicted, re-running body"
                );
                sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast(max_retries: usize) -> RetryPolicy {
        RetryPolicy::builder()
            .max_retries(max_retries)
            .initial_delay(Duration::from_millis(1))
            .max_delay(Duration::from_millis(2))
            .build()
    }

    #[test]
    fn test_retry_policy_delay_calculation() {
        let policy = RetryPolicy::builder()
            .initial_delay(Duration::from_millis(100))
            .multiplier(2.0)
            .max_delay(Duration::from_secs(10))
            .build();

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(800));
    }

    #[test]
    fn test_retry_policy_max_delay_cap() {
        let policy = RetryPolicy::builder()
            .initial_delay(Duration::from_millis(1000))
            .multiplier(10.0)
            .max_delay(Duration::from_secs(2))
            .build();

        assert_eq!(policy.delay_for_attempt(5), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(10_000), Duration::from_secs(2));
    }

    #[test]
    fn test_jitter_stays_within_half_and_full_delay() {
        let policy = RetryPolicy::for_transactions();
        for attempt in 0..6 {
            let nominal = policy.delay_for_attempt(attempt);
            let actual = policy.backoff(attempt);
            assert!(actual <= nominal);
            assert!(actual >= nominal / 2);
        }
    }

    #[tokio::test]
    async fn test_retry_with_predicate_skips_non_retryable() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);

        let result = retry_with_predicate(
            fast(3),
            || {
                let c = Arc::clone(&counter_clone);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err::<i32, _>("permanent error")
                }
            },
            |err: &&str| err.contains("transient"),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_with_predicate_retries_transient() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);

        let result = retry_with_predicate(
            fast(3),
            || {
                let c = Arc::clone(&counter_clone);
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err("transient")
                    } else {
                        Ok(7)
                    }
                }
            },
            |err: &&str| err.contains("transient"),
        )
        .await;

        assert_eq!(result, Ok(7));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_run_optimistic_commits_first_attempt() {
        let commits = AtomicUsize::new(0);

        let result = run_optimistic(
            &fast(3),
            || async { Ok::<Vec<u32>, StoreError>(Vec::new()) },
            |tx: &mut Vec<u32>| {
                Box::pin(async move {
                    tx.push(1);
                    Ok(tx.len())
                })
            },
            |tx: Vec<u32>| {
                commits.fetch_add(1, Ordering::SeqCst);
                async move {
                    assert_eq!(tx, vec![1]);
                    Ok(())
                }
            },
        )
        .await;

        assert_eq!(result, Ok(1));
        assert_eq!(commits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_optimistic_reruns_body_on_commit_conflict() {
        let commits = AtomicUsize::new(0);
        let bodies = AtomicUsize::new(0);

        let result = run_optimistic(
            &fast(3),
            || async { Ok::<(), StoreError>(()) },
            |_tx: &mut ()| {
                let n = bodies.fetch_add(1, Ordering::SeqCst);
                Box::pin(async move { Ok(n) })
            },
            |()| {
                let n = commits.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(StoreError::conflict("members/VG1"))
                    } else {
                        Ok(())
                    }
                }
            },
        )
        .await;

        assert_eq!(result, Ok(2));
        assert_eq!(bodies.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_run_optimistic_exhausts() {
        let bodies = AtomicUsize::new(0);

        let result: Result<(), StoreError> = run_optimistic(
            &fast(2),
            || async { Ok::<(), StoreError>(()) },
            |_tx: &mut ()| {
                bodies.fetch_add(1, Ordering::SeqCst);
                Box::pin(async { Err(StoreError::conflict("coupons/x")) })
            },
            |()| async { Ok(()) },
        )
        .await;

        assert_eq!(result, Err(StoreError::RetriesExhausted { attempts: 3 }));
        assert_eq!(bodies.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_run_optimistic_returns_other_errors_unchanged() {
        let bodies = AtomicUsize::new(0);

        let result: Result<(), StoreError> = run_optimistic(
            &fast(5),
            || async { Ok::<(), StoreError>(()) },
            |_tx: &mut ()| {
                bodies.fetch_add(1, Ordering::SeqCst);
                Box::pin(async { Err(StoreError::Database("disk full".into())) })
            },
            |()| async { Ok(()) },
        )
        .await;

        assert_eq!(result, Err(StoreError::Database("disk full".into())));
        assert_eq!(bodies.load(Ordering::SeqCst), 1);
    }
}
