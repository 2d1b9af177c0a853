//! # Call Guards
//!
//! Every store call made by the coordinator goes through [`call`], which
//! bounds it by the caller's timeout and cancellation token. Idempotent reads
//! may additionally go through [`retry_read`].
//!
//! ## Outcome Mapping
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  tokio::select! (biased)                                                │
//! │   ├── token.cancelled()          → CallError::Cancelled                 │
//! │   └── timeout(ctx.timeout, fut)                                         │
//! │         ├── elapsed              → CallError::TimedOut                  │
//! │         └── Ok(StoreResult)      → value | CallError::Store(e)          │
//! │                                                                         │
//! │  retry_read():                                                          │
//! │   TimedOut | Store(Unavailable) → sleep(next_backoff) → try again       │
//! │   anything else / budget spent  → returned as is                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Writes are never passed through `retry_read`: after an ambiguous failure
//! the caller must re-query state before trying again.

use std::future::Future;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::RetrySettings;
use crate::error::SessionError;
use crate::store::{StoreError, StoreResult};

// =============================================================================
// Call Context
// =============================================================================

/// Timeout and cancellation for one coordinator operation.
///
/// The same context bounds every store call the operation makes; the timeout
/// applies to each call individually.
#[derive(Debug, Clone)]
pub struct CallContext {
    timeout: Duration,
    cancel: CancellationToken,
}

impl CallContext {
    /// Context with a fresh, never-cancelled token.
    pub fn new(timeout: Duration) -> Self {
        CallContext {
            timeout,
            cancel: CancellationToken::new(),
        }
    }

    /// Context bound to a caller-owned token (e.g. a screen being dismissed).
    pub fn with_token(timeout: Duration, cancel: CancellationToken) -> Self {
        CallContext { timeout, cancel }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

// =============================================================================
// Call Errors
// =============================================================================

/// Why a guarded store call did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    Cancelled,
    TimedOut(Duration),
    Store(StoreError),
}

impl CallError {
    /// True for outcomes a read may be retried after.
    pub fn is_transient(&self) -> bool {
        match self {
            CallError::TimedOut(_) => true,
            CallError::Store(e) => e.is_transient(),
            CallError::Cancelled => false,
        }
    }

    /// Maps to the session taxonomy in the context of `operation`.
    pub fn into_session(self, operation: &'static str) -> SessionError {
        match self {
            CallError::Cancelled => SessionError::Cancelled { operation },
            CallError::TimedOut(after) => SessionError::TransientFailure {
                operation,
                reason: format!("no response within {} ms", after.as_millis()),
            },
            CallError::Store(e) => SessionError::from_store(operation, e),
        }
    }
}

impl From<StoreError> for CallError {
    fn from(err: StoreError) -> Self {
        CallError::Store(err)
    }
}

// =============================================================================
// Guards
// =============================================================================

/// Runs one store call under the context's timeout and cancellation token.
///
/// Cancellation wins over a result that becomes ready at the same moment.
pub async fn call<T, F>(ctx: &CallContext, operation: &'static str, fut: F) -> Result<T, CallError>
where
    F: Future<Output = StoreResult<T>>,
{
    if ctx.is_cancelled() {
        return Err(CallError::Cancelled);
    }

    debug!(operation, timeout_ms = ctx.timeout.as_millis() as u64, "Store call");

    tokio::select! {
        biased;

        _ = ctx.cancel.cancelled() => {
            debug!(operation, "Store call cancelled");
            Err(CallError::Cancelled)
        }

        result = timeout(ctx.timeout, fut) => match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(CallError::Store(e)),
            Err(_) => Err(CallError::TimedOut(ctx.timeout)),
        },
    }
}

/// Runs an idempotent read, retrying transient failures with exponential
/// backoff up to `retry.max_attempts` total attempts.
///
/// Sleeping between attempts is itself cancellable.
pub async fn retry_read<T, F, Fut>(
    ctx: &CallContext,
    retry: &RetrySettings,
    operation: &'static str,
    mut make_call: F,
) -> Result<T, CallError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    let mut backoff = create_backoff(retry);
    let max_attempts = retry.max_attempts.max(1);
    let mut attempt = 1u32;

    loop {
        match call(ctx, operation, make_call()).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < max_attempts => {
                let Some(wait) = backoff.next_backoff() else {
                    return Err(e);
                };

                warn!(
                    operation,
                    attempt,
                    max_attempts,
                    wait_ms = wait.as_millis() as u64,
                    error = ?e,
                    "Transient read failure, retrying"
                );

                tokio::select! {
                    biased;
                    _ = ctx.cancel.cancelled() => return Err(CallError::Cancelled),
                    _ = tokio::time::sleep(wait) => {}
                }

                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

fn create_backoff(retry: &RetrySettings) -> ExponentialBackoff {
    let initial = Duration::from_millis(retry.initial_backoff_ms);
    // The first wait is drawn from current_interval, not initial_interval.
    ExponentialBackoff {
        current_interval: initial,
        initial_interval: initial,
        max_interval: Duration::from_millis(retry.max_backoff_ms),
        multiplier: 2.0,
        max_elapsed_time: None, // bounded by attempts instead
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_retry(max_attempts: u32) -> RetrySettings {
        RetrySettings {
            max_attempts,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
        }
    }

    #[tokio::test]
    async fn test_call_passes_value_through() {
        let ctx = CallContext::new(Duration::from_secs(1));
        let value = call(&ctx, "test", async { Ok::<_, StoreError>(7) }).await;
        assert_eq!(value, Ok(7));
    }

    #[tokio::test]
    async fn test_call_times_out() {
        let ctx = CallContext::new(Duration::from_millis(10));
        let result = call(&ctx, "test", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, StoreError>(())
        })
        .await;
        assert_eq!(result, Err(CallError::TimedOut(Duration::from_millis(10))));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let token = CancellationToken::new();
        token.cancel();
        let ctx = CallContext::with_token(Duration::from_secs(1), token);

        let result = call(&ctx, "test", async { Ok::<_, StoreError>(1) }).await;
        assert_eq!(result, Err(CallError::Cancelled));
    }

    #[tokio::test]
    async fn test_cancel_during_call() {
        let token = CancellationToken::new();
        let ctx = CallContext::with_token(Duration::from_secs(5), token.clone());

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            token.cancel();
        });

        let result = call(&ctx, "test", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, StoreError>(())
        })
        .await;
        assert_eq!(result, Err(CallError::Cancelled));
    }

    #[tokio::test]
    async fn test_retry_read_recovers_from_transient() {
        let ctx = CallContext::new(Duration::from_secs(1));
        let attempts = AtomicU32::new(0);

        let result = retry_read(&ctx, &fast_retry(3), "test", || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(StoreError::Unavailable("flaky".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(2));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_read_gives_up_after_budget() {
        let ctx = CallContext::new(Duration::from_secs(1));
        let attempts = AtomicU32::new(0);

        let result: Result<(), _> = retry_read(&ctx, &fast_retry(2), "test", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(StoreError::Unavailable("down".into())) }
        })
        .await;

        assert!(matches!(result, Err(CallError::Store(StoreError::Unavailable(_)))));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_read_does_not_retry_permanent_errors() {
        let ctx = CallContext::new(Duration::from_secs(1));
        let attempts = AtomicU32::new(0);

        let result: Result<(), _> = retry_read(&ctx, &fast_retry(5), "test", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(StoreError::not_found("Register", "r1")) }
        })
        .await;

        assert!(matches!(result, Err(CallError::Store(StoreError::NotFound { .. }))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_first_backoff_starts_at_configured_interval() {
        let mut backoff = create_backoff(&fast_retry(3));
        let first = backoff.next_backoff().unwrap();
        // 1ms plus at most 50% jitter.
        assert!(first <= Duration::from_millis(2), "first wait was {first:?}");
    }

    #[tokio::test]
    async fn test_single_retry_waits_milliseconds() {
        let ctx = CallContext::new(Duration::from_secs(1));
        let started = std::time::Instant::now();

        let result: Result<(), _> = retry_read(&ctx, &fast_retry(2), "test", || async {
            Err(StoreError::Unavailable("down".into()))
        })
        .await;

        assert!(result.is_err());
        assert!(
            started.elapsed() < Duration::from_millis(50),
            "retry took {:?}",
            started.elapsed()
        );
    }

    #[test]
    fn test_into_session_distinguishes_cancel_from_timeout() {
        assert!(matches!(
            CallError::Cancelled.into_session("open register"),
            SessionError::Cancelled { .. }
        ));
        let err = CallError::TimedOut(Duration::from_millis(50)).into_session("open register");
        assert!(err.is_retryable());
    }
}
