//! Bounded exponential-backoff retry executor.
//!
//! A call moves through `Attempting -> (Waiting -> Attempting)* -> Done | Failed`.
//! Retryable HTTP statuses are ordinary return values: once the attempt budget
//! is spent the last (failing) response is handed back to the caller rather
//! than turned into an error. Transport faults travel on the error path and
//! are retried only when transient.
//!
//! An explicit throttle signal (429) backs off two exponent steps harder than
//! generic server errors.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::error::FetchError;
use super::http_client::HttpResponse;

/// Status codes retried by default.
pub const DEFAULT_RETRYABLE_STATUSES: &[u16] = &[429, 500, 502, 503, 504];

/// Status code signalling explicit throttling.
pub const THROTTLE_STATUS: u16 = 429;

/// Extra exponent steps applied when the server throttles us.
pub const THROTTLE_EXTRA_STEPS: u32 = 2;

/// Upper bound of the random jitter, as a fraction of the backoff delay.
pub const BACKOFF_JITTER_FRACTION: f64 = 0.1;

/// Retry behaviour for one call site.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts is `max_retries + 1`.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub retryable_statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            retryable_statuses: DEFAULT_RETRYABLE_STATUSES.to_vec(),
        }
    }
}

impl RetryPolicy {
    /// Preset for origins known to throttle or block scrapers.
    pub fn aggressive() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(120),
            retryable_statuses: DEFAULT_RETRYABLE_STATUSES.to_vec(),
        }
    }

    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.retryable_statuses.contains(&status)
    }

    /// Backoff before jitter for the given attempt (0-based) and triggering status.
    ///
    /// `min(base_delay * 2^attempt, max_delay)`, with the exponent raised by
    /// two steps for a 429.
    pub fn backoff_delay(&self, attempt: u32, status: Option<u16>) -> Duration {
        let exponent = if status == Some(THROTTLE_STATUS) {
            attempt.saturating_add(THROTTLE_EXTRA_STEPS)
        } else {
            attempt
        };
        // keep powi finite
        let factor = 2f64.powi(exponent.min(1023) as i32);
        let delay = self.base_delay.as_secs_f64() * factor;
        if !delay.is_finite() || delay >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(delay)
        }
    }

    /// Full delay for a retry: backoff, honoring a server-provided
    /// Retry-After, plus jitter.
    fn retry_delay(
        &self,
        attempt: u32,
        status: Option<u16>,
        retry_after: Option<Duration>,
    ) -> Duration {
        let mut delay = self.backoff_delay(attempt, status);
        if let Some(server_hint) = retry_after {
            delay = delay.max(server_hint.min(self.max_delay));
        }
        let max_jitter = delay.as_secs_f64() * BACKOFF_JITTER_FRACTION;
        let jitter = if max_jitter > 0.0 {
            rand::rng().random_range(0.0..=max_jitter)
        } else {
            0.0
        };
        delay + Duration::from_secs_f64(jitter)
    }
}

/// An attempt result the executor can inspect for a status code.
pub trait RetryOutcome {
    /// HTTP status, if the outcome has one.
    fn status(&self) -> Option<u16>;

    /// Server-requested delay before retrying.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl RetryOutcome for HttpResponse {
    fn status(&self) -> Option<u16> {
        Some(self.status_code())
    }

    fn retry_after(&self) -> Option<Duration> {
        HttpResponse::retry_after(self)
    }
}

/// Run `attempt_fn` under `policy`.
///
/// `attempt_fn` receives the 0-based attempt number. Returns the first
/// non-retryable outcome, the last retryable outcome once the budget is spent,
/// or the error that ended the call.
pub async fn execute<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut attempt_fn: F,
) -> Result<T, FetchError>
where
    T: RetryOutcome,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let mut attempt = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        let (status, retry_after) = match attempt_fn(attempt).await {
            Ok(outcome) => match outcome.status() {
                Some(status) if policy.is_retryable_status(status) => {
                    if attempt >= policy.max_retries {
                        warn!(
                            "Giving up after {} attempts (last status {})",
                            attempt + 1,
                            status
                        );
                        return Ok(outcome);
                    }
                    (Some(status), outcome.retry_after())
                }
                _ => return Ok(outcome),
            },
            Err(e) if e.is_transient() => {
                if attempt >= policy.max_retries {
                    warn!("Giving up after {} attempts: {}", attempt + 1, e);
                    return Err(e);
                }
                debug!("Transient failure on attempt {}: {}", attempt + 1, e);
                (None, None)
            }
            Err(e) => return Err(e),
        };

        let delay = policy.retry_delay(attempt, status, retry_after);
        debug!(
            "Retrying in {:?} (attempt {}/{}, status {:?})",
            delay,
            attempt + 1,
            policy.max_retries + 1,
            status
        );

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
        }

        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            retryable_statuses: DEFAULT_RETRYABLE_STATUSES.to_vec(),
        }
    }

    fn response(status: u16) -> HttpResponse {
        HttpResponse::new(status, HashMap::new(), Vec::new())
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let p = policy(10);
        let mut previous = Duration::ZERO;
        for attempt in 0..12 {
            let delay = p.backoff_delay(attempt, Some(500));
            let expected = Duration::from_secs_f64(0.1 * 2f64.powi(attempt as i32))
                .min(Duration::from_secs(10));
            assert_eq!(delay, expected);
            assert!(delay >= previous);
            previous = delay;
        }
        assert_eq!(p.backoff_delay(u32::MAX, None), Duration::from_secs(10));
    }

    #[test]
    fn test_throttle_backs_off_harder() {
        let p = policy(10);
        for attempt in 0..5 {
            // 100ms * 2^(attempt+2) stays below the 10s cap for attempts 0..=4
            assert!(p.backoff_delay(attempt, Some(429)) > p.backoff_delay(attempt, Some(500)));
            assert_eq!(
                p.backoff_delay(attempt, Some(429)),
                p.backoff_delay(attempt + 2, Some(500))
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_budget_exhaustion_returns_last_response() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = execute(&policy(3), &CancellationToken::new(), |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, FetchError>(response(503))
            }
        })
        .await;

        let resp = result.expect("retryable status should not become an error");
        assert_eq!(resp.status_code(), 503);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_retries() {
        let result = execute(&policy(3), &CancellationToken::new(), |attempt| async move {
            if attempt < 2 {
                Ok::<_, FetchError>(response(502))
            } else {
                Ok(response(200))
            }
        })
        .await;
        assert_eq!(result.unwrap().status_code(), 200);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_status_returns_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = execute(&policy(3), &CancellationToken::new(), |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, FetchError>(response(404))
            }
        })
        .await;
        assert_eq!(result.unwrap().status_code(), 404);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_error_retried_then_propagated() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<HttpResponse, _> =
            execute(&policy(2), &CancellationToken::new(), |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(FetchError::Timeout("read timed out".into()))
                }
            })
            .await;
        assert!(matches!(result, Err(FetchError::Timeout(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<HttpResponse, _> =
            execute(&policy(5), &CancellationToken::new(), |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(FetchError::Request("malformed response".into()))
                }
            })
            .await;
        assert!(matches!(result, Err(FetchError::Request(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttled_waits_are_longer() {
        let p = policy(1);
        let start = tokio::time::Instant::now();
        let _ = execute(&p, &CancellationToken::new(), |_| async {
            Ok::<_, FetchError>(response(429))
        })
        .await;
        // one wait of 100ms * 2^2 plus up to 10% jitter
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(400));
        assert!(elapsed <= Duration::from_millis(445));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_is_honored() {
        let p = policy(1);
        let start = tokio::time::Instant::now();
        let _ = execute(&p, &CancellationToken::new(), |_| async {
            let mut headers = HashMap::new();
            headers.insert("Retry-After".to_string(), "3".to_string());
            Ok::<_, FetchError>(HttpResponse::new(503, headers, Vec::new()))
        })
        .await;
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_during_backoff() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });
        let result = execute(&policy(5), &cancel, |_| async {
            Ok::<_, FetchError>(response(500))
        })
        .await;
        assert!(matches!(result, Err(FetchError::Cancelled)));
    }
}
