//! Bounded retry with exponential backoff.
//!
//! [`execute_with_retry`] runs an async operation until it succeeds, the
//! predicate rejects the error, or `max_attempts` is reached. The delay between
//! attempts is `min(initial_delay * multiplier^(attempt-1), max_delay)`, plus
//! optional jitter so that many workers retrying the same dependency do not
//! line up.
//!
//! Three profiles cover the dependencies the pipeline talks to:
//!
//! | Profile | Attempts | Initial | Multiplier | Max | Retries |
//! |---|---|---|---|---|---|
//! | [`database_retry`] | 3 | 100ms | 2.0 | 2s | connection/timeout class |
//! | [`api_retry`] | 3 | 1s | 2.0 | 10s | 5xx, 429, network |
//! | [`extraction_api_retry`] | 4 | 2s | 1.5 | 30s | as api, never 400/401/403 |

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::common::SyncError;

pub type RetryPredicate<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

pub struct RetryOptions<E> {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff_multiplier: f64,
    pub max_delay: Duration,
    pub retry_predicate: RetryPredicate<E>,
    /// Upper bound of random extra delay, as a percentage of the computed delay.
    pub jitter_percent: Option<f64>,
}

impl<E> Clone for RetryOptions<E> {
    fn clone(&self) -> Self {
        Self {
            max_attempts: self.max_attempts,
            initial_delay: self.initial_delay,
            backoff_multiplier: self.backoff_multiplier,
            max_delay: self.max_delay,
            retry_predicate: self.retry_predicate.clone(),
            jitter_percent: self.jitter_percent,
        }
    }
}

impl<E> fmt::Debug for RetryOptions<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryOptions")
            .field("max_attempts", &self.max_attempts)
            .field("initial_delay", &self.initial_delay)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("max_delay", &self.max_delay)
            .field("jitter_percent", &self.jitter_percent)
            .finish_non_exhaustive()
    }
}

impl<E> RetryOptions<E> {
    pub fn new(
        max_attempts: u32,
        initial_delay: Duration,
        backoff_multiplier: f64,
        max_delay: Duration,
        retry_predicate: impl Fn(&E) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            max_attempts,
            initial_delay,
            backoff_multiplier,
            max_delay,
            retry_predicate: Arc::new(retry_predicate),
            jitter_percent: None,
        }
    }

    pub fn with_jitter(mut self, percent: f64) -> Self {
        self.jitter_percent = Some(percent);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Deterministic delay before the attempt after `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let capped = secs.min(self.max_delay.as_secs_f64());
        if capped.is_finite() && capped >= 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            self.max_delay
        }
    }

    pub fn should_retry(&self, error: &E) -> bool {
        (self.retry_predicate)(error)
    }
}

/// Add up to `percent`% of `delay` as random extra wait. Never shortens the delay.
pub fn apply_jitter(delay: Duration, percent: f64) -> Duration {
    let fraction = (percent.max(0.0) / 100.0) * fastrand::f64();
    delay + delay.mul_f64(fraction)
}

/// Run `operation` under `options`. The last error is returned unchanged.
pub async fn execute_with_retry<T, E, F, Fut>(mut operation: F, options: &RetryOptions<E>) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let max_attempts = options.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if attempt >= max_attempts || !options.should_retry(&e) {
                    return Err(e);
                }

                let mut delay = options.delay_for_attempt(attempt);
                if let Some(percent) = options.jitter_percent {
                    delay = apply_jitter(delay, percent);
                }

                warn!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

// ============================================================================
// Profiles
// ============================================================================

/// Datastore writes and reads. Only connection/timeout-class errors retry.
pub fn database_retry() -> RetryOptions<SyncError> {
    RetryOptions::new(
        3,
        Duration::from_millis(100),
        2.0,
        Duration::from_secs(2),
        SyncError::is_transient_db,
    )
}

/// Generic HTTP APIs. 5xx, 429 and network errors retry; other 4xx do not.
pub fn api_retry() -> RetryOptions<SyncError> {
    RetryOptions::new(
        3,
        Duration::from_secs(1),
        2.0,
        Duration::from_secs(10),
        SyncError::is_transient_api,
    )
}

/// The extraction API: [`api_retry`] with a slower start, gentler growth, and
/// 400/401/403 always terminal.
pub fn extraction_api_retry() -> RetryOptions<SyncError> {
    let api = api_retry();
    let transient = api.retry_predicate.clone();
    RetryOptions {
        max_attempts: 4,
        initial_delay: Duration::from_secs(2),
        backoff_multiplier: 1.5,
        max_delay: Duration::from_secs(30),
        retry_predicate: Arc::new(move |e: &SyncError| {
            !matches!(e.http_status(), Some(400 | 401 | 403)) && transient(e)
        }),
        ..api
    }
    .with_jitter(20.0)
}
