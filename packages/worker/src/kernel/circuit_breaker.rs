//! Per-operation circuit breakers.
//!
//! A breaker trips after `failure_threshold` failures and then rejects calls
//! without running them until `recovery_time` has passed since the last
//! failure. The first call after that is a single trial: success closes the
//! circuit, failure re-opens it with a fresh timer. Other callers arriving
//! while the trial is in flight are rejected.
//!
//! Every state change bumps the entry's generation. A call only reports its
//! outcome if the generation it was admitted under is still current, so a
//! slow call let in while Closed cannot settle the state of a later trial.
//!
//! ```text
//!            failures >= threshold
//!   Closed ─────────────────────────► Open
//!     ▲                                │ recovery_time elapsed
//!     │ trial ok                       ▼
//!     └──────────────────────────── HalfOpen ──► Open (trial failed)
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::retry::{execute_with_retry, RetryOptions};
use crate::common::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
pub struct CircuitBreakerEntry {
    pub state: CircuitState,
    pub failures: u32,
    pub last_failure_at: Option<Instant>,
    trial_in_flight: bool,
    generation: u64,
}

impl Default for CircuitBreakerEntry {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            failures: 0,
            last_failure_at: None,
            trial_in_flight: false,
            generation: 0,
        }
    }
}

impl CircuitBreakerEntry {
    fn transition(&mut self, state: CircuitState) {
        self.state = state;
        self.generation += 1;
    }

    /// Decide whether a call may run now and return the generation it runs
    /// under. Moves Open to HalfOpen when the recovery window has passed and
    /// claims the single trial slot.
    fn try_acquire(&mut self, now: Instant, recovery_time: Duration) -> Option<u64> {
        match self.state {
            CircuitState::Closed => Some(self.generation),
            CircuitState::Open => {
                let recovered = self
                    .last_failure_at
                    .map_or(true, |at| now.duration_since(at) >= recovery_time);
                if !recovered {
                    return None;
                }
                self.transition(CircuitState::HalfOpen);
                self.trial_in_flight = true;
                Some(self.generation)
            }
            CircuitState::HalfOpen => {
                if self.trial_in_flight {
                    None
                } else {
                    self.trial_in_flight = true;
                    Some(self.generation)
                }
            }
        }
    }

    fn record_success(&mut self) {
        if self.state != CircuitState::Closed {
            self.transition(CircuitState::Closed);
        }
        self.failures = 0;
        self.trial_in_flight = false;
    }

    fn record_failure(&mut self, now: Instant, failure_threshold: u32) {
        self.failures += 1;
        self.last_failure_at = Some(now);
        self.trial_in_flight = false;

        match self.state {
            CircuitState::Closed if self.failures >= failure_threshold => {
                self.transition(CircuitState::Open);
            }
            CircuitState::Closed => {}
            CircuitState::HalfOpen => self.transition(CircuitState::Open),
            CircuitState::Open => {}
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerOptions {
    pub failure_threshold: u32,
    pub recovery_time: Duration,
    /// Retry policy applied inside the breaker. One exhausted retry sequence
    /// counts as one failure.
    pub retry: Option<RetryOptions<SyncError>>,
}

impl Default for CircuitBreakerOptions {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_time: Duration::from_secs(60),
            retry: None,
        }
    }
}

impl CircuitBreakerOptions {
    pub fn with_retry(mut self, retry: RetryOptions<SyncError>) -> Self {
        self.retry = Some(retry);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CircuitSnapshot {
    pub operation: String,
    pub state: CircuitState,
    pub failures: u32,
}

/// Registry of breakers keyed by operation name. Cheap to clone.
#[derive(Clone, Default)]
pub struct CircuitBreakers {
    circuits: Arc<DashMap<String, CircuitBreakerEntry>>,
}

impl CircuitBreakers {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn execute<T, F, Fut>(
        &self,
        operation_name: &str,
        mut operation: F,
        options: &CircuitBreakerOptions,
    ) -> Result<T, SyncError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SyncError>>,
    {
        let admitted = self
            .circuits
            .entry(operation_name.to_string())
            .or_default()
            .try_acquire(Instant::now(), options.recovery_time);

        let Some(generation) = admitted else {
            return Err(SyncError::CircuitOpen {
                operation: operation_name.to_string(),
            });
        };

        let mut guard = TrialGuard {
            circuits: &self.circuits,
            operation_name,
            generation,
            settled: false,
        };

        let result = match &options.retry {
            Some(retry) => execute_with_retry(&mut operation, retry).await,
            None => operation().await,
        };

        guard.settled = true;
        let mut entry = self
            .circuits
            .entry(operation_name.to_string())
            .or_default();

        if entry.generation != generation {
            debug!(
                operation = operation_name,
                state = ?entry.state,
                "Ignoring outcome of a call admitted under an earlier circuit state"
            );
            return result;
        }

        match &result {
            Ok(_) => {
                if entry.state != CircuitState::Closed {
                    info!(operation = operation_name, "Circuit closed after successful trial");
                }
                entry.record_success();
            }
            Err(e) => {
                let was = entry.state;
                entry.record_failure(Instant::now(), options.failure_threshold);
                if entry.state == CircuitState::Open && was != CircuitState::Open {
                    warn!(
                        operation = operation_name,
                        failures = entry.failures,
                        error = %e,
                        "Circuit opened"
                    );
                }
            }
        }

        result
    }

    pub fn state(&self, operation_name: &str) -> CircuitState {
        self.circuits
            .get(operation_name)
            .map_or(CircuitState::Closed, |e| e.state)
    }

    pub fn snapshot(&self) -> Vec<CircuitSnapshot> {
        let mut out: Vec<_> = self
            .circuits
            .iter()
            .map(|e| CircuitSnapshot {
                operation: e.key().clone(),
                state: e.state,
                failures: e.failures,
            })
            .collect();
        out.sort_by(|a, b| a.operation.cmp(&b.operation));
        out
    }

    pub fn reset(&self, operation_name: &str) {
        self.circuits.remove(operation_name);
    }
}

/// Releases the trial slot if the calling future is dropped mid-flight, so a
/// cancelled trial cannot wedge the circuit in HalfOpen.
struct TrialGuard<'a> {
    circuits: &'a DashMap<String, CircuitBreakerEntry>,
    operation_name: &'a str,
    generation: u64,
    settled: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if let Some(mut entry) = self.circuits.get_mut(self.operation_name) {
            if entry.generation == self.generation {
                entry.trial_in_flight = false;
            }
        }
    }
}
