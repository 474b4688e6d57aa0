//! Circuit breaker for agent backend protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: backend assumed down, calls fail fast with [`CircuitOpenError`]
//! - Half-Open: a bounded number of trial calls probe for recovery
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive_failures >= failure_threshold
//! Open → Half-Open: first call after the cooldown elapsed
//! Half-Open → Closed: a trial call succeeds
//! Half-Open → Open: a trial call fails
//! ```
//!
//! # Design Decisions
//! - One mutex guards every admit decision and state write; it is never held across an await
//! - Each transition bumps a generation; results from permits of an older generation are dropped
//! - A permit dropped without an outcome (cancelled call) only frees its trial slot

use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;

use crate::config::schema::CircuitBreakerConfig;
use crate::observability::metrics;
use crate::resilience::retries::Classify;

/// Circuit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a guarded call ended, from the breaker's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
    /// The call ended without telling us anything about backend health.
    Ignored,
}

/// Returned instead of invoking the operation while the circuit rejects calls.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("circuit '{name}' is {state}, retry in {retry_after:?}")]
pub struct CircuitOpenError {
    pub name: String,
    pub state: CircuitState,
    pub retry_after: Duration,
}

/// Error returned by [`CircuitBreaker::guard`].
#[derive(Debug, Error)]
pub enum GuardError<E> {
    #[error(transparent)]
    Open(CircuitOpenError),
    #[error("{0}")]
    Inner(E),
}

/// Point-in-time view of the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub half_open_in_flight: u32,
}

struct Inner {
    config: CircuitBreakerConfig,
    state: CircuitState,
    generation: u64,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    opened_at: Option<Instant>,
    half_open_in_flight: u32,
}

/// Circuit breaker shared by every call to one backend.
pub struct CircuitBreaker {
    name: String,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        metrics::record_circuit_state(&name, CircuitState::Closed);
        Self {
            name,
            inner: Mutex::new(Inner {
                config,
                state: CircuitState::Closed,
                generation: 0,
                consecutive_failures: 0,
                last_failure: None,
                opened_at: None,
                half_open_in_flight: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            half_open_in_flight: inner.half_open_in_flight,
        }
    }

    /// Whether a call made now would be admitted. Does not change state.
    pub fn is_call_permitted(&self) -> bool {
        let inner = self.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => inner
                .opened_at
                .map(|t| t.elapsed() >= inner.config.cooldown())
                .unwrap_or(true),
            CircuitState::HalfOpen => inner.half_open_in_flight < inner.config.half_open_max_calls,
        }
    }

    /// Time of the most recent failure counted while closed or half-open.
    pub fn last_failure(&self) -> Option<Instant> {
        self.lock().last_failure
    }

    /// Decide whether a call may proceed.
    pub fn try_acquire(&self) -> Result<CallPermit<'_>, CircuitOpenError> {
        let mut inner = self.lock();

        if inner.state == CircuitState::Open {
            let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
            let cooldown = inner.config.cooldown();
            if elapsed < cooldown {
                return Err(CircuitOpenError {
                    name: self.name.clone(),
                    state: CircuitState::Open,
                    retry_after: cooldown - elapsed,
                });
            }
            self.transition(&mut inner, CircuitState::HalfOpen);
        }

        let trial = inner.state == CircuitState::HalfOpen;
        if trial {
            if inner.half_open_in_flight >= inner.config.half_open_max_calls {
                return Err(CircuitOpenError {
                    name: self.name.clone(),
                    state: CircuitState::HalfOpen,
                    retry_after: Duration::ZERO,
                });
            }
            inner.half_open_in_flight += 1;
        }

        Ok(CallPermit {
            breaker: self,
            generation: inner.generation,
            trial,
            settled: false,
        })
    }

    /// Run `op` under the breaker, classifying its error with [`Classify`].
    pub async fn guard<T, E, F, Fut>(&self, op: F) -> Result<T, GuardError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify,
    {
        let permit = self.try_acquire().map_err(GuardError::Open)?;
        let result = op().await;
        let outcome = match &result {
            Ok(_) => Outcome::Success,
            Err(e) if e.trips_breaker() => Outcome::Failure,
            Err(_) => Outcome::Ignored,
        };
        permit.record(outcome);
        result.map_err(GuardError::Inner)
    }

    /// Force the circuit closed and clear the failure window.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures = 0;
        inner.last_failure = None;
        self.transition(&mut inner, CircuitState::Closed);
        tracing::info!(breaker = %self.name, "Circuit breaker reset");
    }

    /// Apply new thresholds without touching the current state.
    pub fn reconfigure(&self, config: CircuitBreakerConfig) {
        let mut inner = self.lock();
        tracing::debug!(
            breaker = %self.name,
            failure_threshold = config.failure_threshold,
            cooldown_secs = config.cooldown_secs,
            half_open_max_calls = config.half_open_max_calls,
            "Circuit breaker reconfigured"
        );
        inner.config = config;
    }

    fn settle(&self, generation: u64, trial: bool, outcome: Option<Outcome>) {
        let mut inner = self.lock();
        if generation != inner.generation {
            // Permit predates the last transition.
            return;
        }
        if trial {
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        }
        let Some(outcome) = outcome else {
            return;
        };

        match (inner.state, outcome) {
            (_, Outcome::Ignored) => {}
            (CircuitState::Closed, Outcome::Success) => {
                inner.consecutive_failures = 0;
            }
            (CircuitState::Closed, Outcome::Failure) => {
                inner.consecutive_failures += 1;
                inner.last_failure = Some(Instant::now());
                if inner.consecutive_failures >= inner.config.failure_threshold {
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            (CircuitState::HalfOpen, Outcome::Success) => {
                inner.consecutive_failures = 0;
                self.transition(&mut inner, CircuitState::Closed);
            }
            (CircuitState::HalfOpen, Outcome::Failure) => {
                inner.consecutive_failures += 1;
                inner.last_failure = Some(Instant::now());
                self.transition(&mut inner, CircuitState::Open);
            }
            (CircuitState::Open, _) => {}
        }
    }

    fn transition(&self, inner: &mut Inner, to: CircuitState) {
        let from = inner.state;
        inner.state = to;
        inner.generation += 1;
        inner.half_open_in_flight = 0;
        inner.opened_at = (to == CircuitState::Open).then(Instant::now);

        if from != to {
            match to {
                CircuitState::Open => tracing::warn!(
                    breaker = %self.name,
                    from = from.as_str(),
                    consecutive_failures = inner.consecutive_failures,
                    "Circuit opened"
                ),
                _ => tracing::info!(
                    breaker = %self.name,
                    from = from.as_str(),
                    to = to.as_str(),
                    "Circuit state changed"
                ),
            }
            metrics::record_circuit_state(&self.name, to);
        }
    }
}

/// Admission granted by [`CircuitBreaker::try_acquire`].
///
/// Report the result with [`CallPermit::record`]. Dropping the permit without
/// recording frees its trial slot and changes nothing else.
#[must_use = "record the call outcome or drop the permit"]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    trial: bool,
    settled: bool,
}

impl CallPermit<'_> {
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn record(mut self, outcome: Outcome) {
        self.settled = true;
        self.breaker.settle(self.generation, self.trial, Some(outcome));
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.settle(self.generation, self.trial, None);
        }
    }
}
