//! Retry policy with exponential backoff and typed fallbacks.
//!
//! # Responsibilities
//! - Re-run a failed operation while its error is retryable
//! - Wait between attempts using [`calculate_backoff`]
//! - Replace an exhausted call with the capability's fallback payload
//!
//! # Design Decisions
//! - Errors classify themselves through [`Classify`]; nothing is guessed from messages
//! - Non-retryable errors return immediately and never consume the budget
//! - Backoff waits and in-flight attempts stop as soon as the bridge is cleaned up

use std::fmt;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;

use crate::config::schema::RetryConfig;
use crate::lifecycle::shutdown::ShutdownSignal;
use crate::observability::metrics;
use crate::resilience::backoff::calculate_backoff;
use crate::resilience::fallback::{FallbackRegistry, Payload};

/// Failure classification used by the retry loop and the circuit breaker.
pub trait Classify {
    /// Whether another attempt may succeed.
    fn is_retryable(&self) -> bool;

    /// Whether the failure says something about backend health.
    fn trips_breaker(&self) -> bool {
        self.is_retryable()
    }

    /// Minimum wait the server asked for before the next attempt.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Terminal result of [`RetryPolicy::execute`] when no attempt succeeded.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// Every attempt failed with a retryable error.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },

    /// An attempt failed with an error that retrying cannot fix.
    #[error("{0}")]
    Fatal(E),

    /// The bridge was cleaned up while the call was in flight.
    #[error("call cancelled")]
    Cancelled,
}

impl<E> RetryError<E> {
    pub fn last_error(&self) -> Option<&E> {
        match self {
            RetryError::Exhausted { last, .. } => Some(last),
            RetryError::Fatal(e) => Some(e),
            RetryError::Cancelled => None,
        }
    }
}

impl<E: Classify> Classify for RetryError<E> {
    fn is_retryable(&self) -> bool {
        false
    }

    fn trips_breaker(&self) -> bool {
        match self {
            RetryError::Exhausted { last, .. } => last.trips_breaker(),
            RetryError::Fatal(e) => e.trips_breaker(),
            RetryError::Cancelled => false,
        }
    }
}

/// Result of [`RetryPolicy::wrap`].
#[derive(Debug)]
pub enum RetryOutcome<T, E> {
    Success(T),
    /// Retries ran out; the capability's fallback stands in for the result.
    Fallback {
        payload: Payload,
        attempts: u32,
        last: E,
    },
    Failed(RetryError<E>),
}

/// Exponential-backoff retry policy.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    jitter_ratio: f64,
    fallbacks: FallbackRegistry,
}

impl RetryPolicy {
    pub fn new(config: &RetryConfig, fallbacks: FallbackRegistry) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
            jitter_ratio: config.jitter_ratio,
            fallbacks,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn fallbacks(&self) -> &FallbackRegistry {
        &self.fallbacks
    }

    /// Run `op` until it succeeds, fails fatally, runs out of attempts or is cancelled.
    ///
    /// `op` receives the 1-based attempt number.
    pub async fn execute<T, E, F, Fut>(
        &self,
        capability: &str,
        cancel: &ShutdownSignal,
        mut op: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + fmt::Display,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            if cancel.is_cancelled() {
                return Err(RetryError::Cancelled);
            }

            let result = tokio::select! {
                result = op(attempt) => result,
                _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            };

            let error = match result {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(capability, attempt, "Call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            if !error.is_retryable() {
                tracing::debug!(capability, attempt, error = %error, "Non-retryable failure");
                return Err(RetryError::Fatal(error));
            }

            if attempt >= self.max_attempts {
                tracing::warn!(capability, attempts = attempt, error = %error, "Retries exhausted");
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: error,
                });
            }

            let backoff = calculate_backoff(attempt, self.base_delay_ms, self.max_delay_ms, self.jitter_ratio);
            let hint = error.retry_after();
            let delay = match hint {
                Some(hint) => backoff.max(hint.min(Duration::from_millis(self.max_delay_ms))),
                None => backoff,
            };
            tracing::warn!(
                capability,
                attempt,
                delay_ms = delay.as_millis() as u64,
                retry_after_ms = hint.map(|h| h.as_millis() as u64),
                error = %error,
                "Retryable failure, backing off"
            );
            metrics::record_retry(capability);

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            }
        }
    }

    /// Map an exhausted result to the capability's fallback.
    pub fn settle<T, E>(&self, capability: &str, result: Result<T, RetryError<E>>) -> RetryOutcome<T, E> {
        match result {
            Ok(value) => RetryOutcome::Success(value),
            Err(RetryError::Exhausted { attempts, last }) => {
                metrics::record_fallback(capability);
                RetryOutcome::Fallback {
                    payload: self.fallbacks.resolve(capability),
                    attempts,
                    last,
                }
            }
            Err(other) => RetryOutcome::Failed(other),
        }
    }

    /// [`execute`](Self::execute) followed by [`settle`](Self::settle).
    pub async fn wrap<T, E, F, Fut>(
        &self,
        capability: &str,
        cancel: &ShutdownSignal,
        op: F,
    ) -> RetryOutcome<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + fmt::Display,
    {
        let result = self.execute(capability, cancel, op).await;
        self.settle(capability, result)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(&RetryConfig::default(), FallbackRegistry::default())
    }
}
