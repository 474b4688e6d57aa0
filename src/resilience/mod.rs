//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to agent backend:
//!     → circuit_breaker.rs (admit or fail fast; record the final outcome)
//!     → retries.rs (retry retryable failures with backoff.rs delays)
//!     → timeouts.rs (per-attempt deadline)
//!     → On exhaustion: fallback.rs (typed payload for the capability)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - The breaker sees one outcome per logical call, after retries resolved
//! - Retryable vs fatal is an explicit property of each error type
//! - Fallbacks are data (config), not code

pub mod backoff;
pub mod circuit_breaker;
pub mod fallback;
pub mod retries;
pub mod timeouts;

pub use circuit_breaker::{CircuitBreaker, CircuitOpenError, CircuitState, GuardError, Outcome};
pub use fallback::{FallbackRegistry, Payload};
pub use retries::{Classify, RetryError, RetryOutcome, RetryPolicy};
