//! Streaming subsystem.
//!
//! # Data Flow
//! ```text
//! transport (SSE deltas)
//!     → bridge drain loop (single consumer per stream)
//!     → accumulator.rs append (ordered)
//!     → caller's chunk channel
//!
//! end of stream / failure / cleanup
//!     → accumulator.rs complete (idempotent)
//!     → memory (final content only)
//! ```

pub mod accumulator;

pub use accumulator::{AccumulatorError, StreamAccumulator, StreamId};
