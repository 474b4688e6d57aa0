//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     BridgeConfig → transport + credentials + memory → AgentBridge
//!
//! Cancellation (shutdown.rs):
//!     cleanup_connection → Shutdown::trigger → in-flight retries and streams stop
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → cleanup_connection
//! ```
//!
//! # Design Decisions
//! - Cancellation is epoch based, so a cleaned-up bridge can connect again
//! - Cleanup is synchronous and idempotent; it is also run on drop

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::{Shutdown, ShutdownSignal};
pub use startup::{build_bridge, build_memory, StartupError};
