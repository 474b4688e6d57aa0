//! Agent bridge library.
//!
//! Connects a chat UI to a remote agent service with circuit breaking,
//! OAuth2 credentials, retries with typed fallbacks, streamed replies and
//! session-scoped conversation memory.

pub mod auth;
pub mod bridge;
pub mod config;
pub mod lifecycle;
pub mod memory;
pub mod observability;
pub mod resilience;
pub mod stream;
pub mod transport;

pub use bridge::{AgentBridge, ConnectionStatus, QueryResponse, ResponseKind};
pub use config::schema::BridgeConfig;
pub use lifecycle::Shutdown;
