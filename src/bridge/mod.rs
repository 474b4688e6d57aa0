//! The bridge between a chat UI and the agent backend.
//!
//! The UI calls [`AgentBridge::process_query`] or
//! [`AgentBridge::process_streaming_query`] and renders what comes back. It
//! reads connection state through [`AgentBridge::status`],
//! [`AgentBridge::is_connected`] and [`AgentBridge::agent_available`] and never
//! sees circuit state or credential contents.

pub mod agent;
pub mod response;
pub mod status;

pub use agent::{AgentBridge, INITIALIZE_CONNECTION, PROCESS_QUERY, PROCESS_STREAMING_QUERY};
pub use response::{QueryResponse, ResponseKind};
pub use status::{ConnectionStatus, StatusSnapshot};
