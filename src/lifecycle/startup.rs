//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the transport, credential manager and conversation memory from config
//! - Assemble them into an [`AgentBridge`]
//!
//! # Design Decisions
//! - Fail fast: a bad URL, auth setting or unreadable session directory is fatal
//! - Nothing touches the network here; `initialize_connection` does that

use std::sync::Arc;

use thiserror::Error;

use crate::auth::{AuthError, CredentialManager};
use crate::bridge::AgentBridge;
use crate::config::schema::{BridgeConfig, MemoryConfig};
use crate::memory::{ConversationMemory, MemoryError, SessionStore};
use crate::transport::{HttpTransport, TransportError};

/// Errors that can occur while assembling the bridge.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("transport setup failed: {0}")]
    Transport(#[from] TransportError),

    #[error("auth setup failed: {0}")]
    Auth(#[from] AuthError),

    #[error("memory setup failed: {0}")]
    Memory(#[from] MemoryError),
}

/// Open conversation memory, on disk when persistence is enabled.
pub fn build_memory(config: &MemoryConfig) -> Result<ConversationMemory, MemoryError> {
    if !config.persist {
        tracing::debug!("Conversation memory is in-memory only");
        return Ok(ConversationMemory::in_memory());
    }
    let store = SessionStore::open(&config.dir)?;
    ConversationMemory::open(store)
}

/// Build an [`AgentBridge`] talking HTTP to the configured backend.
pub fn build_bridge(config: &BridgeConfig) -> Result<AgentBridge, StartupError> {
    let transport = HttpTransport::new(&config.transport, &config.timeouts)?;
    let credentials = CredentialManager::from_config(&config.auth, &config.timeouts)?.map(Arc::new);
    let memory = build_memory(&config.memory)?;

    tracing::info!(
        base_url = %config.transport.base_url,
        auth_enabled = credentials.is_some(),
        persistent_memory = memory.is_persistent(),
        session_id = %memory.current_session_id(),
        "Bridge assembled"
    );

    Ok(AgentBridge::new(
        Arc::new(transport),
        credentials,
        Arc::new(memory),
        config,
    ))
}
