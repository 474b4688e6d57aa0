//! Conversation memory subsystem.
//!
//! # Data Flow
//! ```text
//! AgentBridge (after an exchange resolves)
//!     → conversation.rs (append to the current session)
//!     → persistence.rs (append JSON line to <session_id>.jsonl)
//!
//! AgentBridge (before a query)
//!     → conversation.rs get_conversation_context(limit)
//!     → context entries sent with the request
//! ```

pub mod conversation;
pub mod persistence;
pub mod types;

pub use conversation::ConversationMemory;
pub use persistence::SessionStore;
pub use types::{
    ContextEntry, MemoryError, MemoryStats, Message, MessageId, MessageState, Role, SessionId,
};
