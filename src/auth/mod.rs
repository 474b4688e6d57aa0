//! OAuth2 credentials for the agent backend.
//!
//! # Data Flow
//! ```text
//! AgentBridge
//!     → CredentialManager::acquire (cached, or one shared refresh)
//!     → TokenSource::fetch         (refresh_token grant, else client_credentials)
//!     → CredentialLease            (bearer token for one backend call)
//!
//! 401 from backend → invalidate(lease) → acquire (one forced refresh) → retry once
//! ```

pub mod credential;
pub mod manager;
pub mod oauth2;

pub use credential::{AuthError, Credential, TokenInfo};
pub use manager::{CredentialLease, CredentialManager};
pub use oauth2::{Grant, HttpTokenSource, TokenSource};
