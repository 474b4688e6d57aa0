//! Agent backend transport.
//!
//! # Data Flow
//! ```text
//! AgentBridge
//!     → AgentTransport::query  (POST, JSON reply)
//!     → AgentTransport::stream (POST, server-sent events → sse.rs → chunk channel)
//!     → AgentTransport::ping   (GET health)
//! ```
//!
//! # Design Decisions
//! - The trait is object-safe so tests can script a backend without a socket
//! - Transports report failures as [`TransportError`]; classification lives on the error
//! - Chunks are pushed into a bounded channel in the order they were received

pub mod http;
pub mod sse;

use std::time::Duration;

use futures_util::future::BoxFuture;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::auth::AuthError;
use crate::memory::types::{ContextEntry, SessionId};
use crate::resilience::retries::Classify;

pub use http::HttpTransport;

/// Body sent to the agent for both query styles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentRequest {
    pub query: String,
    pub session_id: SessionId,
    /// Recent history of the current session, oldest first.
    pub context: Vec<ContextEntry>,
}

/// Errors raised while talking to the agent backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Backend unreachable or the connection dropped before a reply.
    #[error("connection error: {0}")]
    Connection(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Non-success HTTP status other than 401.
    #[error("backend returned HTTP {status}: {body}")]
    Status {
        status: u16,
        body: String,
        /// From the `Retry-After` header.
        retry_after: Option<Duration>,
    },

    /// Backend rejected the bearer token.
    #[error("backend rejected credentials (HTTP 401)")]
    Unauthorized,

    /// Backend answered with something we cannot read.
    #[error("invalid backend response: {0}")]
    Decode(String),

    /// Backend reported a failure inside a stream before any text.
    #[error("backend error: {0}")]
    Backend(String),

    /// The stream failed after text had already been delivered.
    #[error("stream interrupted after {chunks} chunks: {reason}")]
    Interrupted { chunks: usize, reason: String },

    #[error("authentication failed: {0}")]
    Auth(AuthError),

    #[error("call cancelled")]
    Cancelled,
}

impl TransportError {
    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_decode() {
            TransportError::Decode(err.to_string())
        } else {
            TransportError::Connection(err.to_string())
        }
    }
}

impl Classify for TransportError {
    fn is_retryable(&self) -> bool {
        match self {
            TransportError::Connection(_) | TransportError::Timeout(_) | TransportError::Backend(_) => true,
            TransportError::Status { status, .. } => *status == 429 || *status >= 500,
            TransportError::Auth(e) => e.is_transient(),
            TransportError::Unauthorized
            | TransportError::Decode(_)
            | TransportError::Interrupted { .. }
            | TransportError::Cancelled => false,
        }
    }

    fn trips_breaker(&self) -> bool {
        match self {
            TransportError::Connection(_)
            | TransportError::Timeout(_)
            | TransportError::Backend(_)
            | TransportError::Decode(_)
            | TransportError::Interrupted { .. } => true,
            TransportError::Status { status, .. } => *status == 429 || *status >= 500,
            TransportError::Unauthorized | TransportError::Auth(_) | TransportError::Cancelled => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            TransportError::Status { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Connection to an agent backend.
pub trait AgentTransport: Send + Sync {
    /// Check that the backend is reachable.
    fn ping<'a>(&'a self, token: Option<&'a str>) -> BoxFuture<'a, Result<(), TransportError>>;

    /// Single-shot query returning the full reply.
    fn query<'a>(
        &'a self,
        request: &'a AgentRequest,
        token: Option<&'a str>,
    ) -> BoxFuture<'a, Result<String, TransportError>>;

    /// Streamed query. Text chunks are sent to `chunks` in arrival order; the
    /// future resolves when the backend ends the stream.
    fn stream<'a>(
        &'a self,
        request: &'a AgentRequest,
        token: Option<&'a str>,
        chunks: mpsc::Sender<String>,
    ) -> BoxFuture<'a, Result<(), TransportError>>;
}
