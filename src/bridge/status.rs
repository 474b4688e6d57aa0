//! Connection status reported to the UI.

use std::fmt;

use serde::Serialize;
use tokio::sync::watch;

use crate::memory::types::{MemoryStats, SessionId};

/// Connection state as shown to users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected { reason: Option<String> },
    Connecting,
    Connected,
    /// Connected, but the last call was served by a fallback.
    Degraded { reason: String },
}

impl ConnectionStatus {
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected { .. } => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Degraded { .. } => "degraded",
        }
    }

    fn is_established(&self) -> bool {
        matches!(self, ConnectionStatus::Connected | ConnectionStatus::Degraded { .. })
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Disconnected { reason: Some(reason) } => write!(f, "disconnected ({})", reason),
            ConnectionStatus::Degraded { reason } => write!(f, "degraded ({})", reason),
            other => f.write_str(other.label()),
        }
    }
}

/// Single writer of the bridge status; readers subscribe through `watch`.
pub(crate) struct StatusTracker {
    tx: watch::Sender<ConnectionStatus>,
}

impl StatusTracker {
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(ConnectionStatus::Disconnected { reason: None });
        Self { tx }
    }

    pub(crate) fn current(&self) -> ConnectionStatus {
        self.tx.borrow().clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.tx.subscribe()
    }

    pub(crate) fn set(&self, status: ConnectionStatus) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status.clone();
            true
        });
        if changed {
            tracing::info!(status = %status, "Bridge status changed");
        }
    }

    /// Back to `Connected` after a degraded call. No-op unless connected.
    pub(crate) fn mark_success(&self) {
        if self.tx.borrow().is_established() {
            self.set(ConnectionStatus::Connected);
        }
    }

    /// No-op unless connected.
    pub(crate) fn mark_degraded(&self, reason: impl Into<String>) {
        if self.tx.borrow().is_established() {
            self.set(ConnectionStatus::Degraded { reason: reason.into() });
        }
    }
}

/// Point-in-time view of the bridge for status displays.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub status: ConnectionStatus,
    pub is_connected: bool,
    pub agent_available: bool,
    pub auth_enabled: bool,
    /// Holds an unexpired credential the backend has not rejected.
    pub authenticated: bool,
    pub session_id: SessionId,
    pub open_streams: usize,
    pub memory: MemoryStats,
}
