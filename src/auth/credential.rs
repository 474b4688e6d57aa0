//! Access credentials and auth error definitions.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;

/// Lifetime assumed when the token endpoint omits `expires_in`.
pub const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);

/// Errors that can occur while obtaining a credential.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// Token endpoint unreachable or the connection failed.
    #[error("token endpoint unreachable: {0}")]
    Endpoint(String),

    #[error("token request timed out after {0:?}")]
    Timeout(Duration),

    /// Token endpoint answered with an OAuth2 error.
    #[error("token request rejected (HTTP {status}, {error}): {description}")]
    Rejected {
        status: u16,
        error: String,
        description: String,
    },

    #[error("invalid token response: {0}")]
    InvalidResponse(String),

    /// Auth settings cannot produce a request.
    #[error("auth misconfigured: {0}")]
    Config(String),
}

impl AuthError {
    /// Whether asking again later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            AuthError::Endpoint(_) | AuthError::Timeout(_) => true,
            AuthError::Rejected { status, .. } => *status == 429 || *status >= 500,
            AuthError::InvalidResponse(_) | AuthError::Config(_) => false,
        }
    }

    /// The refresh token is no longer accepted.
    pub fn is_invalid_grant(&self) -> bool {
        matches!(self, AuthError::Rejected { error, .. } if error == "invalid_grant")
    }
}

/// OAuth2 access token plus the data needed to renew it.
#[derive(Clone)]
pub struct Credential {
    access_token: String,
    token_type: String,
    refresh_token: Option<String>,
    scope: Option<String>,
    expires_at: Instant,
}

impl Credential {
    pub fn new(access_token: impl Into<String>, expires_in: Duration) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: "Bearer".to_string(),
            refresh_token: None,
            scope: None,
            expires_at: Instant::now() + expires_in,
        }
    }

    pub fn with_refresh_token(mut self, refresh_token: Option<String>) -> Self {
        self.refresh_token = refresh_token.filter(|t| !t.is_empty());
        self
    }

    pub fn with_scope(mut self, scope: Option<String>) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_token_type(mut self, token_type: impl Into<String>) -> Self {
        self.token_type = token_type.into();
        self
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// Time left before expiry (zero once expired).
    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    /// Expired, or expiring within `skew`.
    pub fn needs_refresh(&self, skew: Duration) -> bool {
        Instant::now() + skew >= self.expires_at
    }

    /// Non-secret summary for status displays.
    pub fn info(&self) -> TokenInfo {
        TokenInfo {
            token_type: self.token_type.clone(),
            scope: self.scope.clone(),
            expires_in_secs: self.remaining().as_secs(),
            has_refresh_token: self.refresh_token.is_some(),
            is_expired: self.is_expired(),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("scope", &self.scope)
            .field("expires_in", &self.remaining())
            .finish()
    }
}

/// Credential metadata safe to show to users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenInfo {
    pub token_type: String,
    pub scope: Option<String>,
    pub expires_in_secs: u64,
    pub has_refresh_token: bool,
    pub is_expired: bool,
}
