//! Credential lifecycle management.
//!
//! # Responsibilities
//! - Hand out bearer tokens that are valid for at least the refresh skew
//! - Coalesce concurrent refreshes into a single token request
//! - Force exactly one refresh when the backend rejects a token
//! - Track outstanding leases so cleanup can be observed
//!
//! # Design Decisions
//! - Credential state sits behind a std mutex that is never held across an await
//! - A tokio mutex serializes refreshes; waiters compare a refresh counter to
//!   learn whether someone else already did the work
//! - Leases carry the generation they were issued from, so a late 401 cannot
//!   invalidate a token that was refreshed in the meantime

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::auth::credential::{AuthError, Credential, TokenInfo};
use crate::auth::oauth2::{Grant, HttpTokenSource, TokenSource};
use crate::config::schema::{AuthConfig, TimeoutConfig};
use crate::observability::metrics;

#[derive(Default)]
struct CredentialState {
    credential: Option<Credential>,
    generation: u64,
    /// Backend rejected the current credential.
    stale: bool,
    /// Completed refresh attempts, successful or not.
    refreshes: u64,
    last_error: Option<AuthError>,
}

/// Owns the bridge's OAuth2 credential.
pub struct CredentialManager {
    source: Arc<dyn TokenSource>,
    skew: Duration,
    token_timeout: Duration,
    state: Mutex<CredentialState>,
    refresh_lock: tokio::sync::Mutex<()>,
    active: Arc<AtomicUsize>,
}

impl CredentialManager {
    pub fn new(source: Arc<dyn TokenSource>, skew: Duration, token_timeout: Duration) -> Self {
        Self {
            source,
            skew,
            token_timeout,
            state: Mutex::new(CredentialState::default()),
            refresh_lock: tokio::sync::Mutex::new(()),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Build a manager from config, or `None` when auth is disabled.
    pub fn from_config(auth: &AuthConfig, timeouts: &TimeoutConfig) -> Result<Option<Self>, AuthError> {
        if !auth.enabled {
            return Ok(None);
        }
        let source = HttpTokenSource::new(auth, timeouts.connect())?;
        tracing::info!(
            token_url = %auth.token_url,
            client_id = %auth.client_id,
            skew_secs = auth.refresh_skew_secs,
            "OAuth2 credentials enabled"
        );
        Ok(Some(Self::new(Arc::new(source), auth.refresh_skew(), timeouts.token())))
    }

    fn lock_state(&self) -> MutexGuard<'_, CredentialState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn lease(&self, credential: &Credential, generation: u64) -> CredentialLease {
        self.active.fetch_add(1, Ordering::SeqCst);
        CredentialLease {
            token: credential.access_token().to_string(),
            generation,
            active: self.active.clone(),
        }
    }

    fn usable_lease(&self, state: &CredentialState) -> Option<CredentialLease> {
        match &state.credential {
            Some(credential) if !state.stale && !credential.needs_refresh(self.skew) => {
                Some(self.lease(credential, state.generation))
            }
            _ => None,
        }
    }

    /// Get a token valid for at least the refresh skew, refreshing if needed.
    ///
    /// Concurrent callers that find the credential unusable share one refresh
    /// and all observe its result.
    pub async fn acquire(&self) -> Result<CredentialLease, AuthError> {
        let observed = {
            let state = self.lock_state();
            if let Some(lease) = self.usable_lease(&state) {
                return Ok(lease);
            }
            state.refreshes
        };

        let _flight = self.refresh_lock.lock().await;

        {
            let state = self.lock_state();
            if state.refreshes != observed {
                if let Some(lease) = self.usable_lease(&state) {
                    return Ok(lease);
                }
                if let Some(err) = &state.last_error {
                    return Err(err.clone());
                }
            }
        }

        self.refresh().await
    }

    /// Caller must hold `refresh_lock`.
    async fn refresh(&self) -> Result<CredentialLease, AuthError> {
        let refresh_token = {
            let state = self.lock_state();
            state
                .credential
                .as_ref()
                .and_then(|c| c.refresh_token().map(ToString::to_string))
        };

        let result = match tokio::time::timeout(self.token_timeout, self.fetch(refresh_token)).await {
            Ok(result) => result,
            Err(_) => Err(AuthError::Timeout(self.token_timeout)),
        };

        let mut state = self.lock_state();
        state.refreshes += 1;
        match result {
            Ok(credential) => {
                state.generation += 1;
                state.stale = false;
                state.last_error = None;
                let lease = self.lease(&credential, state.generation);
                tracing::info!(
                    generation = state.generation,
                    expires_in_secs = credential.remaining().as_secs(),
                    "Credential refreshed"
                );
                state.credential = Some(credential);
                metrics::record_token_refresh("success");
                Ok(lease)
            }
            Err(err) => {
                tracing::warn!(error = %err, transient = err.is_transient(), "Credential refresh failed");
                state.last_error = Some(err.clone());
                metrics::record_token_refresh("failure");
                Err(err)
            }
        }
    }

    async fn fetch(&self, refresh_token: Option<String>) -> Result<Credential, AuthError> {
        if let Some(token) = refresh_token.as_deref() {
            match self.source.fetch(Grant::RefreshToken(token)).await {
                Ok(credential) if credential.refresh_token().is_none() => {
                    return Ok(credential.with_refresh_token(refresh_token.clone()));
                }
                Ok(credential) => return Ok(credential),
                Err(err) if err.is_invalid_grant() => {
                    tracing::info!("Refresh token rejected, requesting a new grant");
                }
                Err(err) => return Err(err),
            }
        }
        self.source.fetch(Grant::ClientCredentials).await
    }

    /// Mark the lease's credential as rejected by the backend.
    ///
    /// Ignored when the credential was already replaced since the lease was issued.
    pub fn invalidate(&self, lease: &CredentialLease) {
        let mut state = self.lock_state();
        if state.generation == lease.generation && state.credential.is_some() {
            state.stale = true;
            tracing::debug!(generation = lease.generation, "Credential invalidated");
        }
    }

    /// Drop the credential. Later acquires start from scratch.
    pub fn clear(&self) {
        let mut state = self.lock_state();
        state.credential = None;
        state.stale = false;
        state.last_error = None;
        state.generation += 1;
    }

    pub fn is_authenticated(&self) -> bool {
        let state = self.lock_state();
        matches!(&state.credential, Some(c) if !state.stale && !c.is_expired())
    }

    pub fn token_info(&self) -> Option<TokenInfo> {
        self.lock_state().credential.as_ref().map(Credential::info)
    }

    /// Leases handed out and not yet dropped.
    pub fn active_leases(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

/// A token borrowed for the duration of one backend call.
pub struct CredentialLease {
    token: String,
    generation: u64,
    active: Arc<AtomicUsize>,
}

impl CredentialLease {
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn release(self) {}
}

impl Drop for CredentialLease {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

impl fmt::Debug for CredentialLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialLease")
            .field("token", &"<redacted>")
            .field("generation", &self.generation)
            .finish()
    }
}
