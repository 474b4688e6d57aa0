//! OAuth2 token endpoint client.
//!
//! # Responsibilities
//! - Request tokens with the `client_credentials` grant
//! - Renew tokens with the `refresh_token` grant
//! - Decode RFC 6749 success and error bodies
//!
//! # Design Decisions
//! - Form-encoded POST, as the RFC requires
//! - The client secret lives only in this struct and is never logged

use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::Deserialize;
use url::Url;

use crate::auth::credential::{AuthError, Credential, DEFAULT_TOKEN_LIFETIME};
use crate::config::schema::AuthConfig;

/// Grant used for one token request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grant<'a> {
    ClientCredentials,
    RefreshToken(&'a str),
}

impl Grant<'_> {
    pub fn as_str(&self) -> &'static str {
        match self {
            Grant::ClientCredentials => "client_credentials",
            Grant::RefreshToken(_) => "refresh_token",
        }
    }
}

/// Source of fresh credentials.
pub trait TokenSource: Send + Sync {
    fn fetch<'a>(&'a self, grant: Grant<'a>) -> BoxFuture<'a, Result<Credential, AuthError>>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TokenErrorResponse {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

/// [`TokenSource`] backed by an OAuth2 token endpoint.
pub struct HttpTokenSource {
    client: reqwest::Client,
    token_url: Url,
    client_id: String,
    client_secret: Option<String>,
    scope: Option<String>,
    audience: Option<String>,
}

impl HttpTokenSource {
    pub fn new(config: &AuthConfig, connect_timeout: Duration) -> Result<Self, AuthError> {
        let token_url = Url::parse(&config.token_url)
            .map_err(|e| AuthError::Config(format!("invalid token_url '{}': {}", config.token_url, e)))?;
        if config.client_id.trim().is_empty() {
            return Err(AuthError::Config("client_id is required".to_string()));
        }
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| AuthError::Config(e.to_string()))?;

        Ok(Self {
            client,
            token_url,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone().filter(|s| !s.is_empty()),
            scope: config.scope.clone(),
            audience: config.audience.clone(),
        })
    }

    fn form<'a>(&'a self, grant: &Grant<'a>) -> Vec<(&'static str, &'a str)> {
        let mut form = vec![("grant_type", grant.as_str()), ("client_id", self.client_id.as_str())];
        if let Some(secret) = &self.client_secret {
            form.push(("client_secret", secret.as_str()));
        }
        match grant {
            Grant::ClientCredentials => {
                if let Some(scope) = &self.scope {
                    form.push(("scope", scope.as_str()));
                }
                if let Some(audience) = &self.audience {
                    form.push(("audience", audience.as_str()));
                }
            }
            Grant::RefreshToken(token) => form.push(("refresh_token", token)),
        }
        form
    }

    async fn request(&self, grant: Grant<'_>) -> Result<Credential, AuthError> {
        let form = self.form(&grant);
        let response = self
            .client
            .post(self.token_url.clone())
            .form(&form)
            .send()
            .await
            .map_err(|e| AuthError::Endpoint(e.to_string()))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| AuthError::Endpoint(e.to_string()))?;

        if !status.is_success() {
            let parsed: TokenErrorResponse = serde_json::from_str(&body).unwrap_or_default();
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                error: parsed.error.unwrap_or_else(|| "unknown_error".to_string()),
                description: parsed.error_description.unwrap_or_default(),
            });
        }

        let token: TokenResponse =
            serde_json::from_str(&body).map_err(|e| AuthError::InvalidResponse(e.to_string()))?;
        if token.access_token.is_empty() {
            return Err(AuthError::InvalidResponse("empty access_token".to_string()));
        }

        let lifetime = token.expires_in.map(Duration::from_secs).unwrap_or(DEFAULT_TOKEN_LIFETIME);
        tracing::debug!(
            grant = grant.as_str(),
            expires_in_secs = lifetime.as_secs(),
            has_refresh_token = token.refresh_token.is_some(),
            "Token issued"
        );

        Ok(Credential::new(token.access_token, lifetime)
            .with_token_type(token.token_type.unwrap_or_else(|| "Bearer".to_string()))
            .with_refresh_token(token.refresh_token)
            .with_scope(token.scope.or_else(|| self.scope.clone())))
    }
}

impl TokenSource for HttpTokenSource {
    fn fetch<'a>(&'a self, grant: Grant<'a>) -> BoxFuture<'a, Result<Credential, AuthError>> {
        self.request(grant).boxed()
    }
}
