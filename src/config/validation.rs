//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds > 0, jitter within [0, 1])
//! - Check that URLs parse and auth settings are complete when enabled
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: BridgeConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use thiserror::Error;
use url::Url;

use crate::config::schema::BridgeConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Validate a configuration, collecting every problem found.
pub fn validate_config(config: &BridgeConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    match Url::parse(&config.transport.base_url) {
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
        Ok(url) => errors.push(ValidationError::new(
            "transport.base_url",
            format!("unsupported scheme '{}'", url.scheme()),
        )),
        Err(e) => errors.push(ValidationError::new("transport.base_url", e.to_string())),
    }

    for (field, path) in [
        ("transport.query_path", &config.transport.query_path),
        ("transport.stream_path", &config.transport.stream_path),
        ("transport.health_path", &config.transport.health_path),
    ] {
        if !path.starts_with('/') {
            errors.push(ValidationError::new(field, "must start with '/'"));
        }
    }

    let breaker = &config.circuit_breaker;
    if breaker.failure_threshold == 0 {
        errors.push(ValidationError::new("circuit_breaker.failure_threshold", "must be at least 1"));
    }
    if breaker.half_open_max_calls == 0 {
        errors.push(ValidationError::new("circuit_breaker.half_open_max_calls", "must be at least 1"));
    }

    let retries = &config.retries;
    if retries.max_attempts == 0 {
        errors.push(ValidationError::new("retries.max_attempts", "must be at least 1"));
    }
    if retries.base_delay_ms > retries.max_delay_ms {
        errors.push(ValidationError::new(
            "retries.base_delay_ms",
            "must not exceed retries.max_delay_ms",
        ));
    }
    if !(0.0..=1.0).contains(&retries.jitter_ratio) {
        errors.push(ValidationError::new("retries.jitter_ratio", "must be within [0, 1]"));
    }

    let timeouts = &config.timeouts;
    for (field, secs) in [
        ("timeouts.connect_secs", timeouts.connect_secs),
        ("timeouts.request_secs", timeouts.request_secs),
        ("timeouts.stream_secs", timeouts.stream_secs),
        ("timeouts.token_secs", timeouts.token_secs),
    ] {
        if secs == 0 {
            errors.push(ValidationError::new(field, "must be greater than zero"));
        }
    }

    let auth = &config.auth;
    if auth.enabled {
        if let Err(e) = Url::parse(&auth.token_url) {
            errors.push(ValidationError::new("auth.token_url", e.to_string()));
        }
        if auth.client_id.trim().is_empty() {
            errors.push(ValidationError::new("auth.client_id", "required when auth is enabled"));
        }
    }

    if config.streaming.channel_capacity == 0 {
        errors.push(ValidationError::new("streaming.channel_capacity", "must be at least 1"));
    }

    if config.memory.persist && config.memory.dir.trim().is_empty() {
        errors.push(ValidationError::new("memory.dir", "required when persistence is enabled"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&BridgeConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = BridgeConfig::default();
        config.transport.base_url = "not a url".into();
        config.circuit_breaker.failure_threshold = 0;
        config.retries.jitter_ratio = 1.5;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"transport.base_url"));
        assert!(fields.contains(&"circuit_breaker.failure_threshold"));
        assert!(fields.contains(&"retries.jitter_ratio"));
    }

    #[test]
    fn test_auth_requires_client_id_when_enabled() {
        let mut config = BridgeConfig::default();
        config.auth.enabled = true;
        config.auth.token_url = "https://auth.example.com/token".into();

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].to_string(), "auth.client_id: required when auth is enabled");
    }
}
