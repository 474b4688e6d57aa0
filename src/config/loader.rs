//! Configuration loading from disk and environment.

use std::fs;
use std::path::Path;

use crate::config::schema::BridgeConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Overrides `transport.base_url`.
pub const ENV_BASE_URL: &str = "AGENT_BRIDGE_BASE_URL";
/// Supplies `auth.client_secret` without writing it to disk.
pub const ENV_CLIENT_SECRET: &str = "AGENT_BRIDGE_CLIENT_SECRET";
/// Overrides `observability.log_level`.
pub const ENV_LOG: &str = "AGENT_BRIDGE_LOG";

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<BridgeConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    parse_config(&content)
}

/// Load the file when it exists, otherwise start from defaults.
///
/// Environment overrides apply in both cases.
pub fn load_or_default(path: &Path) -> Result<BridgeConfig, ConfigError> {
    if path.exists() {
        load_config(path)
    } else {
        tracing::info!(path = ?path, "Config file not found, using defaults");
        let mut config = BridgeConfig::default();
        apply_env_overrides(&mut config, |key| std::env::var(key).ok());
        validate_config(&config).map_err(ConfigError::Validation)?;
        Ok(config)
    }
}

/// Parse TOML text, apply environment overrides and validate.
pub fn parse_config(content: &str) -> Result<BridgeConfig, ConfigError> {
    let mut config: BridgeConfig = toml::from_str(content).map_err(ConfigError::Parse)?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Apply environment overrides through a lookup function.
pub fn apply_env_overrides<F>(config: &mut BridgeConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(base_url) = lookup(ENV_BASE_URL).filter(|v| !v.is_empty()) {
        config.transport.base_url = base_url;
    }
    if let Some(secret) = lookup(ENV_CLIENT_SECRET).filter(|v| !v.is_empty()) {
        config.auth.client_secret = Some(secret);
    }
    if let Some(level) = lookup(ENV_LOG).filter(|v| !v.is_empty()) {
        config.observability.log_level = level;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_BASE_URL, "http://10.0.0.2:9000"),
            (ENV_CLIENT_SECRET, "s3cret"),
            (ENV_LOG, ""),
        ]
        .into_iter()
        .collect();

        let mut config = BridgeConfig::default();
        apply_env_overrides(&mut config, |k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.transport.base_url, "http://10.0.0.2:9000");
        assert_eq!(config.auth.client_secret.as_deref(), Some("s3cret"));
        assert_eq!(config.observability.log_level, "info");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent-bridge.toml");
        fs::write(&path, "[circuit_breaker]\nfailure_threshold = 2\ncooldown_secs = 5\n").unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.circuit_breaker.failure_threshold, 2);
        assert_eq!(config.circuit_breaker.cooldown_secs, 5);
    }

    #[test]
    fn test_invalid_file_reports_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "[retries]\nmax_attempts = 0\n").unwrap();

        match load_config(&path) {
            Err(ConfigError::Validation(errors)) => {
                assert_eq!(errors[0].field, "retries.max_attempts");
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_or_default(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.retries.max_attempts, 3);
    }
}
