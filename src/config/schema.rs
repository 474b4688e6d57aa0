//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the bridge.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::resilience::fallback::Payload;

/// Root configuration for the agent bridge.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Agent backend endpoint settings.
    pub transport: TransportConfig,

    /// Circuit breaker thresholds.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Retry configuration.
    pub retries: RetryConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// OAuth2 client settings.
    pub auth: AuthConfig,

    /// Fallback payloads keyed by capability name.
    pub fallbacks: BTreeMap<String, Payload>,

    /// Conversation memory settings.
    pub memory: MemoryConfig,

    /// Streaming settings.
    pub streaming: StreamingConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            retries: RetryConfig::default(),
            timeouts: TimeoutConfig::default(),
            auth: AuthConfig::default(),
            fallbacks: default_fallbacks(),
            memory: MemoryConfig::default(),
            streaming: StreamingConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

/// Message shown when the agent cannot be reached and no fallback is configured.
pub const UNAVAILABLE_TEXT: &str = "The agent is temporarily unavailable. Please try again shortly.";

fn default_fallbacks() -> BTreeMap<String, Payload> {
    let mut fallbacks = BTreeMap::new();
    fallbacks.insert("default".to_string(), Payload::Text(UNAVAILABLE_TEXT.to_string()));
    fallbacks.insert("initialize_connection".to_string(), Payload::Empty);
    fallbacks.insert("list_capabilities".to_string(), Payload::List(Vec::new()));
    fallbacks
}

/// Agent backend endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Base URL of the agent service (e.g., "http://127.0.0.1:8765").
    pub base_url: String,

    /// Path for single-shot queries.
    pub query_path: String,

    /// Path for streamed queries (server-sent events).
    pub stream_path: String,

    /// Path probed by `initialize_connection`.
    pub health_path: String,

    /// User-Agent header sent with every request.
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8765".to_string(),
            query_path: "/v1/query".to_string(),
            stream_path: "/v1/stream".to_string(),
            health_path: "/health".to_string(),
            user_agent: format!("agent-bridge/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,

    /// Seconds the circuit stays open before admitting trial calls.
    pub cooldown_secs: u64,

    /// Concurrent trial calls admitted while half-open.
    pub half_open_max_calls: u32,
}

impl CircuitBreakerConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_secs: 30,
            half_open_max_calls: 1,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per call, including the first one.
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,

    /// Upper bound of the random jitter, as a fraction of the delay.
    /// e.g., 0.25 adds up to 25%.
    pub jitter_ratio: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            jitter_ratio: 0.25,
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Per-attempt deadline for single-shot queries in seconds.
    pub request_secs: u64,

    /// Per-attempt deadline for a whole streamed response in seconds.
    pub stream_secs: u64,

    /// Deadline for a token endpoint round trip in seconds.
    pub token_secs: u64,
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }

    pub fn stream(&self) -> Duration {
        Duration::from_secs(self.stream_secs)
    }

    pub fn token(&self) -> Duration {
        Duration::from_secs(self.token_secs)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            request_secs: 30,
            stream_secs: 120,
            token_secs: 30,
        }
    }
}

/// OAuth2 client configuration.
#[derive(Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Attach bearer tokens to backend requests.
    pub enabled: bool,

    /// Token endpoint URL.
    pub token_url: String,

    /// OAuth2 client identifier.
    pub client_id: String,

    /// Client secret. Prefer the `AGENT_BRIDGE_CLIENT_SECRET` environment variable.
    #[serde(skip_serializing)]
    pub client_secret: Option<String>,

    /// Requested scope.
    pub scope: Option<String>,

    /// Requested audience.
    pub audience: Option<String>,

    /// Refresh this many seconds before the token expires.
    pub refresh_skew_secs: u64,
}

impl AuthConfig {
    pub fn refresh_skew(&self) -> Duration {
        Duration::from_secs(self.refresh_skew_secs)
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("enabled", &self.enabled)
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("scope", &self.scope)
            .field("audience", &self.audience)
            .field("refresh_skew_secs", &self.refresh_skew_secs)
            .finish()
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            token_url: String::new(),
            client_id: String::new(),
            client_secret: None,
            scope: None,
            audience: None,
            refresh_skew_secs: 60,
        }
    }
}

/// Conversation memory configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Persist sessions to disk as JSON Lines.
    pub persist: bool,

    /// Directory holding session logs.
    pub dir: String,

    /// Messages of history sent along with each query.
    pub context_limit: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            persist: true,
            dir: ".agent-bridge/sessions".to_string(),
            context_limit: 20,
        }
    }
}

/// Streaming configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Capacity of the chunk channel handed to callers.
    pub channel_capacity: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self { channel_capacity: 64 }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9464".to_string(),
        }
    }
}
