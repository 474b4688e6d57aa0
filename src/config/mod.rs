//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! agent-bridge.toml
//!     → loader.rs (parse, deserialize, environment overrides)
//!     → validation.rs (semantic checks)
//!     → BridgeConfig (validated)
//!     → lifecycle::startup builds the AgentBridge from it
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → AgentBridge::apply_config swaps retry, fallback, timeout and breaker settings
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Secrets come from the environment, never from logs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, load_or_default, ConfigError};
pub use schema::{
    AuthConfig, BridgeConfig, CircuitBreakerConfig, MemoryConfig, ObservabilityConfig,
    RetryConfig, StreamingConfig, TimeoutConfig, TransportConfig,
};
pub use validation::ValidationError;
