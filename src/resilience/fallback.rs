//! Typed fallback results returned when a capability cannot be served.
//!
//! # Responsibilities
//! - Define the payload shapes a capability may return (text, list, empty)
//! - Resolve the fallback for a capability by name
//!
//! # Design Decisions
//! - Lookup order: exact capability, then `default`, then a built-in text
//! - The registry is immutable; reloads build a new one and swap it in

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::schema::UNAVAILABLE_TEXT;

/// Payload carried by a response or a fallback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Payload {
    Text(String),
    List(Vec<String>),
    Empty,
}

impl Payload {
    /// Text view of the payload, used when a fallback is streamed as a chunk.
    pub fn as_text(&self) -> String {
        match self {
            Payload::Text(text) => text.clone(),
            Payload::List(items) => items.join("\n"),
            Payload::Empty => String::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Payload::Text(text) => text.is_empty(),
            Payload::List(items) => items.is_empty(),
            Payload::Empty => true,
        }
    }
}

/// Capability name → fallback payload.
#[derive(Debug, Clone)]
pub struct FallbackRegistry {
    entries: BTreeMap<String, Payload>,
}

impl FallbackRegistry {
    pub fn new(entries: BTreeMap<String, Payload>) -> Self {
        Self { entries }
    }

    /// Resolve the fallback for `capability`.
    pub fn resolve(&self, capability: &str) -> Payload {
        self.entries
            .get(capability)
            .or_else(|| self.entries.get("default"))
            .cloned()
            .unwrap_or_else(|| Payload::Text(UNAVAILABLE_TEXT.to_string()))
    }

    pub fn contains(&self, capability: &str) -> bool {
        self.entries.contains_key(capability)
    }
}

impl Default for FallbackRegistry {
    fn default() -> Self {
        Self::new(crate::config::BridgeConfig::default().fallbacks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_order() {
        let mut entries = BTreeMap::new();
        entries.insert("default".to_string(), Payload::Text("busy".into()));
        entries.insert("list_capabilities".to_string(), Payload::List(vec![]));
        let registry = FallbackRegistry::new(entries);

        assert_eq!(registry.resolve("list_capabilities"), Payload::List(vec![]));
        assert_eq!(registry.resolve("process_query"), Payload::Text("busy".into()));
    }

    #[test]
    fn test_builtin_text_when_nothing_configured() {
        let registry = FallbackRegistry::new(BTreeMap::new());
        assert_eq!(
            registry.resolve("anything"),
            Payload::Text(UNAVAILABLE_TEXT.to_string())
        );
    }

    #[test]
    fn test_payload_serializes_tagged() {
        let json = serde_json::to_value(Payload::List(vec!["a".into()])).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "list", "value": ["a"]}));
        let json = serde_json::to_value(Payload::Empty).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "empty"}));
    }
}
