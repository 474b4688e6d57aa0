//! Tagged result of a bridge query.

use serde::Serialize;

use crate::memory::types::MessageId;
use crate::resilience::fallback::Payload;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
    /// The agent answered.
    Success,
    /// The agent could not answer; `payload` is the configured fallback
    /// or, for an interrupted stream, the partial reply.
    Fallback,
    /// The call was cancelled before it resolved.
    Error,
}

/// What the UI receives for every query, whatever happened underneath.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryResponse {
    pub kind: ResponseKind,
    /// Id of the assistant message this response corresponds to.
    pub message_id: MessageId,
    pub payload: Payload,
    /// Human-readable cause for fallback and error responses.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl QueryResponse {
    pub fn success(message_id: MessageId, text: impl Into<String>) -> Self {
        Self {
            kind: ResponseKind::Success,
            message_id,
            payload: Payload::Text(text.into()),
            detail: None,
        }
    }

    pub fn fallback(message_id: MessageId, payload: Payload, detail: impl Into<String>) -> Self {
        Self {
            kind: ResponseKind::Fallback,
            message_id,
            payload,
            detail: Some(detail.into()),
        }
    }

    pub fn error(message_id: MessageId, detail: impl Into<String>) -> Self {
        Self {
            kind: ResponseKind::Error,
            message_id,
            payload: Payload::Empty,
            detail: Some(detail.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.kind == ResponseKind::Success
    }

    /// Text to render for this response.
    pub fn text(&self) -> String {
        match (&self.kind, &self.detail) {
            (ResponseKind::Error, Some(detail)) => detail.clone(),
            _ => self.payload.as_text(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shape() {
        let id = MessageId::new();
        let json = serde_json::to_value(QueryResponse::success(id, "hi")).unwrap();
        assert_eq!(json["kind"], "success");
        assert_eq!(json["payload"]["kind"], "text");
        assert_eq!(json["payload"]["value"], "hi");
        assert!(json.get("detail").is_none());

        let json = serde_json::to_value(QueryResponse::fallback(id, Payload::List(vec![]), "open")).unwrap();
        assert_eq!(json["kind"], "fallback");
        assert_eq!(json["detail"], "open");
    }

    #[test]
    fn test_error_text_is_detail() {
        let response = QueryResponse::error(MessageId::new(), "call cancelled");
        assert_eq!(response.text(), "call cancelled");
        assert!(!response.is_success());
    }
}
