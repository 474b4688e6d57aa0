//! Incremental parser for the agent's server-sent event stream.
//!
//! Frames are separated by a blank line. Only `data:` lines matter:
//! `{"delta": "..."}` carries text, `{"error": "..."}` reports a backend
//! failure and `[DONE]` ends the stream.

use serde_json::Value;

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    Delta(String),
    Error(String),
    Done,
}

/// Incremental parser for SSE byte streams.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
}

impl SseParser {
    /// Feed arbitrary bytes and drain every complete frame.
    ///
    /// Bytes are buffered until a frame boundary, so a multi-byte character
    /// split across network reads is decoded intact.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();

        while let Some((end, sep_len)) = find_boundary(&self.buffer) {
            let frame: Vec<u8> = self.buffer.drain(..end + sep_len).take(end).collect();
            let frame = String::from_utf8_lossy(&frame);
            if let Some(event) = parse_frame(&frame) {
                events.push(event);
            }
        }

        events
    }

    /// Decode whatever is left once the connection closed.
    pub fn finish(&mut self) -> Option<SseEvent> {
        let rest = std::mem::take(&mut self.buffer);
        let frame = String::from_utf8_lossy(&rest);
        parse_frame(&frame)
    }

    pub fn is_empty_buffer(&self) -> bool {
        self.buffer.iter().all(|b| b.is_ascii_whitespace())
    }
}

fn find_boundary(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = buffer.windows(2).position(|w| w == b"\n\n").map(|i| (i, 2));
    let crlf = buffer.windows(4).position(|w| w == b"\r\n\r\n").map(|i| (i, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

fn parse_frame(frame: &str) -> Option<SseEvent> {
    let data_lines: Vec<&str> = frame
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|value| value.strip_prefix(' ').unwrap_or(value))
        .collect();

    if data_lines.is_empty() {
        return None;
    }
    let payload = data_lines.join("\n");
    let payload = payload.trim();
    if payload.is_empty() {
        return None;
    }
    if payload == "[DONE]" {
        return Some(SseEvent::Done);
    }

    match serde_json::from_str::<Value>(payload) {
        Ok(value) => map_event(&value),
        // Plain-text data lines are treated as raw deltas.
        Err(_) => Some(SseEvent::Delta(payload.to_string())),
    }
}

fn map_event(value: &Value) -> Option<SseEvent> {
    if let Some(message) = value.get("error") {
        let message = message
            .as_str()
            .map(ToString::to_string)
            .or_else(|| message.get("message").and_then(|m| m.as_str()).map(ToString::to_string))
            .unwrap_or_else(|| message.to_string());
        return Some(SseEvent::Error(message));
    }
    if value.get("done").and_then(|d| d.as_bool()) == Some(true) {
        return Some(SseEvent::Done);
    }
    ["delta", "content", "text"]
        .iter()
        .find_map(|key| value.get(*key).and_then(|v| v.as_str()))
        .map(|delta| SseEvent::Delta(delta.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_split_across_reads() {
        let mut parser = SseParser::default();
        assert!(parser.feed(b"data: {\"delta\":\"Hel").is_empty());
        let events = parser.feed(b"lo \"}\n\ndata: {\"delta\":\"world\"}\n\n");
        assert_eq!(
            events,
            vec![SseEvent::Delta("Hello ".into()), SseEvent::Delta("world".into())]
        );
        assert!(parser.is_empty_buffer());
    }

    #[test]
    fn test_done_and_error_frames() {
        let mut parser = SseParser::default();
        let events = parser.feed(b"data: {\"error\":\"overloaded\"}\r\n\r\ndata: [DONE]\n\n");
        assert_eq!(events, vec![SseEvent::Error("overloaded".into()), SseEvent::Done]);
    }

    #[test]
    fn test_multibyte_character_split() {
        let mut parser = SseParser::default();
        let frame = "data: {\"delta\":\"caf\u{e9}\"}\n\n".as_bytes();
        let (head, tail) = frame.split_at(frame.len() - 5);
        assert!(parser.feed(head).is_empty());
        assert_eq!(parser.feed(tail), vec![SseEvent::Delta("caf\u{e9}".into())]);
    }

    #[test]
    fn test_comments_and_unknown_frames_are_skipped() {
        let mut parser = SseParser::default();
        let events = parser.feed(b": keep-alive\n\nevent: ping\ndata: {\"other\":1}\n\n");
        assert!(events.is_empty());
    }

    #[test]
    fn test_finish_flushes_unterminated_frame() {
        let mut parser = SseParser::default();
        assert!(parser.feed(b"data: {\"delta\":\"tail\"}").is_empty());
        assert_eq!(parser.finish(), Some(SseEvent::Delta("tail".into())));
    }
}
