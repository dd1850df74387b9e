//! Server-Sent Events decoding for streamed chat completions.
//!
//! ```text
//! bytes ─► SseDecoder::push ─► event payloads ─► parse_chunk ─► StreamDelta
//! ```
//!
//! Events are delimited by a blank line; multiple `data:` lines inside one
//! event are joined with `\n`. The provider ends the stream with a
//! `data: [DONE]` event.

use serde::Deserialize;

use crate::GatewayError;

/// Incremental line/event splitter. Bytes are buffered until a full line is
/// available so multi-byte characters split across chunks decode intact.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event_data: String,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes; returns every event payload completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if !self.event_data.is_empty() {
                    events.push(std::mem::take(&mut self.event_data));
                }
                continue;
            }

            // Comment lines (": keep-alive") and other fields are ignored.
            if let Some(data) = line.strip_prefix("data:") {
                if !self.event_data.is_empty() {
                    self.event_data.push('\n');
                }
                self.event_data.push_str(data.trim_start());
            }
        }

        events
    }

    /// Flush an event left open when the body ended without a blank line.
    pub fn finish(&mut self) -> Option<String> {
        if !self.buffer.is_empty() {
            let tail = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&tail);
            if let Some(data) = line.trim_end().strip_prefix("data:") {
                if !self.event_data.is_empty() {
                    self.event_data.push('\n');
                }
                self.event_data.push_str(data.trim_start());
            }
        }
        if self.event_data.trim().is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.event_data))
        }
    }
}

/// Meaning of one decoded event payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamDelta {
    /// A non-empty text fragment, in generation order.
    Text(String),
    /// Role announcements, empty deltas, usage frames.
    Skip,
    /// Terminal `[DONE]` sentinel.
    Done,
}

#[derive(Debug, Deserialize)]
struct ChunkEnvelope {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Interpret one SSE event payload from a chat-completions stream.
pub fn parse_chunk(payload: &str) -> Result<StreamDelta, GatewayError> {
    let payload = payload.trim();
    if payload == "[DONE]" {
        return Ok(StreamDelta::Done);
    }

    let envelope: ChunkEnvelope = serde_json::from_str(payload)
        .map_err(|e| GatewayError::InvalidResponse(format!("stream chunk: {e}")))?;

    if let Some(error) = envelope.error {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(GatewayError::Stream(message));
    }

    match envelope
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
    {
        Some(text) if !text.is_empty() => Ok(StreamDelta::Text(text)),
        _ => Ok(StreamDelta::Skip),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_events_on_blank_lines() {
        let mut dec = SseDecoder::new();
        let events = dec.push(b"data: {\"a\":1}\n\ndata: {\"b\":2}\n\n");
        assert_eq!(events, vec!["{\"a\":1}", "{\"b\":2}"]);
    }

    #[test]
    fn buffers_partial_lines_across_pushes() {
        let mut dec = SseDecoder::new();
        assert!(dec.push(b"data: hel").is_empty());
        assert!(dec.push(b"lo\r\n").is_empty());
        assert_eq!(dec.push(b"\r\n"), vec!["hello"]);
    }

    #[test]
    fn multibyte_char_split_across_chunks() {
        let text = "data: 한글\n\n".as_bytes();
        let (a, b) = text.split_at(8);
        let mut dec = SseDecoder::new();
        assert!(dec.push(a).is_empty());
        assert_eq!(dec.push(b), vec!["한글"]);
    }

    #[test]
    fn ignores_comment_lines() {
        let mut dec = SseDecoder::new();
        let events = dec.push(b": keep-alive\n\ndata: x\n\n");
        assert_eq!(events, vec!["x"]);
    }

    #[test]
    fn finish_flushes_unterminated_event() {
        let mut dec = SseDecoder::new();
        dec.push(b"data: [DONE]");
        assert_eq!(dec.finish().as_deref(), Some("[DONE]"));
        assert_eq!(dec.finish(), None);
    }

    #[test]
    fn parse_done_sentinel() {
        assert_eq!(parse_chunk("[DONE]").unwrap(), StreamDelta::Done);
    }

    #[test]
    fn parse_text_delta() {
        let payload = r#"{"choices":[{"delta":{"content":"fn main"}}]}"#;
        assert_eq!(
            parse_chunk(payload).unwrap(),
            StreamDelta::Text("fn main".into())
        );
    }

    #[test]
    fn parse_role_only_delta_is_skipped() {
        let payload = r#"{"choices":[{"delta":{"role":"assistant"}}]}"#;
        assert_eq!(parse_chunk(payload).unwrap(), StreamDelta::Skip);
    }

    #[test]
    fn parse_error_frame() {
        let payload = r#"{"error":{"message":"overloaded"}}"#;
        let err = parse_chunk(payload).unwrap_err();
        assert!(matches!(err, GatewayError::Stream(m) if m == "overloaded"));
    }

    #[test]
    fn parse_garbage_is_invalid_response() {
        assert!(matches!(
            parse_chunk("not json"),
            Err(GatewayError::InvalidResponse(_))
        ));
    }
}
