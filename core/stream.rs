//! Server-sent event decoding for the Messages streaming API.
//!
//! [`SseDecoder`] turns raw body chunks into `data:` payloads and
//! [`decode_event`] maps each payload onto a [`StreamEvent`]. Chunk
//! boundaries may fall anywhere, including inside a UTF-8 sequence.

use crate::cost::UsageRecord;
use crate::error::{AppError, Result};
use log;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Thinking,
    Text,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A new content block opened.
    BlockStart(BlockKind),
    ThinkingDelta(String),
    TextDelta(String),
    /// Usage counters; input counters arrive first, the cumulative output
    /// counter last.
    Usage(UsageRecord),
    Stop,
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a body chunk and returns every event payload it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut payloads = Vec::new();
        while let Some(newline_pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline_pos).collect();
            let line = String::from_utf8_lossy(&line);
            self.handle_line(line.trim_end_matches(['\n', '\r']), &mut payloads);
        }
        payloads
    }

    /// Flushes whatever is left once the body ends.
    pub fn finish(&mut self) -> Vec<String> {
        let mut payloads = Vec::new();
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest);
            self.handle_line(line.trim_end_matches(['\n', '\r']), &mut payloads);
        }
        self.dispatch(&mut payloads);
        payloads
    }

    fn handle_line(&mut self, line: &str, payloads: &mut Vec<String>) {
        if line.is_empty() {
            self.dispatch(payloads);
        } else if let Some(data) = line.strip_prefix("data:") {
            self.data.push(data.strip_prefix(' ').unwrap_or(data).to_string());
        } else if line.starts_with(':') {
            log::trace!("SSE comment: {}", line);
        }
        // `event:`, `id:` and `retry:` lines carry nothing the payload lacks.
    }

    fn dispatch(&mut self, payloads: &mut Vec<String>) {
        if !self.data.is_empty() {
            payloads.push(self.data.join("\n"));
            self.data.clear();
        }
    }
}

#[derive(Deserialize, Debug)]
struct RawEvent {
    #[serde(rename = "type")]
    event_type: String,
    message: Option<RawMessage>,
    content_block: Option<RawBlock>,
    delta: Option<RawDelta>,
    usage: Option<UsageRecord>,
    error: Option<RawError>,
}

#[derive(Deserialize, Debug)]
struct RawMessage {
    usage: Option<UsageRecord>,
}

#[derive(Deserialize, Debug)]
struct RawBlock {
    #[serde(rename = "type")]
    block_type: String,
}

#[derive(Deserialize, Debug)]
struct RawDelta {
    #[serde(rename = "type")]
    delta_type: Option<String>,
    text: Option<String>,
    thinking: Option<String>,
}

#[derive(Deserialize, Debug)]
struct RawError {
    #[serde(rename = "type")]
    error_type: Option<String>,
    message: Option<String>,
}

/// Maps one `data:` payload to an event; payloads without local meaning
/// (pings, block stops, signature deltas) yield `None`.
pub fn decode_event(data: &str) -> Result<Option<StreamEvent>> {
    if data == "[DONE]" {
        return Ok(Some(StreamEvent::Stop));
    }
    let raw: RawEvent = serde_json::from_str(data)
        .map_err(|e| AppError::Stream(format!("undecodable event {:?}: {}", data, e)))?;

    let event = match raw.event_type.as_str() {
        "message_start" => raw
            .message
            .and_then(|m| m.usage)
            .map(StreamEvent::Usage),
        "content_block_start" => {
            let kind = match raw.content_block.as_ref().map(|b| b.block_type.as_str()) {
                Some("thinking") | Some("redacted_thinking") => BlockKind::Thinking,
                Some("text") => BlockKind::Text,
                _ => BlockKind::Other,
            };
            Some(StreamEvent::BlockStart(kind))
        }
        "content_block_delta" => match raw.delta {
            Some(delta) => match delta.delta_type.as_deref() {
                Some("text_delta") => delta.text.map(StreamEvent::TextDelta),
                Some("thinking_delta") => delta.thinking.map(StreamEvent::ThinkingDelta),
                other => {
                    log::trace!("Ignoring delta type {:?}", other);
                    None
                }
            },
            None => None,
        },
        "message_delta" => raw.usage.map(StreamEvent::Usage),
        "message_stop" => Some(StreamEvent::Stop),
        "error" => {
            let (kind, message) = raw
                .error
                .map(|e| (e.error_type, e.message))
                .unwrap_or((None, None));
            return Err(AppError::Stream(format!(
                "{}: {}",
                kind.unwrap_or_else(|| "error".to_string()),
                message.unwrap_or_else(|| "no message".to_string())
            )));
        }
        "ping" | "content_block_stop" => None,
        other => {
            log::debug!("Ignoring unknown stream event type: {}", other);
            None
        }
    };
    Ok(event)
}
