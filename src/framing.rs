//! Wire framing for the relay's line-delimited event protocol.
//!
//! A frame is `data: <payload>\n\n` where the payload is either a JSON
//! object `{"content": ...}` or the literal terminal sentinel `[DONE]`.
//! The decoder is the inverse, tolerant of frame boundaries splitting
//! across network reads.

use serde::{Deserialize, Serialize};

pub const DATA_PREFIX: &str = "data: ";
pub const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeltaPayload {
    pub content: serde_json::Value,
}

/// One decoded unit of the wire protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameEvent {
    Delta(String),
    Done,
}

pub fn encode_delta(text: &str) -> String {
    // content is always serialized as a plain string; the permissive
    // part-list shapes exist only on the decode side.
    let payload = serde_json::json!({ "content": text });
    format!("{}{}\n\n", DATA_PREFIX, payload)
}

pub fn encode_done() -> String {
    format!("{}{}\n\n", DATA_PREFIX, DONE_SENTINEL)
}

/// Normalizes the `content` field of a frame payload to a single string.
///
/// Accepted shapes, with fixed precedence per sub-part: a nested
/// `{"text": {"value": "..."}}`, a direct `{"text": "..."}`, a bare
/// string sub-part, anything else is skipped. A top-level plain string
/// is taken verbatim.
pub fn normalize_content(content: &serde_json::Value) -> String {
    match content {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(parts) => {
            let mut out = String::new();
            for part in parts {
                if let Some(text) = part.get("text") {
                    if let Some(v) = text.get("value").and_then(|v| v.as_str()) {
                        out.push_str(v);
                    } else if let Some(s) = text.as_str() {
                        out.push_str(s);
                    }
                } else if let Some(s) = part.as_str() {
                    out.push_str(s);
                }
            }
            out
        }
        _ => String::new(),
    }
}

/// Incremental frame decoder. Bytes go in chunk by chunk; complete frames
/// come out. An incomplete trailing line is buffered and prepended to the
/// next chunk, so no frame is ever lost to a read boundary.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    carry: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<FrameEvent> {
        self.carry.extend_from_slice(chunk);

        let mut events = Vec::new();
        let mut start = 0;
        while let Some(pos) = self.carry[start..].iter().position(|&b| b == b'\n') {
            let line_end = start + pos;
            let line = &self.carry[start..line_end];
            if let Some(event) = Self::decode_line(line) {
                events.push(event);
            }
            start = line_end + 1;
        }
        self.carry.drain(..start);
        events
    }

    fn decode_line(raw: &[u8]) -> Option<FrameEvent> {
        let line = String::from_utf8_lossy(raw);
        let line = line.strip_suffix('\r').unwrap_or(&line);

        // Blank lines and anything without the data prefix (comments,
        // keepalives, future fields) are ignored.
        let payload = line.strip_prefix(DATA_PREFIX)?;

        if payload == DONE_SENTINEL {
            return Some(FrameEvent::Done);
        }

        match serde_json::from_str::<DeltaPayload>(payload) {
            Ok(parsed) => {
                let text = normalize_content(&parsed.content);
                if text.is_empty() {
                    // Keepalive frame, not an error.
                    None
                } else {
                    Some(FrameEvent::Delta(text))
                }
            }
            Err(e) => {
                tracing::warn!("Skipping malformed frame payload: {}", e);
                None
            }
        }
    }
}
