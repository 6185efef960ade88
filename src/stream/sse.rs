//! Upstream line splitting and downstream SSE frame encoding.
//!
//! Upstream bodies arrive in arbitrary byte chunks; [`LineDecoder`] buffers
//! raw bytes until a full `\n`-terminated line is available so multi-byte
//! UTF-8 sequences split across chunks are reassembled before decoding.
use bytes::BytesMut;
use memchr::memchr_iter;

use crate::error::GatewayError;
use crate::protocol::anthropic::AnthropicStreamEvent;

// ---------------------------------------------------------------------------
// LineDecoder
// ---------------------------------------------------------------------------

/// Longest upstream line accepted; longer lines are dropped whole.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Incremental line splitter for upstream response bodies.
#[derive(Debug)]
pub struct LineDecoder {
    buffer: BytesMut,
    max_line: usize,
    /// Set while skipping the remainder of an oversized line.
    discarding: bool,
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::with_max_line(MAX_LINE_BYTES)
    }
}

impl LineDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            max_line,
            discarding: false,
        }
    }

    /// Feed raw bytes and append every complete line into `out`.
    ///
    /// Line terminators (`\n`, optionally preceded by `\r`) are stripped.
    /// Lines longer than the configured maximum are skipped.
    pub fn feed_into(&mut self, chunk: &[u8], out: &mut Vec<String>) {
        self.buffer.extend_from_slice(chunk);

        let mut processed_up_to = 0usize;
        for line_end in memchr_iter(b'\n', &self.buffer) {
            let mut line = &self.buffer[processed_up_to..line_end];
            processed_up_to = line_end + 1;
            if self.discarding {
                self.discarding = false;
                continue;
            }
            if line.len() > self.max_line {
                tracing::warn!(bytes = line.len(), "dropping oversized upstream line");
                continue;
            }
            if let Some(stripped) = line.strip_suffix(b"\r") {
                line = stripped;
            }
            out.push(String::from_utf8_lossy(line).into_owned());
        }

        if processed_up_to > 0 {
            let _ = self.buffer.split_to(processed_up_to);
        }

        if self.buffer.len() > self.max_line {
            if !self.discarding {
                tracing::warn!(bytes = self.buffer.len(), "dropping oversized upstream line");
            }
            self.buffer.clear();
            self.discarding = true;
        }
    }

    /// Return the unterminated trailing line, if any. Called at end of body.
    pub fn finish(&mut self) -> Option<String> {
        if std::mem::take(&mut self.discarding) {
            self.buffer.clear();
            return None;
        }
        if self.buffer.is_empty() {
            return None;
        }
        let rest = self.buffer.split();
        let line = rest.strip_suffix(b"\r").unwrap_or(&rest[..]);
        Some(String::from_utf8_lossy(line).into_owned())
    }
}

// ---------------------------------------------------------------------------
// Frame encoding
// ---------------------------------------------------------------------------

/// Format an Anthropic-style SSE frame (with named event type).
#[must_use]
pub fn anthropic_sse_frame(event_type: &str, json: &str) -> String {
    let mut out = String::with_capacity(18 + event_type.len() + json.len());
    out.push_str("event: ");
    out.push_str(event_type);
    out.push('\n');
    out.push_str("data: ");
    out.push_str(json);
    out.push_str("\n\n");
    out
}

/// Serialize one stream event into its `event: ..\ndata: ..\n\n` frame.
///
/// # Errors
///
/// Returns [`GatewayError::Internal`] if the event cannot be serialized.
pub fn encode_event(event: &AnthropicStreamEvent) -> Result<String, GatewayError> {
    let json = serde_json::to_string(event)
        .map_err(|e| GatewayError::Internal(format!("failed to encode stream event: {e}")))?;
    Ok(anthropic_sse_frame(event.event_name(), &json))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(chunks: &[&[u8]]) -> Vec<String> {
        let mut decoder = LineDecoder::new();
        let mut lines = Vec::new();
        for chunk in chunks {
            decoder.feed_into(chunk, &mut lines);
        }
        lines.extend(decoder.finish());
        lines
    }

    #[test]
    fn splits_lines_across_chunks() {
        let lines = feed_all(&[b"data: {\"a\"", b":1}\n\ndata: [DO", b"NE]\n"]);
        assert_eq!(lines, ["data: {\"a\":1}", "", "data: [DONE]"]);
    }

    #[test]
    fn strips_carriage_returns() {
        let lines = feed_all(&[b"data: x\r\n: ping\r\n"]);
        assert_eq!(lines, ["data: x", ": ping"]);
    }

    #[test]
    fn reassembles_split_utf8() {
        let text = "data: caf\u{e9}\n".as_bytes();
        let (head, tail) = text.split_at(10);
        let lines = feed_all(&[head, tail]);
        assert_eq!(lines, ["data: caf\u{e9}"]);
    }

    #[test]
    fn trailing_line_without_newline_is_flushed() {
        let lines = feed_all(&[b"data: a\ndata: [DONE]"]);
        assert_eq!(lines, ["data: a", "data: [DONE]"]);
    }

    #[test]
    fn oversized_line_is_dropped_and_next_line_kept() {
        let mut decoder = LineDecoder::with_max_line(8);
        let mut lines = Vec::new();
        decoder.feed_into(b"data: 0123456789\ndata: ok\n", &mut lines);
        assert_eq!(lines, ["data: ok"]);
    }

    #[test]
    fn oversized_line_spanning_chunks_is_dropped() {
        let mut decoder = LineDecoder::with_max_line(8);
        let mut lines = Vec::new();
        for chunk in [&b"data: 01234"[..], b"56789", b"abc\ndata: ok\n"] {
            decoder.feed_into(chunk, &mut lines);
        }
        assert_eq!(lines, ["data: ok"]);

        decoder.feed_into(b"data: unterminated-tail", &mut lines);
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn frame_has_event_and_data_lines() {
        let frame = encode_event(&AnthropicStreamEvent::MessageStop).unwrap();
        assert_eq!(frame, "event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n");
    }

    #[test]
    fn text_delta_frame_escapes_content() {
        let frame = encode_event(&AnthropicStreamEvent::text_delta(0, "a\"b\n".into())).unwrap();
        assert_eq!(
            frame,
            "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"a\\\"b\\n\"}}\n\n"
        );
    }
}
