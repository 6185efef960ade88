//! Upstream event stream -> Anthropic Messages stream events.
//!
//! One [`StreamTransformer`] serves one request. It consumes upstream events in
//! order and appends the resulting Anthropic events to a caller-provided
//! buffer; nothing it emits is ever retracted.

use std::sync::Arc;
use std::time::Instant;

use memchr::memmem;
use serde_json::Value;

use crate::fc::detector::{find_first_open_tag, has_incomplete_block};
use crate::fc::parser::{parse_next_invocation, parse_wrapped_block, ToolCall, WrappedBlock};
use crate::ids::IdGenerator;
use crate::observability::{log_request_complete, RequestUsage, TokenCounter};
use crate::protocol::anthropic::{
    AnthropicDelta, AnthropicMessageStart, AnthropicStreamEvent, ContentBlockStart,
};
use crate::protocol::upstream::{UpstreamEvent, UpstreamLine};

use super::buffer::BoundaryTextBuffer;

const STOP_END_TURN: &str = "end_turn";
const STOP_TOOL_USE: &str = "tool_use";
const UPSTREAM_TOOL_CALLS_REASON: &str = "tool-calls";
const INVOKE_OPEN: &[u8] = b"<invoke";

/// Per-request settings handed to the transformer.
#[derive(Debug, Clone)]
pub struct TransformerConfig {
    /// Model name echoed in `message_start`.
    pub model: String,
    /// Prompt token count reported in `message_start`.
    pub input_tokens: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextBlock {
    NeverOpened,
    Open(usize),
    Closed,
}

/// Mutable state of one transformation.
#[derive(Debug)]
struct StreamSession {
    message_id: String,
    /// Every text delta received, including text after consumed invocations.
    full_text: String,
    /// Start of the text not yet consumed by an emitted invocation.
    scan_cursor: usize,
    /// End of the text already shown to the client or consumed as markup.
    emitted: usize,
    /// Index the next content block will take. Indices are never reused.
    next_index: usize,
    text_block: TextBlock,
    has_started: bool,
    message_delta_sent: bool,
    tool_calls_emitted: bool,
    done: bool,
    buffer: BoundaryTextBuffer,
    native_tool_calls: Vec<ToolCall>,
}

pub struct StreamTransformer {
    config: TransformerConfig,
    ids: Arc<dyn IdGenerator>,
    tokens: Arc<dyn TokenCounter>,
    session: StreamSession,
    started_at: Instant,
}

impl StreamTransformer {
    #[must_use]
    pub fn new(
        config: TransformerConfig,
        ids: Arc<dyn IdGenerator>,
        tokens: Arc<dyn TokenCounter>,
    ) -> Self {
        let session = StreamSession {
            message_id: ids.message_id(),
            full_text: String::new(),
            scan_cursor: 0,
            emitted: 0,
            next_index: 0,
            text_block: TextBlock::NeverOpened,
            has_started: false,
            message_delta_sent: false,
            tool_calls_emitted: false,
            done: false,
            buffer: BoundaryTextBuffer::new(),
            native_tool_calls: Vec::new(),
        };
        Self {
            config,
            ids,
            tokens,
            session,
            started_at: Instant::now(),
        }
    }

    /// True once the terminator has been handled; later input is ignored.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.session.done
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.config.model
    }

    #[must_use]
    pub fn message_id(&self) -> &str {
        &self.session.message_id
    }

    /// Output tokens for all text received so far.
    #[must_use]
    pub fn output_tokens(&self) -> u64 {
        self.tokens.count_tokens(&self.session.full_text)
    }

    /// Handle one raw upstream line.
    pub fn process_line(&mut self, line: &str, out: &mut Vec<AnthropicStreamEvent>) {
        if self.session.done {
            return;
        }
        match UpstreamLine::parse(line) {
            UpstreamLine::Event(event) => self.process_event(event, out),
            UpstreamLine::Terminator => self.finish_stream(out),
            UpstreamLine::Skip => {}
        }
    }

    /// Handle one decoded upstream event.
    pub fn process_event(&mut self, event: UpstreamEvent, out: &mut Vec<AnthropicStreamEvent>) {
        if self.session.done {
            return;
        }
        match event {
            UpstreamEvent::Start => self.ensure_started(out),
            UpstreamEvent::StartStep | UpstreamEvent::Unknown => {}
            UpstreamEvent::TextStart => {
                if !self.session.tool_calls_emitted && !self.session.message_delta_sent {
                    self.ensure_text_block_open(out);
                }
            }
            UpstreamEvent::TextDelta { delta } => {
                self.on_text_delta(delta.as_deref().unwrap_or(""), out);
            }
            UpstreamEvent::TextEnd => self.on_text_end(out),
            UpstreamEvent::FinishStep => self.on_finish_step(out),
            UpstreamEvent::Finish { finish_reason } => {
                self.on_finish(finish_reason.as_deref().unwrap_or(""), out);
            }
            UpstreamEvent::ToolInputError { tool_name, input } => {
                self.on_tool_input_error(tool_name, input);
            }
        }
    }

    /// Close the message. Called on `[DONE]` and on upstream EOF.
    pub fn finish_stream(&mut self, out: &mut Vec<AnthropicStreamEvent>) {
        if self.session.done {
            return;
        }
        self.ensure_started(out);

        if self.session.tool_calls_emitted {
            self.close_text_block(out);
            self.send_message_delta(STOP_TOOL_USE, out);
        } else if !self.session.native_tool_calls.is_empty() {
            let queued = std::mem::take(&mut self.session.native_tool_calls);
            tracing::debug!(count = queued.len(), "emitting upstream-reported tool calls");
            for call in queued {
                self.emit_tool_call(call, out);
            }
            self.send_message_delta(STOP_TOOL_USE, out);
        } else {
            self.flush_unshown(out);
            self.close_text_block(out);
            self.send_message_delta(STOP_END_TURN, out);
        }

        out.push(AnthropicStreamEvent::MessageStop);
        self.session.done = true;

        let usage = RequestUsage {
            input_tokens: self.config.input_tokens,
            output_tokens: self.output_tokens(),
        };
        log_request_complete(&self.config.model, usage, self.started_at);
    }

    // -----------------------------------------------------------------------
    // Event handlers
    // -----------------------------------------------------------------------

    fn on_text_delta(&mut self, delta: &str, out: &mut Vec<AnthropicStreamEvent>) {
        self.session.full_text.push_str(delta);
        // No block may follow the message delta.
        if self.session.tool_calls_emitted || self.session.message_delta_sent {
            return;
        }

        self.ensure_text_block_open(out);
        self.session.buffer.append(delta);

        while let Some(next) = parse_next_invocation(self.unscanned()) {
            let start = self.session.scan_cursor + next.start;
            let end = self.session.scan_cursor + next.end;
            self.flush_text_before(start, out);
            self.session.buffer.mark_tool_call_detected();
            self.session.buffer.clear();
            self.emit_tool_call(next.call, out);
            self.session.scan_cursor = end;
            self.session.emitted = end;
        }

        if has_incomplete_block(self.unscanned()) {
            if self.session.tool_calls_emitted {
                self.session.buffer.clear();
            } else if let Some(block) = find_first_open_tag(self.unscanned()) {
                let open_at = self.session.scan_cursor + block.start;
                self.flush_text_before(open_at, out);
            }
            self.session.buffer.mark_tool_call_detected();
            self.session.buffer.clear();
        } else if let Some(text) = self.session.buffer.flush_safe() {
            self.session.emitted += text.len();
            self.emit_text(text, out);
        }
    }

    fn on_text_end(&mut self, out: &mut Vec<AnthropicStreamEvent>) {
        if parse_wrapped_block(self.unscanned()).calls.is_empty() {
            self.flush_unshown(out);
        }
    }

    fn on_finish_step(&mut self, out: &mut Vec<AnthropicStreamEvent>) {
        let WrappedBlock {
            calls, block_start, ..
        } = parse_wrapped_block(self.unscanned());

        if !calls.is_empty() && !self.session.tool_calls_emitted {
            let block_at = self.session.scan_cursor + block_start.unwrap_or(0);
            self.flush_prose_before_block(block_at, out);
            self.session.buffer.clear();
            self.session.buffer.mark_tool_call_detected();
            self.session.emitted = self.session.full_text.len();
            for call in calls {
                self.emit_tool_call(call, out);
            }
        } else {
            self.flush_unshown(out);
        }
    }

    fn on_finish(&mut self, reason: &str, out: &mut Vec<AnthropicStreamEvent>) {
        if self.session.message_delta_sent
            || self.session.tool_calls_emitted
            || !self.session.native_tool_calls.is_empty()
            || reason == UPSTREAM_TOOL_CALLS_REASON
            || !parse_wrapped_block(self.unscanned()).calls.is_empty()
        {
            return;
        }

        let stop_reason = if reason.is_empty() || reason == "stop" {
            STOP_END_TURN
        } else {
            reason
        };
        // Settle visible text so the message delta is the last block-level event.
        self.flush_unshown(out);
        self.close_text_block(out);
        self.send_message_delta(stop_reason, out);
    }

    fn on_tool_input_error(&mut self, tool_name: Option<String>, input: Option<Value>) {
        let (Some(name), Some(Value::Object(input))) = (tool_name, input) else {
            return;
        };
        if name.is_empty() || input.is_empty() {
            return;
        }
        tracing::debug!(tool = %name, "queued upstream-reported tool call");
        self.session.native_tool_calls.push(ToolCall { name, input });
        self.session.buffer.mark_tool_call_detected();
    }

    // -----------------------------------------------------------------------
    // Emission helpers
    // -----------------------------------------------------------------------

    fn unscanned(&self) -> &str {
        &self.session.full_text[self.session.scan_cursor..]
    }

    /// Emit the unshown text before an invocation, stopping at any wrapper tag.
    fn flush_text_before(&mut self, invocation_at: usize, out: &mut Vec<AnthropicStreamEvent>) {
        let from = self.session.emitted;
        if from >= invocation_at {
            return;
        }
        let region = &self.session.full_text[from..invocation_at];
        let cut = find_first_open_tag(region).map_or(region.len(), |block| block.start);
        let text = region[..cut].to_string();
        self.session.emitted = from + cut;
        self.emit_text(text, out);
    }

    /// Emit the unshown prose before a wrapper block, trimmed.
    fn flush_prose_before_block(&mut self, block_at: usize, out: &mut Vec<AnthropicStreamEvent>) {
        let from = self.session.emitted;
        if from >= block_at {
            return;
        }
        let region = &self.session.full_text[from..block_at];
        let text = if from == 0 {
            region.trim()
        } else {
            region.trim_end()
        }
        .to_string();
        self.session.emitted = block_at;
        self.emit_text(text, out);
    }

    /// Show all text that was held back without becoming a tool call.
    ///
    /// A wrapper that is still open and already carries an `<invoke` stays
    /// hidden; any other held-back text, tags included, is prose.
    fn flush_unshown(&mut self, out: &mut Vec<AnthropicStreamEvent>) {
        if self.session.tool_calls_emitted || self.session.message_delta_sent {
            return;
        }
        let rest = &self.session.full_text[self.session.emitted..];
        let keep = match find_first_open_tag(rest) {
            Some(block)
                if has_incomplete_block(rest)
                    && memmem::find(rest[block.start..].as_bytes(), INVOKE_OPEN).is_some() =>
            {
                block.start
            }
            _ => rest.len(),
        };
        let text = rest[..keep].to_string();
        self.session.emitted = self.session.full_text.len();
        self.session.buffer.clear();
        self.emit_text(text, out);
    }

    fn ensure_started(&mut self, out: &mut Vec<AnthropicStreamEvent>) {
        if self.session.has_started {
            return;
        }
        self.session.has_started = true;
        out.push(AnthropicStreamEvent::MessageStart {
            message: AnthropicMessageStart::new(
                self.session.message_id.clone(),
                self.config.model.clone(),
                self.config.input_tokens,
            ),
        });
    }

    fn ensure_text_block_open(&mut self, out: &mut Vec<AnthropicStreamEvent>) {
        self.ensure_started(out);
        if matches!(self.session.text_block, TextBlock::Open(_)) {
            return;
        }
        let index = self.take_index();
        self.session.text_block = TextBlock::Open(index);
        out.push(AnthropicStreamEvent::ContentBlockStart {
            index,
            content_block: ContentBlockStart::Text {
                text: String::new(),
            },
        });
    }

    fn close_text_block(&mut self, out: &mut Vec<AnthropicStreamEvent>) {
        if let TextBlock::Open(index) = self.session.text_block {
            out.push(AnthropicStreamEvent::ContentBlockStop { index });
            self.session.text_block = TextBlock::Closed;
        }
    }

    fn emit_text(&mut self, text: String, out: &mut Vec<AnthropicStreamEvent>) {
        if text.is_empty() {
            return;
        }
        self.ensure_text_block_open(out);
        if let TextBlock::Open(index) = self.session.text_block {
            out.push(AnthropicStreamEvent::text_delta(index, text));
        }
    }

    /// Emit a `tool_use` block: start, one `input_json_delta`, stop.
    fn emit_tool_call(&mut self, call: ToolCall, out: &mut Vec<AnthropicStreamEvent>) {
        self.ensure_started(out);
        self.close_text_block(out);

        let index = self.take_index();
        let partial_json = Value::Object(call.input.clone()).to_string();
        tracing::debug!(tool = %call.name, index, "emitting tool_use block");

        out.push(AnthropicStreamEvent::ContentBlockStart {
            index,
            content_block: ContentBlockStart::ToolUse {
                id: self.ids.tool_use_id(),
                name: call.name,
                input: call.input,
            },
        });
        out.push(AnthropicStreamEvent::ContentBlockDelta {
            index,
            delta: AnthropicDelta::InputJsonDelta { partial_json },
        });
        out.push(AnthropicStreamEvent::ContentBlockStop { index });
        self.session.tool_calls_emitted = true;
    }

    fn send_message_delta(&mut self, stop_reason: &str, out: &mut Vec<AnthropicStreamEvent>) {
        if self.session.message_delta_sent {
            return;
        }
        self.ensure_started(out);
        self.session.message_delta_sent = true;
        out.push(AnthropicStreamEvent::message_delta(
            stop_reason,
            self.output_tokens(),
        ));
    }

    fn take_index(&mut self) -> usize {
        let index = self.session.next_index;
        self.session.next_index += 1;
        index
    }
}
