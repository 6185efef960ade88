use crate::protocol::anthropic::{
    AnthropicDelta, AnthropicResponse, AnthropicStreamEvent, AnthropicUsage, ContentBlockStart,
};

/// Folds a stream event sequence into a single non-streaming response.
///
/// Block order follows the block indices. Tool inputs are taken from the
/// `content_block_start` payload; `input_json_delta` fragments repeat it and
/// are not re-parsed. Text blocks that end up empty are dropped.
#[derive(Debug, Default)]
pub struct ResponseAccumulator {
    id: String,
    model: String,
    blocks: Vec<(usize, ContentBlockStart)>,
    stop_reason: Option<String>,
    usage: Option<AnthropicUsage>,
}

impl ResponseAccumulator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: AnthropicStreamEvent) {
        match event {
            AnthropicStreamEvent::MessageStart { message } => {
                self.id = message.id;
                self.model = message.model;
                self.usage = Some(message.usage);
            }
            AnthropicStreamEvent::ContentBlockStart {
                index,
                content_block,
            } => self.blocks.push((index, content_block)),
            AnthropicStreamEvent::ContentBlockDelta {
                index,
                delta: AnthropicDelta::TextDelta { text },
            } => {
                if let Some((_, ContentBlockStart::Text { text: acc })) =
                    self.blocks.iter_mut().rev().find(|(i, _)| *i == index)
                {
                    acc.push_str(&text);
                }
            }
            AnthropicStreamEvent::MessageDelta { delta, usage } => {
                if self.stop_reason.is_none() {
                    self.stop_reason = Some(delta.stop_reason);
                }
                let input_tokens = self.usage.map_or(0, |u| u.input_tokens);
                self.usage = Some(AnthropicUsage {
                    input_tokens,
                    output_tokens: usage.output_tokens,
                });
            }
            AnthropicStreamEvent::ContentBlockDelta {
                delta: AnthropicDelta::InputJsonDelta { .. },
                ..
            }
            | AnthropicStreamEvent::ContentBlockStop { .. }
            | AnthropicStreamEvent::MessageStop => {}
        }
    }

    #[must_use]
    pub fn finish(mut self) -> AnthropicResponse {
        self.blocks.sort_by_key(|(index, _)| *index);
        let content = self
            .blocks
            .into_iter()
            .map(|(_, block)| block)
            .filter(|block| !matches!(block, ContentBlockStart::Text { text } if text.is_empty()))
            .collect();

        AnthropicResponse {
            id: self.id,
            type_: "message",
            role: "assistant",
            model: self.model,
            content,
            stop_reason: self.stop_reason,
            stop_sequence: None,
            usage: self.usage.unwrap_or(AnthropicUsage {
                input_tokens: 0,
                output_tokens: 0,
            }),
        }
    }
}
