pub mod decoder;
pub mod response_encoder;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// Anthropic Messages API request wire type.
#[derive(Debug, Clone, Deserialize)]
pub struct AnthropicRequest {
    pub model: String,
    #[serde(default)]
    pub max_tokens: Option<u64>,
    #[serde(default)]
    pub system: Option<SystemPrompt>,
    pub messages: Vec<AnthropicMessage>,
    #[serde(default)]
    pub tools: Vec<AnthropicTool>,
    #[serde(default)]
    pub tool_choice: Option<Value>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

/// Anthropic message wire type.
#[derive(Debug, Clone, Deserialize)]
pub struct AnthropicMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<MessageContent>,
}

/// Message content is either a bare string or a list of typed blocks.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<RequestContentBlock>),
}

/// A content block inside a request message.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum RequestContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image")]
    Image {
        #[serde(default)]
        source: Value,
    },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Map<String, Value>,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: Option<MessageContent>,
        #[serde(default)]
        is_error: bool,
    },
    #[serde(other)]
    Unsupported,
}

/// The `system` field: a string or a list of text blocks.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SystemPrompt {
    Text(String),
    Blocks(Vec<SystemBlock>),
}

#[derive(Debug, Clone, Deserialize)]
pub struct SystemBlock {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub cache_control: Option<Value>,
}

/// Anthropic tool definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicTool {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: Value,
}

// ---------------------------------------------------------------------------
// Response
// ---------------------------------------------------------------------------

/// Anthropic Messages API response wire type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnthropicResponse {
    pub id: String,
    #[serde(rename = "type")]
    pub type_: &'static str,
    pub role: &'static str,
    pub model: String,
    pub content: Vec<ContentBlockStart>,
    pub stop_reason: Option<String>,
    pub stop_sequence: Option<String>,
    pub usage: AnthropicUsage,
}

/// A content block as announced by `content_block_start`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ContentBlockStart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: Map<String, Value>,
    },
}

/// Anthropic usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AnthropicUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

// ---------------------------------------------------------------------------
// Stream events
// ---------------------------------------------------------------------------

/// Anthropic SSE stream event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum AnthropicStreamEvent {
    #[serde(rename = "message_start")]
    MessageStart { message: AnthropicMessageStart },
    #[serde(rename = "content_block_start")]
    ContentBlockStart {
        index: usize,
        content_block: ContentBlockStart,
    },
    #[serde(rename = "content_block_delta")]
    ContentBlockDelta { index: usize, delta: AnthropicDelta },
    #[serde(rename = "content_block_stop")]
    ContentBlockStop { index: usize },
    #[serde(rename = "message_delta")]
    MessageDelta {
        delta: AnthropicMessageDeltaBody,
        usage: OutputUsage,
    },
    #[serde(rename = "message_stop")]
    MessageStop,
}

impl AnthropicStreamEvent {
    /// SSE `event:` name for this event.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::MessageStart { .. } => "message_start",
            Self::ContentBlockStart { .. } => "content_block_start",
            Self::ContentBlockDelta { .. } => "content_block_delta",
            Self::ContentBlockStop { .. } => "content_block_stop",
            Self::MessageDelta { .. } => "message_delta",
            Self::MessageStop => "message_stop",
        }
    }

    #[must_use]
    pub fn text_delta(index: usize, text: String) -> Self {
        Self::ContentBlockDelta {
            index,
            delta: AnthropicDelta::TextDelta { text },
        }
    }

    #[must_use]
    pub fn message_delta(stop_reason: impl Into<String>, output_tokens: u64) -> Self {
        Self::MessageDelta {
            delta: AnthropicMessageDeltaBody {
                stop_reason: stop_reason.into(),
                stop_sequence: None,
            },
            usage: OutputUsage { output_tokens },
        }
    }
}

/// Message start payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnthropicMessageStart {
    pub id: String,
    #[serde(rename = "type")]
    pub type_: &'static str,
    pub role: &'static str,
    pub content: Vec<Value>,
    pub model: String,
    pub stop_reason: Option<String>,
    pub stop_sequence: Option<String>,
    pub usage: AnthropicUsage,
}

impl AnthropicMessageStart {
    #[must_use]
    pub fn new(id: String, model: String, input_tokens: u64) -> Self {
        Self {
            id,
            type_: "message",
            role: "assistant",
            content: Vec::new(),
            model,
            stop_reason: None,
            stop_sequence: None,
            usage: AnthropicUsage {
                input_tokens,
                output_tokens: 0,
            },
        }
    }
}

/// Delta variants for content block deltas.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum AnthropicDelta {
    #[serde(rename = "text_delta")]
    TextDelta { text: String },
    #[serde(rename = "input_json_delta")]
    InputJsonDelta { partial_json: String },
}

/// Message delta body. `stop_sequence` is always present, usually `null`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnthropicMessageDeltaBody {
    pub stop_reason: String,
    pub stop_sequence: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OutputUsage {
    pub output_tokens: u64,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn request_content_accepts_string_and_blocks() {
        let req: AnthropicRequest = serde_json::from_value(json!({
            "model": "claude-test",
            "messages": [
                {"role": "user", "content": "hi"},
                {"role": "assistant", "content": [
                    {"type": "text", "text": "calling"},
                    {"type": "tool_use", "id": "toolu_1", "name": "Read", "input": {"path": "/a"}}
                ]},
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "toolu_1", "content": "ok"},
                    {"type": "document", "source": {}}
                ]}
            ]
        }))
        .unwrap();
        assert!(matches!(req.messages[0].content, Some(MessageContent::Text(_))));
        let Some(MessageContent::Blocks(blocks)) = &req.messages[2].content else {
            panic!("expected blocks");
        };
        assert!(matches!(blocks[1], RequestContentBlock::Unsupported));
        assert!(!req.stream);
    }

    #[test]
    fn system_accepts_block_list() {
        let req: AnthropicRequest = serde_json::from_value(json!({
            "model": "m",
            "system": [{"type": "text", "text": "a"}, {"type": "text", "text": "b", "cache_control": {"type": "ephemeral"}}],
            "messages": []
        }))
        .unwrap();
        let Some(SystemPrompt::Blocks(blocks)) = req.system else {
            panic!("expected blocks");
        };
        assert_eq!(blocks.len(), 2);
    }

    #[test]
    fn message_start_serializes_null_fields() {
        let event = AnthropicStreamEvent::MessageStart {
            message: AnthropicMessageStart::new("msg_1".into(), "m".into(), 12),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "message_start",
                "message": {
                    "id": "msg_1",
                    "type": "message",
                    "role": "assistant",
                    "content": [],
                    "model": "m",
                    "stop_reason": null,
                    "stop_sequence": null,
                    "usage": {"input_tokens": 12, "output_tokens": 0}
                }
            })
        );
        assert_eq!(event.event_name(), "message_start");
    }

    #[test]
    fn message_delta_keeps_stop_sequence_null() {
        let value = serde_json::to_value(AnthropicStreamEvent::message_delta("tool_use", 7)).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "message_delta",
                "delta": {"stop_reason": "tool_use", "stop_sequence": null},
                "usage": {"output_tokens": 7}
            })
        );
    }

    #[test]
    fn tool_use_block_start_carries_input() {
        let mut input = Map::new();
        input.insert("command".into(), json!("ls"));
        let event = AnthropicStreamEvent::ContentBlockStart {
            index: 1,
            content_block: ContentBlockStart::ToolUse {
                id: "toolu_x".into(),
                name: "Bash".into(),
                input,
            },
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "type": "content_block_start",
                "index": 1,
                "content_block": {"type": "tool_use", "id": "toolu_x", "name": "Bash", "input": {"command": "ls"}}
            })
        );
    }

    #[test]
    fn message_stop_is_type_only() {
        assert_eq!(
            serde_json::to_value(AnthropicStreamEvent::MessageStop).unwrap(),
            json!({"type": "message_stop"})
        );
    }
}
