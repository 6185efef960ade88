use serde_json::{Map, Value};

use crate::error::GatewayError;
use crate::fc::prompt::generate_tool_instructions;
use crate::protocol::anthropic::{AnthropicRequest, MessageContent, RequestContentBlock, SystemPrompt};

/// A request message reduced to plain text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedMessage {
    pub role: String,
    pub text: String,
}

/// An Anthropic request flattened into the text-only shape the upstream takes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedConversation {
    pub model: String,
    /// Tool instructions followed by the caller's system prompt.
    pub system_text: String,
    pub messages: Vec<DecodedMessage>,
}

/// Flatten an Anthropic Messages request.
///
/// Assistant `tool_use` blocks are rendered back into the same
/// `<function_calls>` markup the model produces, and `tool_result` blocks into
/// `<function_results>` markup, so earlier turns read as plain text.
///
/// # Errors
///
/// Returns [`GatewayError::InvalidRequest`] when the request has no messages
/// or a message has a role other than `user` or `assistant`.
pub fn decode_anthropic_request(
    request: &AnthropicRequest,
) -> Result<DecodedConversation, GatewayError> {
    if request.messages.is_empty() {
        return Err(GatewayError::InvalidRequest(
            "messages: at least one message is required".to_string(),
        ));
    }

    let mut messages = Vec::with_capacity(request.messages.len());
    for (i, msg) in request.messages.iter().enumerate() {
        if msg.role != "user" && msg.role != "assistant" {
            return Err(GatewayError::InvalidRequest(format!(
                "messages.{i}.role: unexpected role '{}'",
                msg.role
            )));
        }
        messages.push(DecodedMessage {
            role: msg.role.clone(),
            text: flatten_content(msg.content.as_ref()),
        });
    }

    let system = flatten_system(request.system.as_ref());
    let system_text = if request.tools.is_empty() {
        system
    } else {
        format!("{}\n\n{system}", generate_tool_instructions(&request.tools))
    };

    Ok(DecodedConversation {
        model: request.model.clone(),
        system_text,
        messages,
    })
}

/// Join the system prompt blocks with newlines.
#[must_use]
pub fn flatten_system(system: Option<&SystemPrompt>) -> String {
    match system {
        None => String::new(),
        Some(SystemPrompt::Text(text)) => text.clone(),
        Some(SystemPrompt::Blocks(blocks)) => blocks
            .iter()
            .map(|block| block.text.as_str())
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

/// Reduce message content to text, one line group per block.
///
/// Images and unsupported block types contribute nothing.
#[must_use]
pub fn flatten_content(content: Option<&MessageContent>) -> String {
    let blocks = match content {
        None => return String::new(),
        Some(MessageContent::Text(text)) => return text.clone(),
        Some(MessageContent::Blocks(blocks)) => blocks,
    };

    let mut parts: Vec<String> = Vec::with_capacity(blocks.len());
    for block in blocks {
        match block {
            RequestContentBlock::Text { text } => parts.push(text.clone()),
            RequestContentBlock::ToolUse { name, input, .. } => {
                parts.push(render_tool_use(name, input));
            }
            RequestContentBlock::ToolResult {
                tool_use_id,
                content,
                ..
            } => parts.push(render_tool_result(tool_use_id, content.as_ref())),
            RequestContentBlock::Image { .. } | RequestContentBlock::Unsupported => {}
        }
    }
    parts.join("\n")
}

fn render_tool_use(name: &str, input: &Map<String, Value>) -> String {
    let params: Vec<String> = input
        .iter()
        .map(|(key, value)| {
            let rendered = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            format!("<parameter name=\"{key}\">{rendered}</parameter>")
        })
        .collect();
    format!(
        "<function_calls>\n<invoke name=\"{name}\">\n{}\n</invoke></function_calls>",
        params.join("\n")
    )
}

fn render_tool_result(tool_use_id: &str, content: Option<&MessageContent>) -> String {
    format!(
        "<function_results>\n<result>\n<tool_use_id>{tool_use_id}</tool_use_id>\n<output>{}</output>\n</result>\n</function_results>",
        flatten_content(content)
    )
}
