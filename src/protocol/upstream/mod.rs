//! Upstream wire format: one `data: {json}` line per event, `data: [DONE]`
//! at the end.

pub mod encoder;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Stream events
// ---------------------------------------------------------------------------

/// One decoded upstream stream event.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum UpstreamEvent {
    #[serde(rename = "start")]
    Start,
    #[serde(rename = "start-step")]
    StartStep,
    #[serde(rename = "text-start")]
    TextStart,
    #[serde(rename = "text-delta")]
    TextDelta {
        #[serde(default)]
        delta: Option<String>,
    },
    #[serde(rename = "text-end")]
    TextEnd,
    #[serde(rename = "finish-step")]
    FinishStep,
    #[serde(rename = "finish")]
    Finish {
        #[serde(rename = "finishReason", default)]
        finish_reason: Option<String>,
    },
    /// The upstream tried to call one of its own tools and failed; the call
    /// is replayed to the client as a regular tool call.
    #[serde(rename = "tool-input-error")]
    ToolInputError {
        #[serde(rename = "toolName", default)]
        tool_name: Option<String>,
        #[serde(default)]
        input: Option<Value>,
    },
    #[serde(other)]
    Unknown,
}

/// Classification of one raw upstream line.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamLine {
    Event(UpstreamEvent),
    Terminator,
    /// Blank, comment, non-`data:` or undecodable line.
    Skip,
}

impl UpstreamLine {
    /// Classify a single line (without its trailing newline).
    #[must_use]
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        let Some(payload) = line.strip_prefix("data:") else {
            return Self::Skip;
        };
        let payload = payload.trim();
        if payload == "[DONE]" {
            return Self::Terminator;
        }
        match serde_json::from_str::<UpstreamEvent>(payload) {
            Ok(event) => Self::Event(event),
            Err(err) => {
                tracing::debug!(error = %err, "skipping undecodable upstream line");
                Self::Skip
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// Upstream chat request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpstreamRequest {
    #[serde(rename = "sandboxId")]
    pub sandbox_id: String,
    #[serde(rename = "repoRoot")]
    pub repo_root: String,
    pub id: String,
    pub messages: Vec<UpstreamMessage>,
    pub trigger: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpstreamMessage {
    pub parts: Vec<UpstreamPart>,
    pub id: String,
    pub role: String,
    pub state: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpstreamPart {
    #[serde(rename = "type")]
    pub type_: &'static str,
    pub text: String,
    pub state: &'static str,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_each_known_kind() {
        assert_eq!(
            UpstreamLine::parse(r#"data: {"type":"start"}"#),
            UpstreamLine::Event(UpstreamEvent::Start)
        );
        assert_eq!(
            UpstreamLine::parse(r#"data: {"type":"text-delta","id":"0","delta":"hi"}"#),
            UpstreamLine::Event(UpstreamEvent::TextDelta {
                delta: Some("hi".into())
            })
        );
        assert_eq!(
            UpstreamLine::parse(r#"data: {"type":"finish","finishReason":"stop"}"#),
            UpstreamLine::Event(UpstreamEvent::Finish {
                finish_reason: Some("stop".into())
            })
        );
        assert_eq!(
            UpstreamLine::parse(
                r#"data: {"type":"tool-input-error","toolName":"grep","input":{"q":"x"}}"#
            ),
            UpstreamLine::Event(UpstreamEvent::ToolInputError {
                tool_name: Some("grep".into()),
                input: Some(json!({"q": "x"})),
            })
        );
    }

    #[test]
    fn tolerates_missing_space_and_crlf() {
        assert_eq!(
            UpstreamLine::parse("data:{\"type\":\"text-end\"}\r"),
            UpstreamLine::Event(UpstreamEvent::TextEnd)
        );
    }

    #[test]
    fn done_sentinel_is_terminator() {
        assert_eq!(UpstreamLine::parse("data: [DONE]"), UpstreamLine::Terminator);
        assert_eq!(UpstreamLine::parse("data:  [DONE]  "), UpstreamLine::Terminator);
    }

    #[test]
    fn unknown_kind_decodes_as_unknown() {
        assert_eq!(
            UpstreamLine::parse(r#"data: {"type":"reasoning-delta","delta":"x"}"#),
            UpstreamLine::Event(UpstreamEvent::Unknown)
        );
    }

    #[test]
    fn junk_lines_are_skipped() {
        for line in ["", ": keep-alive", "event: ping", "data: {not json", "data: [1,2]", "data: {}"] {
            assert_eq!(UpstreamLine::parse(line), UpstreamLine::Skip, "line {line:?}");
        }
    }

    #[test]
    fn request_uses_camel_case_keys() {
        let req = UpstreamRequest {
            sandbox_id: "sb-1".into(),
            repo_root: "/repo".into(),
            id: "chat-sb-1".into(),
            messages: vec![UpstreamMessage {
                parts: vec![UpstreamPart {
                    type_: "text",
                    text: "hi".into(),
                    state: "done",
                }],
                id: "msg-1-abcd".into(),
                role: "user".into(),
                state: "done",
            }],
            trigger: "submit-message".into(),
        };
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({
                "sandboxId": "sb-1",
                "repoRoot": "/repo",
                "id": "chat-sb-1",
                "messages": [{
                    "parts": [{"type": "text", "text": "hi", "state": "done"}],
                    "id": "msg-1-abcd",
                    "role": "user",
                    "state": "done"
                }],
                "trigger": "submit-message"
            })
        );
    }
}
