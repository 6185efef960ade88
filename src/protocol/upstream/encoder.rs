use crate::ids::IdGenerator;
use crate::protocol::anthropic::decoder::DecodedConversation;
use crate::protocol::upstream::{UpstreamMessage, UpstreamPart, UpstreamRequest};

/// Static request fields taken from the `upstream` config section.
#[derive(Debug, Clone)]
pub struct EncodeOptions<'a> {
    pub repo_root: &'a str,
    pub trigger: &'a str,
    pub chat_id_prefix: &'a str,
    /// Extra reminder placed ahead of the system text, if configured.
    pub system_preamble: Option<&'a str>,
}

/// Build the upstream request for a decoded conversation.
///
/// The upstream has no system role, so the system text travels inside
/// `<system_reminder>` tags at the start of the first message when that
/// message is from the user.
#[must_use]
pub fn encode_upstream_request(
    conversation: &DecodedConversation,
    options: &EncodeOptions<'_>,
    ids: &dyn IdGenerator,
) -> UpstreamRequest {
    let sandbox_id = ids.sandbox_id();
    let reminder = build_system_reminder(options.system_preamble, &conversation.system_text);

    let messages = conversation
        .messages
        .iter()
        .enumerate()
        .map(|(i, msg)| {
            let text = if i == 0 && msg.role == "user" && !reminder.is_empty() {
                format!("{reminder}{}", msg.text)
            } else {
                msg.text.clone()
            };
            UpstreamMessage {
                parts: vec![UpstreamPart {
                    type_: "text",
                    text,
                    state: "done",
                }],
                id: format!("msg-{}-{}", i + 1, ids.segment_id()),
                role: msg.role.clone(),
                state: "done",
            }
        })
        .collect();

    UpstreamRequest {
        id: format!("{}-{sandbox_id}", options.chat_id_prefix),
        sandbox_id,
        repo_root: options.repo_root.to_string(),
        messages,
        trigger: options.trigger.to_string(),
    }
}

fn build_system_reminder(preamble: Option<&str>, system_text: &str) -> String {
    let mut out = String::new();
    for section in [preamble.unwrap_or(""), system_text] {
        if section.trim().is_empty() {
            continue;
        }
        out.push_str("<system_reminder>\n");
        out.push_str(section);
        out.push_str("\n</system_reminder>\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::SequentialIdGenerator;
    use crate::protocol::anthropic::decoder::DecodedMessage;

    fn options() -> EncodeOptions<'static> {
        EncodeOptions {
            repo_root: "/root/workspace/repo",
            trigger: "submit-message",
            chat_id_prefix: "chat",
            system_preamble: None,
        }
    }

    fn conversation(system_text: &str, turns: &[(&str, &str)]) -> DecodedConversation {
        DecodedConversation {
            model: "m".into(),
            system_text: system_text.into(),
            messages: turns
                .iter()
                .map(|(role, text)| DecodedMessage {
                    role: (*role).into(),
                    text: (*text).into(),
                })
                .collect(),
        }
    }

    #[test]
    fn system_text_is_merged_into_first_user_message() {
        let ids = SequentialIdGenerator::new();
        let req = encode_upstream_request(
            &conversation("Be brief.", &[("user", "hi"), ("assistant", "yo"), ("user", "again")]),
            &options(),
            &ids,
        );
        assert_eq!(
            req.messages[0].parts[0].text,
            "<system_reminder>\nBe brief.\n</system_reminder>\nhi"
        );
        assert_eq!(req.messages[1].parts[0].text, "yo");
        assert_eq!(req.messages[2].role, "user");
        assert_eq!(req.messages[2].parts[0].text, "again");
    }

    #[test]
    fn ids_are_derived_from_the_sandbox() {
        let ids = SequentialIdGenerator::new();
        let req = encode_upstream_request(&conversation("", &[("user", "hi")]), &options(), &ids);
        assert!(req.sandbox_id.starts_with("sb-"));
        assert_eq!(req.id, format!("chat-{}", req.sandbox_id));
        assert!(req.messages[0].id.starts_with("msg-1-"));
        assert_eq!(req.repo_root, "/root/workspace/repo");
        assert_eq!(req.trigger, "submit-message");
    }

    #[test]
    fn empty_system_leaves_message_untouched() {
        let ids = SequentialIdGenerator::new();
        let req = encode_upstream_request(&conversation("  ", &[("user", "hi")]), &options(), &ids);
        assert_eq!(req.messages[0].parts[0].text, "hi");
    }

    #[test]
    fn preamble_comes_before_system_text() {
        let ids = SequentialIdGenerator::new();
        let opts = EncodeOptions {
            system_preamble: Some("Answer in English."),
            ..options()
        };
        let req = encode_upstream_request(&conversation("Be brief.", &[("user", "hi")]), &opts, &ids);
        assert_eq!(
            req.messages[0].parts[0].text,
            "<system_reminder>\nAnswer in English.\n</system_reminder>\n\
             <system_reminder>\nBe brief.\n</system_reminder>\nhi"
        );
    }

    #[test]
    fn leading_assistant_message_gets_no_reminder() {
        let ids = SequentialIdGenerator::new();
        let req = encode_upstream_request(
            &conversation("Be brief.", &[("assistant", "hello"), ("user", "hi")]),
            &options(),
            &ids,
        );
        assert_eq!(req.messages[0].parts[0].text, "hello");
        assert_eq!(req.messages[1].parts[0].text, "hi");
    }
}
