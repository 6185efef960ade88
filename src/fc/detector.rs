use memchr::memmem;

// Wrapper-block detection for tag-based tool calls.
//
// The model wraps one or more `<invoke>` spans in an outer tag, one of
// `<function_calls>`, `<tool>` or `<tools>`. The detector only ever reasons
// about the textually earliest wrapper opening, and nesting is counted per tag
// name: a `<tool>` nests inside another `<tool>`, never inside `<tools>`.
//
// Every helper ignores trailing ASCII whitespace, so a block followed by a
// newline still counts as trailing.

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Name of a recognized wrapper tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKind {
    FunctionCalls,
    Tool,
    Tools,
}

impl TagKind {
    pub const ALL: [TagKind; 3] = [TagKind::FunctionCalls, TagKind::Tool, TagKind::Tools];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            TagKind::FunctionCalls => "function_calls",
            TagKind::Tool => "tool",
            TagKind::Tools => "tools",
        }
    }

    #[must_use]
    pub const fn open_tag(self) -> &'static str {
        match self {
            TagKind::FunctionCalls => "<function_calls>",
            TagKind::Tool => "<tool>",
            TagKind::Tools => "<tools>",
        }
    }

    #[must_use]
    pub const fn close_tag(self) -> &'static str {
        match self {
            TagKind::FunctionCalls => "</function_calls>",
            TagKind::Tool => "</tool>",
            TagKind::Tools => "</tools>",
        }
    }
}

/// A candidate wrapper span inside accumulated text.
///
/// Transient: recomputed on every scan, never stored across events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagBlock {
    /// Byte offset of the wrapper's opening `<`.
    pub start: usize,
    pub kind: TagKind,
}

// ---------------------------------------------------------------------------
// Detection
// ---------------------------------------------------------------------------

#[inline]
fn trim_trailing_ws(text: &str) -> &str {
    text.trim_end_matches([' ', '\t', '\n', '\r'])
}

/// Find the textually earliest wrapper opening tag of any kind.
#[must_use]
pub fn find_first_open_tag(text: &str) -> Option<TagBlock> {
    let bytes = text.as_bytes();
    TagKind::ALL
        .into_iter()
        .filter_map(|kind| {
            memmem::find(bytes, kind.open_tag().as_bytes()).map(|start| TagBlock { start, kind })
        })
        .min_by_key(|block| block.start)
}

/// Locate the wrapper block that starts at the earliest opening tag.
///
/// The block counts as present when its depth returns to zero at least once
/// (a closed block, trailing text tolerated) or stays positive at the end of
/// the text (a block that is still streaming in).
#[must_use]
pub fn find_trailing_block(text: &str) -> Option<TagBlock> {
    let trimmed = trim_trailing_ws(text);
    let first = find_first_open_tag(trimmed)?;
    let open = first.kind.open_tag().as_bytes();
    let close = first.kind.close_tag().as_bytes();
    let bytes = trimmed.as_bytes();

    let mut depth: isize = 0;
    let mut closed_once = false;
    let mut pos = first.start;
    while pos < bytes.len() {
        let next_open = memmem::find(&bytes[pos..], open);
        let next_close = memmem::find(&bytes[pos..], close);
        match (next_open, next_close) {
            (None, None) => break,
            (Some(open_rel), None) => {
                depth += 1;
                pos += open_rel + open.len();
            }
            (Some(open_rel), Some(close_rel)) if open_rel < close_rel => {
                depth += 1;
                pos += open_rel + open.len();
            }
            (_, Some(close_rel)) => {
                depth -= 1;
                if depth == 0 {
                    closed_once = true;
                }
                pos += close_rel + close.len();
            }
        }
    }

    (closed_once || depth > 0).then_some(first)
}

/// True when the trimmed text ends with one of the wrapper closing tags.
#[must_use]
pub fn has_complete_trailing_block(text: &str) -> bool {
    let trimmed = trim_trailing_ws(text);
    TagKind::ALL
        .into_iter()
        .any(|kind| trimmed.ends_with(kind.close_tag()))
}

/// True when a wrapper opening exists with no matching close at or after it.
#[must_use]
pub fn has_incomplete_block(text: &str) -> bool {
    let trimmed = trim_trailing_ws(text);
    let Some(first) = find_first_open_tag(trimmed) else {
        return false;
    };
    match memmem::rfind(trimmed.as_bytes(), first.kind.close_tag().as_bytes()) {
        None => true,
        Some(close_at) => close_at < first.start,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_wrapper_returns_none() {
        assert_eq!(find_trailing_block("just some prose"), None);
        assert_eq!(find_trailing_block("<invoke name=\"x\"></invoke>"), None);
    }

    #[test]
    fn closed_block_is_found_at_its_opening() {
        let text = "Sure.\n<function_calls><invoke name=\"a\"></invoke></function_calls>\n";
        let block = find_trailing_block(text).expect("block");
        assert_eq!(block.kind, TagKind::FunctionCalls);
        assert_eq!(block.start, 6);
    }

    #[test]
    fn text_after_closed_block_is_tolerated() {
        let text = "<tools><invoke name=\"a\"></invoke></tools> trailing words";
        let block = find_trailing_block(text).expect("block");
        assert_eq!(block.kind, TagKind::Tools);
        assert_eq!(block.start, 0);
    }

    #[test]
    fn open_block_still_streaming_is_found() {
        let text = "prefix <tool><invoke name=\"a\"><parameter name=\"p\">va";
        let block = find_trailing_block(text).expect("block");
        assert_eq!(block.kind, TagKind::Tool);
        assert_eq!(block.start, 7);
    }

    #[test]
    fn earliest_tag_wins() {
        let text = "<tools><tool></tool></tools><function_calls></function_calls>";
        let block = find_trailing_block(text).expect("block");
        assert_eq!(block.kind, TagKind::Tools);
    }

    #[test]
    fn same_name_nesting_is_balanced() {
        let text = "<tool>outer<tool>inner</tool>still open";
        assert!(find_trailing_block(text).is_some());
        assert!(!has_incomplete_block("<tool>a<tool>b</tool></tool>"));
    }

    #[test]
    fn different_names_do_not_nest() {
        // `</tool>` never closes a `<tools>` block.
        let text = "<tools><tool></tool>";
        let block = find_trailing_block(text).expect("block");
        assert_eq!(block.kind, TagKind::Tools);
        assert!(has_incomplete_block(text));
    }

    #[test]
    fn stray_close_before_open_is_ignored() {
        let text = "</function_calls> then <function_calls>";
        assert!(has_incomplete_block(text));
        assert_eq!(
            find_trailing_block(text).map(|b| b.start),
            Some(text.find("<function_calls>").unwrap())
        );
    }

    #[test]
    fn complete_trailing_block_ignores_trailing_whitespace() {
        assert!(has_complete_trailing_block(
            "<function_calls></function_calls>\n\t "
        ));
        assert!(has_complete_trailing_block("x</tools>"));
        assert!(!has_complete_trailing_block("</tool> more"));
    }

    #[test]
    fn incomplete_block_detection() {
        assert!(has_incomplete_block("hi <function_calls><invoke name=\"x\">"));
        assert!(!has_incomplete_block("hi there"));
        assert!(!has_incomplete_block(
            "<function_calls><invoke name=\"x\"></invoke></function_calls>"
        ));
    }

    #[test]
    fn open_tag_with_attributes_is_not_a_wrapper() {
        assert_eq!(find_first_open_tag("<tool name=\"x\">"), None);
    }
}
