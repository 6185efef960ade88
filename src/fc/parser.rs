//! Invocation parser: extracts tool calls from tag-based markup.
//!
//! The model writes tool calls as
//!
//! ```text
//! <function_calls>
//! <invoke name="Bash">
//! <parameter name="command">ls -la</parameter>
//! </invoke>
//! </function_calls>
//! ```
//!
//! Spans are paired by depth rather than by first match, so an `<invoke>`
//! nested inside another stays part of its parent. A trailing span that never
//! closed is still returned with the rest of the text as its body.

use memchr::memmem;
use serde_json::{Map, Value};

use super::detector::find_trailing_block;

const INVOKE_START: &[u8] = b"<invoke name=\"";
const INVOKE_OPEN_ANY: &[u8] = b"<invoke";
const INVOKE_CLOSE: &[u8] = b"</invoke>";
const PARAMETER_START: &[u8] = b"<parameter name=\"";
const PARAMETER_CLOSE: &[u8] = b"</parameter>";

/// Parameters whose values are opaque identifiers and must never be decoded
/// as JSON, so `"1"` stays the string `"1"`.
pub const STRING_ONLY_PARAMS: &[&str] = &["taskId"];

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A tool call recovered from markup (or reported natively by the upstream).
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub name: String,
    /// Parameter values in document order.
    pub input: Map<String, Value>,
}

/// The first complete `<invoke>` span found by [`parse_next_invocation`].
#[derive(Debug, Clone, PartialEq)]
pub struct NextInvocation {
    pub call: ToolCall,
    /// Offset of the span's `<invoke`.
    pub start: usize,
    /// Offset just past the span's `</invoke>`.
    pub end: usize,
}

/// Result of [`parse_wrapped_block`].
#[derive(Debug, Clone, PartialEq)]
pub struct WrappedBlock<'a> {
    pub calls: Vec<ToolCall>,
    /// Trimmed text before the wrapper, or the whole input when no wrapper
    /// was found.
    pub remaining_text: &'a str,
    /// Offset of the wrapper's opening tag, when one was found.
    pub block_start: Option<usize>,
}

#[derive(Debug, Clone, Copy)]
enum Marker<'a> {
    Start {
        at: usize,
        body_start: usize,
        name: &'a str,
    },
    End {
        at: usize,
    },
}

impl Marker<'_> {
    #[inline]
    fn at(&self) -> usize {
        match self {
            Marker::Start { at, .. } | Marker::End { at } => *at,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Span<'a> {
    name: &'a str,
    start: usize,
    body_start: usize,
    /// Offset of the closing tag; `None` for a span still open at end of text.
    close_at: Option<usize>,
}

// ---------------------------------------------------------------------------
// Public entry points
// ---------------------------------------------------------------------------

/// Parse every top-level invocation in `text`, in document order.
#[must_use]
pub fn parse_invocations(text: &str) -> Vec<ToolCall> {
    let markers = collect_markers(text, INVOKE_START, INVOKE_CLOSE);
    pair_spans(&markers)
        .into_iter()
        .map(|span| {
            let body_end = span.close_at.unwrap_or(text.len());
            ToolCall {
                name: span.name.to_owned(),
                input: parse_parameters(&text[span.body_start..body_end]),
            }
        })
        .collect()
}

/// Parse only the first complete `<invoke>…</invoke>` span in `text`.
///
/// No enclosing wrapper is required and the wrapper does not need to be
/// closed, so calls can be surfaced one at a time while the model is still
/// streaming the rest of the block.
#[must_use]
pub fn parse_next_invocation(text: &str) -> Option<NextInvocation> {
    let bytes = text.as_bytes();
    let start = memmem::find(bytes, INVOKE_START)?;

    let mut depth: isize = 0;
    let mut pos = start;
    while pos < bytes.len() {
        let next_open = memmem::find(&bytes[pos..], INVOKE_OPEN_ANY);
        let next_close = memmem::find(&bytes[pos..], INVOKE_CLOSE);
        match (next_open, next_close) {
            (None, None) => break,
            (Some(open_rel), None) => {
                depth += 1;
                pos += open_rel + INVOKE_OPEN_ANY.len();
            }
            (Some(open_rel), Some(close_rel)) if open_rel < close_rel => {
                depth += 1;
                pos += open_rel + INVOKE_OPEN_ANY.len();
            }
            (_, Some(close_rel)) => {
                depth -= 1;
                let close_end = pos + close_rel + INVOKE_CLOSE.len();
                if depth == 0 {
                    let call = parse_invocations(&text[start..close_end])
                        .into_iter()
                        .next()?;
                    return Some(NextInvocation {
                        call,
                        start,
                        end: close_end,
                    });
                }
                pos = close_end;
            }
        }
    }

    None
}

/// Parse the wrapper block located by the detector.
///
/// The interior runs from the first opening tag to the last matching closing
/// tag, or to the end of the text while the block is still open.
#[must_use]
pub fn parse_wrapped_block(text: &str) -> WrappedBlock<'_> {
    let Some(block) = find_trailing_block(text) else {
        return WrappedBlock {
            calls: Vec::new(),
            remaining_text: text,
            block_start: None,
        };
    };

    let open = block.kind.open_tag();
    let block_text = &text[block.start..];
    let interior_start = open.len();
    let interior = match memmem::rfind(block_text.as_bytes(), block.kind.close_tag().as_bytes()) {
        Some(close_at) if close_at >= interior_start => &block_text[interior_start..close_at],
        _ => &block_text[interior_start..],
    };

    WrappedBlock {
        calls: parse_invocations(interior),
        remaining_text: text[..block.start].trim(),
        block_start: Some(block.start),
    }
}

/// Decode one raw parameter value.
///
/// Names on [`STRING_ONLY_PARAMS`] keep the trimmed text. Everything else is
/// tried as JSON first and falls back to the trimmed text.
#[must_use]
pub fn coerce_param_value(name: &str, raw: &str) -> Value {
    let trimmed = raw.trim();
    if STRING_ONLY_PARAMS.contains(&name) {
        return Value::String(trimmed.to_owned());
    }
    serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(trimmed.to_owned()))
}

// ---------------------------------------------------------------------------
// Internals
// ---------------------------------------------------------------------------

fn parse_parameters(body: &str) -> Map<String, Value> {
    let markers = collect_markers(body, PARAMETER_START, PARAMETER_CLOSE);
    let mut input = Map::new();
    for span in pair_spans(&markers) {
        let value_end = span.close_at.unwrap_or(body.len());
        let raw = &body[span.body_start..value_end];
        input.insert(span.name.to_owned(), coerce_param_value(span.name, raw));
    }
    input
}

/// Collect `<tag name="...">` starts and closing tags, ordered by position.
///
/// A start only counts when the name is non-empty and the quote is directly
/// followed by `>`; anything else is left as text.
fn collect_markers<'a>(text: &'a str, start_prefix: &[u8], close: &[u8]) -> Vec<Marker<'a>> {
    let bytes = text.as_bytes();
    let mut markers = Vec::new();

    let mut cursor = 0usize;
    while let Some(rel) = memmem::find(&bytes[cursor..], start_prefix) {
        let at = cursor + rel;
        let name_start = at + start_prefix.len();
        match memchr::memchr(b'"', &bytes[name_start..]) {
            Some(name_len) if name_len > 0 && bytes.get(name_start + name_len + 1) == Some(&b'>') => {
                let name_end = name_start + name_len;
                markers.push(Marker::Start {
                    at,
                    body_start: name_end + 2,
                    name: &text[name_start..name_end],
                });
                cursor = name_end + 2;
            }
            _ => cursor = at + 1,
        }
    }

    markers.extend(memmem::find_iter(bytes, close).map(|at| Marker::End { at }));
    markers.sort_by_key(Marker::at);
    markers
}

fn pair_spans<'a>(markers: &[Marker<'a>]) -> Vec<Span<'a>> {
    let mut spans = Vec::new();
    let mut depth: isize = 0;
    let mut current: Option<Span<'a>> = None;

    for marker in markers {
        match *marker {
            Marker::Start {
                at,
                body_start,
                name,
            } => {
                if depth == 0 {
                    current = Some(Span {
                        name,
                        start: at,
                        body_start,
                        close_at: None,
                    });
                }
                depth += 1;
            }
            Marker::End { at } => {
                depth -= 1;
                if depth == 0 {
                    if let Some(mut span) = current.take() {
                        span.close_at = Some(at);
                        spans.push(span);
                    }
                }
            }
        }
    }

    if depth > 0 {
        if let Some(span) = current {
            spans.push(span);
        }
    }
    debug_assert!(spans.windows(2).all(|w| w[0].start < w[1].start));
    spans
}

#[cfg(test)]
#[path = "parser_tests.rs"]
mod tests;
