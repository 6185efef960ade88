//! Boundary-safe text buffer.
//!
//! Streamed text may end halfway through a wrapper opening tag (`<func`,
//! `<too`). The buffer holds back any tail that could still grow into one of
//! the watched tags and only releases text that is known to be plain prose.

/// Tag prefixes whose partial appearance at the end of pending text keeps that
/// tail buffered.
pub const WATCHED_TAG_PREFIXES: [&str; 5] = ["<function_calls", "<tool>", "<tool ", "<tools>", "<tools "];

#[derive(Debug, Default)]
pub struct BoundaryTextBuffer {
    pending: String,
    tool_call_detected: bool,
}

impl BoundaryTextBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, text: &str) {
        self.pending.push_str(text);
    }

    /// Release the longest prefix of pending text that cannot be the start of
    /// a watched tag.
    ///
    /// Returns `None` when nothing is released, including when a tool call
    /// has already been detected.
    pub fn flush_safe(&mut self) -> Option<String> {
        if self.pending.is_empty() || self.tool_call_detected {
            return None;
        }

        let safe_end = self.safe_end();
        if safe_end == 0 {
            return None;
        }
        let rest = self.pending.split_off(safe_end);
        Some(std::mem::replace(&mut self.pending, rest))
    }

    /// Release everything pending, unconditionally.
    pub fn flush_all(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.pending))
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    #[must_use]
    pub fn pending(&self) -> &str {
        &self.pending
    }

    #[must_use]
    pub fn tool_call_detected(&self) -> bool {
        self.tool_call_detected
    }

    /// Latch detection. Once set it stays set for the rest of the stream.
    pub fn mark_tool_call_detected(&mut self) {
        self.tool_call_detected = true;
    }

    /// Smallest offset whose suffix is a non-empty prefix of a watched tag.
    fn safe_end(&self) -> usize {
        let bytes = self.pending.as_bytes();
        let longest = WATCHED_TAG_PREFIXES.iter().map(|p| p.len()).max().unwrap_or(0);
        let scan_from = bytes.len().saturating_sub(longest);

        (scan_from..bytes.len())
            .find(|&at| {
                let tail = &bytes[at..];
                WATCHED_TAG_PREFIXES
                    .iter()
                    .any(|prefix| prefix.as_bytes().starts_with(tail))
            })
            .unwrap_or(bytes.len())
    }
}
