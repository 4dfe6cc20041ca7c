//! Accumulating output buffer with tail search and consume-through-match.
//!
//! Device output arrives in arbitrary fragments. Everything read stays in the
//! buffer until a match is explicitly consumed, so text that arrives while
//! waiting for one prompt is still there when the next prompt is looked for.

use regex::Regex;

use super::patterns::Pattern;

/// Buffer for accumulating output and searching it for prompts.
#[derive(Debug)]
pub struct PatternBuffer {
    /// The accumulated, ANSI-stripped output.
    buffer: String,

    /// How many bytes from the end `search_tail` looks at.
    search_depth: usize,

    /// Trailing bytes of an incomplete UTF-8 sequence, held for the next read.
    pending: Vec<u8>,
}

impl PatternBuffer {
    /// Create a new pattern buffer with the specified search depth.
    pub fn new(search_depth: usize) -> Self {
        Self {
            buffer: String::with_capacity(4096),
            search_depth,
            pending: Vec::new(),
        }
    }

    /// Extend the buffer with raw device bytes, stripping ANSI escape codes.
    ///
    /// A multibyte character split across reads is held back until the rest
    /// of it arrives. Returns the text that was appended.
    pub fn extend(&mut self, data: &[u8]) -> String {
        let mut bytes = std::mem::take(&mut self.pending);
        bytes.extend_from_slice(data);

        if let Err(e) = std::str::from_utf8(&bytes) {
            if e.error_len().is_none() {
                self.pending = bytes.split_off(e.valid_up_to());
            }
        }

        let cleaned = strip_ansi_escapes::strip(&bytes);
        let text = String::from_utf8_lossy(&cleaned).into_owned();
        self.buffer.push_str(&text);
        text
    }

    /// Search the whole buffer; returns the byte offset where the match ends.
    pub fn find(&self, pattern: &Pattern) -> Option<usize> {
        pattern.find_end(&self.buffer)
    }

    /// Search only the last `search_depth` bytes for a regex.
    ///
    /// Returned offsets are relative to the full buffer.
    pub fn search_tail(&self, pattern: &Regex) -> Option<(usize, usize)> {
        let mut start = self.buffer.len().saturating_sub(self.search_depth);
        while !self.buffer.is_char_boundary(start) {
            start += 1;
        }
        pattern
            .find(&self.buffer[start..])
            .map(|m| (start + m.start(), start + m.end()))
    }

    /// Check if the tail contains a regex match.
    pub fn tail_contains(&self, pattern: &Regex) -> bool {
        self.search_tail(pattern).is_some()
    }

    /// Drop everything up to `end` and return it.
    ///
    /// Used after acting on a match so the same prompt is never acted on twice.
    pub fn consume_through(&mut self, end: usize) -> String {
        let mut end = end.min(self.buffer.len());
        while !self.buffer.is_char_boundary(end) {
            end += 1;
        }
        let rest = self.buffer.split_off(end);
        std::mem::replace(&mut self.buffer, rest)
    }

    /// Take ownership of the buffer contents and reset.
    pub fn take(&mut self) -> String {
        self.pending.clear();
        std::mem::take(&mut self.buffer)
    }

    pub fn as_str(&self) -> &str {
        &self.buffer
    }

    /// The last `n` characters, for log lines.
    pub fn tail(&self, n: usize) -> &str {
        let mut start = self.buffer.len().saturating_sub(n);
        while !self.buffer.is_char_boundary(start) {
            start += 1;
        }
        &self.buffer[start..]
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.pending.clear();
    }

    pub fn search_depth(&self) -> usize {
        self.search_depth
    }
}

impl Default for PatternBuffer {
    fn default() -> Self {
        Self::new(1000)
    }
}
