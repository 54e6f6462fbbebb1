//! Overlapping window planning for oversized documents.
//!
//! Offsets and lengths are measured in characters, and windows never split
//! a character. A document of at most `window_size` characters is a single
//! window; longer documents are cut into windows whose starts advance by
//! `window_size - overlap`, the last one clamped to the end of the text.

use serde::Serialize;

use crate::error::ConfigError;

/// Default window size in characters.
pub const DEFAULT_WINDOW_SIZE: usize = 15_000;

/// Default overlap between consecutive windows in characters.
pub const DEFAULT_OVERLAP: usize = 1_000;

/// One window of the source document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkCandidate {
    /// Character offset of the window start
    pub offset: usize,

    pub text: String,

    /// Length in characters
    pub length: usize,

    /// Relevance score in [0, 1], set by the scorer
    pub score: f32,
}

impl ChunkCandidate {
    pub fn new(offset: usize, text: impl Into<String>) -> Self {
        let text = text.into();
        let length = text.chars().count();
        Self {
            offset,
            text,
            length,
            score: 0.0,
        }
    }

    pub fn with_score(mut self, score: f32) -> Self {
        self.score = score;
        self
    }

    /// Exclusive end offset in characters.
    pub fn end(&self) -> usize {
        self.offset + self.length
    }
}

/// Splits documents into overlapping windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlanner {
    window_size: usize,
    overlap: usize,
}

impl Default for ChunkPlanner {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            overlap: DEFAULT_OVERLAP,
        }
    }
}

impl ChunkPlanner {
    pub fn new(window_size: usize, overlap: usize) -> Result<Self, ConfigError> {
        if window_size == 0 {
            return Err(ConfigError::ZeroWindow);
        }
        if overlap >= window_size {
            return Err(ConfigError::OverlapTooLarge {
                overlap,
                window: window_size,
            });
        }
        Ok(Self {
            window_size,
            overlap,
        })
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Whether a document of `char_len` characters needs more than one window.
    pub fn needs_chunking(&self, char_len: usize) -> bool {
        char_len > self.window_size
    }

    /// Lazily plan the windows for `text`. An empty text yields nothing.
    pub fn plan<'a>(&self, text: &'a str) -> Chunks<'a> {
        Chunks {
            text,
            total_chars: text.chars().count(),
            window_size: self.window_size,
            step: self.window_size - self.overlap,
            next_char: 0,
            next_byte: 0,
            done: text.is_empty(),
        }
    }
}

/// Iterator over the windows of one document.
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    text: &'a str,
    total_chars: usize,
    window_size: usize,
    step: usize,
    next_char: usize,
    next_byte: usize,
    done: bool,
}

impl<'a> Chunks<'a> {
    /// Total document length in characters.
    pub fn total_chars(&self) -> usize {
        self.total_chars
    }
}

impl<'a> Iterator for Chunks<'a> {
    type Item = ChunkCandidate;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let start_char = self.next_char;
        let start_byte = self.next_byte;
        let rest = &self.text[start_byte..];

        let end_char = (start_char + self.window_size).min(self.total_chars);
        let end_byte = start_byte + byte_offset(rest, end_char - start_char);

        if end_char >= self.total_chars {
            self.done = true;
        } else {
            self.next_char = start_char + self.step;
            self.next_byte = start_byte + byte_offset(rest, self.step);
        }

        Some(ChunkCandidate {
            offset: start_char,
            text: self.text[start_byte..end_byte].to_string(),
            length: end_char - start_char,
            score: 0.0,
        })
    }
}

/// Byte index of the `chars`-th character of `s` (or `s.len()`).
fn byte_offset(s: &str, chars: usize) -> usize {
    s.char_indices()
        .nth(chars)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_short_document_is_single_window() {
        let planner = ChunkPlanner::default();
        let chunks: Vec<_> = planner.plan("<h1>Hello</h1>").collect();

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].offset, 0);
        assert_eq!(chunks[0].text, "<h1>Hello</h1>");
        assert!(!planner.needs_chunking(14));
    }

    #[test]
    fn test_exact_window_is_single_window() {
        let planner = ChunkPlanner::new(10, 2).unwrap();
        let chunks: Vec<_> = planner.plan("0123456789").collect();
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn test_empty_document_yields_nothing() {
        let planner = ChunkPlanner::default();
        assert_eq!(planner.plan("").count(), 0);
    }

    #[test]
    fn test_windows_step_and_clamp() {
        let planner = ChunkPlanner::new(10, 3).unwrap();
        let text = "abcdefghijklmnopqrstu"; // 21 chars
        let chunks: Vec<_> = planner.plan(text).collect();

        let offsets: Vec<_> = chunks.iter().map(|c| c.offset).collect();
        assert_eq!(offsets, vec![0, 7, 14]);
        assert_eq!(chunks[0].text, "abcdefghij");
        assert_eq!(chunks[1].text, "hijklmnopq");
        // Last window clamped to the end, shorter than the window size
        assert_eq!(chunks[2].text, "opqrstu");
        assert_eq!(chunks[2].length, 7);
    }

    #[test]
    fn test_forty_thousand_chars_default_windows() {
        let planner = ChunkPlanner::default();
        let text = "x".repeat(40_000);
        let chunks: Vec<_> = planner.plan(&text).collect();

        let offsets: Vec<_> = chunks.iter().map(|c| c.offset).collect();
        assert_eq!(offsets, vec![0, 14_000, 28_000]);
        assert_eq!(chunks[2].end(), 40_000);
    }

    #[test]
    fn test_multibyte_characters_are_never_split() {
        let planner = ChunkPlanner::new(4, 1).unwrap();
        let text = "héllo wörld ✓✓";
        let chunks: Vec<_> = planner.plan(text).collect();

        for chunk in &chunks {
            assert_eq!(chunk.text.chars().count(), chunk.length);
        }
        assert_eq!(chunks.last().unwrap().end(), text.chars().count());
    }

    #[test]
    fn test_invalid_configuration() {
        assert_eq!(ChunkPlanner::new(0, 0), Err(ConfigError::ZeroWindow));
        assert_eq!(
            ChunkPlanner::new(10, 10),
            Err(ConfigError::OverlapTooLarge {
                overlap: 10,
                window: 10
            })
        );
    }

    proptest! {
        #[test]
        fn prop_windows_cover_document(
            text in "[a-zé✓ ]{1,400}",
            window in 1usize..60,
            overlap_seed in 0usize..60,
        ) {
            let overlap = overlap_seed % window;
            let planner = ChunkPlanner::new(window, overlap).unwrap();
            let chunks: Vec<_> = planner.plan(&text).collect();
            let total = text.chars().count();

            prop_assert!(!chunks.is_empty());
            prop_assert_eq!(chunks[0].offset, 0);
            prop_assert_eq!(chunks.last().unwrap().end(), total);

            let mut covered_to = 0;
            let mut last_offset = 0;
            for chunk in &chunks {
                prop_assert!(chunk.length > 0);
                prop_assert!(chunk.length <= window);
                prop_assert!(chunk.offset >= last_offset);
                // No gap between the covered prefix and this window
                prop_assert!(chunk.offset <= covered_to);
                covered_to = covered_to.max(chunk.end());
                last_offset = chunk.offset;

                let expected: String = text.chars().skip(chunk.offset).take(chunk.length).collect();
                prop_assert_eq!(&chunk.text, &expected);
            }
            prop_assert_eq!(covered_to, total);
        }
    }
}
