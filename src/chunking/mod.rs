//! Fixed-size, overlapping character windows over document text.
//!
//! Chunk text is never stored. Everything downstream keeps only the chunk
//! index and re-derives the text from the source document with
//! [`ChunkConfig::chunk_at`], so the windowing here must be a pure function
//! of `(text, chunk_size, overlap)`.
//!
//! # Windowing
//! For chunk size `S` and overlap `O`, chunk `k` covers the character range
//! `[k·(S−O), min(k·(S−O)+S, len))`. Offsets count `char`s rather than
//! bytes so multi-byte text is windowed the same way as ASCII.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while configuring the chunker.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChunkingError {
    #[error(
        "Invalid chunking configuration: chunk_size={chunk_size}, overlap={overlap}\nReason: {reason}"
    )]
    InvalidConfiguration {
        chunk_size: usize,
        overlap: usize,
        reason: &'static str,
    },
}

/// Validated chunk size and overlap, both measured in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkConfig {
    chunk_size: usize,
    overlap: usize,
}

impl ChunkConfig {
    /// Creates a chunk configuration.
    ///
    /// # Errors
    /// Returns [`ChunkingError::InvalidConfiguration`] unless
    /// `chunk_size > 0` and `overlap < chunk_size`.
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self, ChunkingError> {
        if chunk_size == 0 {
            return Err(ChunkingError::InvalidConfiguration {
                chunk_size,
                overlap,
                reason: "chunk_size must be greater than zero",
            });
        }
        if overlap >= chunk_size {
            return Err(ChunkingError::InvalidConfiguration {
                chunk_size,
                overlap,
                reason: "overlap must be smaller than chunk_size",
            });
        }
        Ok(Self {
            chunk_size,
            overlap,
        })
    }

    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    #[must_use]
    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Distance in characters between the starts of consecutive chunks.
    #[must_use]
    pub fn stride(&self) -> usize {
        self.chunk_size - self.overlap
    }

    /// Lazily splits `text` into chunks. The iterator is cheap to clone and
    /// restarting it yields the same sequence.
    #[must_use]
    pub fn chunks<'a>(&self, text: &'a str) -> Chunks<'a> {
        Chunks {
            text,
            config: *self,
            next_index: 0,
            start_byte: 0,
            start_char: 0,
        }
    }

    /// Number of chunks produced for a text of `char_len` characters.
    #[must_use]
    pub fn chunk_count(&self, char_len: usize) -> usize {
        char_len.div_ceil(self.stride())
    }

    /// Re-derives chunk `index` of `text` without walking the earlier chunks'
    /// text. Returns `None` when the text has no such chunk.
    #[must_use]
    pub fn chunk_at<'a>(&self, text: &'a str, index: usize) -> Option<Chunk<'a>> {
        let start_char = index.checked_mul(self.stride())?;
        let start_byte = advance_chars(text, 0, start_char);
        if start_byte >= text.len() {
            return None;
        }
        let end_byte = advance_chars(text, start_byte, self.chunk_size);
        Some(Chunk {
            index,
            char_offset: start_char,
            text: &text[start_byte..end_byte],
        })
    }
}

/// One window of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk<'a> {
    /// Position of the chunk within its document
    pub index: usize,
    /// Character offset of the first character of the chunk
    pub char_offset: usize,
    pub text: &'a str,
}

/// Iterator returned by [`ChunkConfig::chunks`].
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    text: &'a str,
    config: ChunkConfig,
    next_index: usize,
    start_byte: usize,
    start_char: usize,
}

impl<'a> Iterator for Chunks<'a> {
    type Item = Chunk<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.start_byte >= self.text.len() {
            return None;
        }

        let end_byte = advance_chars(self.text, self.start_byte, self.config.chunk_size);
        let chunk = Chunk {
            index: self.next_index,
            char_offset: self.start_char,
            text: &self.text[self.start_byte..end_byte],
        };

        let stride = self.config.stride();
        self.start_byte = advance_chars(self.text, self.start_byte, stride);
        self.start_char += stride;
        self.next_index += 1;

        Some(chunk)
    }
}

impl std::iter::FusedIterator for Chunks<'_> {}

/// Byte offset reached after skipping `n` characters from byte offset `from`,
/// clamped to the end of `text`.
fn advance_chars(text: &str, from: usize, n: usize) -> usize {
    text[from..]
        .char_indices()
        .nth(n)
        .map_or(text.len(), |(offset, _)| from + offset)
}
