//! Overlapping sliding-window text chunker.
//!
//! Splits cleaned document text into windows of at most `max_chars`
//! characters, each sharing its first `overlap` characters with the
//! tail of the previous window. Windows step by `max_chars - overlap`
//! characters, so stripping the overlap prefix from every chunk after
//! the first reconstructs the original text exactly: the invariant
//! idempotent re-ingestion depends on.
//!
//! Chunking is a pure function: deterministic for identical input, no
//! side effects. [`ChunkWindows`] is the lazy, restartable iterator;
//! [`chunk_text`] collects it into [`Chunk`]s with SHA-256 text hashes
//! and deterministic ids.

use sha2::{Digest, Sha256};

use crate::error::{RagError, Result};
use crate::models::{chunk_id, Chunk};

/// Lazy iterator over overlapping character windows of a text.
///
/// All offsets are character-counted and snapped to UTF-8 boundaries.
/// Cloning restarts the sequence from the beginning.
#[derive(Debug, Clone)]
pub struct ChunkWindows<'a> {
    text: &'a str,
    max_chars: usize,
    step: usize,
    start: usize,
    index: i64,
}

impl<'a> ChunkWindows<'a> {
    /// Create a window iterator. Requires `0 < max_chars` and
    /// `overlap < max_chars`.
    pub fn new(text: &'a str, max_chars: usize, overlap: usize) -> Result<Self> {
        if max_chars == 0 {
            return Err(RagError::invalid_config("chunk max_chars must be > 0"));
        }
        if overlap >= max_chars {
            return Err(RagError::invalid_config(format!(
                "chunk overlap ({overlap}) must be smaller than max_chars ({max_chars})"
            )));
        }
        Ok(Self {
            text,
            max_chars,
            step: max_chars - overlap,
            start: 0,
            index: 0,
        })
    }
}

/// Byte offset `count` characters past `from`, clamped to the end.
fn advance(s: &str, from: usize, count: usize) -> usize {
    s[from..]
        .char_indices()
        .nth(count)
        .map(|(i, _)| from + i)
        .unwrap_or(s.len())
}

impl<'a> Iterator for ChunkWindows<'a> {
    type Item = (i64, &'a str);

    fn next(&mut self) -> Option<Self::Item> {
        if self.start >= self.text.len() {
            return None;
        }
        let end = advance(self.text, self.start, self.max_chars);
        let window = &self.text[self.start..end];
        let index = self.index;
        self.index += 1;
        if end >= self.text.len() {
            self.start = self.text.len();
        } else {
            self.start = advance(self.text, self.start, self.step);
        }
        Some((index, window))
    }
}

/// Split text into [`Chunk`]s with contiguous indices starting at 0.
///
/// Each chunk's `hash` is the SHA-256 of its text; its id is derived
/// from `document_id` and the index so re-ingestion re-upserts the same
/// ids. Empty input yields no chunks.
pub fn chunk_text(
    document_id: &str,
    text: &str,
    max_chars: usize,
    overlap: usize,
) -> Result<Vec<Chunk>> {
    let windows = ChunkWindows::new(text, max_chars, overlap)?;
    Ok(windows
        .map(|(index, window)| make_chunk(document_id, index, window))
        .collect())
}

/// Rebuild the original text from chunks by stripping the `overlap`
/// character prefix from every chunk after the first.
pub fn reconstruct_text(chunks: &[Chunk], overlap: usize) -> String {
    let mut out = String::new();
    for (i, chunk) in chunks.iter().enumerate() {
        if i == 0 {
            out.push_str(&chunk.text);
        } else {
            let skip = advance(&chunk.text, 0, overlap);
            out.push_str(&chunk.text[skip..]);
        }
    }
    out
}

fn make_chunk(document_id: &str, index: i64, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: chunk_id(document_id, index),
        document_id: document_id.to_string(),
        chunk_index: index,
        text: text.to_string(),
        hash,
    }
}
