//! Document chunking.
//!
//! This module provides the [`Chunker`] trait and [`CharacterSplitter`], a
//! greedy character-window splitter with configurable overlap that prefers
//! to end windows at paragraph breaks, line breaks, then whitespace.

use crate::document::{Chunk, Document};
use crate::error::{RagError, Result};

/// Default maximum chunk size in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Default number of characters shared by consecutive chunks.
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// A strategy for splitting documents into chunks.
///
/// Implementations produce [`Chunk`]s with text and metadata only.
/// Embeddings are computed later by the index store.
pub trait Chunker: Send + Sync {
    /// Split a document into chunks.
    ///
    /// Returns an empty `Vec` if the document has empty text.
    fn chunk(&self, document: &Document) -> Vec<Chunk>;
}

/// Splits text into windows of at most `chunk_size` characters.
///
/// Windows that would end mid-text are pulled back to the last separator in
/// their back half so words stay whole when possible. The next window always
/// starts exactly `chunk_overlap` characters before the previous one ended,
/// so stripping that overlap from every chunk after the first gives back the
/// original text.
///
/// # Example
///
/// ```rust,ignore
/// use docchat_rag::CharacterSplitter;
///
/// let splitter = CharacterSplitter::new(1000, 200)?;
/// let chunks = splitter.chunk(&document);
/// ```
#[derive(Debug, Clone)]
pub struct CharacterSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl CharacterSplitter {
    /// Create a new `CharacterSplitter`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Config`] if `chunk_size` is zero or
    /// `chunk_overlap >= chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(RagError::Config("chunk_size must be greater than zero".to_string()));
        }
        if chunk_overlap >= chunk_size {
            return Err(RagError::Config(format!(
                "chunk_overlap ({chunk_overlap}) must be less than chunk_size ({chunk_size})"
            )));
        }
        Ok(Self { chunk_size, chunk_overlap })
    }

    /// Maximum number of characters per chunk.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Number of characters shared by consecutive chunks.
    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }
}

impl Default for CharacterSplitter {
    fn default() -> Self {
        Self { chunk_size: DEFAULT_CHUNK_SIZE, chunk_overlap: DEFAULT_CHUNK_OVERLAP }
    }
}

impl Chunker for CharacterSplitter {
    fn chunk(&self, document: &Document) -> Vec<Chunk> {
        let chars: Vec<char> = document.text.chars().collect();

        split_spans(&chars, self.chunk_size, self.chunk_overlap)
            .into_iter()
            .enumerate()
            .map(|(chunk_index, (start, end))| {
                let mut metadata = document.metadata.clone();
                metadata.insert("chunk_index".to_string(), chunk_index.to_string());
                Chunk {
                    text: chars[start..end].iter().collect(),
                    source_id: document.source_id.clone(),
                    chunk_index,
                    char_offset: start,
                    metadata,
                }
            })
            .collect()
    }
}

/// Split a document with the given parameters.
///
/// # Errors
///
/// Returns [`RagError::Config`] if the parameters are invalid.
pub fn split(document: &Document, chunk_size: usize, chunk_overlap: usize) -> Result<Vec<Chunk>> {
    Ok(CharacterSplitter::new(chunk_size, chunk_overlap)?.chunk(document))
}

/// Compute `[start, end)` character spans. Requires `chunk_overlap < chunk_size`.
fn split_spans(chars: &[char], chunk_size: usize, chunk_overlap: usize) -> Vec<(usize, usize)> {
    let len = chars.len();
    let mut spans = Vec::new();
    if len == 0 {
        return spans;
    }

    let mut start = 0;
    loop {
        let hard_end = (start + chunk_size).min(len);
        let end = if hard_end == len {
            len
        } else {
            // end must stay past start + overlap so the next window advances
            let floor = start + (chunk_overlap + 1).max(chunk_size / 2);
            find_break(chars, floor, hard_end).unwrap_or(hard_end)
        };

        spans.push((start, end));
        if end == len {
            break;
        }
        start = end - chunk_overlap;
    }

    spans
}

/// Find the latest position in `floor..=hard_end` directly after a separator,
/// trying paragraph breaks, then line breaks, then any whitespace.
fn find_break(chars: &[char], floor: usize, hard_end: usize) -> Option<usize> {
    let paragraph = |p: usize| p >= 2 && chars[p - 2] == '\n' && chars[p - 1] == '\n';
    let line = |p: usize| chars[p - 1] == '\n';
    let space = |p: usize| chars[p - 1].is_whitespace();

    let candidates: [&dyn Fn(usize) -> bool; 3] = [&paragraph, &line, &space];
    candidates
        .iter()
        .find_map(|is_break| (floor.max(1)..=hard_end).rev().find(|&p| is_break(p)))
}
