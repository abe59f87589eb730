//! Data types for documents, chunks, stored entries and retrieval results.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Plain text extracted from one uploaded artifact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    /// Identifier of the artifact the text came from (sanitized file name,
    /// or `archive.zip/entry.pdf` for archive entries).
    pub source_id: String,
    /// The extracted text.
    pub text: String,
    /// Key-value metadata describing the source.
    pub metadata: HashMap<String, String>,
}

impl Document {
    /// Create a document with no metadata.
    pub fn new(source_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self { source_id: source_id.into(), text: text.into(), metadata: HashMap::new() }
    }

    /// Add a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A bounded-size segment of a [`Document`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// The text content of the chunk.
    pub text: String,
    /// The `source_id` of the parent [`Document`].
    pub source_id: String,
    /// 0-based position of the chunk within its document.
    pub chunk_index: usize,
    /// Character offset of the chunk start within the document text.
    pub char_offset: usize,
    /// Metadata inherited from the parent document plus `chunk_index`.
    pub metadata: HashMap<String, String>,
}

/// A chunk as it lives in a collection: its id and embedding vector.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredEntry {
    /// Unique identifier assigned when the chunk was added.
    pub id: String,
    /// The embedding vector of the chunk text.
    pub vector: Vec<f32>,
    /// The stored chunk.
    pub chunk: Chunk,
}

/// A retrieved [`Chunk`] paired with its similarity to the query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedChunk {
    /// Identifier of the stored entry.
    pub id: String,
    /// The retrieved chunk.
    pub chunk: Chunk,
    /// Cosine similarity between the query and the chunk (higher is closer).
    pub score: f32,
}
