//! Vector store trait for persisting and reading named collections.

use std::sync::Arc;

use async_trait::async_trait;

use crate::collection::{CollectionInfo, CollectionSnapshot};
use crate::document::StoredEntry;
use crate::error::{RagError, Result};

/// A storage backend for named collections of embedded chunks.
///
/// Collections are append-only. Appends to one collection are serialized and
/// become visible only once durable; readers always get a complete
/// [`CollectionSnapshot`].
///
/// # Example
///
/// ```rust,ignore
/// use docchat_rag::{FsVectorStore, VectorStore};
///
/// let store = FsVectorStore::new("./docchat-data");
/// store.create_or_open("docs", 384, "hashing-v1-384").await?;
/// store.append("docs", entries).await?;
/// let snapshot = store.snapshot("docs").await?;
/// ```
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Open a collection, creating (and persisting) it empty if it does not exist.
    ///
    /// Fails with [`RagError::Config`] if the collection exists with a
    /// different dimensionality.
    async fn create_or_open(
        &self,
        name: &str,
        dimensions: usize,
        embedding_model: &str,
    ) -> Result<CollectionInfo>;

    /// Reconstruct a previously persisted collection.
    ///
    /// Fails with [`RagError::NotFound`] if nothing was persisted under `name`.
    async fn load(&self, name: &str) -> Result<CollectionInfo>;

    /// Append entries and persist them before returning.
    ///
    /// The collection must already be open. On failure the visible contents
    /// are unchanged.
    async fn append(&self, name: &str, entries: Vec<StoredEntry>) -> Result<CollectionInfo>;

    /// The current contents of an open collection.
    async fn snapshot(&self, name: &str) -> Result<Arc<CollectionSnapshot>>;

    /// All collections known to the backend.
    async fn list(&self) -> Result<Vec<CollectionInfo>>;
}

/// Collection names double as directory names: `[A-Za-z0-9_-]{1,64}`.
pub fn validate_collection_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= 64
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(RagError::Config(format!(
            "invalid collection name '{name}': use 1-64 letters, digits, '_' or '-'"
        )))
    }
}
