//! The index store: an embedder paired with a vector store backend.

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::collection::{CollectionInfo, CollectionSnapshot};
use crate::document::{Chunk, StoredEntry};
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::vectorstore::VectorStore;

/// What [`IndexStore::create_or_open`] and [`IndexStore::load`] hand back.
pub type CollectionHandle = CollectionInfo;

/// Embeds chunks and keeps them in named collections.
///
/// Every collection opened through an `IndexStore` is checked against the
/// embedder's dimensionality, so vectors from two different models never
/// share a collection.
///
/// # Example
///
/// ```rust,ignore
/// use std::sync::Arc;
/// use docchat_rag::{FsVectorStore, HashingEmbeddingProvider, IndexStore};
///
/// let store = IndexStore::new(
///     Arc::new(HashingEmbeddingProvider::default()),
///     Arc::new(FsVectorStore::new("./docchat-data")),
/// );
/// store.create_or_open("docs").await?;
/// let ids = store.add("docs", chunks).await?;
/// ```
#[derive(Clone)]
pub struct IndexStore {
    embedder: Arc<dyn EmbeddingProvider>,
    backend: Arc<dyn VectorStore>,
}

impl IndexStore {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, backend: Arc<dyn VectorStore>) -> Self {
        Self { embedder, backend }
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    pub fn backend(&self) -> &Arc<dyn VectorStore> {
        &self.backend
    }

    /// Embed texts with the configured provider.
    pub async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        debug!(model = self.embedder.model_id(), count = texts.len(), "embedding texts");
        let vectors = self.embedder.embed_batch(texts).await?;
        if vectors.len() != texts.len() {
            return Err(RagError::backend(
                self.embedder.model_id(),
                format!("expected {} embeddings, got {}", texts.len(), vectors.len()),
            ));
        }
        Ok(vectors)
    }

    /// Open `name`, creating it empty (and persisted) if needed.
    pub async fn create_or_open(&self, name: &str) -> Result<CollectionHandle> {
        self.backend
            .create_or_open(name, self.embedder.dimensions(), self.embedder.model_id())
            .await
    }

    /// Open a previously persisted collection.
    ///
    /// # Errors
    ///
    /// - [`RagError::NotFound`] when nothing was persisted under `name`
    /// - [`RagError::Store`] when the persisted state is partial or corrupt
    /// - [`RagError::Config`] when the collection was built with vectors of a
    ///   different dimension than the configured embedder produces
    pub async fn load(&self, name: &str) -> Result<CollectionHandle> {
        let info = self.backend.load(name).await?;
        self.check_dimensions(&info)?;
        Ok(info)
    }

    /// The current contents of an existing collection.
    pub async fn snapshot(&self, name: &str) -> Result<Arc<CollectionSnapshot>> {
        let snapshot = self.backend.snapshot(name).await?;
        self.check_dimensions(&snapshot.info())?;
        Ok(snapshot)
    }

    /// All collections in the backend.
    pub async fn list(&self) -> Result<Vec<CollectionInfo>> {
        self.backend.list().await
    }

    /// Embed `chunks` and append them to `collection` in one durable step.
    ///
    /// Returns the fresh ids in chunk order. When persisting fails the
    /// collection keeps its previous contents.
    pub async fn add(&self, collection: &str, chunks: Vec<Chunk>) -> Result<Vec<String>> {
        let snapshot = self.snapshot(collection).await?;
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        let vectors = self.embed(&texts).await?;

        if let Some(bad) = vectors.iter().find(|v| v.len() != snapshot.dimensions()) {
            error!(
                collection,
                expected = snapshot.dimensions(),
                actual = bad.len(),
                "embedding dimension mismatch"
            );
            return Err(RagError::backend(
                self.embedder.model_id(),
                format!(
                    "embedding has {} dimensions, collection '{collection}' expects {}",
                    bad.len(),
                    snapshot.dimensions()
                ),
            ));
        }

        let entries: Vec<StoredEntry> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| StoredEntry {
                id: uuid::Uuid::new_v4().to_string(),
                vector,
                chunk,
            })
            .collect();
        let ids: Vec<String> = entries.iter().map(|e| e.id.clone()).collect();

        let info = self.backend.append(collection, entries).await.inspect_err(|e| {
            error!(collection, error = %e, "failed to persist chunks");
        })?;
        info!(collection, added = ids.len(), total = info.len, "added chunks");
        Ok(ids)
    }

    fn check_dimensions(&self, info: &CollectionInfo) -> Result<()> {
        if info.dimensions != self.embedder.dimensions() {
            return Err(RagError::Config(format!(
                "collection '{}' holds {}-dimensional vectors, embedder '{}' produces {}",
                info.name,
                info.dimensions,
                self.embedder.model_id(),
                self.embedder.dimensions()
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for IndexStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexStore")
            .field("embedding_model", &self.embedder.model_id())
            .field("dimensions", &self.embedder.dimensions())
            .finish_non_exhaustive()
    }
}
