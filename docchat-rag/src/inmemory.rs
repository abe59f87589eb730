//! In-memory vector store.
//!
//! This module provides [`InMemoryVectorStore`], a non-durable backend with
//! the same semantics as the file-system store. It is suitable for tests,
//! demos and throwaway sessions.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::collection::{CollectionInfo, CollectionSlot, CollectionSnapshot};
use crate::document::StoredEntry;
use crate::error::{RagError, Result};
use crate::vectorstore::{VectorStore, validate_collection_name};

/// An in-memory vector store.
///
/// Collections live in a `HashMap` protected by a `tokio::sync::RwLock`;
/// "persisted" means "present in the map" for the lifetime of the store.
///
/// # Example
///
/// ```rust,ignore
/// use docchat_rag::{InMemoryVectorStore, VectorStore};
///
/// let store = InMemoryVectorStore::new();
/// store.create_or_open("docs", 384, "hashing-v1-384").await?;
/// ```
#[derive(Debug, Default)]
pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, Arc<CollectionSlot>>>,
}

impl InMemoryVectorStore {
    /// Create a new empty in-memory vector store.
    pub fn new() -> Self {
        Self::default()
    }

    async fn slot(&self, name: &str) -> Result<Arc<CollectionSlot>> {
        self.collections.read().await.get(name).cloned().ok_or_else(|| RagError::not_found(name))
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn create_or_open(
        &self,
        name: &str,
        dimensions: usize,
        embedding_model: &str,
    ) -> Result<CollectionInfo> {
        validate_collection_name(name)?;
        let mut collections = self.collections.write().await;
        let slot = collections
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(CollectionSlot::new(CollectionSnapshot::empty(
                    name,
                    dimensions,
                    embedding_model,
                )))
            })
            .clone();
        drop(collections);

        let info = slot.snapshot().await.info();
        if info.dimensions != dimensions {
            return Err(RagError::Config(format!(
                "collection '{name}' holds {}-dimensional vectors, embedder produces {dimensions}",
                info.dimensions
            )));
        }
        Ok(info)
    }

    async fn load(&self, name: &str) -> Result<CollectionInfo> {
        validate_collection_name(name)?;
        Ok(self.slot(name).await?.snapshot().await.info())
    }

    async fn append(&self, name: &str, entries: Vec<StoredEntry>) -> Result<CollectionInfo> {
        let slot = self.slot(name).await?;
        let next = slot.append(entries, |_| async { Ok(()) }).await?;
        Ok(next.info())
    }

    async fn snapshot(&self, name: &str) -> Result<Arc<CollectionSnapshot>> {
        Ok(self.slot(name).await?.snapshot().await)
    }

    async fn list(&self) -> Result<Vec<CollectionInfo>> {
        let slots: Vec<Arc<CollectionSlot>> =
            self.collections.read().await.values().cloned().collect();
        let mut infos = Vec::with_capacity(slots.len());
        for slot in slots {
            infos.push(slot.snapshot().await.info());
        }
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(infos)
    }
}
