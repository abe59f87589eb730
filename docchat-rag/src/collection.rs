//! Collection snapshots and the per-collection append slot shared by the
//! vector store backends.

use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::document::StoredEntry;
use crate::error::Result;

/// Summary of a collection, without its entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionInfo {
    /// Collection name.
    pub name: String,
    /// Dimensionality of every vector in the collection.
    pub dimensions: usize,
    /// Identifier of the embedding model that produced the vectors.
    pub embedding_model: String,
    /// Number of stored entries.
    pub len: usize,
}

/// An immutable view of a collection at one point in time.
///
/// Entries are kept in insertion order.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionSnapshot {
    name: String,
    dimensions: usize,
    embedding_model: String,
    entries: Vec<StoredEntry>,
}

impl CollectionSnapshot {
    /// Create an empty snapshot.
    pub fn empty(
        name: impl Into<String>,
        dimensions: usize,
        embedding_model: impl Into<String>,
    ) -> Self {
        Self::from_entries(name, dimensions, embedding_model, Vec::new())
    }

    /// Create a snapshot holding the given entries.
    pub fn from_entries(
        name: impl Into<String>,
        dimensions: usize,
        embedding_model: impl Into<String>,
        entries: Vec<StoredEntry>,
    ) -> Self {
        Self { name: name.into(), dimensions, embedding_model: embedding_model.into(), entries }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn embedding_model(&self) -> &str {
        &self.embedding_model
    }

    /// Entries in insertion order.
    pub fn entries(&self) -> &[StoredEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn info(&self) -> CollectionInfo {
        CollectionInfo {
            name: self.name.clone(),
            dimensions: self.dimensions,
            embedding_model: self.embedding_model.clone(),
            len: self.entries.len(),
        }
    }

    pub(crate) fn with_appended(&self, entries: Vec<StoredEntry>) -> Self {
        let mut next = self.clone();
        next.entries.extend(entries);
        next
    }
}

/// Holds the visible state of one collection and serializes its appends.
///
/// Readers clone the current `Arc<CollectionSnapshot>`; an append builds the
/// next snapshot, persists it, and only then swaps it in. A failed persist
/// leaves the visible state untouched.
#[derive(Debug)]
pub(crate) struct CollectionSlot {
    append_lock: Mutex<()>,
    current: RwLock<Arc<CollectionSnapshot>>,
}

impl CollectionSlot {
    pub(crate) fn new(snapshot: CollectionSnapshot) -> Self {
        Self { append_lock: Mutex::new(()), current: RwLock::new(Arc::new(snapshot)) }
    }

    pub(crate) async fn snapshot(&self) -> Arc<CollectionSnapshot> {
        self.current.read().await.clone()
    }

    /// Append entries, calling `persist` with the would-be next snapshot.
    ///
    /// Callers that must survive cancellation run this inside a spawned task.
    pub(crate) async fn append<F, Fut>(
        &self,
        entries: Vec<StoredEntry>,
        persist: F,
    ) -> Result<Arc<CollectionSnapshot>>
    where
        F: FnOnce(Arc<CollectionSnapshot>) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let _guard = self.append_lock.lock().await;

        let current = self.snapshot().await;
        let next = Arc::new(current.with_appended(entries));
        persist(next.clone()).await?;

        *self.current.write().await = next.clone();
        Ok(next)
    }

    /// Replace the visible snapshot with whatever `next` derives from the
    /// current one, serialized with appends. An error leaves it untouched.
    pub(crate) async fn update<F, Fut>(&self, next: F) -> Result<Arc<CollectionSnapshot>>
    where
        F: FnOnce(Arc<CollectionSnapshot>) -> Fut,
        Fut: Future<Output = Result<Arc<CollectionSnapshot>>>,
    {
        let _guard = self.append_lock.lock().await;

        let next = next(self.snapshot().await).await?;
        *self.current.write().await = next.clone();
        Ok(next)
    }
}
