//! Query-time retrieval with maximal marginal relevance.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::document::RetrievedChunk;
use crate::embedding::cosine_similarity;
use crate::error::{RagError, Result};
use crate::mmr::{MmrCandidate, mmr_select};
use crate::store::IndexStore;

/// Default number of chunks handed to the answer synthesizer.
pub const DEFAULT_TOP_K: usize = 5;

/// Default number of nearest candidates MMR chooses from.
pub const DEFAULT_FETCH_K: usize = 20;

/// Default MMR trade-off between relevance and diversity.
pub const DEFAULT_MMR_LAMBDA: f32 = 0.5;

/// Parameters of the MMR re-ranking step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MmrConfig {
    /// Size of the nearest-neighbour candidate pool. Raised to `k` when smaller.
    pub fetch_k: usize,
    /// 1.0 is pure relevance, 0.0 pure diversity.
    pub lambda: f32,
}

impl Default for MmrConfig {
    fn default() -> Self {
        Self { fetch_k: DEFAULT_FETCH_K, lambda: DEFAULT_MMR_LAMBDA }
    }
}

impl MmrConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.lambda) {
            return Err(RagError::Config(format!(
                "mmr lambda must be within [0, 1], got {}",
                self.lambda
            )));
        }
        Ok(())
    }
}

/// Finds the chunks of a collection most useful for answering a query.
#[derive(Debug, Clone)]
pub struct Retriever {
    store: IndexStore,
    mmr: MmrConfig,
}

impl Retriever {
    /// Create a retriever over `store`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Config`] if `mmr.lambda` lies outside `[0, 1]`.
    pub fn new(store: IndexStore, mmr: MmrConfig) -> Result<Self> {
        mmr.validate()?;
        Ok(Self { store, mmr })
    }

    pub fn mmr(&self) -> MmrConfig {
        self.mmr
    }

    /// Return up to `k` chunks of `collection` for `query`, most relevant first.
    ///
    /// The `fetch_k` chunks closest to the query (cosine similarity, ties in
    /// insertion order) form the candidate pool; MMR then picks `k` of them.
    /// An empty collection yields an empty result.
    ///
    /// # Errors
    ///
    /// - [`RagError::Config`] when `k` is zero
    /// - [`RagError::NotFound`] when the collection does not exist
    /// - any error from embedding the query
    pub async fn search(
        &self,
        collection: &str,
        query: &str,
        k: usize,
    ) -> Result<Vec<RetrievedChunk>> {
        if k == 0 {
            return Err(RagError::Config("k must be greater than zero".to_string()));
        }

        let snapshot = self.store.snapshot(collection).await?;
        if snapshot.is_empty() {
            debug!(collection, "search on empty collection");
            return Ok(Vec::new());
        }

        let query_vector = self
            .store
            .embed(&[query])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                RagError::backend(self.store.embedder().model_id(), "no query embedding")
            })?;

        let mut scored: Vec<(usize, f32)> = snapshot
            .entries()
            .iter()
            .enumerate()
            .map(|(idx, entry)| (idx, cosine_similarity(&query_vector, &entry.vector)))
            .collect();
        // sort_by is stable, so equal scores keep insertion order
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(self.mmr.fetch_k.max(k));

        let candidates: Vec<MmrCandidate<'_>> = scored
            .iter()
            .map(|&(idx, relevance)| MmrCandidate {
                relevance,
                vector: &snapshot.entries()[idx].vector,
            })
            .collect();
        let picked = mmr_select(&candidates, k, self.mmr.lambda);

        let results: Vec<RetrievedChunk> = picked
            .into_iter()
            .map(|pos| {
                let (idx, score) = scored[pos];
                let entry = &snapshot.entries()[idx];
                RetrievedChunk { id: entry.id.clone(), chunk: entry.chunk.clone(), score }
            })
            .collect();

        debug!(
            collection,
            candidates = candidates.len(),
            returned = results.len(),
            "retrieved chunks"
        );
        Ok(results)
    }
}
