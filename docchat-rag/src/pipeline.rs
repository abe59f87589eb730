//! Pipeline orchestrator.
//!
//! The [`RagPipeline`] runs the two user-facing workflows:
//!
//! - ingest: classify → extract → split → embed and store
//! - query: retrieve with MMR → synthesize an answer
//!
//! # Example
//!
//! ```rust,ignore
//! use docchat_rag::{RagConfig, RagPipeline, Upload};
//!
//! let pipeline = RagPipeline::from_config(RagConfig::from_env()?)?;
//! let report = pipeline.ingest(Upload::new("guide.pdf", bytes)).await?;
//! let answer = pipeline.query("what is engineering?").await?;
//! println!("{}", answer.text);
//! ```

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::chunking::{CharacterSplitter, Chunker};
use crate::config::RagConfig;
use crate::document::RetrievedChunk;
use crate::error::{RagError, Result};
use crate::extract::{Extraction, Extractor, Upload};
use crate::fs_store::FsVectorStore;
use crate::llm::LanguageModel;
use crate::retriever::{MmrConfig, Retriever};
use crate::store::IndexStore;
use crate::synthesizer::AnswerSynthesizer;

/// What the pipeline is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    Idle,
    Ingesting,
    Querying,
}

/// Outcome for one file of an upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum FileStatus {
    Extracted { chunks: usize },
    Skipped { reason: String },
    Error { message: String },
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Extracted { chunks } => write!(f, "extracted ({chunks} chunks)"),
            Self::Skipped { reason } => write!(f, "skipped: {reason}"),
            Self::Error { message } => write!(f, "error: {message}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileReport {
    pub source_id: String,
    pub status: FileStatus,
}

/// Result of ingesting one upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    /// The sanitized upload file name.
    pub filename: String,
    /// One entry per extracted, skipped or failed file.
    pub files: Vec<FileReport>,
    /// Ids of the chunks added to the collection.
    pub chunk_ids: Vec<String>,
}

impl IngestReport {
    /// Status lines in file order, e.g. `extracted (3 chunks)`.
    pub fn statuses(&self) -> Vec<String> {
        self.files.iter().map(|f| f.status.to_string()).collect()
    }

    pub fn failed(&self) -> usize {
        self.files.iter().filter(|f| matches!(f.status, FileStatus::Error { .. })).count()
    }
}

/// A synthesized answer and the chunks it was grounded on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<RetrievedChunk>,
}

#[derive(Debug, Default)]
struct Activity {
    ingesting: AtomicUsize,
    querying: AtomicUsize,
    last_error: Mutex<Option<String>>,
}

/// Marks an operation in flight until dropped, including on cancellation.
struct ActivityGuard<'a>(&'a AtomicUsize);

impl<'a> ActivityGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for ActivityGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Activity {
    fn record<T>(&self, result: &Result<T>) {
        if let Err(e) = result {
            *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(e.to_string());
        }
    }
}

/// The document-chat pipeline.
///
/// Construct one via [`RagPipeline::builder()`] or
/// [`RagPipeline::from_config`]. All methods take `&self`; share the
/// pipeline behind an `Arc` to serve concurrent requests.
pub struct RagPipeline {
    config: RagConfig,
    store: IndexStore,
    extractor: Extractor,
    chunker: Arc<dyn Chunker>,
    retriever: Retriever,
    synthesizer: AnswerSynthesizer,
    activity: Activity,
}

impl RagPipeline {
    /// Create a new [`RagPipelineBuilder`].
    pub fn builder() -> RagPipelineBuilder {
        RagPipelineBuilder::default()
    }

    /// Wire up the default components for `config`: the configured
    /// embedder, an [`FsVectorStore`] under `data_dir`, Tesseract OCR and
    /// the chat completions client.
    pub fn from_config(config: RagConfig) -> Result<Self> {
        config.validate()?;
        let store = IndexStore::new(
            config.embedding.build_provider()?,
            Arc::new(FsVectorStore::new(&config.data_dir)),
        );
        let llm = Arc::new(config.llm.build_client());
        Self::builder().config(config).index_store(store).language_model(llm).build()
    }

    /// Return a reference to the pipeline configuration.
    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    pub fn store(&self) -> &IndexStore {
        &self.store
    }

    pub fn state(&self) -> PipelineState {
        if self.activity.ingesting.load(Ordering::SeqCst) > 0 {
            PipelineState::Ingesting
        } else if self.activity.querying.load(Ordering::SeqCst) > 0 {
            PipelineState::Querying
        } else {
            PipelineState::Idle
        }
    }

    /// Message of the most recent failed `ingest` or `query`.
    pub fn last_error(&self) -> Option<String> {
        self.activity.last_error.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Ingest one upload into the configured collection.
    ///
    /// Extraction problems are reported per file in the [`IngestReport`].
    /// Every chunk of the upload is stored in a single append.
    ///
    /// # Errors
    ///
    /// Chunking, embedding and store failures abort the call; nothing from
    /// this upload is stored in that case.
    pub async fn ingest(&self, upload: Upload) -> Result<IngestReport> {
        let _guard = ActivityGuard::enter(&self.activity.ingesting);
        let result = self.run_ingest(upload).await;
        self.activity.record(&result);
        result
    }

    /// Ingest uploads one after another, stopping at the first aborting error.
    pub async fn ingest_batch(&self, uploads: Vec<Upload>) -> Result<Vec<IngestReport>> {
        let mut reports = Vec::with_capacity(uploads.len());
        for upload in uploads {
            reports.push(self.ingest(upload).await?);
        }
        Ok(reports)
    }

    async fn run_ingest(&self, upload: Upload) -> Result<IngestReport> {
        let collection = self.config.collection.as_str();
        self.store.create_or_open(collection).await.inspect_err(|e| {
            error!(collection, error = %e, "cannot open collection");
        })?;

        if self.config.keep_uploads {
            self.keep_upload(&upload).await;
        }

        let outcomes = self.extractor.extract(&upload).await;
        let mut files = Vec::with_capacity(outcomes.len());
        let mut chunks = Vec::new();
        for outcome in outcomes {
            let status = match outcome.extraction {
                Extraction::Extracted(document) => {
                    let document_chunks = self.chunker.chunk(&document);
                    let count = document_chunks.len();
                    chunks.extend(document_chunks);
                    FileStatus::Extracted { chunks: count }
                }
                Extraction::Skipped(reason) => FileStatus::Skipped { reason },
                Extraction::Failed(e) => {
                    warn!(
                        source = %outcome.source_id,
                        stage = e.stage(),
                        error = %e,
                        "extraction failed"
                    );
                    FileStatus::Error { message: e.to_string() }
                }
            };
            files.push(FileReport { source_id: outcome.source_id, status });
        }

        let chunk_ids = self.store.add(collection, chunks).await.inspect_err(|e| {
            error!(
                collection,
                upload = %upload.filename,
                stage = e.stage(),
                error = %e,
                "ingest failed"
            );
        })?;

        info!(
            collection,
            upload = %upload.filename,
            files = files.len(),
            chunks = chunk_ids.len(),
            "ingested upload"
        );
        Ok(IngestReport { filename: upload.filename, files, chunk_ids })
    }

    async fn keep_upload(&self, upload: &Upload) {
        let dir = self.config.uploads_dir();
        let path = dir.join(&upload.filename);
        let result = async {
            tokio::fs::create_dir_all(&dir).await?;
            tokio::fs::write(&path, &upload.bytes).await
        }
        .await;
        if let Err(e) = result {
            warn!(path = %path.display(), error = %e, "could not keep upload");
        }
    }

    /// Answer a question from the configured collection.
    ///
    /// # Errors
    ///
    /// - [`RagError::Config`] for a blank question
    /// - [`RagError::NotFound`] if nothing was ever ingested
    /// - [`RagError::Backend`] when embedding or the language model fails
    pub async fn query(&self, question: &str) -> Result<Answer> {
        let _guard = ActivityGuard::enter(&self.activity.querying);
        let result = self.run_query(question).await;
        self.activity.record(&result);
        result
    }

    async fn run_query(&self, question: &str) -> Result<Answer> {
        let question = question.trim();
        if question.is_empty() {
            return Err(RagError::Config("question must not be empty".to_string()));
        }

        let collection = self.config.collection.as_str();
        let sources =
            self.retriever.search(collection, question, self.config.top_k).await.inspect_err(
                |e| error!(collection, stage = e.stage(), error = %e, "retrieval failed"),
            )?;
        let text = self.synthesizer.answer(question, &sources).await?;

        info!(collection, sources = sources.len(), answer_len = text.len(), "query completed");
        Ok(Answer { text, sources })
    }
}

impl fmt::Debug for RagPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RagPipeline")
            .field("collection", &self.config.collection)
            .field("store", &self.store)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Builder for constructing a [`RagPipeline`].
///
/// `config`, `index_store` and `language_model` are required. The extractor
/// and chunker default to Tesseract OCR with the configured archive limits
/// and a [`CharacterSplitter`] set up from the config.
///
/// # Example
///
/// ```rust,ignore
/// let pipeline = RagPipeline::builder()
///     .config(RagConfig::default())
///     .index_store(IndexStore::new(embedder, Arc::new(InMemoryVectorStore::new())))
///     .language_model(Arc::new(llm))
///     .build()?;
/// ```
#[derive(Default)]
pub struct RagPipelineBuilder {
    config: Option<RagConfig>,
    store: Option<IndexStore>,
    extractor: Option<Extractor>,
    chunker: Option<Arc<dyn Chunker>>,
    language_model: Option<Arc<dyn LanguageModel>>,
}

impl RagPipelineBuilder {
    /// Set the pipeline configuration.
    pub fn config(mut self, config: RagConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn index_store(mut self, store: IndexStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn extractor(mut self, extractor: Extractor) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// Set the document chunker.
    pub fn chunker(mut self, chunker: Arc<dyn Chunker>) -> Self {
        self.chunker = Some(chunker);
        self
    }

    pub fn language_model(mut self, llm: Arc<dyn LanguageModel>) -> Self {
        self.language_model = Some(llm);
        self
    }

    /// Build the [`RagPipeline`], validating that all required fields are set.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Config`] if a required field is missing or the
    /// configuration is invalid.
    pub fn build(self) -> Result<RagPipeline> {
        let config =
            self.config.ok_or_else(|| RagError::Config("config is required".to_string()))?;
        config.validate()?;
        let store = self
            .store
            .ok_or_else(|| RagError::Config("index_store is required".to_string()))?;
        let llm = self
            .language_model
            .ok_or_else(|| RagError::Config("language_model is required".to_string()))?;

        let chunker = match self.chunker {
            Some(chunker) => chunker,
            None => Arc::new(CharacterSplitter::new(config.chunk_size, config.chunk_overlap)?),
        };
        let extractor = self
            .extractor
            .unwrap_or_else(|| {
                Extractor::new(Arc::new(config.ocr.build_engine()))
                    .with_archive_limits(config.archive_limits())
            });
        let retriever = Retriever::new(
            store.clone(),
            MmrConfig { fetch_k: config.fetch_k, lambda: config.mmr_lambda },
        )?;

        Ok(RagPipeline {
            config,
            store,
            extractor,
            chunker,
            retriever,
            synthesizer: AnswerSynthesizer::new(llm),
            activity: Activity::default(),
        })
    }
}
