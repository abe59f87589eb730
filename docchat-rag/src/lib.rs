//! Document chat over uploaded files.
//!
//! This crate provides:
//! - Extraction of text from images (OCR), PDFs and zip archives
//! - Overlapping character chunking
//! - Embedding and persisted, named vector collections
//! - Maximal-marginal-relevance retrieval
//! - Grounded answers from an OpenAI-compatible chat model
//! - The [`RagPipeline`] tying it together

pub mod chunking;
pub mod collection;
pub mod config;
pub mod conversation;
pub mod document;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod fs_store;
pub mod hashing;
pub mod inmemory;
pub mod llm;
pub mod mmr;
pub mod ocr;
pub mod openai;
pub mod pipeline;
pub mod retriever;
pub mod store;
pub mod synthesizer;
pub mod vectorstore;

pub use chunking::{CharacterSplitter, Chunker, split};
pub use collection::{CollectionInfo, CollectionSnapshot};
pub use config::{
    EmbeddingBackend, EmbeddingConfig, LlmConfig, OcrConfig, RagConfig, RagConfigBuilder,
};
pub use conversation::{ChatTurn, Conversation, TurnRole};
pub use document::{Chunk, Document, RetrievedChunk, StoredEntry};
pub use embedding::{EmbeddingProvider, cosine_similarity};
pub use error::{RagError, Result};
pub use extract::{
    ArtifactKind, Extraction, ExtractionOutcome, Extractor, Upload, sanitize_filename,
};
pub use fs_store::FsVectorStore;
pub use hashing::HashingEmbeddingProvider;
pub use inmemory::InMemoryVectorStore;
pub use llm::{ChatCompletionsClient, ChatMessage, LanguageModel, Role};
pub use ocr::{OcrEngine, TesseractOcr};
pub use openai::OpenAIEmbeddingProvider;
pub use pipeline::{
    Answer, FileReport, FileStatus, IngestReport, PipelineState, RagPipeline, RagPipelineBuilder,
};
pub use retriever::{MmrConfig, Retriever};
pub use store::{CollectionHandle, IndexStore};
pub use synthesizer::AnswerSynthesizer;
pub use vectorstore::{VectorStore, validate_collection_name};
