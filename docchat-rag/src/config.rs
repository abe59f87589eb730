//! Configuration for the docchat pipeline.
//!
//! [`RagConfig`] is built either through [`RagConfig::builder`] or from
//! `DOCCHAT_*` environment variables with [`RagConfig::from_env`]. Both paths
//! end in the same validation.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::chunking::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::extract::{ArchiveLimits, DEFAULT_MAX_ARCHIVE_BYTES, DEFAULT_MAX_ENTRY_BYTES};
use crate::hashing::{DEFAULT_HASHING_DIMENSIONS, HashingEmbeddingProvider};
use crate::llm::{ChatCompletionsClient, DEFAULT_CHAT_MODEL, GROQ_API_BASE};
use crate::ocr::{DEFAULT_OCR_LANGUAGE, TesseractOcr};
use crate::openai::{
    DEFAULT_EMBEDDING_DIMENSIONS, DEFAULT_EMBEDDING_MODEL, OPENAI_API_BASE,
    OpenAIEmbeddingProvider,
};
use crate::retriever::{DEFAULT_FETCH_K, DEFAULT_MMR_LAMBDA, DEFAULT_TOP_K};
use crate::vectorstore::validate_collection_name;

/// Collection used when none is configured.
pub const DEFAULT_COLLECTION: &str = "my_test_app_data";

/// Data directory used when none is configured.
pub const DEFAULT_DATA_DIR: &str = "./docchat-data";

/// Which embedding backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// Local feature hashing, no network access.
    #[default]
    Hashing,
    /// An OpenAI-compatible `/embeddings` endpoint.
    OpenAI,
}

impl FromStr for EmbeddingBackend {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hashing" => Ok(Self::Hashing),
            "openai" => Ok(Self::OpenAI),
            other => Err(RagError::Config(format!(
                "unknown embedding provider '{other}' (expected 'hashing' or 'openai')"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingBackend,
    /// Model name for remote providers; defaults per provider when unset.
    pub model: Option<String>,
    /// Vector dimensionality; defaults per provider when unset.
    pub dimensions: Option<usize>,
    pub base_url: String,
    #[serde(skip_serializing, default)]
    pub api_key: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingBackend::Hashing,
            model: None,
            dimensions: None,
            base_url: OPENAI_API_BASE.to_string(),
            api_key: None,
        }
    }
}

impl EmbeddingConfig {
    /// The dimensionality the configured provider will produce.
    pub fn effective_dimensions(&self) -> usize {
        self.dimensions.unwrap_or(match self.provider {
            EmbeddingBackend::Hashing => DEFAULT_HASHING_DIMENSIONS,
            EmbeddingBackend::OpenAI => DEFAULT_EMBEDDING_DIMENSIONS,
        })
    }

    /// Instantiate the configured provider.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Config`] when the OpenAI provider is selected
    /// without an API key, or the dimensions are zero.
    pub fn build_provider(&self) -> Result<Arc<dyn EmbeddingProvider>> {
        match self.provider {
            EmbeddingBackend::Hashing => {
                Ok(Arc::new(HashingEmbeddingProvider::new(self.effective_dimensions())?))
            }
            EmbeddingBackend::OpenAI => {
                let api_key = self.api_key.clone().ok_or_else(|| {
                    RagError::Config(
                        "the openai embedding provider needs DOCCHAT_EMBEDDING_API_KEY \
                         or OPENAI_API_KEY"
                            .to_string(),
                    )
                })?;
                let mut provider = OpenAIEmbeddingProvider::new(api_key)?
                    .with_base_url(&self.base_url)
                    .with_model(self.model.as_deref().unwrap_or(DEFAULT_EMBEDDING_MODEL));
                if let Some(dimensions) = self.dimensions {
                    provider = provider.with_dimensions(dimensions);
                }
                Ok(Arc::new(provider))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    #[serde(skip_serializing, default)]
    pub api_key: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: GROQ_API_BASE.to_string(),
            model: DEFAULT_CHAT_MODEL.to_string(),
            temperature: 0.0,
            api_key: None,
        }
    }
}

impl LlmConfig {
    pub fn build_client(&self) -> ChatCompletionsClient {
        ChatCompletionsClient::new(self.api_key.clone())
            .with_base_url(&self.base_url)
            .with_model(&self.model)
            .with_temperature(self.temperature)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrConfig {
    pub tesseract_path: PathBuf,
    pub language: String,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self { tesseract_path: PathBuf::from("tesseract"), language: DEFAULT_OCR_LANGUAGE.into() }
    }
}

impl OcrConfig {
    pub fn build_engine(&self) -> TesseractOcr {
        TesseractOcr::new(&self.tesseract_path, &self.language)
    }
}

/// Configuration parameters for the docchat pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RagConfig {
    /// Collection that uploads go into and queries read from.
    pub collection: String,
    /// Root for persisted collections and kept uploads.
    pub data_dir: PathBuf,
    /// Maximum chunk size in characters.
    pub chunk_size: usize,
    /// Number of overlapping characters between consecutive chunks.
    pub chunk_overlap: usize,
    /// Number of chunks handed to the language model.
    pub top_k: usize,
    /// Size of the candidate pool for MMR.
    pub fetch_k: usize,
    /// MMR relevance/diversity trade-off in `[0, 1]`.
    pub mmr_lambda: f32,
    /// Keep a copy of every upload under `<data_dir>/uploads/`.
    pub keep_uploads: bool,
    /// Largest uncompressed archive entry that will be read.
    pub max_entry_bytes: u64,
    /// Largest uncompressed total read from one archive.
    pub max_archive_bytes: u64,
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
    pub ocr: OcrConfig,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            collection: DEFAULT_COLLECTION.to_string(),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            top_k: DEFAULT_TOP_K,
            fetch_k: DEFAULT_FETCH_K,
            mmr_lambda: DEFAULT_MMR_LAMBDA,
            keep_uploads: true,
            max_entry_bytes: DEFAULT_MAX_ENTRY_BYTES,
            max_archive_bytes: DEFAULT_MAX_ARCHIVE_BYTES,
            embedding: EmbeddingConfig::default(),
            llm: LlmConfig::default(),
            ocr: OcrConfig::default(),
        }
    }
}

impl RagConfig {
    /// Create a new builder for constructing a [`RagConfig`].
    pub fn builder() -> RagConfigBuilder {
        RagConfigBuilder::default()
    }

    /// Read the configuration from `DOCCHAT_*` environment variables.
    ///
    /// Unset variables keep their defaults. API keys fall back to
    /// `OPENAI_API_KEY` and `GROQ_API_KEY`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Config`] for unparsable values or an invalid
    /// combination (see [`RagConfigBuilder::build`]).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Self::default();

        if let Some(v) = get("DOCCHAT_COLLECTION") {
            config.collection = v;
        }
        if let Some(v) = get("DOCCHAT_DATA_DIR") {
            config.data_dir = PathBuf::from(v);
        }
        if let Some(v) = get("DOCCHAT_CHUNK_SIZE") {
            config.chunk_size = parse("DOCCHAT_CHUNK_SIZE", &v)?;
        }
        if let Some(v) = get("DOCCHAT_CHUNK_OVERLAP") {
            config.chunk_overlap = parse("DOCCHAT_CHUNK_OVERLAP", &v)?;
        }
        if let Some(v) = get("DOCCHAT_TOP_K") {
            config.top_k = parse("DOCCHAT_TOP_K", &v)?;
        }
        if let Some(v) = get("DOCCHAT_FETCH_K") {
            config.fetch_k = parse("DOCCHAT_FETCH_K", &v)?;
        }
        if let Some(v) = get("DOCCHAT_MMR_LAMBDA") {
            config.mmr_lambda = parse("DOCCHAT_MMR_LAMBDA", &v)?;
        }
        if let Some(v) = get("DOCCHAT_KEEP_UPLOADS") {
            config.keep_uploads = parse_bool("DOCCHAT_KEEP_UPLOADS", &v)?;
        }
        if let Some(v) = get("DOCCHAT_MAX_ENTRY_BYTES") {
            config.max_entry_bytes = parse("DOCCHAT_MAX_ENTRY_BYTES", &v)?;
        }
        if let Some(v) = get("DOCCHAT_MAX_ARCHIVE_BYTES") {
            config.max_archive_bytes = parse("DOCCHAT_MAX_ARCHIVE_BYTES", &v)?;
        }

        if let Some(v) = get("DOCCHAT_EMBEDDING_PROVIDER") {
            config.embedding.provider = v.parse()?;
        }
        config.embedding.model = get("DOCCHAT_EMBEDDING_MODEL");
        if let Some(v) = get("DOCCHAT_EMBEDDING_DIMENSIONS") {
            config.embedding.dimensions = Some(parse("DOCCHAT_EMBEDDING_DIMENSIONS", &v)?);
        }
        if let Some(v) = get("DOCCHAT_EMBEDDING_BASE_URL") {
            config.embedding.base_url = v;
        }
        config.embedding.api_key =
            get("DOCCHAT_EMBEDDING_API_KEY").or_else(|| get("OPENAI_API_KEY"));

        if let Some(v) = get("DOCCHAT_LLM_BASE_URL") {
            config.llm.base_url = v;
        }
        if let Some(v) = get("DOCCHAT_LLM_MODEL") {
            config.llm.model = v;
        }
        config.llm.api_key = get("DOCCHAT_LLM_API_KEY").or_else(|| get("GROQ_API_KEY"));

        if let Some(v) = get("DOCCHAT_TESSERACT") {
            config.ocr.tesseract_path = PathBuf::from(v);
        }
        if let Some(v) = get("DOCCHAT_OCR_LANG") {
            config.ocr.language = v;
        }

        RagConfigBuilder { config }.build()
    }

    /// Check the invariants enforced by [`RagConfigBuilder::build`].
    pub fn validate(&self) -> Result<()> {
        validate_collection_name(&self.collection)?;
        if self.chunk_size == 0 {
            return Err(RagError::Config("chunk_size must be greater than zero".to_string()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(RagError::Config(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.top_k == 0 {
            return Err(RagError::Config("top_k must be greater than zero".to_string()));
        }
        if !(0.0..=1.0).contains(&self.mmr_lambda) {
            return Err(RagError::Config(format!(
                "mmr_lambda must be within [0, 1], got {}",
                self.mmr_lambda
            )));
        }
        if self.max_entry_bytes == 0 || self.max_archive_bytes == 0 {
            return Err(RagError::Config("archive size limits must be greater than zero".into()));
        }
        if self.embedding.dimensions == Some(0) {
            return Err(RagError::Config("embedding dimensions must be greater than zero".into()));
        }
        Ok(())
    }

    pub fn archive_limits(&self) -> ArchiveLimits {
        ArchiveLimits {
            max_entry_bytes: self.max_entry_bytes,
            max_total_bytes: self.max_archive_bytes,
        }
    }

    /// Where kept uploads are written.
    pub fn uploads_dir(&self) -> PathBuf {
        self.data_dir.join("uploads")
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e| RagError::Config(format!("invalid {key} '{value}': {e}")))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(RagError::Config(format!("invalid {key} '{value}': expected true or false"))),
    }
}

/// Builder for constructing a validated [`RagConfig`].
#[derive(Debug, Clone, Default)]
pub struct RagConfigBuilder {
    config: RagConfig,
}

impl RagConfigBuilder {
    /// Start from an existing configuration (e.g. one read from the environment).
    pub fn from_config(config: RagConfig) -> Self {
        Self { config }
    }

    pub fn collection(mut self, name: impl Into<String>) -> Self {
        self.config.collection = name.into();
        self
    }

    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.data_dir = dir.into();
        self
    }

    /// Set the maximum chunk size in characters.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    /// Set the overlap between consecutive chunks in characters.
    pub fn chunk_overlap(mut self, overlap: usize) -> Self {
        self.config.chunk_overlap = overlap;
        self
    }

    /// Set the number of chunks handed to the language model.
    pub fn top_k(mut self, k: usize) -> Self {
        self.config.top_k = k;
        self
    }

    pub fn fetch_k(mut self, fetch_k: usize) -> Self {
        self.config.fetch_k = fetch_k;
        self
    }

    pub fn mmr_lambda(mut self, lambda: f32) -> Self {
        self.config.mmr_lambda = lambda;
        self
    }

    pub fn keep_uploads(mut self, keep: bool) -> Self {
        self.config.keep_uploads = keep;
        self
    }

    /// Cap the uncompressed size of single archive entries.
    pub fn max_entry_bytes(mut self, bytes: u64) -> Self {
        self.config.max_entry_bytes = bytes;
        self
    }

    pub fn max_archive_bytes(mut self, bytes: u64) -> Self {
        self.config.max_archive_bytes = bytes;
        self
    }

    pub fn embedding(mut self, embedding: EmbeddingConfig) -> Self {
        self.config.embedding = embedding;
        self
    }

    pub fn llm(mut self, llm: LlmConfig) -> Self {
        self.config.llm = llm;
        self
    }

    pub fn ocr(mut self, ocr: OcrConfig) -> Self {
        self.config.ocr = ocr;
        self
    }

    /// Build the [`RagConfig`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Config`] if:
    /// - the collection name is not `[A-Za-z0-9_-]{1,64}`
    /// - `chunk_size == 0` or `chunk_overlap >= chunk_size`
    /// - `top_k == 0`
    /// - `mmr_lambda` is outside `[0, 1]`
    /// - an archive size limit is zero
    /// - the embedding dimensions are set to zero
    pub fn build(self) -> Result<RagConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
