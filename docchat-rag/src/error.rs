//! Error types for the `docchat-rag` crate.

use thiserror::Error;

/// Errors that can occur in ingestion, storage, retrieval and answering.
///
/// Every variant names the stage that failed so callers can report it
/// without parsing the message.
#[derive(Debug, Error)]
pub enum RagError {
    /// An uploaded artifact could not be read (undecodable image, corrupt
    /// or encrypted PDF, unreadable archive).
    #[error("Extraction error ({source_id}): {message}")]
    Extraction {
        /// The source identifier of the artifact or archive entry.
        source_id: String,
        /// A description of the failure.
        message: String,
    },

    /// Invalid chunking, search or pipeline parameters.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A collection could not be persisted or its persisted state is unusable.
    #[error("Store error ({collection}): {message}")]
    Store {
        /// The collection being written or read.
        collection: String,
        /// A description of the failure.
        message: String,
    },

    /// No persisted collection exists under the requested name.
    #[error("Collection '{collection}' not found")]
    NotFound {
        /// The requested collection name.
        collection: String,
    },

    /// An external backend (OCR engine, embedding model, LLM API) was
    /// unreachable or rejected the request.
    #[error("Backend error ({backend}): {message}")]
    Backend {
        /// The backend that produced the error.
        backend: String,
        /// A description of the failure.
        message: String,
    },
}

impl RagError {
    pub(crate) fn extraction(source_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Extraction { source_id: source_id.into(), message: message.into() }
    }

    pub(crate) fn store(collection: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Store { collection: collection.into(), message: message.into() }
    }

    pub(crate) fn backend(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Backend { backend: backend.into(), message: message.into() }
    }

    pub(crate) fn not_found(collection: impl Into<String>) -> Self {
        Self::NotFound { collection: collection.into() }
    }

    /// A stable label for the pipeline stage that failed.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Extraction { .. } => "extraction",
            Self::Config(_) => "config",
            Self::Store { .. } => "store",
            Self::NotFound { .. } => "not_found",
            Self::Backend { .. } => "backend",
        }
    }
}

/// A convenience result type for docchat operations.
pub type Result<T> = std::result::Result<T, RagError>;
