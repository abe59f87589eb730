//! JSON bodies of the HTTP API.

use docchat_rag::{Answer, IngestReport, RagError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct UploadQuery {
    pub filename: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub filename: String,
    /// One status line per file, e.g. `extracted (2 chunks)`.
    pub statuses: Vec<String>,
    pub chunks_added: usize,
}

impl From<IngestReport> for UploadResponse {
    fn from(report: IngestReport) -> Self {
        Self {
            statuses: report.statuses(),
            chunks_added: report.chunk_ids.len(),
            filename: report.filename,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub query: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRef {
    pub source: String,
    pub chunk_index: usize,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub answer: String,
    pub sources: Vec<SourceRef>,
}

impl From<Answer> for ChatResponse {
    fn from(answer: Answer) -> Self {
        Self {
            answer: answer.text,
            sources: answer
                .sources
                .into_iter()
                .map(|s| SourceRef {
                    source: s.chunk.source_id,
                    chunk_index: s.chunk.chunk_index,
                    score: s.score,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub state: docchat_rag::PipelineState,
    pub collection: String,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    /// `extraction`, `config`, `store`, `not_found` or `backend`.
    pub stage: String,
}

impl From<&RagError> for ErrorBody {
    fn from(err: &RagError) -> Self {
        Self { error: err.to_string(), stage: err.stage().to_string() }
    }
}
