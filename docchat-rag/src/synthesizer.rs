//! Grounded answer synthesis.

use std::sync::Arc;

use tracing::{debug, error};

use crate::document::RetrievedChunk;
use crate::error::Result;
use crate::llm::{ChatMessage, LanguageModel};

/// Instruction placed ahead of the retrieved context in the system message.
pub const SYSTEM_INSTRUCTION: &str = "You are an assistant for question-answering tasks. \
Use the following pieces of retrieved context to answer the question. \
If the context does not contain the answer, say that you don't know. \
Give the most relevant and direct answer based on the retrieved context, \
focus on accuracy and clarity, and keep the answer concise.";

/// Phrases answers from retrieved chunks with a [`LanguageModel`].
#[derive(Clone)]
pub struct AnswerSynthesizer {
    llm: Arc<dyn LanguageModel>,
}

impl AnswerSynthesizer {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self { llm }
    }

    pub fn llm(&self) -> &Arc<dyn LanguageModel> {
        &self.llm
    }

    /// Ask the model to answer `question` from `context` alone.
    ///
    /// Backend failures are returned as-is; no fallback answer is invented.
    pub async fn answer(&self, question: &str, context: &[RetrievedChunk]) -> Result<String> {
        let messages = build_messages(question, context);
        debug!(backend = self.llm.name(), context_chunks = context.len(), "synthesizing answer");
        self.llm.complete(&messages).await.inspect_err(|e| {
            error!(backend = self.llm.name(), error = %e, "answer synthesis failed");
        })
    }
}

impl std::fmt::Debug for AnswerSynthesizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnswerSynthesizer").field("llm", &self.llm.name()).finish()
    }
}

/// One system message (instruction, blank line, chunk texts separated by
/// blank lines) followed by the question as the user message.
pub fn build_messages(question: &str, context: &[RetrievedChunk]) -> Vec<ChatMessage> {
    let joined = context.iter().map(|c| c.chunk.text.as_str()).collect::<Vec<_>>().join("\n\n");
    vec![
        ChatMessage::system(format!("{SYSTEM_INSTRUCTION}\n\n{joined}")),
        ChatMessage::user(question),
    ]
}
