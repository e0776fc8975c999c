//! Per-run pipeline state.

use docmuse_shared::{ChunkHit, KnowledgeBase};
use serde::Serialize;

/// Whether a digest came from the model or fell back to the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DigestStatus {
    Complete,
    /// The model call failed after retries; `digest` is truncated source text.
    Degraded,
}

/// One summarized chunk, in retrieval order.
#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub source_id: String,
    pub original_text: String,
    pub digest: String,
    pub metadata: serde_json::Value,
    pub status: DigestStatus,
}

/// State of a single query execution.
///
/// Created empty, filled in by each step in order, and never persisted.
#[derive(Debug, Clone)]
pub struct AgentRun {
    pub knowledge_base: KnowledgeBase,
    pub query: String,
    pub document_scope: Option<String>,
    pub retrieved_chunks: Vec<ChunkHit>,
    /// Product-catalog retrieval came back too thin.
    pub augmentation_needed: bool,
    /// Augmentation ran (successfully or not) for this run.
    pub augmented: bool,
    pub summaries: Vec<Summary>,
    /// Summarization has run, even if it had nothing to do.
    pub summarized: bool,
    /// Chunks whose digest degraded to source text.
    pub partial_failures: usize,
    pub final_answer: Option<String>,
}

impl AgentRun {
    pub fn new(
        knowledge_base: KnowledgeBase,
        query: impl Into<String>,
        document_scope: Option<String>,
    ) -> Self {
        Self {
            knowledge_base,
            query: query.into(),
            document_scope,
            retrieved_chunks: Vec::new(),
            augmentation_needed: false,
            augmented: false,
            summaries: Vec::new(),
            summarized: false,
            partial_failures: 0,
            final_answer: None,
        }
    }
}
