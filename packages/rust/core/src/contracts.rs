//! Collaborator contracts consumed by the agent pipeline.
//!
//! The pipeline only talks to storage, the product site and the model
//! backend through these traits, so tests can swap in scripted fakes.

use async_trait::async_trait;
use docmuse_shared::{ChunkHit, DocumentRecord, KnowledgeBase, ProductRecord, Result};
use docmuse_storage::Storage;

/// Ranked chunk lookup, partitioned by knowledge base.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Top `k` chunks for `text`, best first, optionally limited to one document.
    async fn query(
        &self,
        text: &str,
        kb: KnowledgeBase,
        k: usize,
        scope: Option<&str>,
    ) -> Result<Vec<ChunkHit>>;
}

/// Source document lookup, used where requests name a stored document.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, doc_id: &str, kb: KnowledgeBase) -> Result<Option<DocumentRecord>>;
}

/// Slow external acquisition of fresh product records.
///
/// Implementations persist and index what they find before returning, and
/// return only records that were not already known.
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<ProductRecord>>;
}

/// Stateless single-turn text generation.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn invoke(&self, system: &str, user: &str) -> Result<String>;

    /// Whether answers come from the offline demo model.
    fn is_demo(&self) -> bool {
        false
    }
}

#[async_trait]
impl VectorIndex for Storage {
    async fn query(
        &self,
        text: &str,
        kb: KnowledgeBase,
        k: usize,
        scope: Option<&str>,
    ) -> Result<Vec<ChunkHit>> {
        self.query_chunks(text, kb, k, scope).await
    }
}

#[async_trait]
impl DocumentStore for Storage {
    async fn get(&self, doc_id: &str, kb: KnowledgeBase) -> Result<Option<DocumentRecord>> {
        self.get_document(doc_id, kb).await
    }
}
