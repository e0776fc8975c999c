//! Retrieval: fetch the top chunks for the run's query.

use docmuse_shared::Result;
use tracing::{info, instrument};

use crate::contracts::VectorIndex;
use crate::retry::{RetryConfig, with_retry};
use crate::run::AgentRun;

pub const STATUS: &str = "Retrieving relevant information...";

/// Retrieval tuning.
#[derive(Debug, Clone, Copy)]
pub struct RetrievalSettings {
    pub top_k: usize,
    /// Product-catalog runs with fewer hits than this need augmentation.
    pub augmentation_threshold: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            top_k: 5,
            augmentation_threshold: 2,
        }
    }
}

/// Query the index with the run's parameters. An unavailable index is an
/// error; an empty result is not.
pub(crate) async fn query_index(
    index: &dyn VectorIndex,
    run: &AgentRun,
    settings: &RetrievalSettings,
    retry: RetryConfig,
) -> Result<Vec<docmuse_shared::ChunkHit>> {
    with_retry(retry, "index query", || {
        index.query(
            &run.query,
            run.knowledge_base,
            settings.top_k,
            run.document_scope.as_deref(),
        )
    })
    .await
}

/// Fill `retrieved_chunks` and decide whether augmentation is needed.
#[instrument(skip_all, fields(kb = %run.knowledge_base, scoped = run.document_scope.is_some()))]
pub async fn retrieve(
    index: &dyn VectorIndex,
    run: &mut AgentRun,
    settings: &RetrievalSettings,
    retry: RetryConfig,
) -> Result<()> {
    let hits = query_index(index, run, settings, retry).await?;
    run.augmentation_needed =
        run.knowledge_base.is_product_catalog() && hits.len() < settings.augmentation_threshold;
    run.retrieved_chunks = hits;

    info!(
        chunks = run.retrieved_chunks.len(),
        augmentation_needed = run.augmentation_needed,
        "retrieval completed"
    );
    Ok(())
}
