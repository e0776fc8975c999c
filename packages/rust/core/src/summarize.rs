//! Summarization: one model digest per retrieved chunk.

use futures::stream;
use futures::{FutureExt, StreamExt};
use tracing::{info, instrument, warn};

use docmuse_shared::{ChunkHit, KnowledgeBase};

use crate::contracts::LanguageModel;
use crate::prompts;
use crate::retry::{RetryConfig, with_retry};
use crate::run::{AgentRun, DigestStatus, Summary};

pub const STATUS: &str = "Analyzing retrieved information...";

/// Characters of source text kept when a digest falls back to the original.
const DEGRADED_DIGEST_CHARS: usize = 500;

/// Summarize every retrieved chunk, at most `concurrency` at a time.
///
/// Output order always matches `retrieved_chunks`. A chunk whose model call
/// keeps failing gets a degraded digest and bumps `partial_failures`.
#[instrument(skip_all, fields(kb = %run.knowledge_base, chunks = run.retrieved_chunks.len()))]
pub async fn summarize(
    model: &dyn LanguageModel,
    run: &mut AgentRun,
    concurrency: usize,
    retry: RetryConfig,
) {
    run.summarized = true;
    if run.retrieved_chunks.is_empty() {
        run.summaries.clear();
        return;
    }

    let kb = run.knowledge_base;
    let instruction = prompts::summary_instruction(kb);
    // Boxed up front so the run future stays `Send` for any borrow lifetime.
    let pending: Vec<_> = run
        .retrieved_chunks
        .iter()
        .map(|chunk| summarize_chunk(model, &instruction, kb, chunk, retry).boxed())
        .collect();
    let summaries: Vec<Summary> = stream::iter(pending)
        .buffered(concurrency.max(1))
        .collect()
        .await;

    let degraded = summaries
        .iter()
        .filter(|s| s.status == DigestStatus::Degraded)
        .count();
    run.partial_failures += degraded;
    run.summaries = summaries;

    info!(summaries = run.summaries.len(), degraded, "summarization completed");
}

async fn summarize_chunk(
    model: &dyn LanguageModel,
    instruction: &str,
    kb: KnowledgeBase,
    chunk: &ChunkHit,
    retry: RetryConfig,
) -> Summary {
    let request = prompts::summary_request(&chunk.text);
    let (digest, status) =
        match with_retry(retry, "chunk summary", || model.invoke(instruction, &request)).await {
            Ok(digest) => (digest, DigestStatus::Complete),
            Err(e) => {
                warn!(chunk = %chunk.id, %kb, error = %e, "summary failed, using source excerpt");
                (degraded_digest(&chunk.text), DigestStatus::Degraded)
            }
        };

    Summary {
        source_id: chunk.id.clone(),
        original_text: chunk.text.clone(),
        digest,
        metadata: chunk.metadata.clone(),
        status,
    }
}

fn degraded_digest(text: &str) -> String {
    let mut excerpt: String = text.chars().take(DEGRADED_DIGEST_CHARS).collect();
    if excerpt.len() < text.len() {
        excerpt.push_str("...");
    }
    excerpt
}
