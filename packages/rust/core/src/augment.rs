//! Augmentation: pull fresh product data when the catalog index is thin.

use docmuse_shared::Result;
use tracing::{info, instrument, warn};

use crate::contracts::{DataSource, VectorIndex};
use crate::events::{Event, ProgressSink};
use crate::retrieval::{RetrievalSettings, query_index};
use crate::retry::{RetryConfig, with_retry};
use crate::run::AgentRun;

pub const STATUS: &str = "Searching for up-to-date product information...";

/// Shown when the product search gave up and the run carries on without it.
pub const UNAVAILABLE_STATUS: &str =
    "Product search is unavailable right now. Continuing with existing information...";

pub fn found_status(count: usize) -> String {
    format!("Found {count} relevant products. Analyzing...")
}

/// Search for products and, if any are new, re-run the index query.
///
/// Always clears `augmentation_needed`. A failed product search degrades to
/// a status warning; a failed re-query is a retrieval failure.
#[instrument(skip_all, fields(query = %run.query))]
pub async fn augment(
    source: &dyn DataSource,
    index: &dyn VectorIndex,
    run: &mut AgentRun,
    settings: &RetrievalSettings,
    retry: RetryConfig,
    progress: &dyn ProgressSink,
) -> Result<()> {
    run.augmentation_needed = false;
    run.augmented = true;

    let products = match with_retry(retry, "product search", || source.search(&run.query)).await {
        Ok(products) => products,
        Err(e) => {
            warn!(error = %e, "product search failed, keeping original results");
            progress.emit(Event::status(UNAVAILABLE_STATUS));
            return Ok(());
        }
    };

    if products.is_empty() {
        info!("product search found nothing new");
        return Ok(());
    }

    progress.emit(Event::status(found_status(products.len())));
    run.retrieved_chunks = query_index(index, run, settings, retry).await?;
    info!(
        products = products.len(),
        chunks = run.retrieved_chunks.len(),
        "re-retrieved after augmentation"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeIndex, FakeSource, RecordingSink, hit};
    use docmuse_shared::KnowledgeBase;

    fn thin_run() -> AgentRun {
        let mut run = AgentRun::new(KnowledgeBase::Supplements, "sleep support", None);
        run.retrieved_chunks = vec![hit("old", "old product")];
        run.augmentation_needed = true;
        run
    }

    #[tokio::test]
    async fn new_products_refresh_chunks() {
        let index = FakeIndex::with_hits(vec![hit("a", "new a"), hit("b", "new b")]);
        let source = FakeSource::returning(2);
        let sink = RecordingSink::default();
        let mut run = thin_run();

        augment(&source, &index, &mut run, &RetrievalSettings::default(), RetryConfig::none(), &sink)
            .await
            .unwrap();

        assert!(!run.augmentation_needed);
        assert_eq!(run.retrieved_chunks.len(), 2);
        assert_eq!(index.query_count(), 1);
        assert_eq!(sink.statuses(), vec![found_status(2)]);
    }

    #[tokio::test]
    async fn nothing_found_keeps_original_results() {
        let index = FakeIndex::with_hits(vec![]);
        let source = FakeSource::returning(0);
        let sink = RecordingSink::default();
        let mut run = thin_run();

        augment(&source, &index, &mut run, &RetrievalSettings::default(), RetryConfig::none(), &sink)
            .await
            .unwrap();

        assert!(!run.augmentation_needed);
        assert_eq!(run.retrieved_chunks[0].id, "old");
        assert_eq!(index.query_count(), 0);
        assert!(sink.statuses().is_empty());
    }

    #[tokio::test]
    async fn search_failure_degrades_to_warning() {
        let index = FakeIndex::with_hits(vec![]);
        let source = FakeSource::failing();
        let sink = RecordingSink::default();
        let mut run = thin_run();
        let retry = RetryConfig {
            max_attempts: 3,
            base_delay: std::time::Duration::from_millis(1),
        };

        augment(&source, &index, &mut run, &RetrievalSettings::default(), retry, &sink)
            .await
            .unwrap();

        assert_eq!(source.call_count(), 3);
        assert!(!run.augmentation_needed);
        assert_eq!(run.retrieved_chunks.len(), 1);
        assert_eq!(sink.statuses(), vec![UNAVAILABLE_STATUS.to_string()]);
    }
}
