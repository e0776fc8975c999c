//! Scripted collaborators for pipeline tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use docmuse_shared::{ChunkHit, DocMuseError, KnowledgeBase, ProductRecord, Result};
use parking_lot::Mutex;

use crate::contracts::{DataSource, LanguageModel, VectorIndex};
use crate::events::{Event, ProgressSink};

pub fn hit(id: &str, text: &str) -> ChunkHit {
    ChunkHit {
        id: id.into(),
        document_id: format!("doc-{id}"),
        text: text.into(),
        metadata: serde_json::json!({"chunk": id}),
        distance: 0.5,
    }
}

/// Index returning queued result sets, then repeating the last one.
pub struct FakeIndex {
    responses: Mutex<VecDeque<Result<Vec<ChunkHit>>>>,
    last: Mutex<Vec<ChunkHit>>,
    pub queries: AtomicUsize,
}

impl FakeIndex {
    pub fn with_hits(hits: Vec<ChunkHit>) -> Self {
        Self::scripted(vec![Ok(hits)])
    }

    pub fn scripted(responses: Vec<Result<Vec<ChunkHit>>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            last: Mutex::new(Vec::new()),
            queries: AtomicUsize::new(0),
        }
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VectorIndex for FakeIndex {
    async fn query(
        &self,
        _text: &str,
        _kb: KnowledgeBase,
        k: usize,
        _scope: Option<&str>,
    ) -> Result<Vec<ChunkHit>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let next = self.responses.lock().pop_front();
        match next {
            Some(Ok(hits)) => {
                *self.last.lock() = hits.clone();
                Ok(hits.into_iter().take(k).collect())
            }
            Some(Err(e)) => Err(e),
            None => Ok(self.last.lock().iter().take(k).cloned().collect()),
        }
    }
}

/// Data source returning a fixed number of products, or always failing.
pub struct FakeSource {
    products: usize,
    fail: bool,
    pub calls: AtomicUsize,
}

impl FakeSource {
    pub fn returning(products: usize) -> Self {
        Self {
            products,
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            products: 0,
            fail: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataSource for FakeSource {
    async fn search(&self, query: &str) -> Result<Vec<ProductRecord>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(DocMuseError::Scraper("storefront unreachable".into()));
        }
        Ok((0..self.products)
            .map(|i| ProductRecord {
                id: format!("p{i}"),
                title: format!("{query} product {i}"),
                ..Default::default()
            })
            .collect())
    }
}

/// Model that records every call and answers from a closure.
pub struct FakeModel {
    pub calls: Mutex<Vec<(String, String)>>,
    respond: Box<dyn Fn(&str, &str) -> Result<String> + Send + Sync>,
}

impl FakeModel {
    /// Answers with a short reply derived from the user content.
    pub fn echo() -> Self {
        Self::new(|_, user| Ok(format!("reply to {}", user.len())))
    }

    pub fn new(respond: impl Fn(&str, &str) -> Result<String> + Send + Sync + 'static) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            respond: Box::new(respond),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn systems(&self) -> Vec<String> {
        self.calls.lock().iter().map(|(s, _)| s.clone()).collect()
    }
}

#[async_trait]
impl LanguageModel for FakeModel {
    async fn invoke(&self, system: &str, user: &str) -> Result<String> {
        self.calls.lock().push((system.to_string(), user.to_string()));
        (self.respond)(system, user)
    }
}

/// Sink that records emitted events.
#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<Event>>,
}

impl RecordingSink {
    pub fn statuses(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.kind == crate::events::EventKind::Status)
            .filter_map(|e| e.text().map(str::to_string))
            .collect()
    }
}

impl ProgressSink for RecordingSink {
    fn emit(&self, event: Event) {
        self.events.lock().push(event);
    }
}
