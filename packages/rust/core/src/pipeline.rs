//! End-to-end agent run: retrieve → augment? → summarize → synthesize.
//!
//! [`Agent::run`] drives the stages through [`next_stage`] and reports
//! progress on a [`ProgressSink`]. [`Agent::stream`] wraps a run for a live
//! client: it pushes the terminal result or error onto an [`EventSender`] and
//! always closes the channel, whichever way the run ends.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use serde_json::{Value, json};
use tracing::{error, info, instrument, warn};

use docmuse_shared::{AppConfig, DocMuseError, KnowledgeBase, Result};

use crate::augment;
use crate::contracts::{DataSource, LanguageModel, VectorIndex};
use crate::events::{Event, EventSender, ProgressSink};
use crate::graph::{Stage, next_stage};
use crate::prompts;
use crate::retrieval::{self, RetrievalSettings};
use crate::retry::RetryConfig;
use crate::run::AgentRun;
use crate::summarize;
use crate::synthesis;

/// Words per `token` event when the answer is streamed.
const TOKEN_GROUP_WORDS: usize = 3;

// ---------------------------------------------------------------------------
// Settings and requests
// ---------------------------------------------------------------------------

/// Tuning for agent runs.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub retrieval: RetrievalSettings,
    pub summary_concurrency: usize,
    pub retry: RetryConfig,
    /// Overall deadline for one run.
    pub run_timeout: Duration,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            retrieval: RetrievalSettings::default(),
            summary_concurrency: 4,
            retry: RetryConfig::default(),
            run_timeout: Duration::from_secs(180),
        }
    }
}

impl From<&AppConfig> for AgentSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            retrieval: RetrievalSettings {
                top_k: config.retrieval.top_k,
                augmentation_threshold: config.retrieval.augmentation_threshold,
            },
            summary_concurrency: config.agent.summary_concurrency,
            retry: RetryConfig::from(config),
            run_timeout: Duration::from_secs(config.agent.run_timeout_secs),
        }
    }
}

/// What a run was started for. Only changes the shape of the result payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunKind {
    Query,
    /// Rewrite of a stored product description.
    Rewrite { doc_id: String },
}

/// A validated request to run the agent.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub query: String,
    pub knowledge_base: KnowledgeBase,
    pub document_scope: Option<String>,
    /// Also stream the final answer as `token` events.
    pub stream_tokens: bool,
    pub kind: RunKind,
}

impl RunRequest {
    /// Validate raw caller input. Nothing runs if this fails.
    pub fn new(knowledge_base: &str, query: &str, document_scope: Option<String>) -> Result<Self> {
        let knowledge_base: KnowledgeBase = knowledge_base.parse()?;
        let query = query.trim();
        if query.is_empty() {
            return Err(DocMuseError::validation("prompt must not be empty"));
        }
        Ok(Self {
            query: query.to_string(),
            knowledge_base,
            document_scope: document_scope.filter(|s| !s.trim().is_empty()),
            stream_tokens: false,
            kind: RunKind::Query,
        })
    }

    /// Rewrite the description of one stored supplement in the given tone.
    pub fn supplement_rewrite(doc_id: &str, tone: &str) -> Result<Self> {
        let doc_id = doc_id.trim();
        if doc_id.is_empty() {
            return Err(DocMuseError::validation("doc_id must not be empty"));
        }
        let tone = match tone.trim() {
            "" => "professional",
            t => t,
        };
        Ok(Self {
            query: prompts::rewrite_query(tone),
            knowledge_base: KnowledgeBase::Supplements,
            document_scope: Some(doc_id.to_string()),
            stream_tokens: false,
            kind: RunKind::Rewrite {
                doc_id: doc_id.to_string(),
            },
        })
    }

    pub fn with_token_stream(mut self, enabled: bool) -> Self {
        self.stream_tokens = enabled;
        self
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// A finished run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub answer: String,
    /// Metadata of every chunk the answer drew on, in retrieval order.
    pub sources: Vec<Value>,
    /// Chunks whose digest fell back to source text.
    pub partial_failures: usize,
    /// `"demo"` when answered by the offline model, else `"live"`.
    pub mode: &'static str,
    pub augmented: bool,
    pub elapsed: Duration,
}

impl RunOutcome {
    /// Body of the terminal `result` event.
    pub fn to_payload(&self, kind: &RunKind) -> Value {
        let mut payload = json!({
            "status": "complete",
            "answer": self.answer,
            "sources": self.sources,
            "partial_failures": self.partial_failures,
            "mode": self.mode,
        });
        if let RunKind::Rewrite { doc_id } = kind {
            payload["rewritten"] = json!(self.answer);
            payload["original_doc_id"] = json!(doc_id);
        }
        payload
    }
}

/// Why a run ended without an answer.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("{stage} failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: DocMuseError,
    },

    #[error("run did not finish within {}s", .0.as_secs())]
    DeadlineExceeded(Duration),
}

impl RunError {
    fn at(stage: Stage) -> impl FnOnce(DocMuseError) -> Self {
        move |source| Self::Stage { stage, source }
    }

    /// Stage name reported to clients.
    pub fn stage_name(&self) -> &'static str {
        match self {
            Self::Stage { stage, .. } => stage.as_str(),
            Self::DeadlineExceeded(_) => "deadline",
        }
    }

    /// Whether the caller may reasonably try the same request again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Stage { source, .. } => source.is_retryable(),
            Self::DeadlineExceeded(_) => true,
        }
    }

    /// Body of the terminal `error` event.
    pub fn to_payload(&self) -> Value {
        json!({
            "status": "error",
            "stage": self.stage_name(),
            "message": self.to_string(),
            "retryable": self.is_retryable(),
        })
    }
}

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

/// The agent and its collaborators. Shared across runs; holds no per-run state.
pub struct Agent {
    index: Arc<dyn VectorIndex>,
    source: Option<Arc<dyn DataSource>>,
    model: Arc<dyn LanguageModel>,
    settings: AgentSettings,
}

impl Agent {
    pub fn new(
        index: Arc<dyn VectorIndex>,
        model: Arc<dyn LanguageModel>,
        settings: AgentSettings,
    ) -> Self {
        Self {
            index,
            source: None,
            model,
            settings,
        }
    }

    /// Attach the data source used to augment thin product-catalog results.
    pub fn with_source(mut self, source: Arc<dyn DataSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    /// Run the pipeline to completion or to the configured deadline.
    #[instrument(skip_all, fields(kb = %request.knowledge_base, query = %request.query))]
    pub async fn run(
        &self,
        request: &RunRequest,
        progress: &dyn ProgressSink,
    ) -> std::result::Result<RunOutcome, RunError> {
        let deadline = self.settings.run_timeout;
        match tokio::time::timeout(deadline, self.execute(request, progress)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(deadline_secs = deadline.as_secs(), "run deadline exceeded");
                Err(RunError::DeadlineExceeded(deadline))
            }
        }
    }

    async fn execute(
        &self,
        request: &RunRequest,
        progress: &dyn ProgressSink,
    ) -> std::result::Result<RunOutcome, RunError> {
        let start = Instant::now();
        let mut run = AgentRun::new(
            request.knowledge_base,
            request.query.clone(),
            request.document_scope.clone(),
        );
        let settings = &self.settings;
        let retry = settings.retry;

        let mut stage = Stage::INITIAL;
        while stage != Stage::Terminal {
            match stage {
                Stage::Retrieval => {
                    progress.emit(Event::status(retrieval::STATUS));
                    retrieval::retrieve(self.index.as_ref(), &mut run, &settings.retrieval, retry)
                        .await
                        .map_err(RunError::at(stage))?;
                }
                Stage::Augmentation => {
                    progress.emit(Event::status(augment::STATUS));
                    match &self.source {
                        Some(source) => augment::augment(
                            source.as_ref(),
                            self.index.as_ref(),
                            &mut run,
                            &settings.retrieval,
                            retry,
                            progress,
                        )
                        .await
                        .map_err(RunError::at(stage))?,
                        None => {
                            warn!("no product source configured, skipping augmentation");
                            run.augmentation_needed = false;
                        }
                    }
                }
                Stage::Summarization => {
                    progress.emit(Event::status(summarize::STATUS));
                    summarize::summarize(
                        self.model.as_ref(),
                        &mut run,
                        settings.summary_concurrency,
                        retry,
                    )
                    .await;
                }
                Stage::Synthesis => {
                    synthesis::synthesize(self.model.as_ref(), &mut run, retry, progress)
                        .await
                        .map_err(RunError::at(stage))?;
                }
                Stage::Terminal => {}
            }
            stage = next_stage(stage, &run);
        }

        let answer = run.final_answer.take().ok_or_else(|| RunError::Stage {
            stage: Stage::Synthesis,
            source: DocMuseError::Model("run finished without an answer".into()),
        })?;

        let outcome = RunOutcome {
            answer,
            sources: run
                .retrieved_chunks
                .iter()
                .map(|c| c.metadata.clone())
                .collect(),
            partial_failures: run.partial_failures,
            mode: if self.model.is_demo() { "demo" } else { "live" },
            augmented: run.augmented,
            elapsed: start.elapsed(),
        };

        info!(
            sources = outcome.sources.len(),
            partial_failures = outcome.partial_failures,
            augmented = outcome.augmented,
            elapsed_ms = outcome.elapsed.as_millis() as u64,
            "run complete"
        );
        Ok(outcome)
    }

    /// Run and deliver everything onto `sender`, ending with exactly one
    /// `result` or `error` event. The channel is closed on every exit path,
    /// including when this future is dropped or its task aborted.
    pub async fn stream(&self, request: RunRequest, sender: EventSender) {
        let _close = CloseOnDrop(sender.clone());

        let finished = AssertUnwindSafe(self.run(&request, &sender))
            .catch_unwind()
            .await;
        let result = match finished {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(%message, "run panicked");
                sender.send(Event::error(json!({
                    "status": "error",
                    "stage": INTERNAL_STAGE,
                    "message": format!("internal error: {message}"),
                    "retryable": false,
                })));
                return;
            }
        };

        match result {
            Ok(outcome) => {
                if request.stream_tokens {
                    for token in token_groups(&outcome.answer) {
                        if !sender.send(Event::token(token)) {
                            break;
                        }
                    }
                }
                sender.send(Event::result(outcome.to_payload(&request.kind)));
            }
            Err(e) => {
                error!(stage = e.stage_name(), error = %e, "run failed");
                sender.send(Event::error(e.to_payload()));
            }
        }
    }
}

/// Stage reported when a run dies without a typed error.
const INTERNAL_STAGE: &str = "internal";

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "run aborted unexpectedly".to_string())
}

struct CloseOnDrop(EventSender);

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        self.0.close();
    }
}

/// Split text into groups of a few words, each but the last keeping its
/// trailing space so the groups concatenate back to readable text.
fn token_groups(text: &str) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    let groups: Vec<&[&str]> = words.chunks(TOKEN_GROUP_WORDS).collect();
    let last = groups.len().saturating_sub(1);
    groups
        .iter()
        .enumerate()
        .map(|(i, group)| {
            let mut token = group.join(" ");
            if i < last {
                token.push(' ');
            }
            token
        })
        .collect()
}
