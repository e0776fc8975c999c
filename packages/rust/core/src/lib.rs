//! Agent pipeline and event streaming for DocMuse.
//!
//! A run moves through retrieval, optional product augmentation,
//! summarization and a draft/critique/refine synthesis. Progress is pushed
//! onto a per-run [`events::EventSender`] and framed for the wire by [`sse`].

pub mod augment;
pub mod catalog;
pub mod channels;
pub mod contracts;
pub mod events;
pub mod graph;
pub mod llm;
pub mod pipeline;
pub mod prompts;
pub mod retrieval;
pub mod retry;
pub mod run;
pub mod sse;
pub mod summarize;
pub mod synthesis;

#[cfg(test)]
pub(crate) mod testing;

pub use catalog::CatalogSource;
pub use channels::ChannelRegistry;
pub use contracts::{DataSource, DocumentStore, LanguageModel, VectorIndex};
pub use events::{Delivery, Event, EventKind, EventSender, EventStream, Payload, ProgressSink, SilentProgress};
pub use graph::{Stage, next_stage};
pub use llm::{DemoModel, OpenRouterModel, build_model};
pub use pipeline::{Agent, AgentSettings, RunError, RunKind, RunOutcome, RunRequest};
pub use retry::{RetryConfig, with_retry};
pub use run::{AgentRun, DigestStatus, Summary};
