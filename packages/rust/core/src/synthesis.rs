//! Synthesis: draft, critique, refine.
//!
//! Always exactly three model calls. The refined text becomes the run's
//! final answer as-is.

use docmuse_shared::Result;
use tracing::{debug, instrument};

use crate::contracts::LanguageModel;
use crate::events::{Event, ProgressSink};
use crate::prompts;
use crate::retry::{RetryConfig, with_retry};
use crate::run::AgentRun;

pub const DRAFT_STATUS: &str = "Crafting initial response...";
pub const CRITIQUE_STATUS: &str = "Evaluating response quality...";
pub const REFINE_STATUS: &str = "Refining response...";

#[instrument(skip_all, fields(kb = %run.knowledge_base, summaries = run.summaries.len()))]
pub async fn synthesize(
    model: &dyn LanguageModel,
    run: &mut AgentRun,
    retry: RetryConfig,
    progress: &dyn ProgressSink,
) -> Result<()> {
    let kb = run.knowledge_base;
    let query = run.query.as_str();
    let context = prompts::format_context(&run.summaries);

    progress.emit(Event::status(DRAFT_STATUS));
    let persona = prompts::persona(kb);
    let draft_request = prompts::draft_request(&context, query);
    let draft = with_retry(retry, "draft", || model.invoke(persona, &draft_request)).await?;
    debug!(chars = draft.len(), "draft ready");

    progress.emit(Event::status(CRITIQUE_STATUS));
    let critique_request = prompts::critique_request(query, &context, &draft);
    let critique = with_retry(retry, "critique", || {
        model.invoke(prompts::CRITIQUE_INSTRUCTION, &critique_request)
    })
    .await?;
    debug!(chars = critique.len(), "critique ready");

    progress.emit(Event::status(REFINE_STATUS));
    let refine_instruction = prompts::refine_instruction(kb);
    let refine_request = prompts::refine_request(query, &context, &draft, &critique);
    let refined = with_retry(retry, "refine", || {
        model.invoke(&refine_instruction, &refine_request)
    })
    .await?;

    run.final_answer = Some(refined);
    Ok(())
}
