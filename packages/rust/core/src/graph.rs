//! Stage sequencing for an agent run.
//!
//! The routing decision is a pure function of the finished stage and the run
//! state, so it can be checked without executing any step.

use serde::Serialize;

use crate::run::AgentRun;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Retrieval,
    Augmentation,
    Summarization,
    Synthesis,
    Terminal,
}

impl Stage {
    /// Every run starts here.
    pub const INITIAL: Stage = Stage::Retrieval;

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Retrieval => "retrieval",
            Self::Augmentation => "augmentation",
            Self::Summarization => "summarization",
            Self::Synthesis => "synthesis",
            Self::Terminal => "terminal",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stage to run after `finished` completed.
///
/// Summarization always runs once, even over zero chunks, so that synthesis
/// can answer from an empty context instead of the run ending silently.
pub fn next_stage(finished: Stage, run: &AgentRun) -> Stage {
    match finished {
        Stage::Retrieval | Stage::Augmentation => {
            if run.augmentation_needed && finished == Stage::Retrieval {
                Stage::Augmentation
            } else {
                after_retrieval(run)
            }
        }
        Stage::Summarization => {
            if run.final_answer.is_none() {
                Stage::Synthesis
            } else {
                Stage::Terminal
            }
        }
        Stage::Synthesis | Stage::Terminal => Stage::Terminal,
    }
}

fn after_retrieval(run: &AgentRun) -> Stage {
    if !run.summarized {
        Stage::Summarization
    } else if run.final_answer.is_none() {
        Stage::Synthesis
    } else {
        Stage::Terminal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docmuse_shared::KnowledgeBase;

    fn run() -> AgentRun {
        AgentRun::new(KnowledgeBase::Supplements, "magnesium for sleep", None)
    }

    #[test]
    fn retrieval_routes_to_augmentation_when_flagged() {
        let mut r = run();
        r.augmentation_needed = true;
        assert_eq!(next_stage(Stage::Retrieval, &r), Stage::Augmentation);
    }

    #[test]
    fn retrieval_routes_to_summarization_otherwise() {
        let r = run();
        assert_eq!(next_stage(Stage::Retrieval, &r), Stage::Summarization);
    }

    #[test]
    fn augmentation_never_reenters_itself() {
        // Even if a buggy step left the flag set, augmentation runs at most once.
        let mut r = run();
        r.augmentation_needed = true;
        assert_eq!(next_stage(Stage::Augmentation, &r), Stage::Summarization);
    }

    #[test]
    fn zero_chunks_still_reach_synthesis() {
        let mut r = run();
        assert_eq!(next_stage(Stage::Retrieval, &r), Stage::Summarization);
        r.summarized = true;
        assert_eq!(next_stage(Stage::Summarization, &r), Stage::Synthesis);
    }

    #[test]
    fn skips_completed_work() {
        let mut r = run();
        r.summarized = true;
        assert_eq!(next_stage(Stage::Retrieval, &r), Stage::Synthesis);
        r.final_answer = Some("done".into());
        assert_eq!(next_stage(Stage::Retrieval, &r), Stage::Terminal);
        assert_eq!(next_stage(Stage::Summarization, &r), Stage::Terminal);
    }

    #[test]
    fn synthesis_is_always_last() {
        let r = run();
        assert_eq!(next_stage(Stage::Synthesis, &r), Stage::Terminal);
        assert_eq!(next_stage(Stage::Terminal, &r), Stage::Terminal);
    }
}
