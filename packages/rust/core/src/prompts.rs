//! Prompt text for summarization and synthesis.

use docmuse_shared::KnowledgeBase;

use crate::run::Summary;

/// Context placeholder used when nothing was retrieved.
pub const EMPTY_CONTEXT: &str =
    "No relevant source material was found in the knowledge base. Say so plainly and answer from general knowledge where it is safe to do so.";

const SUMMARIZER_PREAMBLE: &str = "You are an expert document parser and summarizer.
Your task is to analyze the provided text and extract key information.";

const SUMMARIZER_CLOSING: &str = "Return a concise summary with the most important information.";

/// Summarization focus for a knowledge base.
fn summary_focus(kb: KnowledgeBase) -> &'static str {
    match kb {
        KnowledgeBase::Resumes => {
            "Focus on skills, experience, education, and key qualifications."
        }
        KnowledgeBase::ApiDocs => {
            "Focus on endpoints, parameters, authentication methods, and examples."
        }
        KnowledgeBase::Recipes => {
            "Focus on ingredients, steps, nutritional information, and special tips."
        }
        KnowledgeBase::Supplements => {
            "Focus on benefits, ingredients, usage instructions, and health claims."
        }
    }
}

/// System instruction for summarizing one chunk.
pub fn summary_instruction(kb: KnowledgeBase) -> String {
    format!(
        "{SUMMARIZER_PREAMBLE}\n\n{}\n\n{SUMMARIZER_CLOSING}",
        summary_focus(kb)
    )
}

/// User content for summarizing one chunk.
pub fn summary_request(chunk_text: &str) -> String {
    format!("Please analyze and summarize the following text:\n\n{chunk_text}")
}

/// Answering persona for a knowledge base.
pub fn persona(kb: KnowledgeBase) -> &'static str {
    match kb {
        KnowledgeBase::Resumes => {
            "You are an expert HR consultant who matches resumes to job descriptions.
Analyze the resume information and the job query to provide detailed matching analysis.
Focus on relevant skills, experience, and qualifications that match or don't match the job requirements."
        }
        KnowledgeBase::ApiDocs => {
            "You are an expert API documentation consultant.
Provide clear, accurate answers to questions about APIs based on the documentation.
Include code examples where relevant and explain parameters, endpoints and authentication methods."
        }
        KnowledgeBase::Recipes => {
            "You are a creative culinary expert.
Enhance recipes with suggestions, variations, and improvements.
Provide nutritional insights and answer cooking-related questions with practical advice."
        }
        KnowledgeBase::Supplements => {
            "You are a wellness advisor specializing in supplements and health optimization.
Provide evidence-based advice about supplements, their ingredients, benefits, and usage.
For product bundles, explain synergies between products and personalize recommendations.
Always include appropriate health disclaimers and encourage consulting healthcare providers."
        }
    }
}

/// Fixed evaluator instruction for the critique phase.
pub const CRITIQUE_INSTRUCTION: &str = "You are an expert content evaluator. Critically examine the draft response and identify:
1. Factual inaccuracies or contradictions with the source material
2. Missing important information relevant to the query
3. Areas where clarity, coherence, or completeness could be improved
4. Potential bias or tone issues

Be specific in your critique to guide improvements.";

/// Numbered digests, one `Source N:` block per summary.
pub fn format_context(summaries: &[Summary]) -> String {
    if summaries.is_empty() {
        return EMPTY_CONTEXT.to_string();
    }
    summaries
        .iter()
        .enumerate()
        .map(|(i, s)| format!("Source {}:\n{}\n\n", i + 1, s.digest))
        .collect()
}

pub fn draft_request(context: &str, query: &str) -> String {
    format!(
        "Context information:\n\n{context}\n\nQuery: {query}\n\nPlease provide a comprehensive response."
    )
}

pub fn critique_request(query: &str, context: &str, draft: &str) -> String {
    format!("Original query: {query}\n\nContext information:\n{context}\n\nDraft response:\n{draft}")
}

pub fn refine_instruction(kb: KnowledgeBase) -> String {
    format!(
        "{}\n\nImprove the draft based on the critique provided.",
        persona(kb)
    )
}

pub fn refine_request(query: &str, context: &str, draft: &str, critique: &str) -> String {
    format!(
        "Original query: {query}\n\nContext information:\n{context}\n\nDraft response:\n{draft}\n\n\
         Critique:\n{critique}\n\nPlease provide an improved version that addresses the critique."
    )
}

/// Query used to rewrite a stored product description in another tone.
pub fn rewrite_query(tone: &str) -> String {
    format!("Rewrite the product description in a {tone} tone. Make it persuasive but factual.")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::DigestStatus;

    fn summary(digest: &str) -> Summary {
        Summary {
            source_id: "c".into(),
            original_text: "orig".into(),
            digest: digest.into(),
            metadata: serde_json::Value::Null,
            status: DigestStatus::Complete,
        }
    }

    #[test]
    fn every_knowledge_base_has_distinct_focus() {
        let focuses: std::collections::HashSet<_> =
            KnowledgeBase::ALL.into_iter().map(summary_focus).collect();
        assert_eq!(focuses.len(), 4);
        assert!(summary_instruction(KnowledgeBase::Resumes).contains("skills"));
    }

    #[test]
    fn context_numbers_sources_from_one() {
        let context = format_context(&[summary("first"), summary("second")]);
        assert_eq!(context, "Source 1:\nfirst\n\nSource 2:\nsecond\n\n");
    }

    #[test]
    fn empty_context_says_so() {
        assert_eq!(format_context(&[]), EMPTY_CONTEXT);
    }

    #[test]
    fn refine_extends_persona() {
        let instruction = refine_instruction(KnowledgeBase::Recipes);
        assert!(instruction.starts_with(persona(KnowledgeBase::Recipes)));
        assert!(instruction.ends_with("Improve the draft based on the critique provided."));

        let request = refine_request("q", "ctx", "d", "c");
        assert!(request.contains("Draft response:\nd\n\nCritique:\nc"));
    }

    #[test]
    fn rewrite_query_mentions_tone() {
        assert_eq!(
            rewrite_query("playful"),
            "Rewrite the product description in a playful tone. Make it persuasive but factual."
        );
    }
}
