// Copyright 2025 docrag contributors
// SPDX-License-Identifier: MIT
//
//! Context assembly and answer envelope around the generative model.
//!
//! The model itself lives outside this crate behind [`GenerativeModel`]; this
//! module turns ranked chunks into a bounded prompt, runs the completion and
//! wraps the outcome with source attributions. Retrieval succeeding while
//! generation fails is a partial result, not an error: the sources survive.

use log::{error, warn};
use serde::{Deserialize, Serialize};

use crate::error::RagError;
use crate::hybrid::SearchResult;
use crate::DocumentId;

/// Returned when retrieval produced nothing usable for the question.
pub const NO_CONTENT_MESSAGE: &str = "No relevant content found across uploaded documents.";

const SOURCE_PREVIEW_CHARS: usize = 100;

/// External text-completion model. Implementations wrap whatever API the
/// deployment uses.
pub trait GenerativeModel: Send + Sync {
    fn complete(&self, prompt: &str) -> Result<String, RagError>;
}

/// Attribution for one chunk that fed the answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRef {
    pub document: DocumentId,
    pub source_file: String,
    pub page_number: Option<u32>,
    pub chunk_index: usize,
    pub score: f32,
    /// Leading slice of the chunk text, for display.
    pub preview: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AnswerOutcome {
    Answered(String),
    /// Nothing relevant was retrieved; the caller shows [`NO_CONTENT_MESSAGE`].
    NoContent,
    /// Retrieval worked but the model call failed.
    GenerationFailed(String),
}

/// A completed question-answering round: outcome plus the chunks behind it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagAnswer {
    pub outcome: AnswerOutcome,
    pub sources: Vec<SourceRef>,
}

impl RagAnswer {
    /// User-facing answer text for every outcome.
    pub fn message(&self) -> &str {
        match &self.outcome {
            AnswerOutcome::Answered(text) => text,
            AnswerOutcome::NoContent => NO_CONTENT_MESSAGE,
            AnswerOutcome::GenerationFailed(reason) => reason,
        }
    }
}

/// Concatenate ranked chunks into a context block under `max_chars`,
/// dropping the lowest-ranked chunks first when the budget is tight. Each
/// chunk is tagged with its origin so the model can cite it.
pub fn build_context(results: &[SearchResult], max_chars: usize) -> String {
    const SEPARATOR: &str = "\n---\n";
    let mut context = String::new();
    let mut included = 0usize;
    for result in results {
        let tag = match result.page_number {
            Some(page) => format!("[Page {} of {}]", page, result.source_file),
            None => format!("[{}]", result.source_file),
        };
        let block = format!("{}\n{}", tag, result.content);
        let added = block.chars().count() + if context.is_empty() { 0 } else { SEPARATOR.chars().count() };
        if context.chars().count() + added > max_chars {
            break;
        }
        if !context.is_empty() {
            context.push_str(SEPARATOR);
        }
        context.push_str(&block);
        included += 1;
    }
    if included < results.len() {
        warn!(
            "[answer] Context budget of {} chars holds {} of {} chunks",
            max_chars,
            included,
            results.len()
        );
    }
    context
}

/// Prompt handed to the generative model.
pub fn build_prompt(context: &str, query: &str) -> String {
    format!(
        "You are answering a question using excerpts from the user's uploaded documents.\n\
         Base your answer only on the excerpts below. If they do not contain the answer,\n\
         say that the documents do not cover it. Cite pages where available.\n\n\
         Excerpts:\n{}\n\nQuestion: {}\n\nAnswer:",
        context, query
    )
}

pub fn make_source_refs(results: &[SearchResult]) -> Vec<SourceRef> {
    results
        .iter()
        .map(|result| SourceRef {
            document: result.document,
            source_file: result.source_file.clone(),
            page_number: result.page_number,
            chunk_index: result.chunk_index,
            score: result.hybrid_score,
            preview: result.content.chars().take(SOURCE_PREVIEW_CHARS).collect(),
        })
        .collect()
}

/// Run the full answer step over ranked retrieval results.
pub fn generate_answer(
    model: &dyn GenerativeModel,
    query: &str,
    results: &[SearchResult],
    max_context_chars: usize,
) -> RagAnswer {
    if results.is_empty() {
        return RagAnswer {
            outcome: AnswerOutcome::NoContent,
            sources: Vec::new(),
        };
    }

    let context = build_context(results, max_context_chars);
    let prompt = build_prompt(&context, query);
    let sources = make_source_refs(results);

    match model.complete(&prompt) {
        Ok(text) => RagAnswer {
            outcome: AnswerOutcome::Answered(text),
            sources,
        },
        Err(e) => {
            error!("[answer] Generation failed after successful retrieval: {}", e);
            RagAnswer {
                outcome: AnswerOutcome::GenerationFailed(e.to_string()),
                sources,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use crate::test_util::StubModel;

    fn result(document: u64, score: f32, page: Option<u32>, content: &str) -> SearchResult {
        SearchResult {
            chunk_index: 0,
            document: DocumentId(document),
            content: content.to_string(),
            semantic_score: 0.0,
            keyword_score: 0.0,
            hybrid_score: score,
            page_number: page,
            source_file: "report.pdf".to_string(),
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn test_empty_results_give_no_content() {
        let answer = generate_answer(&StubModel::answering(), "anything", &[], 1000);
        assert!(matches!(answer.outcome, AnswerOutcome::NoContent));
        assert!(answer.sources.is_empty());
        assert_eq!(answer.message(), NO_CONTENT_MESSAGE);
    }

    #[test]
    fn test_context_tags_and_separator() {
        let results = vec![
            result(1, 0.9, Some(3), "First chunk text."),
            result(1, 0.8, None, "Second chunk text."),
        ];
        let context = build_context(&results, 10_000);
        assert!(context.starts_with("[Page 3 of report.pdf]\nFirst chunk text."));
        assert!(context.contains("\n---\n[report.pdf]\nSecond chunk text."));
    }

    #[test]
    fn test_context_budget_drops_lowest_ranked_first() {
        let results = vec![
            result(1, 0.9, Some(1), "aaaaaaaaaa"),
            result(1, 0.8, Some(2), "bbbbbbbbbb"),
            result(1, 0.7, Some(3), "cccccccccc"),
        ];
        // Room for roughly two blocks only.
        let block_len = "[Page 1 of report.pdf]\naaaaaaaaaa".chars().count();
        let context = build_context(&results, block_len * 2 + 10);
        assert!(context.contains("aaaaaaaaaa"));
        assert!(context.contains("bbbbbbbbbb"));
        assert!(!context.contains("cccccccccc"));
    }

    #[test]
    fn test_prompt_contains_context_and_question() {
        let prompt = build_prompt("[report.pdf]\nsome excerpt", "what is covered?");
        assert!(prompt.contains("[report.pdf]\nsome excerpt"));
        assert!(prompt.contains("Question: what is covered?"));
        assert!(prompt.ends_with("Answer:"));
    }

    #[test]
    fn test_generation_failure_keeps_sources() {
        let results = vec![result(1, 0.9, Some(1), "relevant chunk")];
        let answer = generate_answer(&StubModel::failing(), "q", &results, 1000);
        assert!(matches!(answer.outcome, AnswerOutcome::GenerationFailed(_)));
        assert_eq!(answer.sources.len(), 1);
        assert_eq!(answer.sources[0].document, DocumentId(1));
    }

    #[test]
    fn test_source_preview_truncated() {
        let long = "x".repeat(500);
        let results = vec![result(2, 0.5, None, &long)];
        let refs = make_source_refs(&results);
        assert_eq!(refs[0].preview.chars().count(), 100);
        assert_eq!(refs[0].chunk_index, 0);
    }

    #[test]
    fn test_successful_answer() {
        let results = vec![result(1, 0.9, Some(1), "relevant chunk")];
        let answer = generate_answer(&StubModel::answering(), "q", &results, 1000);
        match &answer.outcome {
            AnswerOutcome::Answered(text) => assert!(text.starts_with("stub answer")),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(answer.sources.len(), 1);
    }
}
