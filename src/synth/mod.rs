// Answer synthesis module
// Builds a sourced-context prompt from retrieved chunks and asks the LLM

#[cfg(test)]
mod tests;

use itertools::Itertools;
use std::cmp::Ordering;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::index::SearchHit;
use crate::providers::{CompletionRequest, LlmProvider};

const DEFAULT_LLM_TIMEOUT_SECONDS: u64 = 120;

pub const SYSTEM_PROMPT: &str = "You are a helpful assistant answering questions about the user's documents. \
Use only the numbered context passages. Cite the passages you rely on as [n]. \
If the context does not contain the answer, say that you don't know.";

/// Returned without consulting the LLM when retrieval produced nothing
pub const NO_CONTEXT_ANSWER: &str =
    "I could not find anything relevant to this question in the indexed documents.";

#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("Answer generation failed ({provider}): {message}")]
    GenerationFailure { provider: String, message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizedAnswer {
    pub answer: String,
    /// Distinct sources of the chunks placed in the prompt, best first
    pub used_sources: Vec<String>,
    /// The chunks that fit the context budget, in prompt order
    pub used_chunks: Vec<SearchHit>,
}

pub struct AnswerSynthesizer {
    llm: Arc<dyn LlmProvider>,
    max_context_chars: usize,
    temperature: f32,
    max_tokens: Option<u32>,
    timeout: Duration,
}

impl std::fmt::Debug for AnswerSynthesizer {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnswerSynthesizer")
            .field("llm", &self.llm.model_id())
            .field("max_context_chars", &self.max_context_chars)
            .field("temperature", &self.temperature)
            .finish_non_exhaustive()
    }
}

impl AnswerSynthesizer {
    #[inline]
    pub fn new(llm: Arc<dyn LlmProvider>, max_context_chars: usize, temperature: f32) -> Self {
        Self {
            llm,
            max_context_chars,
            temperature,
            max_tokens: None,
            timeout: Duration::from_secs(DEFAULT_LLM_TIMEOUT_SECONDS),
        }
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[inline]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    #[inline]
    pub fn llm(&self) -> &Arc<dyn LlmProvider> {
        &self.llm
    }

    /// Order hits by descending score, ties by source then chunk index, and
    /// keep the best ones whose text fits `max_context_chars`. The top hit is
    /// always kept, truncated if it alone is over budget.
    #[inline]
    pub fn select_context(&self, hits: &[SearchHit]) -> Vec<SearchHit> {
        let ordered: Vec<SearchHit> = hits
            .iter()
            .sorted_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(Ordering::Equal)
                    .then_with(|| a.chunk.source.cmp(&b.chunk.source))
                    .then_with(|| a.chunk.chunk_index.cmp(&b.chunk.chunk_index))
            })
            .cloned()
            .collect();

        let mut selected = Vec::with_capacity(ordered.len());
        let mut used = 0;
        for hit in ordered {
            let size = hit.chunk.text.chars().count();
            if used + size <= self.max_context_chars {
                used += size;
                selected.push(hit);
            } else if selected.is_empty() {
                let mut truncated = hit;
                truncated.chunk.text = truncated
                    .chunk
                    .text
                    .chars()
                    .take(self.max_context_chars)
                    .collect();
                selected.push(truncated);
                break;
            } else {
                break;
            }
        }

        if selected.len() < hits.len() {
            debug!(
                "Context budget of {} chars kept {} of {} chunks",
                self.max_context_chars,
                selected.len(),
                hits.len()
            );
        }
        selected
    }

    /// The prompt for `question` over already-selected context
    #[inline]
    pub fn build_prompt(question: &str, context: &[SearchHit]) -> String {
        let mut prompt = String::from("Context:\n\n");
        for (n, hit) in context.iter().enumerate() {
            let _ = writeln!(
                prompt,
                "[{}] {} (chunk {})\n{}\n",
                n + 1,
                hit.chunk.source,
                hit.chunk.chunk_index,
                hit.chunk.text.trim()
            );
        }
        let _ = write!(prompt, "Question: {}\nAnswer:", question.trim());
        prompt
    }

    #[inline]
    pub async fn answer(
        &self,
        question: &str,
        hits: &[SearchHit],
    ) -> Result<SynthesizedAnswer, SynthesisError> {
        if hits.is_empty() {
            return Ok(SynthesizedAnswer {
                answer: NO_CONTEXT_ANSWER.to_string(),
                used_sources: Vec::new(),
                used_chunks: Vec::new(),
            });
        }

        let context = self.select_context(hits);
        let request = CompletionRequest {
            system: SYSTEM_PROMPT.to_string(),
            prompt: Self::build_prompt(question, &context),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let failure = |message: String| SynthesisError::GenerationFailure {
            provider: self.llm.model_id().to_string(),
            message,
        };

        let llm = Arc::clone(&self.llm);
        let task = tokio::task::spawn_blocking(move || llm.complete(&request));
        let answer = match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(Ok(answer))) => answer,
            Ok(Ok(Err(e))) => return Err(failure(format!("{:#}", e))),
            Ok(Err(e)) => return Err(failure(format!("LLM task failed: {}", e))),
            Err(_) => {
                warn!("LLM call exceeded {:?}", self.timeout);
                return Err(failure(format!("Timed out after {:?}", self.timeout)));
            }
        };

        let answer = answer.trim().to_string();
        if answer.is_empty() {
            return Err(failure("LLM returned an empty answer".to_string()));
        }

        let used_sources = context
            .iter()
            .map(|hit| hit.chunk.source.clone())
            .unique()
            .collect();

        Ok(SynthesizedAnswer {
            answer,
            used_sources,
            used_chunks: context,
        })
    }
}
