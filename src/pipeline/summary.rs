use serde::Serialize;
use std::fmt;
use std::sync::Arc;

use crate::generation::{GenerationClient, GenerationOptions, PromptParts, build_prompt};
use crate::retrieval::{RetrievedChunk, Retriever};
use crate::retry::{RetryPolicy, with_retry};

use super::PipelineError;

/// Why no summary was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnavailableReason {
    /// Retrieval found nothing relevant.
    NoContext,
    /// The generator answered with empty text.
    NoGeneratedText,
    /// The generator could not be reached or kept failing.
    GenerationFailed,
}

impl fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            Self::NoContext => "no relevant context",
            Self::NoGeneratedText => "the generator returned no text",
            Self::GenerationFailed => "the generation service failed",
        };
        f.write_str(message)
    }
}

/// Result of a summary request.
#[derive(Debug, Clone, PartialEq)]
pub enum SummaryOutcome {
    /// Generated text plus the context it was grounded on.
    Generated {
        /// Generated summary.
        text: String,
        /// Retrieved chunks used as context, best first.
        context: Vec<RetrievedChunk>,
    },
    /// No summary could be produced.
    Unavailable(UnavailableReason),
}

/// Retrieve → build prompt → generate.
pub struct SummaryPipeline {
    retriever: Retriever,
    generator: Arc<dyn GenerationClient>,
    instructions: String,
    options: GenerationOptions,
    top_n: usize,
    retry: RetryPolicy,
}

impl SummaryPipeline {
    /// Assemble a pipeline that uses the `top_n` best chunks as context.
    pub fn new(
        retriever: Retriever,
        generator: Arc<dyn GenerationClient>,
        instructions: impl Into<String>,
        options: GenerationOptions,
        top_n: usize,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            retriever,
            generator,
            instructions: instructions.into(),
            options,
            top_n,
            retry,
        }
    }

    /// Produce a grounded summary for `query`, optionally steered by `notes`.
    ///
    /// An empty query is rejected; every other failure becomes
    /// [`SummaryOutcome::Unavailable`].
    pub async fn summarize(
        &self,
        query: &str,
        notes: Option<&str>,
    ) -> Result<SummaryOutcome, PipelineError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(PipelineError::Input("query is empty".into()));
        }

        let context = self.retriever.retrieve(query, self.top_n).await;
        if context.is_empty() {
            tracing::info!("No context retrieved; skipping generation");
            return Ok(SummaryOutcome::Unavailable(UnavailableReason::NoContext));
        }

        let texts: Vec<&str> = context.iter().map(|chunk| chunk.text.as_str()).collect();
        let prompt = build_prompt(
            PromptParts {
                instructions: &self.instructions,
                query,
                notes,
            },
            &texts,
        );
        tracing::debug!(
            context_chunks = context.len(),
            prompt_chars = prompt.len(),
            "Requesting generation"
        );

        let generator = &self.generator;
        let prompt = prompt.as_str();
        let options = self.options;
        let text = match with_retry(&self.retry, "generate", move || {
            generator.complete(prompt, options)
        })
        .await
        {
            Ok(text) => text,
            Err(error) => {
                tracing::warn!(error = %error, "Generation failed");
                return Ok(SummaryOutcome::Unavailable(
                    UnavailableReason::GenerationFailed,
                ));
            }
        };

        if text.trim().is_empty() {
            return Ok(SummaryOutcome::Unavailable(
                UnavailableReason::NoGeneratedText,
            ));
        }
        Ok(SummaryOutcome::Generated {
            text: text.trim().to_string(),
            context,
        })
    }
}
