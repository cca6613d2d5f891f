//! Text generation abstraction and the HTTP adapter for `/generate` style inference servers.
//!
//! The adapter posts a single prompt and returns the generated text trimmed of surrounding
//! whitespace. It never retries; the summary pipeline wraps calls in its retry policy.

pub mod prompt;

use crate::retry::{Retryable, is_transient_status};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

pub use prompt::{DEFAULT_INSTRUCTIONS, PromptParts, build_prompt};

/// Errors surfaced while generating text.
#[derive(Debug, Error)]
pub enum GenerationClientError {
    /// Service could not be reached or the request timed out.
    #[error("Generation service unavailable: {0}")]
    ProviderUnavailable(#[from] reqwest::Error),
    /// Service returned an error response.
    #[error("Generation failed ({status}): {body}")]
    GenerationFailed {
        /// HTTP status returned by the service.
        status: StatusCode,
        /// Response body, if any.
        body: String,
    },
    /// Service response could not be parsed.
    #[error("Malformed generation response: {0}")]
    InvalidResponse(String),
}

impl Retryable for GenerationClientError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::ProviderUnavailable(error) => {
                error.is_timeout() || error.is_connect() || error.is_request()
            }
            Self::GenerationFailed { status, .. } => is_transient_status(*status),
            Self::InvalidResponse(_) => false,
        }
    }
}

/// Sampling options for one completion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationOptions {
    /// Upper bound on generated tokens.
    pub max_new_tokens: u32,
    /// Sampling temperature; `0` selects greedy decoding.
    pub temperature: f32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            max_new_tokens: 3000,
            temperature: 0.2,
        }
    }
}

/// Interface implemented by text generation backends.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Complete `prompt`, returning only the newly generated text.
    async fn complete(
        &self,
        prompt: &str,
        options: GenerationOptions,
    ) -> Result<String, GenerationClientError>;
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    generated_text: Option<String>,
}

/// Client for Text-Generation-Inference compatible servers (`POST {base}/generate`).
#[derive(Debug, Clone)]
pub struct HttpGenerationClient {
    http: Client,
    base_url: String,
}

impl HttpGenerationClient {
    /// Build a client with the given request timeout.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, GenerationClientError> {
        let http = Client::builder()
            .user_agent("ragline/generate")
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/generate", self.base_url)
    }
}

#[async_trait]
impl GenerationClient for HttpGenerationClient {
    async fn complete(
        &self,
        prompt: &str,
        options: GenerationOptions,
    ) -> Result<String, GenerationClientError> {
        let payload = json!({
            "inputs": prompt,
            "parameters": {
                "max_new_tokens": options.max_new_tokens,
                "temperature": options.temperature,
                "do_sample": options.temperature > 0.0,
                "return_full_text": false,
            }
        });

        let response = self.http.post(self.endpoint()).json(&payload).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = GenerationClientError::GenerationFailed { status, body };
            tracing::error!(error = %error, "Generation request rejected");
            return Err(error);
        }

        let body: GenerateResponse = response.json().await.map_err(|error| {
            GenerationClientError::InvalidResponse(format!(
                "failed to decode generation response: {error}"
            ))
        })?;

        Ok(body
            .generated_text
            .map(|text| text.trim().to_string())
            .unwrap_or_default())
    }
}
