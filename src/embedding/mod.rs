//! Embedding client abstraction and the HTTP adapter for `/embed` style inference servers.

use crate::retry::{Retryable, is_transient_status};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors raised by embedding providers.
#[derive(Debug, Error)]
pub enum EmbeddingClientError {
    /// Request never produced a response (connect failure, timeout, ...).
    #[error("Embedding request failed: {0}")]
    Transport(#[from] reqwest::Error),
    /// Service answered with a non-success status.
    #[error("Embedding service returned {status}: {body}")]
    UnexpectedStatus {
        /// HTTP status returned by the service.
        status: StatusCode,
        /// Response body, if any.
        body: String,
    },
    /// Payload could not be interpreted as a list of vectors.
    #[error("Malformed embedding response: {0}")]
    InvalidResponse(String),
    /// Service returned a different number of vectors than inputs.
    #[error("Embedding count mismatch: sent {expected} texts, received {actual} vectors")]
    CountMismatch {
        /// Number of texts submitted.
        expected: usize,
        /// Number of vectors returned.
        actual: usize,
    },
}

impl Retryable for EmbeddingClientError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(error) => {
                error.is_timeout() || error.is_connect() || error.is_request()
            }
            Self::UnexpectedStatus { status, .. } => is_transient_status(*status),
            Self::InvalidResponse(_) | Self::CountMismatch { .. } => false,
        }
    }
}

/// Interface implemented by embedding backends.
///
/// Implementations return exactly one vector per input, in input order, and never retry
/// internally.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Produce an embedding vector for each supplied text.
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingClientError>;
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    inputs: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse(Vec<Vec<f32>>);

/// Client for Text-Embeddings-Inference compatible servers (`POST {base}/embed`).
#[derive(Debug, Clone)]
pub struct HttpEmbeddingClient {
    pub(crate) client: Client,
    pub(crate) base_url: String,
}

impl HttpEmbeddingClient {
    /// Build a client with the given request timeout.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, EmbeddingClientError> {
        let client = Client::builder()
            .user_agent("ragline/embed")
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/embed", self.base_url)
    }
}

#[async_trait]
impl EmbeddingClient for HttpEmbeddingClient {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        tracing::debug!(inputs = texts.len(), url = %self.endpoint(), "Requesting embeddings");
        let response = self
            .client
            .post(self.endpoint())
            .json(&EmbedRequest { inputs: &texts })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = EmbeddingClientError::UnexpectedStatus { status, body };
            tracing::error!(error = %error, "Embedding request rejected");
            return Err(error);
        }

        let body = response.text().await?;
        let EmbedResponse(vectors) = serde_json::from_str(&body)
            .map_err(|error| EmbeddingClientError::InvalidResponse(error.to_string()))?;

        if vectors.len() != texts.len() {
            return Err(EmbeddingClientError::CountMismatch {
                expected: texts.len(),
                actual: vectors.len(),
            });
        }
        Ok(vectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};
    use serde_json::json;

    fn client_for(server: &MockServer) -> HttpEmbeddingClient {
        HttpEmbeddingClient::new(&server.base_url(), Duration::from_secs(5)).expect("client")
    }

    #[tokio::test]
    async fn embed_posts_inputs_and_returns_vectors_in_order() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/embed")
                    .json_body(json!({"inputs": ["first", "second"]}));
                then.status(200).json_body(json!([[0.1, 0.2], [0.3, 0.4]]));
            })
            .await;

        let vectors = client_for(&server)
            .embed(vec!["first".into(), "second".into()])
            .await
            .expect("embeddings");

        mock.assert();
        assert_eq!(vectors, vec![vec![0.1, 0.2], vec![0.3, 0.4]]);
    }

    #[tokio::test]
    async fn embed_rejects_count_mismatch() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/embed");
                then.status(200).json_body(json!([[0.1, 0.2]]));
            })
            .await;

        let error = client_for(&server)
            .embed(vec!["a".into(), "b".into()])
            .await
            .expect_err("mismatch");
        assert!(matches!(
            error,
            EmbeddingClientError::CountMismatch {
                expected: 2,
                actual: 1
            }
        ));
        assert!(!error.is_retryable());
    }

    #[tokio::test]
    async fn embed_surfaces_status_and_malformed_payloads() {
        let server = MockServer::start_async().await;
        let mut failing = server
            .mock_async(|when, then| {
                when.method(POST).path("/embed");
                then.status(503).body("overloaded");
            })
            .await;

        let error = client_for(&server)
            .embed(vec!["a".into()])
            .await
            .expect_err("status error");
        assert!(error.is_retryable());
        assert!(error.to_string().contains("503"));
        failing.delete_async().await;

        server
            .mock_async(|when, then| {
                when.method(POST).path("/embed");
                then.status(200).json_body(json!({"unexpected": true}));
            })
            .await;
        let error = client_for(&server)
            .embed(vec!["a".into()])
            .await
            .expect_err("malformed");
        assert!(matches!(error, EmbeddingClientError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn empty_input_skips_the_network() {
        let client = HttpEmbeddingClient::new("http://127.0.0.1:9", Duration::from_millis(50))
            .expect("client");
        assert!(client.embed(Vec::new()).await.expect("empty").is_empty());
    }
}
