//! HTTP client wrapper for interacting with Qdrant.

use super::VectorIndex;
use super::payload::{build_payload, hit_from_payload};
use super::types::{
    CollectionInfoResponse, DistanceMetric, IndexError, IndexRecord, ListCollectionsResponse,
    QueryResponse, QueryResult,
};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde_json::{Map, Value, json};
use std::time::Duration;

/// Lightweight HTTP client for Qdrant operations.
pub struct QdrantIndex {
    pub(crate) client: Client,
    pub(crate) base_url: String,
    pub(crate) api_key: Option<String>,
    pub(crate) metadata_updates: bool,
}

impl QdrantIndex {
    /// Construct a client for the Qdrant instance at `url`.
    ///
    /// `metadata_updates` declares whether the server accepts collection metadata patches
    /// (Qdrant 1.16 and later).
    pub fn new(
        url: &str,
        api_key: Option<String>,
        timeout: Duration,
        metadata_updates: bool,
    ) -> Result<Self, IndexError> {
        let client = Client::builder()
            .user_agent("ragline/0.1")
            .timeout(timeout)
            .build()?;
        let base_url = normalize_base_url(url).map_err(IndexError::InvalidUrl)?;
        tracing::debug!(
            url = %base_url,
            has_api_key = api_key.as_deref().is_some_and(|value| !value.is_empty()),
            metadata_updates,
            "Initialized Qdrant HTTP client"
        );
        Ok(Self {
            client,
            base_url,
            api_key,
            metadata_updates,
        })
    }

    /// Fetch `(dimension, metric)` for a collection; `None` when it does not exist.
    async fn collection_params(
        &self,
        collection: &str,
    ) -> Result<Option<(Option<usize>, Option<DistanceMetric>)>, IndexError> {
        let response = self
            .request(Method::GET, &format!("collections/{collection}"))?
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let info: CollectionInfoResponse = response.json().await?;
                Ok(Some(info.result.config.params.vector_params()))
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                let error = IndexError::UnexpectedStatus { status, body };
                tracing::error!(collection, error = %error, "Collection lookup failed");
                Err(error)
            }
        }
    }

    async fn create_collection(
        &self,
        collection: &str,
        dimension: usize,
    ) -> Result<(), IndexError> {
        let body = json!({
            "vectors": {
                "size": dimension,
                "distance": DistanceMetric::Cosine.as_str()
            }
        });
        let response = self
            .request(Method::PUT, &format!("collections/{collection}"))?
            .json(&body)
            .send()
            .await?;

        self.ensure_success(response, || {
            tracing::info!(collection, dimension, "Collection created");
        })
        .await
    }

    fn request(&self, method: Method, path: &str) -> Result<reqwest::RequestBuilder, IndexError> {
        let url = format_endpoint(&self.base_url, path);
        let mut req = self.client.request(method, url);
        if let Some(api_key) = &self.api_key
            && !api_key.is_empty()
        {
            req = req.header("api-key", api_key);
        }
        Ok(req)
    }

    async fn ensure_success<F>(
        &self,
        response: reqwest::Response,
        on_success: F,
    ) -> Result<(), IndexError>
    where
        F: FnOnce(),
    {
        if response.status().is_success() {
            on_success();
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = IndexError::UnexpectedStatus { status, body };
            tracing::error!(error = %error, "Qdrant request failed");
            Err(error)
        }
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn list_collections(&self) -> Result<Vec<String>, IndexError> {
        let response = self.request(Method::GET, "collections")?.send().await?;

        if response.status().is_success() {
            let payload: ListCollectionsResponse = response.json().await?;
            let names = payload
                .result
                .collections
                .into_iter()
                .map(|collection| collection.name)
                .collect();
            Ok(names)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = IndexError::UnexpectedStatus { status, body };
            tracing::error!(error = %error, "Failed to list collections");
            Err(error)
        }
    }

    async fn get_or_create(&self, name: &str, dimension: usize) -> Result<(), IndexError> {
        match self.collection_params(name).await? {
            Some((Some(existing), _)) if existing != dimension => {
                Err(IndexError::DimensionMismatch {
                    expected: existing,
                    actual: dimension,
                })
            }
            Some(_) => Ok(()),
            None => self.create_collection(name, dimension).await,
        }
    }

    async fn add(&self, collection: &str, records: Vec<IndexRecord>) -> Result<usize, IndexError> {
        if records.is_empty() {
            return Ok(0);
        }

        let points: Vec<Value> = records
            .into_iter()
            .map(|record| {
                json!({
                    "id": record.id,
                    "vector": record.vector,
                    "payload": build_payload(&record.text, &record.metadata),
                })
            })
            .collect();
        let count = points.len();

        let response = self
            .request(Method::PUT, &format!("collections/{collection}/points"))?
            .query(&[("wait", true)])
            .json(&json!({ "points": points }))
            .send()
            .await?;

        self.ensure_success(response, || {
            tracing::debug!(collection, points = count, "Points stored");
        })
        .await?;
        Ok(count)
    }

    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        k: usize,
    ) -> Result<QueryResult, IndexError> {
        let Some((_, metric)) = self.collection_params(collection).await? else {
            return Err(IndexError::CollectionNotFound(collection.to_string()));
        };
        let conversion = metric.unwrap_or_default();

        let body = json!({
            "query": vector,
            "limit": k,
            "with_payload": true,
        });
        let response = self
            .request(
                Method::POST,
                &format!("collections/{collection}/points/query"),
            )?
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = IndexError::UnexpectedStatus { status, body };
            tracing::error!(collection, error = %error, "Qdrant query failed");
            return Err(error);
        }

        let payload: QueryResponse = response.json().await?;
        let hits = payload
            .result
            .into_points()
            .into_iter()
            .map(|point| {
                let distance = point.score.map(|score| conversion.score_to_distance(score));
                hit_from_payload(point.payload, distance)
            })
            .collect();

        Ok(QueryResult { metric, hits })
    }

    async fn delete(&self, collection: &str) -> Result<(), IndexError> {
        let response = self
            .request(Method::DELETE, &format!("collections/{collection}"))?
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(IndexError::CollectionNotFound(collection.to_string()));
        }
        self.ensure_success(response, || {
            tracing::info!(collection, "Collection deleted");
        })
        .await
    }

    async fn delete_by_source(&self, collection: &str, source: &str) -> Result<(), IndexError> {
        let body = json!({
            "filter": {
                "must": [
                    { "key": "source", "match": { "value": source } }
                ]
            }
        });
        let response = self
            .request(
                Method::POST,
                &format!("collections/{collection}/points/delete"),
            )?
            .query(&[("wait", true)])
            .json(&body)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(IndexError::CollectionNotFound(collection.to_string()));
        }
        self.ensure_success(response, || {
            tracing::info!(collection, source, "Deleted points for source");
        })
        .await
    }

    fn supports_metadata_update(&self) -> bool {
        self.metadata_updates
    }

    async fn update_collection_metadata(
        &self,
        collection: &str,
        metadata: Map<String, Value>,
    ) -> Result<(), IndexError> {
        if !self.metadata_updates {
            return Err(IndexError::Unsupported("collection metadata updates"));
        }
        let response = self
            .request(Method::PATCH, &format!("collections/{collection}"))?
            .json(&json!({ "metadata": metadata }))
            .send()
            .await?;
        self.ensure_success(response, || {
            tracing::debug!(collection, "Collection metadata updated");
        })
        .await
    }
}

fn normalize_base_url(url: &str) -> Result<String, String> {
    let mut parsed = reqwest::Url::parse(url).map_err(|err| err.to_string())?;
    let path = parsed.path().trim_end_matches('/').to_string();
    parsed.set_path(&path);
    Ok(parsed.to_string())
}

fn format_endpoint(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}
