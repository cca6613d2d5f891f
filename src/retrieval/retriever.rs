use serde_json::Value;
use std::sync::Arc;

use crate::embedding::EmbeddingClient;
use crate::index::{QueryResult, VectorIndex};
use crate::retry::{RetryPolicy, with_retry};

use super::{RetrievalOptions, RetrievedChunk, SOURCE_COLLECTION_KEY};

/// Queries every collection in the index and merges the results into one ranking.
///
/// Retrieval never fails: an unreachable index or embedding service yields an empty result,
/// and a collection that cannot be queried is logged and skipped.
pub struct Retriever {
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn EmbeddingClient>,
    options: RetrievalOptions,
    retry: RetryPolicy,
}

impl Retriever {
    /// Build a retriever over `index`, embedding queries with `embedder`.
    pub fn new(
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn EmbeddingClient>,
        options: RetrievalOptions,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            index,
            embedder,
            options,
            retry,
        }
    }

    /// Options in effect.
    pub fn options(&self) -> RetrievalOptions {
        self.options
    }

    /// Return at most `n` chunks across all collections, sorted by ascending distance.
    pub async fn retrieve(&self, query: &str, n: usize) -> Vec<RetrievedChunk> {
        if n == 0 || query.trim().is_empty() {
            return Vec::new();
        }

        let index = &self.index;
        let collections = match with_retry(&self.retry, "list_collections", move || {
            index.list_collections()
        })
        .await
        {
            Ok(collections) => collections,
            Err(error) => {
                tracing::warn!(
                    error = %error,
                    "Could not enumerate collections; returning no results"
                );
                return Vec::new();
            }
        };
        if collections.is_empty() {
            tracing::debug!("Index holds no collections");
            return Vec::new();
        }

        let Some(vector) = self.embed_query(query).await else {
            return Vec::new();
        };

        let per_collection = n.saturating_mul(self.options.candidate_multiplier.max(1));
        let mut merged = Vec::new();
        for collection in &collections {
            let vector = vector.as_slice();
            let outcome = with_retry(&self.retry, "query", move || {
                index.query(collection, vector, per_collection)
            })
            .await;
            match outcome {
                Ok(result) => {
                    let before = merged.len();
                    self.collect_candidates(collection, result, &mut merged);
                    tracing::debug!(
                        collection = %collection,
                        kept = merged.len() - before,
                        "Collection queried"
                    );
                }
                Err(error) => {
                    tracing::warn!(
                        collection = %collection,
                        error = %error,
                        "Skipping collection after query failure"
                    );
                }
            }
        }

        merged.sort_by(|left, right| left.distance.total_cmp(&right.distance));
        merged.truncate(n);
        tracing::info!(
            collections = collections.len(),
            returned = merged.len(),
            requested = n,
            "Retrieval complete"
        );
        merged
    }

    async fn embed_query(&self, query: &str) -> Option<Vec<f32>> {
        let embedder = &self.embedder;
        let texts = vec![query.to_string()];
        match with_retry(&self.retry, "embed_query", move || {
            embedder.embed(texts.clone())
        })
        .await
        {
            Ok(vectors) => {
                let vector = vectors.into_iter().next();
                if vector.is_none() {
                    tracing::warn!("Embedding service returned no vector for the query");
                }
                vector
            }
            Err(error) => {
                tracing::warn!(error = %error, "Query embedding failed; returning no results");
                None
            }
        }
    }

    fn collect_candidates(
        &self,
        collection: &str,
        result: QueryResult,
        merged: &mut Vec<RetrievedChunk>,
    ) {
        let metric = result.metric.unwrap_or_default();
        for hit in result.hits {
            let Some(distance) = hit.distance.filter(|distance| !distance.is_nan()) else {
                continue;
            };
            if !metric.is_valid_distance(distance) {
                tracing::debug!(collection, distance, %metric, "Dropping out-of-range distance");
                continue;
            }
            if self
                .options
                .distance_threshold
                .is_some_and(|threshold| distance > threshold)
            {
                continue;
            }

            let mut metadata = hit.metadata;
            metadata.insert(
                SOURCE_COLLECTION_KEY.into(),
                Value::String(collection.to_string()),
            );
            merged.push(RetrievedChunk {
                text: hit.text.unwrap_or_default(),
                metadata,
                distance,
                collection: collection.to_string(),
                metric,
            });
        }
    }
}
