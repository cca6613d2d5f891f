//! Shared types used by the vector index trait and the Qdrant adapter.

use crate::retry::{Retryable, is_transient_status};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

/// Errors returned while interacting with the vector index.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Base URL failed to parse or normalize.
    #[error("Invalid index URL: {0}")]
    InvalidUrl(String),
    /// HTTP layer failed before receiving a response.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Index responded with an unexpected status code.
    #[error("Unexpected index response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned by the index.
        status: StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
    /// The named collection does not exist.
    #[error("Collection '{0}' not found")]
    CollectionNotFound(String),
    /// Records or query vectors disagree with the collection dimension.
    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension declared by the collection.
        expected: usize,
        /// Dimension supplied by the caller.
        actual: usize,
    },
    /// The index cannot perform the requested operation.
    #[error("Operation not supported by this index: {0}")]
    Unsupported(&'static str),
}

impl Retryable for IndexError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Http(error) => error.is_timeout() || error.is_connect() || error.is_request(),
            Self::UnexpectedStatus { status, .. } => is_transient_status(*status),
            _ => false,
        }
    }
}

/// Distance function a collection was created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DistanceMetric {
    /// Cosine distance, valid in `[0, 2]`.
    #[default]
    Cosine,
    /// Negated inner product expressed as `1 - dot`; any finite value.
    Dot,
    /// Euclidean distance, non-negative.
    Euclid,
    /// Manhattan distance, non-negative.
    Manhattan,
}

impl DistanceMetric {
    const COSINE_TOLERANCE: f32 = 1e-4;

    /// Parse the names used by Qdrant (`Cosine`, `Dot`, `Euclid`, `Manhattan`) and common aliases.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "cosine" => Some(Self::Cosine),
            "dot" | "ip" => Some(Self::Dot),
            "euclid" | "euclidean" | "l2" => Some(Self::Euclid),
            "manhattan" | "l1" => Some(Self::Manhattan),
            _ => None,
        }
    }

    /// Convert a similarity score reported by Qdrant into a distance (lower is closer).
    pub fn score_to_distance(self, score: f32) -> f32 {
        match self {
            Self::Cosine | Self::Dot => 1.0 - score,
            Self::Euclid | Self::Manhattan => score,
        }
    }

    /// Whether `distance` lies within the metric's valid range.
    pub fn is_valid_distance(self, distance: f32) -> bool {
        if !distance.is_finite() {
            return false;
        }
        match self {
            Self::Cosine => {
                (-Self::COSINE_TOLERANCE..=2.0 + Self::COSINE_TOLERANCE).contains(&distance)
            }
            Self::Dot => true,
            Self::Euclid | Self::Manhattan => distance >= 0.0,
        }
    }

    /// Name understood by Qdrant.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cosine => "Cosine",
            Self::Dot => "Dot",
            Self::Euclid => "Euclid",
            Self::Manhattan => "Manhattan",
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record handed to [`super::VectorIndex::add`].
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRecord {
    /// Stable identifier; re-adding the same id overwrites the stored record.
    pub id: String,
    /// Chunk text stored alongside the vector.
    pub text: String,
    /// Chunk metadata stored as payload.
    pub metadata: Map<String, Value>,
    /// Embedding vector.
    pub vector: Vec<f32>,
}

/// One candidate returned by a query.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHit {
    /// Stored text, when the payload carried it.
    pub text: Option<String>,
    /// Stored metadata, excluding the text field.
    pub metadata: Map<String, Value>,
    /// Distance to the query (lower is closer); `None` when the index reported none.
    pub distance: Option<f32>,
}

/// Candidates for one collection plus the metric they were scored with.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryResult {
    /// Metric declared by the collection; `None` when it could not be determined.
    pub metric: Option<DistanceMetric>,
    /// Candidates ordered as returned by the index.
    pub hits: Vec<IndexHit>,
}

#[derive(Deserialize)]
pub(crate) struct ListCollectionsResponse {
    pub(crate) result: ListCollectionsResult,
}

#[derive(Deserialize)]
pub(crate) struct ListCollectionsResult {
    pub(crate) collections: Vec<CollectionDescription>,
}

#[derive(Deserialize)]
pub(crate) struct CollectionDescription {
    pub(crate) name: String,
}

#[derive(Deserialize)]
pub(crate) struct CollectionInfoResponse {
    pub(crate) result: CollectionInfo,
}

#[derive(Deserialize)]
pub(crate) struct CollectionInfo {
    pub(crate) config: CollectionConfig,
}

#[derive(Deserialize)]
pub(crate) struct CollectionConfig {
    pub(crate) params: CollectionParams,
}

#[derive(Deserialize)]
pub(crate) struct CollectionParams {
    #[serde(default)]
    pub(crate) vectors: Option<Value>,
}

impl CollectionParams {
    /// `(size, distance)` of the unnamed vector config, or of the first named vector.
    pub(crate) fn vector_params(&self) -> (Option<usize>, Option<DistanceMetric>) {
        let Some(vectors) = self.vectors.as_ref().and_then(Value::as_object) else {
            return (None, None);
        };
        let params = if vectors.contains_key("size") || vectors.contains_key("distance") {
            Some(vectors)
        } else {
            vectors.values().find_map(Value::as_object)
        };
        let Some(params) = params else {
            return (None, None);
        };
        let size = params
            .get("size")
            .and_then(Value::as_u64)
            .map(|size| size as usize);
        let metric = params
            .get("distance")
            .and_then(Value::as_str)
            .and_then(DistanceMetric::parse);
        (size, metric)
    }
}

#[derive(Deserialize)]
pub(crate) struct QueryResponse {
    pub(crate) result: QueryResponseResult,
}

#[derive(Deserialize)]
#[serde(untagged)]
pub(crate) enum QueryResponseResult {
    Points(Vec<QueryPoint>),
    Object {
        #[serde(default)]
        points: Vec<QueryPoint>,
    },
}

impl QueryResponseResult {
    pub(crate) fn into_points(self) -> Vec<QueryPoint> {
        match self {
            Self::Points(points) | Self::Object { points } => points,
        }
    }
}

#[derive(Deserialize)]
pub(crate) struct QueryPoint {
    #[serde(default)]
    pub(crate) score: Option<f32>,
    #[serde(default)]
    pub(crate) payload: Option<Map<String, Value>>,
}
