//! Vector index abstraction and its Qdrant-backed implementation.

pub mod client;
pub mod payload;
pub mod types;

use async_trait::async_trait;
use serde_json::{Map, Value};

pub use client::QdrantIndex;
pub use payload::{compute_chunk_hash, current_timestamp_rfc3339, point_id};
pub use types::{DistanceMetric, IndexError, IndexHit, IndexRecord, QueryResult};

/// Named collections of vectors with attached text and metadata.
///
/// Collections are created on demand with a fixed dimension. Queries return candidates with a
/// distance (lower is closer) plus the metric the collection was declared with.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Names of every collection in the index.
    async fn list_collections(&self) -> Result<Vec<String>, IndexError>;

    /// Ensure `name` exists with vectors of `dimension` components.
    async fn get_or_create(&self, name: &str, dimension: usize) -> Result<(), IndexError>;

    /// Store records, overwriting any with the same id. Returns the number stored.
    async fn add(&self, collection: &str, records: Vec<IndexRecord>) -> Result<usize, IndexError>;

    /// Return up to `k` nearest candidates for `vector`.
    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        k: usize,
    ) -> Result<QueryResult, IndexError>;

    /// Drop a whole collection.
    async fn delete(&self, collection: &str) -> Result<(), IndexError>;

    /// Remove every record whose `source` metadata equals `source`.
    async fn delete_by_source(&self, collection: &str, source: &str) -> Result<(), IndexError>;

    /// Whether [`VectorIndex::update_collection_metadata`] is available.
    fn supports_metadata_update(&self) -> bool {
        false
    }

    /// Merge `metadata` into the collection-level metadata.
    async fn update_collection_metadata(
        &self,
        _collection: &str,
        _metadata: Map<String, Value>,
    ) -> Result<(), IndexError> {
        Err(IndexError::Unsupported("collection metadata updates"))
    }
}
