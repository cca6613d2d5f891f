//! Multi-collection retrieval and re-ranking.

mod retriever;

use serde_json::{Map, Value};

use crate::index::DistanceMetric;

pub use retriever::Retriever;

/// Metadata key recording which collection a retrieved chunk came from.
pub const SOURCE_COLLECTION_KEY: &str = "source_collection";

/// Default relevance cut-off applied to distances.
pub const DEFAULT_DISTANCE_THRESHOLD: f32 = 0.9;

/// A candidate that survived filtering, ready to be used as context.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedChunk {
    /// Stored chunk text; empty when the index held none.
    pub text: String,
    /// Stored metadata plus `source_collection`.
    pub metadata: Map<String, Value>,
    /// Distance to the query; lower is more relevant.
    pub distance: f32,
    /// Collection the chunk was retrieved from.
    pub collection: String,
    /// Metric the distance was computed with.
    pub metric: DistanceMetric,
}

/// Tuning for [`Retriever`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrievalOptions {
    /// Candidates above this distance are dropped; `None` keeps every valid candidate.
    pub distance_threshold: Option<f32>,
    /// Each collection is asked for `candidate_multiplier × n` candidates.
    pub candidate_multiplier: usize,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            distance_threshold: Some(DEFAULT_DISTANCE_THRESHOLD),
            candidate_multiplier: 2,
        }
    }
}
