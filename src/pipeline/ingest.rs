use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::embedding::EmbeddingClient;
use crate::index::{
    IndexRecord, VectorIndex, compute_chunk_hash, current_timestamp_rfc3339, point_id,
};
use crate::metrics::IngestionMetrics;
use crate::processing::{Batch, Chunk, Segmenter, batch, clean_source};
use crate::retry::{RetryPolicy, with_retry};
use crate::sources::DocumentSource;

use super::PipelineError;

/// Collection metadata key refreshed after every successful store.
pub const LAST_UPDATED_KEY: &str = "last_updated";

/// Item and byte bounds for embedding batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    /// Maximum chunks per batch; `0` behaves like `1`.
    pub max_items: usize,
    /// Maximum estimated request bytes per batch.
    pub max_bytes: usize,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            max_items: 16,
            max_bytes: 100_000,
        }
    }
}

/// Stage at which an ingestion run ran out of material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyStage {
    /// The source produced no documents.
    NoDocuments,
    /// Documents produced no chunks (all blank).
    NoChunks,
    /// No batch could be embedded.
    NoEmbeddings,
    /// Batches were embedded but the index rejected every one of them.
    NoStorage,
}

/// Overall result of an ingestion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "stage")]
pub enum IngestionOutcome {
    /// Every batch was embedded and stored.
    Completed,
    /// Some batches failed; at least one other was stored.
    Partial,
    /// Nothing reached the index.
    Empty(EmptyStage),
}

/// Counts describing one ingestion run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestionReport {
    /// Target collection.
    pub collection: String,
    /// Documents loaded.
    pub documents: usize,
    /// Chunks produced by the segmenter.
    pub chunks: usize,
    /// Batches planned.
    pub batches: usize,
    /// Chunks stored in the index.
    pub stored: usize,
    /// Batches dropped after embedding or storage failures.
    pub failed_batches: usize,
    /// Chunks contained in failed batches.
    pub failed_chunks: usize,
    /// Batches that carried a single item above the byte bound.
    pub oversized_batches: usize,
    /// Vector dimension observed for this run.
    pub dimension: Option<usize>,
    /// Overall outcome.
    pub outcome: IngestionOutcome,
}

impl IngestionReport {
    fn empty(collection: &str, documents: usize, stage: EmptyStage) -> Self {
        Self {
            collection: collection.to_string(),
            documents,
            chunks: 0,
            batches: 0,
            stored: 0,
            failed_batches: 0,
            failed_chunks: 0,
            oversized_batches: 0,
            dimension: None,
            outcome: IngestionOutcome::Empty(stage),
        }
    }
}

/// Load → clean → segment → batch → embed → store.
pub struct IngestionPipeline {
    segmenter: Segmenter,
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn EmbeddingClient>,
    limits: BatchLimits,
    retry: RetryPolicy,
    metrics: Arc<IngestionMetrics>,
}

enum BatchFailure {
    Embedding(String),
    Malformed(String),
    Storage(String),
}

impl BatchFailure {
    fn describe(&self) -> (&'static str, &str) {
        match self {
            Self::Embedding(detail) => ("embedding", detail.as_str()),
            Self::Malformed(detail) => ("malformed_embedding", detail.as_str()),
            Self::Storage(detail) => ("storage", detail.as_str()),
        }
    }
}

impl IngestionPipeline {
    /// Assemble a pipeline from its collaborators.
    pub fn new(
        segmenter: Segmenter,
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn EmbeddingClient>,
        limits: BatchLimits,
        retry: RetryPolicy,
        metrics: Arc<IngestionMetrics>,
    ) -> Self {
        Self {
            segmenter,
            index,
            embedder,
            limits,
            retry,
            metrics,
        }
    }

    /// Counters updated by this pipeline.
    pub fn metrics(&self) -> &Arc<IngestionMetrics> {
        &self.metrics
    }

    /// Ingest every document from `source` into `collection`.
    ///
    /// A missing source location or an empty collection name is an error. Everything else,
    /// including embedding and storage failures, is reported through [`IngestionReport`].
    pub async fn ingest(
        &self,
        source: &dyn DocumentSource,
        collection: &str,
    ) -> Result<IngestionReport, PipelineError> {
        let collection = collection.trim();
        if collection.is_empty() {
            return Err(PipelineError::Input("collection name is empty".into()));
        }

        let documents = source.load().await?;
        if documents.is_empty() {
            tracing::info!(collection, "No documents to ingest");
            return Ok(IngestionReport::empty(collection, 0, EmptyStage::NoDocuments));
        }
        self.metrics.record_documents(documents.len() as u64);

        let chunks = self.segmenter.segment_all(&documents);
        if chunks.is_empty() {
            tracing::info!(
                collection,
                documents = documents.len(),
                "Documents produced no chunks"
            );
            return Ok(IngestionReport::empty(
                collection,
                documents.len(),
                EmptyStage::NoChunks,
            ));
        }

        let chunk_count = chunks.len();
        let plan = batch(chunks, self.limits.max_items, self.limits.max_bytes);
        for warning in &plan.warnings {
            tracing::warn!(
                collection,
                batch_index = warning.batch_index,
                item_bytes = warning.item_bytes,
                max_bytes = warning.max_bytes,
                "Oversized chunk forwarded in its own batch"
            );
        }
        self.metrics.record_oversized(plan.warnings.len() as u64);

        let mut report = IngestionReport {
            collection: collection.to_string(),
            documents: documents.len(),
            chunks: chunk_count,
            batches: plan.batches.len(),
            stored: 0,
            failed_batches: 0,
            failed_chunks: 0,
            oversized_batches: plan.warnings.len(),
            dimension: None,
            outcome: IngestionOutcome::Completed,
        };
        tracing::info!(
            collection,
            documents = report.documents,
            chunks = report.chunks,
            batches = report.batches,
            "Starting ingestion"
        );

        let mut embedded_batches = 0;
        for (batch_index, batch) in plan.batches.into_iter().enumerate() {
            let size = batch.len();
            match self
                .process_batch(collection, batch, &mut report.dimension, &mut embedded_batches)
                .await
            {
                Ok(stored) => {
                    report.stored += stored;
                    self.metrics.record_chunks_stored(stored as u64);
                }
                Err(failure) => {
                    let (stage, detail) = failure.describe();
                    tracing::warn!(
                        collection,
                        batch_index,
                        chunks = size,
                        stage,
                        error = detail,
                        "Batch failed; continuing"
                    );
                    report.failed_batches += 1;
                    report.failed_chunks += size;
                    self.metrics.record_batch_failed();
                }
            }
        }

        report.outcome = if embedded_batches == 0 {
            IngestionOutcome::Empty(EmptyStage::NoEmbeddings)
        } else if report.stored == 0 {
            IngestionOutcome::Empty(EmptyStage::NoStorage)
        } else if report.failed_batches > 0 {
            IngestionOutcome::Partial
        } else {
            IngestionOutcome::Completed
        };

        if report.stored > 0 {
            self.touch_collection(collection).await;
        }

        tracing::info!(
            collection,
            stored = report.stored,
            failed_batches = report.failed_batches,
            outcome = ?report.outcome,
            "Ingestion finished"
        );
        Ok(report)
    }

    async fn process_batch(
        &self,
        collection: &str,
        batch: Batch<Chunk>,
        run_dimension: &mut Option<usize>,
        embedded_batches: &mut usize,
    ) -> Result<usize, BatchFailure> {
        let texts: Vec<String> = batch.items.iter().map(|chunk| chunk.text.clone()).collect();
        let embedder = &self.embedder;
        let vectors = with_retry(&self.retry, "embed", move || embedder.embed(texts.clone()))
            .await
            .map_err(|error| BatchFailure::Embedding(error.to_string()))?;

        let dimension = validate_vectors(&vectors, batch.len(), *run_dimension)
            .map_err(BatchFailure::Malformed)?;
        *embedded_batches += 1;

        if run_dimension.is_none() {
            let index = &self.index;
            with_retry(&self.retry, "get_or_create", move || {
                index.get_or_create(collection, dimension)
            })
            .await
            .map_err(|error| BatchFailure::Storage(error.to_string()))?;
            *run_dimension = Some(dimension);
        }

        let records: Vec<IndexRecord> = batch
            .items
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| to_record(chunk, vector))
            .collect();

        let index = &self.index;
        with_retry(&self.retry, "add", move || {
            index.add(collection, records.clone())
        })
        .await
        .map_err(|error| BatchFailure::Storage(error.to_string()))
    }

    async fn touch_collection(&self, collection: &str) {
        if !self.index.supports_metadata_update() {
            return;
        }
        let mut metadata = Map::new();
        metadata.insert(
            LAST_UPDATED_KEY.into(),
            Value::String(current_timestamp_rfc3339()),
        );
        let index = &self.index;
        if let Err(error) = with_retry(&self.retry, "update_collection_metadata", move || {
            index.update_collection_metadata(collection, metadata.clone())
        })
        .await
        {
            tracing::warn!(collection, error = %error, "Failed to refresh collection metadata");
        }
    }

    /// Remove every chunk of `source` from `collection`. `source` may be a path.
    pub async fn forget(&self, collection: &str, source: &str) -> Result<(), PipelineError> {
        let Some(identity) = clean_source(source) else {
            return Err(PipelineError::Input("source is empty".into()));
        };
        let index = &self.index;
        let target = identity.as_str();
        with_retry(&self.retry, "delete_by_source", move || {
            index.delete_by_source(collection, target)
        })
        .await?;
        tracing::info!(collection, source = %identity, "Removed document from collection");
        Ok(())
    }

    /// Drop a whole collection.
    pub async fn drop_collection(&self, collection: &str) -> Result<(), PipelineError> {
        if collection.trim().is_empty() {
            return Err(PipelineError::Input("collection name is empty".into()));
        }
        let index = &self.index;
        with_retry(&self.retry, "delete_collection", move || index.delete(collection)).await?;
        Ok(())
    }
}

/// Check one batch's vectors: one per chunk, non-empty, and sharing the run's dimension.
fn validate_vectors(
    vectors: &[Vec<f32>],
    expected_count: usize,
    run_dimension: Option<usize>,
) -> Result<usize, String> {
    if vectors.len() != expected_count {
        return Err(format!(
            "expected {expected_count} vectors, received {}",
            vectors.len()
        ));
    }
    let dimension = run_dimension.unwrap_or_else(|| vectors.first().map_or(0, Vec::len));
    if dimension == 0 {
        return Err("embedding service returned empty vectors".into());
    }
    if let Some(bad) = vectors.iter().find(|vector| vector.len() != dimension) {
        return Err(format!(
            "vector dimension {} does not match run dimension {dimension}",
            bad.len()
        ));
    }
    Ok(dimension)
}

fn to_record(chunk: Chunk, vector: Vec<f32>) -> IndexRecord {
    let hash = chunk
        .metadata
        .get("chunk_hash")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| compute_chunk_hash(&chunk.text));
    IndexRecord {
        id: point_id(&chunk.source, chunk.chunk_index, &hash),
        text: chunk.text,
        metadata: chunk.metadata,
        vector,
    }
}
