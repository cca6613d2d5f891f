use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use httpmock::{Method::GET, Method::POST, Method::PUT, MockServer};
use ragline::embedding::{EmbeddingClient, EmbeddingClientError, HttpEmbeddingClient};
use ragline::index::{
    DistanceMetric, IndexError, IndexHit, IndexRecord, QdrantIndex, QueryResult, VectorIndex,
};
use ragline::metrics::IngestionMetrics;
use ragline::pipeline::{
    BatchLimits, EmptyStage, IngestionOutcome, IngestionPipeline, SummaryOutcome,
    SummaryPipeline,
};
use ragline::processing::{SegmentOptions, Segmenter};
use ragline::retrieval::{RetrievalOptions, Retriever};
use ragline::retry::RetryPolicy;
use ragline::sources::{DirectorySource, MemorySource};
use ragline::tokenizer::Tokenizer;
use serde_json::{Map, json};

#[derive(Default)]
struct RecordingEmbedder {
    batch_sizes: Mutex<Vec<usize>>,
}

#[async_trait]
impl EmbeddingClient for RecordingEmbedder {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        self.batch_sizes.lock().unwrap().push(texts.len());
        Ok(texts.iter().map(|text| vec![text.len() as f32, 1.0]).collect())
    }
}

#[derive(Default)]
struct MemoryIndex {
    canned: BTreeMap<String, Vec<f32>>,
    stored: Mutex<Vec<IndexRecord>>,
}

impl MemoryIndex {
    fn with_distances(collections: &[(&str, &[f32])]) -> Self {
        Self {
            canned: collections
                .iter()
                .map(|(name, distances)| (name.to_string(), distances.to_vec()))
                .collect(),
            stored: Mutex::default(),
        }
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn list_collections(&self) -> Result<Vec<String>, IndexError> {
        Ok(self.canned.keys().cloned().collect())
    }

    async fn get_or_create(&self, _name: &str, _dimension: usize) -> Result<(), IndexError> {
        Ok(())
    }

    async fn add(&self, _collection: &str, records: Vec<IndexRecord>) -> Result<usize, IndexError> {
        let count = records.len();
        self.stored.lock().unwrap().extend(records);
        Ok(count)
    }

    async fn query(
        &self,
        collection: &str,
        _vector: &[f32],
        k: usize,
    ) -> Result<QueryResult, IndexError> {
        let distances = self
            .canned
            .get(collection)
            .ok_or_else(|| IndexError::CollectionNotFound(collection.to_string()))?;
        let hits = distances
            .iter()
            .take(k)
            .map(|distance| IndexHit {
                text: Some(format!("{collection}@{distance}")),
                metadata: Map::new(),
                distance: Some(*distance),
            })
            .collect();
        Ok(QueryResult {
            metric: Some(DistanceMetric::Cosine),
            hits,
        })
    }

    async fn delete(&self, _collection: &str) -> Result<(), IndexError> {
        Ok(())
    }

    async fn delete_by_source(&self, _collection: &str, _source: &str) -> Result<(), IndexError> {
        Ok(())
    }
}

struct CannedGenerator;

#[async_trait]
impl ragline::generation::GenerationClient for CannedGenerator {
    async fn complete(
        &self,
        prompt: &str,
        _options: ragline::generation::GenerationOptions,
    ) -> Result<String, ragline::generation::GenerationClientError> {
        Ok(format!("summary of {} bytes", prompt.len()))
    }
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(2, Duration::from_millis(1))
}

fn pipeline(index: Arc<dyn VectorIndex>, embedder: Arc<dyn EmbeddingClient>) -> IngestionPipeline {
    let segmenter =
        Segmenter::new(Tokenizer::whitespace(), SegmentOptions::default()).expect("segmenter");
    IngestionPipeline::new(
        segmenter,
        index,
        embedder,
        BatchLimits::default(),
        fast_retry(),
        Arc::new(IngestionMetrics::new()),
    )
}

#[tokio::test]
async fn empty_directory_reports_no_documents() {
    let dir = tempfile::tempdir().expect("tempdir");
    let embedder = Arc::new(RecordingEmbedder::default());
    let report = pipeline(Arc::new(MemoryIndex::default()), embedder.clone())
        .ingest(&DirectorySource::new(dir.path()), "documents")
        .await
        .expect("report");

    assert_eq!(report.outcome, IngestionOutcome::Empty(EmptyStage::NoDocuments));
    assert_eq!(report.stored, 0);
    assert!(embedder.batch_sizes.lock().unwrap().is_empty());
}

#[tokio::test]
async fn twenty_small_chunks_travel_in_two_batches() {
    let embedder = Arc::new(RecordingEmbedder::default());
    let index = Arc::new(MemoryIndex::default());
    let source = MemorySource::from_texts(
        (0..20).map(|n| (format!("note-{n}.txt"), format!("Observation number {n}."))),
    );
    let report = pipeline(index.clone(), embedder.clone())
        .ingest(&source, "documents")
        .await
        .expect("report");

    assert_eq!(report.outcome, IngestionOutcome::Completed);
    assert_eq!(report.chunks, 20);
    assert_eq!(report.stored, 20);
    assert_eq!(*embedder.batch_sizes.lock().unwrap(), vec![16, 4]);
    assert_eq!(index.stored.lock().unwrap().len(), 20);
}

#[tokio::test]
async fn sources_never_carry_path_separators() {
    let dir = tempfile::tempdir().expect("tempdir");
    let nested = dir.path().join("visits");
    std::fs::create_dir(&nested).expect("nested dir");
    std::fs::write(nested.join("intake.md"), "# Intake\nPatient reports a cough.").expect("write");
    std::fs::write(dir.path().join("plan.txt"), "Rest and fluids.").expect("write");

    let index = Arc::new(MemoryIndex::default());
    let report = pipeline(index.clone(), Arc::new(RecordingEmbedder::default()))
        .ingest(&DirectorySource::new(dir.path()), "documents")
        .await
        .expect("report");
    assert_eq!(report.stored, 2);

    let stored = index.stored.lock().unwrap();
    let mut sources: Vec<&str> = stored
        .iter()
        .map(|record| record.metadata["source"].as_str().expect("source string"))
        .collect();
    sources.sort_unstable();
    assert_eq!(sources, vec!["intake.md", "plan.txt"]);
    assert!(sources.iter().all(|source| !source.contains(['/', '\\'])));
}

#[tokio::test]
async fn retrieval_merges_collections_and_summarizes() {
    let index = Arc::new(MemoryIndex::with_distances(&[
        ("A", &[0.1, 0.95]),
        ("B", &[0.2]),
    ]));
    let retriever = Retriever::new(
        index,
        Arc::new(RecordingEmbedder::default()),
        RetrievalOptions::default(),
        fast_retry(),
    );

    let chunks = retriever.retrieve("cough", 5).await;
    let distances: Vec<f32> = chunks.iter().map(|chunk| chunk.distance).collect();
    assert_eq!(distances, vec![0.1, 0.2]);

    let summary = SummaryPipeline::new(
        retriever,
        Arc::new(CannedGenerator),
        "Summarize.",
        Default::default(),
        5,
        fast_retry(),
    );
    match summary.summarize("cough", None).await.expect("outcome") {
        SummaryOutcome::Generated { text, context } => {
            assert!(text.starts_with("summary of"));
            assert_eq!(context.len(), 2);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn hello_world_is_ingested_over_http() {
    let server = MockServer::start_async().await;
    let embed = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/embed")
                .json_body(json!({ "inputs": ["hello world"] }));
            then.status(200).json_body(json!([[0.1, 0.2, 0.3]]));
        })
        .await;
    let lookup = server
        .mock_async(|when, then| {
            when.method(GET).path("/collections/documents");
            then.status(404).json_body(json!({ "status": { "error": "Not found" } }));
        })
        .await;
    let create = server
        .mock_async(|when, then| {
            when.method(PUT)
                .path("/collections/documents")
                .json_body(json!({ "vectors": { "size": 3, "distance": "Cosine" } }));
            then.status(200).json_body(json!({ "result": true, "status": "ok" }));
        })
        .await;
    let upsert = server
        .mock_async(|when, then| {
            when.method(PUT)
                .path("/collections/documents/points")
                .body_contains("\"text\":\"hello world\"")
                .body_contains("\"source\":\"greeting.txt\"");
            then.status(200).json_body(json!({ "result": { "status": "completed" } }));
        })
        .await;

    let index = QdrantIndex::new(&server.base_url(), None, Duration::from_secs(5), false)
        .expect("index client");
    let embedder =
        HttpEmbeddingClient::new(&server.base_url(), Duration::from_secs(5)).expect("embedder");
    let segmenter = Segmenter::new(
        Tokenizer::from_name("cl100k_base").expect("tokenizer"),
        SegmentOptions::default(),
    )
    .expect("segmenter");
    let pipeline = IngestionPipeline::new(
        segmenter,
        Arc::new(index),
        Arc::new(embedder),
        BatchLimits::default(),
        fast_retry(),
        Arc::new(IngestionMetrics::new()),
    );

    let source = MemorySource::from_texts([("/tmp/greeting.txt", "hello world")]);
    let report = pipeline.ingest(&source, "documents").await.expect("report");

    assert_eq!(report.chunks, 1);
    assert_eq!(report.stored, 1);
    assert_eq!(report.dimension, Some(3));
    assert_eq!(report.outcome, IngestionOutcome::Completed);
    assert_eq!(pipeline.metrics().snapshot().chunks_stored, 1);
    embed.assert_async().await;
    lookup.assert_async().await;
    create.assert_async().await;
    upsert.assert_async().await;
}
