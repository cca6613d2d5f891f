//! In-memory stand-ins for the external services, shared by unit tests.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::embedding::{EmbeddingClient, EmbeddingClientError};
use crate::generation::{GenerationClient, GenerationClientError, GenerationOptions};
use crate::index::{DistanceMetric, IndexError, IndexHit, IndexRecord, QueryResult, VectorIndex};

fn unavailable() -> (StatusCode, String) {
    (StatusCode::SERVICE_UNAVAILABLE, "unavailable".to_string())
}

pub(crate) struct FakeEmbedder {
    pub(crate) dimension: usize,
    pub(crate) calls: AtomicUsize,
    pub(crate) transient_failures: AtomicUsize,
    pub(crate) fail_always: bool,
}

impl FakeEmbedder {
    pub(crate) fn new(dimension: usize) -> Self {
        Self {
            dimension,
            calls: AtomicUsize::new(0),
            transient_failures: AtomicUsize::new(0),
            fail_always: false,
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            fail_always: true,
            ..Self::new(3)
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingClient for FakeEmbedder {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let pending = self.transient_failures.load(Ordering::SeqCst);
        if self.fail_always || pending > 0 {
            if pending > 0 {
                self.transient_failures.fetch_sub(1, Ordering::SeqCst);
            }
            let (status, body) = unavailable();
            return Err(EmbeddingClientError::UnexpectedStatus { status, body });
        }
        Ok(texts
            .iter()
            .map(|text| {
                let mut vector = vec![0.0; self.dimension];
                if let Some(first) = vector.first_mut() {
                    *first = text.len() as f32;
                }
                vector
            })
            .collect())
    }
}

#[derive(Default)]
pub(crate) struct FakeIndex {
    pub(crate) results: BTreeMap<String, QueryResult>,
    pub(crate) failing_queries: BTreeSet<String>,
    pub(crate) fail_listing: bool,
    pub(crate) fail_adds: bool,
    pub(crate) rejected_sources: BTreeSet<String>,
    pub(crate) metadata_capable: bool,
    pub(crate) created: Mutex<Vec<(String, usize)>>,
    pub(crate) stored: Mutex<BTreeMap<String, Vec<IndexRecord>>>,
    pub(crate) metadata_updates: Mutex<Vec<(String, Map<String, Value>)>>,
    pub(crate) query_limits: Mutex<Vec<(String, usize)>>,
}

impl FakeIndex {
    pub(crate) fn with_distances(collections: &[(&str, &[f32])]) -> Self {
        let results = collections
            .iter()
            .map(|(name, distances)| {
                let hits = distances
                    .iter()
                    .enumerate()
                    .map(|(index, distance)| IndexHit {
                        text: Some(format!("{name}-{index}")),
                        metadata: Map::new(),
                        distance: Some(*distance),
                    })
                    .collect();
                (
                    name.to_string(),
                    QueryResult {
                        metric: Some(DistanceMetric::Cosine),
                        hits,
                    },
                )
            })
            .collect();
        Self {
            results,
            ..Self::default()
        }
    }

    pub(crate) fn query_limits(&self) -> Vec<(String, usize)> {
        self.query_limits.lock().expect("query lock").clone()
    }

    pub(crate) fn stored_records(&self, collection: &str) -> Vec<IndexRecord> {
        self.stored
            .lock()
            .expect("stored lock")
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl VectorIndex for FakeIndex {
    async fn list_collections(&self) -> Result<Vec<String>, IndexError> {
        if self.fail_listing {
            let (status, body) = unavailable();
            return Err(IndexError::UnexpectedStatus { status, body });
        }
        let mut names: BTreeSet<String> = self.results.keys().cloned().collect();
        names.extend(self.failing_queries.iter().cloned());
        names.extend(self.stored.lock().expect("stored lock").keys().cloned());
        Ok(names.into_iter().collect())
    }

    async fn get_or_create(&self, name: &str, dimension: usize) -> Result<(), IndexError> {
        self.created
            .lock()
            .expect("created lock")
            .push((name.to_string(), dimension));
        Ok(())
    }

    async fn add(&self, collection: &str, records: Vec<IndexRecord>) -> Result<usize, IndexError> {
        let rejected = records.iter().any(|record| {
            record.metadata["source"]
                .as_str()
                .is_some_and(|source| self.rejected_sources.contains(source))
        });
        if self.fail_adds || rejected {
            return Err(IndexError::Unsupported("writes disabled"));
        }
        let count = records.len();
        self.stored
            .lock()
            .expect("stored lock")
            .entry(collection.to_string())
            .or_default()
            .extend(records);
        Ok(count)
    }

    async fn query(
        &self,
        collection: &str,
        _vector: &[f32],
        k: usize,
    ) -> Result<QueryResult, IndexError> {
        self.query_limits
            .lock()
            .expect("query lock")
            .push((collection.to_string(), k));
        if self.failing_queries.contains(collection) {
            let (status, body) = unavailable();
            return Err(IndexError::UnexpectedStatus { status, body });
        }
        let mut result = self
            .results
            .get(collection)
            .cloned()
            .ok_or_else(|| IndexError::CollectionNotFound(collection.to_string()))?;
        result.hits.truncate(k);
        Ok(result)
    }

    async fn delete(&self, collection: &str) -> Result<(), IndexError> {
        self.stored.lock().expect("stored lock").remove(collection);
        Ok(())
    }

    async fn delete_by_source(&self, collection: &str, source: &str) -> Result<(), IndexError> {
        if let Some(records) = self.stored.lock().expect("stored lock").get_mut(collection) {
            records.retain(|record| record.metadata.get("source") != Some(&Value::from(source)));
        }
        Ok(())
    }

    fn supports_metadata_update(&self) -> bool {
        self.metadata_capable
    }

    async fn update_collection_metadata(
        &self,
        collection: &str,
        metadata: Map<String, Value>,
    ) -> Result<(), IndexError> {
        self.metadata_updates
            .lock()
            .expect("metadata lock")
            .push((collection.to_string(), metadata));
        Ok(())
    }
}

pub(crate) struct FakeGenerator {
    pub(crate) reply: Result<String, StatusCode>,
    pub(crate) prompts: Mutex<Vec<String>>,
}

impl FakeGenerator {
    pub(crate) fn replying(text: &str) -> Self {
        Self {
            reply: Ok(text.to_string()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn failing(status: StatusCode) -> Self {
        Self {
            reply: Err(status),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn prompt_count(&self) -> usize {
        self.prompts.lock().expect("prompts lock").len()
    }
}

#[async_trait]
impl GenerationClient for FakeGenerator {
    async fn complete(
        &self,
        prompt: &str,
        _options: GenerationOptions,
    ) -> Result<String, GenerationClientError> {
        self.prompts
            .lock()
            .expect("prompts lock")
            .push(prompt.to_string());
        match &self.reply {
            Ok(text) => Ok(text.clone()),
            Err(status) => Err(GenerationClientError::GenerationFailed {
                status: *status,
                body: "failed".to_string(),
            }),
        }
    }
}
