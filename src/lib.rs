#![deny(missing_docs)]

//! Chunking, batching, and multi-collection retrieval for retrieval-augmented generation.

/// Environment-driven configuration management.
pub mod config;
/// Embedding client abstraction and the HTTP adapter.
pub mod embedding;
/// Prompt assembly and the text-generation client.
pub mod generation;
/// Vector index abstraction and the Qdrant adapter.
pub mod index;
/// Structured logging and tracing setup.
pub mod logging;
/// Ingestion metrics helpers.
pub mod metrics;
/// Ingestion and summary orchestrators.
pub mod pipeline;
/// Text cleaning, segmentation, and batching.
pub mod processing;
/// Multi-collection retrieval.
pub mod retrieval;
/// Retry with exponential backoff for outbound calls.
pub mod retry;
/// Document loaders.
pub mod sources;
/// Token counting and truncation.
pub mod tokenizer;

#[cfg(test)]
mod testing;
