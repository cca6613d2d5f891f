//! Core data types and error definitions for the processing pipeline.

use serde_json::{Map, Value};
use thiserror::Error;

use super::clean::{clean_source, source_from_metadata};

/// Identity used when neither the document nor its metadata names an origin.
pub const UNKNOWN_SOURCE: &str = "unknown";

/// Errors produced while turning raw text into chunks.
#[derive(Debug, Error)]
pub enum ChunkingError {
    /// Ingestion configured an impossible token budget.
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,
}

/// A loaded document awaiting segmentation.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Origin of the document; reduced to its last path component when chunked.
    pub source: String,
    /// Full document text.
    pub text: String,
    /// Arbitrary document-level metadata.
    pub metadata: Map<String, Value>,
}

impl Document {
    /// Build a document from an origin (path, URI, or name) and its text.
    pub fn new(source: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            text: text.into(),
            metadata: Map::new(),
        }
    }

    /// Attach document-level metadata.
    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Clean identity of the document: never contains a path separator.
    pub fn identity(&self) -> String {
        clean_source(&self.source)
            .or_else(|| source_from_metadata(&self.metadata))
            .unwrap_or_else(|| UNKNOWN_SOURCE.to_string())
    }
}

/// Contiguous span of a document's cleaned text, sized to the token budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
    /// Byte offset of the first character within the segmented text.
    pub start: usize,
    /// Span text, trimmed.
    pub text: String,
}

/// A retrievable unit: span text plus merged document and chunk-local metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// Chunk text.
    pub text: String,
    /// Clean document identity, mirrored in `metadata["source"]`.
    pub source: String,
    /// Position of the chunk within its document.
    pub chunk_index: usize,
    /// Document metadata merged with `start_index`, `chunk_index`, `part_number`,
    /// `section_title`, `chunk_hash`, and `source`.
    pub metadata: Map<String, Value>,
}

/// Options applied by the segmenter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentOptions {
    /// Hard upper bound on tokens per chunk.
    pub max_tokens: usize,
    /// Tokens shared between consecutive chunks; clamped below `max_tokens`.
    pub overlap_tokens: usize,
    /// Split at heading lines before packing and record `section_title`.
    pub section_aware: bool,
}

impl Default for SegmentOptions {
    fn default() -> Self {
        Self {
            max_tokens: 450,
            overlap_tokens: 150,
            section_aware: false,
        }
    }
}
