//! Orchestrators that drive documents into the index and answer queries from it.

mod ingest;
mod summary;

use thiserror::Error;

use crate::index::IndexError;
use crate::sources::SourceError;

pub use ingest::{BatchLimits, EmptyStage, IngestionOutcome, IngestionPipeline, IngestionReport};
pub use summary::{SummaryOutcome, SummaryPipeline, UnavailableReason};

/// Errors surfaced by the orchestrators.
///
/// Only caller mistakes and collection management failures are errors; transport failures during
/// ingestion or retrieval are absorbed into the reported outcome.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The request itself is unusable.
    #[error("Invalid input: {0}")]
    Input(String),
    /// Documents could not be loaded.
    #[error(transparent)]
    Source(#[from] SourceError),
    /// A collection management call failed.
    #[error("Index operation failed: {0}")]
    Index(#[from] IndexError),
}
