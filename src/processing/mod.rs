//! Document processing: cleaning, segmentation, and batching.

pub mod batching;
pub mod chunking;
pub mod clean;
pub mod types;

pub use batching::{Batch, BatchPlan, CapacityWarning, Payload, batch};
pub use chunking::{Segmenter, split};
pub use clean::{clean_source, clean_text};
pub use types::{Chunk, ChunkingError, Document, SegmentOptions, Span};
