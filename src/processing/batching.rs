//! Size-bounded batching for embedding calls.
//!
//! The batcher walks its input once and closes the current batch when it already holds
//! `max_items` items or when appending the next item would push it past `max_bytes`. An item
//! larger than `max_bytes` on its own still travels, alone, in a batch flagged `oversized`.

use serde::Serialize;

use super::types::Chunk;

/// Items that know their estimated serialized size.
pub trait Payload {
    /// Estimated number of bytes this item contributes to a request body.
    fn payload_bytes(&self) -> usize;
}

impl Payload for Chunk {
    fn payload_bytes(&self) -> usize {
        json_string_len(&self.text)
    }
}

impl Payload for String {
    fn payload_bytes(&self) -> usize {
        json_string_len(self)
    }
}

/// Length of `text` once encoded as a JSON string literal, quotes included.
pub fn json_string_len(text: &str) -> usize {
    serde_json::to_string(text)
        .map(|encoded| encoded.len())
        .unwrap_or(text.len() + 2)
}

/// Ordered group of items submitted together.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch<T> {
    /// Items in input order.
    pub items: Vec<T>,
    /// Sum of the items' estimated serialized sizes.
    pub bytes: usize,
    /// Set when the batch holds a single item that exceeds the byte bound.
    pub oversized: bool,
}

impl<T> Batch<T> {
    fn empty() -> Self {
        Self {
            items: Vec::new(),
            bytes: 0,
            oversized: false,
        }
    }

    /// Number of items in the batch.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the batch holds no items.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// An item that could not respect the byte bound and was forwarded alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CapacityWarning {
    /// Index of the offending batch within the plan.
    pub batch_index: usize,
    /// Estimated size of the item.
    pub item_bytes: usize,
    /// Configured byte bound.
    pub max_bytes: usize,
}

/// Result of partitioning: the batches plus any capacity warnings.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchPlan<T> {
    /// Batches in input order; flattening them reproduces the input.
    pub batches: Vec<Batch<T>>,
    /// One warning per oversized batch.
    pub warnings: Vec<CapacityWarning>,
}

/// Partition `items` into batches bounded by `max_items` and `max_bytes`.
///
/// `max_items == 0` is treated as `1`.
pub fn batch<T: Payload>(items: Vec<T>, max_items: usize, max_bytes: usize) -> BatchPlan<T> {
    let max_items = max_items.max(1);
    let mut batches = Vec::new();
    let mut warnings = Vec::new();
    let mut current = Batch::empty();

    for item in items {
        let size = item.payload_bytes();
        let full = current.len() >= max_items || current.bytes + size > max_bytes;
        if !current.is_empty() && full {
            batches.push(std::mem::replace(&mut current, Batch::empty()));
        }

        if size > max_bytes {
            let batch_index = batches.len();
            tracing::warn!(
                batch_index,
                item_bytes = size,
                max_bytes,
                "Item exceeds batch byte limit; sending it alone"
            );
            warnings.push(CapacityWarning {
                batch_index,
                item_bytes: size,
                max_bytes,
            });
            batches.push(Batch {
                items: vec![item],
                bytes: size,
                oversized: true,
            });
            continue;
        }

        current.bytes += size;
        current.items.push(item);
    }

    if !current.is_empty() {
        batches.push(current);
    }

    BatchPlan { batches, warnings }
}
