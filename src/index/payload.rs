//! Helpers for constructing, identifying, and decoding stored payloads.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use uuid::Uuid;

use super::types::IndexHit;

/// Payload key holding the chunk text.
pub const TEXT_FIELD: &str = "text";

/// Compute a deterministic SHA-256 hash for the chunk text.
pub fn compute_chunk_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    hex::encode(digest)
}

/// Current timestamp formatted for metadata storage.
pub fn current_timestamp_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

/// Deterministic point id for a chunk; re-ingesting the same chunk overwrites it.
pub fn point_id(source: &str, chunk_index: usize, chunk_hash: &str) -> String {
    let name = format!("{source}:{chunk_index}:{chunk_hash}");
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
}

/// Build the payload object stored alongside each vector: metadata plus the text.
pub(crate) fn build_payload(text: &str, metadata: &Map<String, Value>) -> Value {
    let mut payload = metadata.clone();
    payload.insert(TEXT_FIELD.into(), Value::String(text.to_string()));
    Value::Object(payload)
}

/// Split a stored payload back into text and metadata.
pub(crate) fn hit_from_payload(
    payload: Option<Map<String, Value>>,
    distance: Option<f32>,
) -> IndexHit {
    let mut metadata = payload.unwrap_or_default();
    let text = match metadata.remove(TEXT_FIELD) {
        Some(Value::String(text)) => Some(text),
        Some(other) => {
            metadata.insert(TEXT_FIELD.into(), other);
            None
        }
        None => None,
    };
    IndexHit {
        text,
        metadata,
        distance,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn chunk_hash_is_stable() {
        let h1 = compute_chunk_hash("Hello world");
        let h2 = compute_chunk_hash("Hello world");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
        assert_ne!(h1, compute_chunk_hash("Hello world!"));
    }

    #[test]
    fn timestamp_is_rfc3339_like() {
        let ts = current_timestamp_rfc3339();
        assert!(ts.contains('T') && ts.ends_with('Z'));
    }

    #[test]
    fn point_ids_are_deterministic_uuids() {
        let id = point_id("doc.txt", 3, "abc");
        assert_eq!(id, point_id("doc.txt", 3, "abc"));
        assert_ne!(id, point_id("doc.txt", 4, "abc"));
        assert!(Uuid::parse_str(&id).is_ok());
    }

    #[test]
    fn payload_round_trips_text_and_metadata() {
        let metadata = json!({"source": "doc.txt", "chunk_index": 0});
        let payload = build_payload("sample", metadata.as_object().unwrap());
        assert_eq!(payload["text"], "sample");
        assert_eq!(payload["source"], "doc.txt");

        let hit = hit_from_payload(payload.as_object().cloned(), Some(0.2));
        assert_eq!(hit.text.as_deref(), Some("sample"));
        assert_eq!(hit.metadata["source"], "doc.txt");
        assert!(!hit.metadata.contains_key("text"));
        assert_eq!(hit.distance, Some(0.2));
    }

    #[test]
    fn missing_payload_yields_empty_hit() {
        let hit = hit_from_payload(None, None);
        assert!(hit.text.is_none());
        assert!(hit.metadata.is_empty());
    }
}
