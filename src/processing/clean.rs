//! Helpers for normalizing document text and metadata values.

use serde_json::{Map, Value};

/// Metadata keys consulted, in order, when a document carries no clean `source`.
pub const SOURCE_FALLBACK_KEYS: [&str; 4] = ["source", "file_name", "source_file", "path"];

/// Collapse whitespace runs and trim.
///
/// A run containing a line break becomes a single `\n`; any other run becomes a single space.
/// Applying the function twice yields the same string.
pub fn clean_text(input: &str) -> String {
    let mut cleaned = String::with_capacity(input.len());
    let mut pending: Option<char> = None;

    for ch in input.chars() {
        if ch.is_whitespace() {
            let replacement = if ch == '\n' || ch == '\r' { '\n' } else { ' ' };
            pending = match pending {
                Some('\n') => Some('\n'),
                _ => Some(replacement),
            };
            continue;
        }
        if let Some(separator) = pending.take()
            && !cleaned.is_empty()
        {
            cleaned.push(separator);
        }
        cleaned.push(ch);
    }

    cleaned
}

/// Trim whitespace and drop empties.
pub(crate) fn sanitize_string(value: Option<String>) -> Option<String> {
    value.and_then(|input| {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

/// Reduce an origin (path, URI, or bare name) to its last path component.
///
/// Both `/` and `\` count as separators so Windows-style paths are handled on every platform.
/// Returns `None` when nothing meaningful remains.
pub fn clean_source(origin: &str) -> Option<String> {
    let last = origin
        .trim()
        .trim_end_matches(['/', '\\'])
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();
    sanitize_string(Some(last.to_string()))
}

/// Derive a document identity from its metadata using [`SOURCE_FALLBACK_KEYS`].
pub fn source_from_metadata(metadata: &Map<String, Value>) -> Option<String> {
    SOURCE_FALLBACK_KEYS.iter().find_map(|key| {
        metadata
            .get(*key)
            .and_then(Value::as_str)
            .and_then(clean_source)
    })
}
