//! Token-bounded segmentation with overlap.
//!
//! The segmenter packs sentence units greedily into spans of at most `max_tokens` tokens:
//!
//! - Sentence boundaries fall after `.`, `!`, or `?` followed by whitespace, and after each line
//!   break. The end of the text is always a boundary.
//! - Each span after the first starts at the last `overlap_tokens` tokens of its predecessor. If
//!   that tail plus the next sentence cannot fit, the overlap is dropped for that span.
//! - A sentence that cannot fit on its own is cut into raw token windows, so no content is lost.
//!   A single character whose encoding needs more tokens than the budget still travels whole,
//!   so with very small budgets such a span may exceed `max_tokens`.
//!
//! With `section_aware` enabled the text is first split at heading lines and every section is
//! packed independently; chunks then record `section_title` and their `part_number` within the
//! section.

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;

use crate::index::compute_chunk_hash;
use crate::tokenizer::Tokenizer;

use super::clean::clean_text;
use super::types::{Chunk, ChunkingError, Document, SegmentOptions, Span};

/// Title given to text that precedes the first recognized heading.
pub const DEFAULT_SECTION_TITLE: &str = "Introduction";

/// Byte budget per token beyond which a sentence candidate is not tokenized.
const MAX_BYTES_PER_TOKEN: usize = 16;

/// Split `text` into spans of at most `max_tokens` tokens sharing up to `overlap_tokens`.
///
/// Returns an empty vector for empty or all-whitespace text. `overlap_tokens` is clamped to
/// `max_tokens - 1`.
pub fn split(
    tokenizer: &Tokenizer,
    text: &str,
    max_tokens: usize,
    overlap_tokens: usize,
) -> Result<Vec<Span>, ChunkingError> {
    if max_tokens == 0 {
        return Err(ChunkingError::InvalidChunkSize);
    }
    let overlap = overlap_tokens.min(max_tokens - 1);
    Ok(SpanPacker::new(tokenizer, text, max_tokens, overlap).pack())
}

/// Turns documents into chunks using a fixed tokenizer and options.
#[derive(Debug, Clone)]
pub struct Segmenter {
    tokenizer: Tokenizer,
    options: SegmentOptions,
}

impl Segmenter {
    /// Validate options and build a segmenter.
    pub fn new(tokenizer: Tokenizer, options: SegmentOptions) -> Result<Self, ChunkingError> {
        if options.max_tokens == 0 {
            return Err(ChunkingError::InvalidChunkSize);
        }
        let clamped = options.overlap_tokens.min(options.max_tokens - 1);
        if clamped != options.overlap_tokens {
            tracing::warn!(
                requested = options.overlap_tokens,
                clamped,
                max_tokens = options.max_tokens,
                "Chunk overlap exceeds chunk size; clamping"
            );
        }
        Ok(Self {
            tokenizer,
            options: SegmentOptions {
                overlap_tokens: clamped,
                ..options
            },
        })
    }

    /// Effective options after clamping.
    pub fn options(&self) -> SegmentOptions {
        self.options
    }

    /// Tokenizer shared with the rest of the pipeline.
    pub fn tokenizer(&self) -> &Tokenizer {
        &self.tokenizer
    }

    /// Clean and segment one document.
    pub fn segment(&self, document: &Document) -> Vec<Chunk> {
        let cleaned = clean_text(&document.text);
        let source = document.identity();
        let sections = if self.options.section_aware {
            split_sections(&cleaned)
        } else {
            vec![Section {
                title: None,
                start: 0,
                end: cleaned.len(),
            }]
        };

        let mut chunks = Vec::new();
        for section in sections {
            let body = &cleaned[section.start..section.end];
            let spans = SpanPacker::new(
                &self.tokenizer,
                body,
                self.options.max_tokens,
                self.options.overlap_tokens,
            )
            .pack();
            for (part_number, span) in spans.into_iter().enumerate() {
                let chunk_index = chunks.len();
                let metadata = chunk_metadata(
                    &document.metadata,
                    &source,
                    &span.text,
                    section.start + span.start,
                    chunk_index,
                    part_number,
                    section.title.as_deref(),
                );
                chunks.push(Chunk {
                    text: span.text,
                    source: source.clone(),
                    chunk_index,
                    metadata,
                });
            }
        }

        tracing::debug!(
            source = %source,
            chunk_count = chunks.len(),
            "Segmented document"
        );
        chunks
    }

    /// Segment every document in order.
    pub fn segment_all(&self, documents: &[Document]) -> Vec<Chunk> {
        documents
            .iter()
            .flat_map(|document| self.segment(document))
            .collect()
    }
}

fn chunk_metadata(
    document_metadata: &Map<String, Value>,
    source: &str,
    text: &str,
    start_index: usize,
    chunk_index: usize,
    part_number: usize,
    section_title: Option<&str>,
) -> Map<String, Value> {
    let mut metadata = document_metadata.clone();
    metadata.insert("start_index".into(), Value::from(start_index));
    metadata.insert("chunk_index".into(), Value::from(chunk_index));
    metadata.insert("part_number".into(), Value::from(part_number));
    if let Some(title) = section_title {
        metadata.insert("section_title".into(), Value::String(title.to_string()));
    }
    metadata.insert(
        "chunk_hash".into(),
        Value::String(compute_chunk_hash(text)),
    );
    metadata.insert("source".into(), Value::String(source.to_string()));
    metadata
}

struct SpanPacker<'a> {
    tokenizer: &'a Tokenizer,
    text: &'a str,
    boundaries: Vec<usize>,
    max_tokens: usize,
    overlap: usize,
}

impl<'a> SpanPacker<'a> {
    fn new(tokenizer: &'a Tokenizer, text: &'a str, max_tokens: usize, overlap: usize) -> Self {
        Self {
            tokenizer,
            text,
            boundaries: sentence_boundaries(text),
            max_tokens,
            overlap,
        }
    }

    fn pack(&self) -> Vec<Span> {
        let mut spans = Vec::new();
        let mut start = self.skip_whitespace(0);
        if start >= self.text.len() {
            return spans;
        }

        let mut end = self
            .grow(start, start)
            .unwrap_or_else(|| self.raw_span_end(start));
        self.push_span(&mut spans, start, end);

        while self.skip_whitespace(end) < self.text.len() {
            let (next_start, next_end) = self.next_span(start, end);
            start = next_start;
            end = next_end;
            self.push_span(&mut spans, start, end);
        }
        spans
    }

    /// Choose the span following `[prev_start, prev_end)`; always ends past `prev_end`.
    fn next_span(&self, prev_start: usize, prev_end: usize) -> (usize, usize) {
        let fresh = self.skip_whitespace(prev_end);
        let tail = if self.overlap > 0 {
            let offset = self
                .tokenizer
                .tail_start(&self.text[prev_start..prev_end], self.overlap);
            Some(self.skip_whitespace(prev_start + offset)).filter(|tail| *tail < prev_end)
        } else {
            None
        };

        if let Some(tail) = tail
            && let Some(end) = self.grow(tail, prev_end)
        {
            return (tail, end);
        }
        if let Some(end) = self.grow(fresh, prev_end) {
            return (fresh, end);
        }

        // The next sentence is too large: fall back to raw token windows.
        if let Some(tail) = tail {
            let end = self.raw_window(tail);
            if end > prev_end {
                return (tail, end);
            }
        }
        (fresh, self.raw_span_end(fresh))
    }

    /// Farthest sentence boundary past `floor` whose span from `start` fits the budget.
    ///
    /// Candidates longer than `MAX_BYTES_PER_TOKEN` bytes per budgeted token are not
    /// tokenized; the caller falls back to raw windows for them.
    fn grow(&self, start: usize, floor: usize) -> Option<usize> {
        let byte_cap = self.max_tokens.saturating_mul(MAX_BYTES_PER_TOKEN);
        let first = self.boundaries.partition_point(|boundary| *boundary <= floor);
        let mut best = None;
        for &boundary in &self.boundaries[first..] {
            let candidate = self.text[start..boundary].trim_end();
            if candidate.len() > byte_cap
                || self.tokenizer.estimate_tokens(candidate) > self.max_tokens
            {
                break;
            }
            if !self.text[floor..boundary].trim().is_empty() {
                best = Some(start + candidate.len());
            }
        }
        best
    }

    /// End of the raw token window starting at `start`, trailing whitespace excluded.
    ///
    /// Equals `start` when the first token cannot be decoded on its own.
    fn raw_window(&self, start: usize) -> usize {
        let rest = &self.text[start..];
        let window = &rest[..self.tokenizer.prefix_len(rest, self.max_tokens)];
        start + window.trim_end().len()
    }

    /// Raw window from a non-whitespace `start`, widened to one whole character when the
    /// budget is smaller than that character's token count.
    fn raw_span_end(&self, start: usize) -> usize {
        let end = self.raw_window(start);
        if end > start {
            return end;
        }
        start
            + self.text[start..]
                .chars()
                .next()
                .map(char::len_utf8)
                .unwrap_or(0)
    }

    fn push_span(&self, spans: &mut Vec<Span>, start: usize, end: usize) {
        let span = self.span(start, end);
        if !span.text.is_empty() {
            spans.push(span);
        }
    }

    fn skip_whitespace(&self, from: usize) -> usize {
        self.text[from..]
            .char_indices()
            .find(|(_, ch)| !ch.is_whitespace())
            .map(|(offset, _)| from + offset)
            .unwrap_or(self.text.len())
    }

    fn span(&self, start: usize, end: usize) -> Span {
        Span {
            start,
            text: self.text[start..end].trim_end().to_string(),
        }
    }
}

/// Byte offsets just past each sentence terminator or line break, plus the end of the text.
fn sentence_boundaries(text: &str) -> Vec<usize> {
    let mut boundaries = Vec::new();
    let mut chars = text.char_indices().peekable();
    while let Some((index, ch)) = chars.next() {
        let after = index + ch.len_utf8();
        let terminated = match ch {
            '\n' => true,
            '.' | '!' | '?' => chars
                .peek()
                .is_some_and(|(_, next)| next.is_whitespace()),
            _ => false,
        };
        if terminated {
            boundaries.push(after);
        }
    }
    if boundaries.last() != Some(&text.len()) {
        boundaries.push(text.len());
    }
    boundaries
}

struct Section {
    title: Option<String>,
    start: usize,
    end: usize,
}

fn heading_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"(?i)^(summary|executive summary|key recommendations?)",
            r"(?i)^(recommendations?)",
            r"(?i)^(introduction|background)",
            r"(?i)^(scope|who is it for)",
            r"(?i)^(methodology|methods?)",
            r"(?i)^(evidence|evidence review)",
            r"(?i)^(clinical considerations?)",
            r"(?i)^(implementation|putting this guideline into practice)",
            r"(?i)^(research recommendations?)",
            r"(?i)^(appendix|appendices)",
            r"^\d+\.?\s+[A-Z]",
            r"^[A-Z]\.\s+[A-Z]",
        ]
        .iter()
        .filter_map(|pattern| Regex::new(pattern).ok())
        .collect()
    })
}

fn is_heading(line: &str) -> bool {
    heading_patterns().iter().any(|pattern| pattern.is_match(line))
}

/// Split cleaned text at heading lines. A heading only opens a new section once the current
/// one holds content; heading lines stay inside their section's text.
fn split_sections(text: &str) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut current = Section {
        title: Some(DEFAULT_SECTION_TITLE.to_string()),
        start: 0,
        end: 0,
    };
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        let trimmed = line.trim();
        let has_content = !text[current.start..offset].trim().is_empty();
        if !trimmed.is_empty() && is_heading(trimmed) && has_content {
            current.end = offset;
            sections.push(current);
            current = Section {
                title: Some(trimmed.to_string()),
                start: offset,
                end: offset,
            };
        }
        offset += line.len();
    }
    current.end = text.len();
    sections.push(current);
    sections
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn words() -> Tokenizer {
        Tokenizer::whitespace()
    }

    fn texts(spans: &[Span]) -> Vec<&str> {
        spans.iter().map(|span| span.text.as_str()).collect()
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        assert!(matches!(
            split(&words(), "text", 0, 0),
            Err(ChunkingError::InvalidChunkSize)
        ));
        assert!(Segmenter::new(
            words(),
            SegmentOptions {
                max_tokens: 0,
                ..SegmentOptions::default()
            }
        )
        .is_err());
    }

    #[test]
    fn empty_text_produces_no_spans() {
        assert!(split(&words(), "", 10, 2).unwrap().is_empty());
        assert!(split(&words(), " \n\t ", 10, 2).unwrap().is_empty());
    }

    #[test]
    fn raw_windows_respect_budget_without_overlap() {
        let spans = split(&words(), "one two three four five", 2, 0).unwrap();
        assert_eq!(texts(&spans), vec!["one two", "three four", "five"]);
    }

    #[test]
    fn raw_windows_carry_overlap() {
        let spans = split(&words(), "one two three four five", 3, 1).unwrap();
        assert_eq!(texts(&spans), vec!["one two three", "three four five"]);
        assert_eq!(spans[1].start, 8);
    }

    #[test]
    fn sentences_are_packed_greedily() {
        let text = "Alpha beta. Gamma delta. Epsilon zeta.";
        let spans = split(&words(), text, 4, 0).unwrap();
        assert_eq!(texts(&spans), vec!["Alpha beta. Gamma delta.", "Epsilon zeta."]);
        assert_eq!(spans[1].start, 25);
    }

    #[test]
    fn overlap_repeats_previous_tail() {
        let text = "Alpha beta. Gamma delta. Epsilon zeta.";
        let spans = split(&words(), text, 4, 2).unwrap();
        assert_eq!(
            texts(&spans),
            vec!["Alpha beta. Gamma delta.", "Gamma delta. Epsilon zeta."]
        );
    }

    #[test]
    fn overlap_is_dropped_when_next_sentence_needs_the_room() {
        let text = "One two three. Four five six seven.";
        let spans = split(&words(), text, 4, 2).unwrap();
        assert_eq!(texts(&spans), vec!["One two three.", "Four five six seven."]);
    }

    #[test]
    fn overlap_is_clamped_below_chunk_size() {
        let spans = split(&words(), "a b c d e", 2, 9).unwrap();
        assert!(spans.iter().all(|span| words().estimate_tokens(&span.text) <= 2));
        assert_eq!(spans.last().unwrap().text, "d e");
    }

    #[test]
    fn spans_respect_bpe_budget_and_cover_input() {
        let tokenizer = Tokenizer::from_name("cl100k_base").unwrap();
        let text = clean_text(&"Rust makes systems programming approachable. ".repeat(40));
        let spans = split(&tokenizer, &text, 32, 8).unwrap();
        assert!(spans.len() > 1);
        for span in &spans {
            assert!(tokenizer.estimate_tokens(&span.text) <= 32);
            assert_eq!(&text[span.start..span.start + span.text.len()], span.text);
        }
        assert_eq!(spans[0].start, 0);
        let last = spans.last().unwrap();
        assert_eq!(last.start + last.text.len(), text.len());
        for pair in spans.windows(2) {
            assert!(pair[1].start <= pair[0].start + pair[0].text.len());
        }
    }

    #[test]
    fn unpunctuated_text_is_cut_into_bounded_windows() {
        let tokenizer = Tokenizer::from_name("cl100k_base").unwrap();
        let text = "lorem ipsum dolor sit amet ".repeat(8_000);
        let text = text.trim_end();
        let started = std::time::Instant::now();
        let spans = split(&tokenizer, text, 450, 150).unwrap();
        assert!(started.elapsed() < std::time::Duration::from_secs(60));

        assert!(spans.len() > 100);
        for span in &spans {
            assert!(tokenizer.estimate_tokens(&span.text) <= 450);
            assert_eq!(&text[span.start..span.start + span.text.len()], span.text);
        }
        let last = spans.last().unwrap();
        assert_eq!(last.start + last.text.len(), text.len());
        for pair in spans.windows(2) {
            assert!(pair[1].start > pair[0].start);
            assert!(pair[1].start <= pair[0].start + pair[0].text.len());
        }
    }

    #[test]
    fn tiny_budget_never_emits_empty_spans() {
        let tokenizer = Tokenizer::from_name("cl100k_base").unwrap();
        let spans = split(&tokenizer, "a 😀 b", 1, 0).unwrap();
        assert_eq!(texts(&spans), vec!["a", "😀", "b"]);
        assert_eq!(spans[1].start, 2);
    }

    #[test]
    fn short_document_yields_single_unchanged_chunk() {
        let tokenizer = Tokenizer::from_name("cl100k_base").unwrap();
        let segmenter = Segmenter::new(tokenizer, SegmentOptions::default()).unwrap();
        let chunks = segmenter.segment(&Document::new("/tmp/x/hello.txt", "hello world"));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "hello world");
        assert_eq!(chunks[0].metadata["source"], "hello.txt");
        assert_eq!(chunks[0].metadata["start_index"], 0);
    }

    #[test]
    fn chunk_metadata_merges_document_fields_and_keeps_clean_source() {
        let segmenter = Segmenter::new(
            words(),
            SegmentOptions {
                max_tokens: 2,
                overlap_tokens: 0,
                section_aware: false,
            },
        )
        .unwrap();
        let metadata = json!({"source": "/abs/path/doc.txt", "author": "kim"});
        let document = Document::new("/abs/path/doc.txt", "one two three")
            .with_metadata(metadata.as_object().unwrap().clone());
        let chunks = segmenter.segment(&document);
        assert_eq!(chunks.len(), 2);
        for (index, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.metadata["source"], "doc.txt");
            assert_eq!(chunk.metadata["author"], "kim");
            assert_eq!(chunk.metadata["chunk_index"], index);
            assert_eq!(chunk.metadata["part_number"], index);
            assert_eq!(
                chunk.metadata["chunk_hash"],
                Value::String(compute_chunk_hash(&chunk.text))
            );
            assert!(!chunk.source.contains('/'));
        }
        assert_eq!(chunks[1].metadata["start_index"], 8);
        assert!(chunks[0].metadata.get("section_title").is_none());
    }

    #[test]
    fn section_aware_mode_restarts_parts_per_heading() {
        let segmenter = Segmenter::new(
            words(),
            SegmentOptions {
                max_tokens: 50,
                overlap_tokens: 0,
                section_aware: true,
            },
        )
        .unwrap();
        let text = "Opening remarks here.\nRecommendations\nUse the tool.\n1. Dosage\nTake two.";
        let chunks = segmenter.segment(&Document::new("guide.txt", text));
        let titles: Vec<_> = chunks
            .iter()
            .map(|chunk| chunk.metadata["section_title"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(titles, vec!["Introduction", "Recommendations", "1. Dosage"]);
        assert!(chunks.iter().all(|chunk| chunk.metadata["part_number"] == 0));
        assert_eq!(chunks[1].text, "Recommendations\nUse the tool.");
        let start = chunks[2].metadata["start_index"].as_u64().unwrap() as usize;
        assert_eq!(&clean_text(text)[start..], "1. Dosage\nTake two.");
    }

    #[test]
    fn leading_heading_does_not_open_empty_section() {
        let sections = split_sections("Summary\nBody text.");
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].title.as_deref(), Some(DEFAULT_SECTION_TITLE));
    }
}
