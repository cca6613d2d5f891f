//! Token counting and token-boundary helpers.
//!
//! Every sizing decision in the pipeline is expressed in tokens of one fixed scheme. The default
//! scheme is the `cl100k_base` BPE from `tiktoken-rs`; a whitespace scheme (one token per word) is
//! available for deployments without BPE data and keeps tests independent of the vocabulary.
//!
//! Besides counting, the tokenizer answers two boundary questions used by the segmenter:
//!
//! - [`Tokenizer::prefix_len`]: how many bytes of `text` fit into `k` tokens, i.e. the byte length
//!   of `decode(encode(text)[..k])`, backing off until the prefix is valid UTF-8.
//! - [`Tokenizer::tail_start`]: where the last `k` tokens of `text` begin, used for overlap.

use anyhow::Error as LoadError;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tiktoken_rs::{
    CoreBPE, cl100k_base, get_bpe_from_model, o200k_base, p50k_base, p50k_edit, r50k_base,
};

/// Name of the default BPE encoding.
pub const DEFAULT_ENCODING: &str = "cl100k_base";

/// Name that selects the whitespace (word-count) scheme.
pub const WHITESPACE_SCHEME: &str = "whitespace";

/// Initial bytes encoded per requested token by [`Tokenizer::prefix_len`].
const WINDOW_BYTES_PER_TOKEN: usize = 8;
/// Extra tokens a window must hold past the budget so its cut does not affect the prefix.
const WINDOW_MARGIN_TOKENS: usize = 8;

/// Errors raised while loading a tokenization scheme.
#[derive(Debug, Error)]
pub enum TokenizerError {
    /// BPE resources could not be loaded.
    #[error("failed to load tokenizer '{name}': {source}")]
    Load {
        /// Encoding or model name we attempted to load.
        name: String,
        /// Underlying error raised by the tokenizer library.
        #[source]
        source: LoadError,
    },
}

/// Fixed tokenization scheme shared by the segmenter and anything that sizes text.
///
/// Cloning is cheap; BPE tables are reference counted.
#[derive(Clone)]
pub struct Tokenizer {
    scheme: Scheme,
}

#[derive(Clone)]
enum Scheme {
    Bpe { name: String, encoding: Arc<CoreBPE> },
    Whitespace,
}

impl fmt::Debug for Tokenizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tokenizer")
            .field("scheme", &self.name())
            .finish()
    }
}

impl Tokenizer {
    /// Load a scheme by encoding name (`cl100k_base`, `o200k_base`, ...), model name, or
    /// `whitespace`.
    ///
    /// Unknown names fall back to `cl100k_base` with a warning so ingestion keeps flowing.
    pub fn from_name(name: &str) -> Result<Self, TokenizerError> {
        let normalized = name.trim();
        if normalized.eq_ignore_ascii_case(WHITESPACE_SCHEME) {
            return Ok(Self::whitespace());
        }
        let target = if normalized.is_empty() {
            DEFAULT_ENCODING
        } else {
            normalized
        };
        let encoding = resolve_encoding(target).map_err(|source| TokenizerError::Load {
            name: target.to_string(),
            source,
        })?;
        Ok(Self {
            scheme: Scheme::Bpe {
                name: target.to_string(),
                encoding: Arc::new(encoding),
            },
        })
    }

    /// Whitespace scheme: one token per whitespace-separated word.
    pub fn whitespace() -> Self {
        Self {
            scheme: Scheme::Whitespace,
        }
    }

    /// Name of the active scheme.
    pub fn name(&self) -> &str {
        match &self.scheme {
            Scheme::Bpe { name, .. } => name,
            Scheme::Whitespace => WHITESPACE_SCHEME,
        }
    }

    /// Number of tokens in `text`.
    pub fn estimate_tokens(&self, text: &str) -> usize {
        match &self.scheme {
            Scheme::Bpe { encoding, .. } => encoding.encode_ordinary(text).len(),
            Scheme::Whitespace => text.split_whitespace().count(),
        }
    }

    /// Longest prefix of `text` holding at most `max_tokens` tokens.
    pub fn truncate<'a>(&self, text: &'a str, max_tokens: usize) -> &'a str {
        &text[..self.prefix_len(text, max_tokens)]
    }

    /// Byte length of the longest prefix of `text` holding at most `max_tokens` tokens.
    ///
    /// The prefix always ends on a token boundary that is also a UTF-8 boundary. Only a
    /// window proportional to `max_tokens` is encoded, widened until it holds enough tokens,
    /// so the cost does not grow with the length of `text`.
    pub fn prefix_len(&self, text: &str, max_tokens: usize) -> usize {
        if max_tokens == 0 {
            return 0;
        }
        match &self.scheme {
            Scheme::Bpe { encoding, .. } => {
                let mut window = max_tokens.saturating_mul(WINDOW_BYTES_PER_TOKEN);
                loop {
                    let end = floor_char_boundary(text, window);
                    let tokens = encoding.encode_ordinary(&text[..end]);
                    if end == text.len() && tokens.len() <= max_tokens {
                        return text.len();
                    }
                    if end == text.len() || tokens.len() > max_tokens + WINDOW_MARGIN_TOKENS {
                        return decoded_prefix_len(encoding, &tokens, max_tokens);
                    }
                    window = window.saturating_mul(2);
                }
            }
            Scheme::Whitespace => {
                let mut spans = words(text);
                match spans.nth(max_tokens - 1) {
                    Some((_, end)) if spans.next().is_some() => end,
                    _ => text.len(),
                }
            }
        }
    }

    /// Byte offset at which the last `tokens` tokens of `text` begin.
    ///
    /// Returns `text.len()` for zero tokens and `0` when `text` holds no more than `tokens`.
    /// When the exact boundary splits a UTF-8 sequence the tail shrinks by whole tokens.
    pub fn tail_start(&self, text: &str, tokens: usize) -> usize {
        if tokens == 0 {
            return text.len();
        }
        match &self.scheme {
            Scheme::Bpe { encoding, .. } => {
                let encoded = encoding.encode_ordinary(text);
                let total = encoded.len();
                if total <= tokens {
                    return 0;
                }
                (total - tokens..=total)
                    .find_map(|split| encoding.decode(encoded[..split].to_vec()).ok())
                    .map(|head| head.len())
                    .unwrap_or(text.len())
            }
            Scheme::Whitespace => {
                let words = word_spans(text);
                if words.len() <= tokens {
                    0
                } else {
                    words[words.len() - tokens].0
                }
            }
        }
    }
}

/// Length of the decoded prefix of `tokens` holding at most `max_tokens` of them.
///
/// Token bytes concatenate back to the input, so a decoded prefix is a text prefix. Prefixes
/// that end inside a UTF-8 sequence do not decode and are skipped.
fn decoded_prefix_len(encoding: &CoreBPE, tokens: &[u32], max_tokens: usize) -> usize {
    (0..=max_tokens.min(tokens.len()))
        .rev()
        .find_map(|end| encoding.decode(tokens[..end].to_vec()).ok())
        .map(|prefix| prefix.len())
        .unwrap_or(0)
}

/// Largest char boundary of `text` not past `index`.
fn floor_char_boundary(text: &str, index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    let mut boundary = index;
    while !text.is_char_boundary(boundary) {
        boundary -= 1;
    }
    boundary
}

fn resolve_encoding(name: &str) -> Result<CoreBPE, LoadError> {
    if let Some(candidate) = encoding_from_name(name) {
        return candidate;
    }
    match get_bpe_from_model(name) {
        Ok(encoding) => Ok(encoding),
        Err(error) => {
            tracing::warn!(
                name,
                error = %error,
                "Unknown tokenizer; falling back to 'cl100k_base'"
            );
            cl100k_base()
        }
    }
}

fn encoding_from_name(name: &str) -> Option<Result<CoreBPE, LoadError>> {
    match name {
        "cl100k_base" => Some(cl100k_base()),
        "o200k_base" => Some(o200k_base()),
        "p50k_base" => Some(p50k_base()),
        "p50k_edit" => Some(p50k_edit()),
        "r50k_base" | "gpt2" => Some(r50k_base()),
        _ => None,
    }
}

/// Byte ranges `(start, end)` of whitespace-separated words.
fn word_spans(text: &str) -> Vec<(usize, usize)> {
    words(text).collect()
}

/// Lazy form of [`word_spans`].
fn words(text: &str) -> impl Iterator<Item = (usize, usize)> + '_ {
    let mut chars = text.char_indices().peekable();
    std::iter::from_fn(move || {
        while chars.next_if(|(_, ch)| ch.is_whitespace()).is_some() {}
        let (begin, _) = *chars.peek()?;
        while chars.next_if(|(_, ch)| !ch.is_whitespace()).is_some() {}
        let end = chars.peek().map_or(text.len(), |(index, _)| *index);
        Some((begin, end))
    })
}
