use std::env;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

use crate::generation::{DEFAULT_INSTRUCTIONS, GenerationOptions};
use crate::pipeline::BatchLimits;
use crate::processing::SegmentOptions;
use crate::retrieval::{DEFAULT_DISTANCE_THRESHOLD, RetrievalOptions};
use crate::retry::RetryPolicy;
use crate::tokenizer::DEFAULT_ENCODING;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
    /// [`init_config`] ran more than once.
    #[error("Configuration already initialized")]
    AlreadyInitialized,
}

/// Collection used for ingestion when none is configured.
pub const DEFAULT_INGEST_COLLECTION: &str = "documents";
/// Registry used when `COLLECTION_REGISTRY` is unset.
pub const DEFAULT_COLLECTION_REGISTRY: &str = "My Documents=documents";

/// Runtime configuration for the ragline binary.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the Qdrant instance that stores embeddings.
    pub qdrant_url: String,
    /// Optional API key required to access Qdrant.
    pub qdrant_api_key: Option<String>,
    /// Whether collection metadata is stamped after ingestion.
    pub qdrant_metadata_updates: bool,
    /// Base URL of the text-embeddings service.
    pub embedding_url: String,
    /// Base URL of the text-generation service.
    pub generation_url: String,
    /// Backing collection that ingestion writes to by default.
    pub ingest_collection: String,
    /// Display names for backing collections.
    pub collections: CollectionRegistry,
    /// Tokenizer encoding name.
    pub tokenizer_encoding: String,
    /// Segmentation bounds.
    pub segment: SegmentOptions,
    /// Batch bounds for embedding requests.
    pub batch: BatchLimits,
    /// Number of chunks used as generation context.
    pub top_n: usize,
    /// Retrieval filtering.
    pub retrieval: RetrievalOptions,
    /// Generation parameters.
    pub generation: GenerationOptions,
    /// Instructions placed at the top of every prompt.
    pub generation_instructions: String,
    /// Per-request HTTP timeout.
    pub request_timeout: Duration,
    /// Retry behavior for outbound calls.
    pub retry: RetryPolicy,
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(lookup);

        let segment = SegmentOptions {
            max_tokens: vars.parsed("CHUNK_MAX_TOKENS", SegmentOptions::default().max_tokens)?,
            overlap_tokens: vars.parsed(
                "CHUNK_OVERLAP_TOKENS",
                SegmentOptions::default().overlap_tokens,
            )?,
            section_aware: vars.flag("CHUNK_SECTION_AWARE", false)?,
        };
        if segment.max_tokens == 0 {
            return Err(ConfigError::InvalidValue("CHUNK_MAX_TOKENS".into()));
        }

        let distance_threshold = match vars.optional("RETRIEVAL_DISTANCE_THRESHOLD") {
            None => Some(DEFAULT_DISTANCE_THRESHOLD),
            Some(value) if value.eq_ignore_ascii_case("none") => None,
            Some(value) => Some(
                value
                    .parse::<f32>()
                    .ok()
                    .filter(|threshold| threshold.is_finite())
                    .ok_or_else(|| {
                        ConfigError::InvalidValue("RETRIEVAL_DISTANCE_THRESHOLD".into())
                    })?,
            ),
        };

        let collections = match vars.optional("COLLECTION_REGISTRY") {
            Some(spec) => CollectionRegistry::parse(&spec)
                .map_err(|_| ConfigError::InvalidValue("COLLECTION_REGISTRY".into()))?,
            None => CollectionRegistry::default(),
        };

        let default_retry = RetryPolicy::default();
        let retry = RetryPolicy {
            max_attempts: vars.parsed("RETRY_MAX_ATTEMPTS", default_retry.max_attempts)?,
            initial_delay: Duration::from_millis(vars.parsed(
                "RETRY_INITIAL_DELAY_MS",
                default_retry.initial_delay.as_millis() as u64,
            )?),
            ..default_retry
        };

        let default_generation = GenerationOptions::default();

        Ok(Self {
            qdrant_url: vars.required("QDRANT_URL")?,
            qdrant_api_key: vars.optional("QDRANT_API_KEY"),
            qdrant_metadata_updates: vars.flag("QDRANT_METADATA_UPDATES", true)?,
            embedding_url: vars.required("EMBEDDING_URL")?,
            generation_url: vars.required("GENERATION_URL")?,
            ingest_collection: vars
                .optional("INGEST_COLLECTION")
                .unwrap_or_else(|| DEFAULT_INGEST_COLLECTION.to_string()),
            collections,
            tokenizer_encoding: vars
                .optional("TOKENIZER_ENCODING")
                .unwrap_or_else(|| DEFAULT_ENCODING.to_string()),
            segment,
            batch: BatchLimits {
                max_items: vars.parsed("BATCH_MAX_ITEMS", BatchLimits::default().max_items)?,
                max_bytes: vars.parsed("BATCH_MAX_BYTES", BatchLimits::default().max_bytes)?,
            },
            top_n: vars.parsed("RETRIEVAL_TOP_N", 7)?,
            retrieval: RetrievalOptions {
                distance_threshold,
                ..RetrievalOptions::default()
            },
            generation: GenerationOptions {
                max_new_tokens: vars
                    .parsed("GENERATION_MAX_NEW_TOKENS", default_generation.max_new_tokens)?,
                temperature: vars.parsed("GENERATION_TEMPERATURE", default_generation.temperature)?,
            },
            generation_instructions: vars
                .optional("GENERATION_INSTRUCTIONS")
                .unwrap_or_else(|| DEFAULT_INSTRUCTIONS.to_string()),
            request_timeout: Duration::from_secs(vars.parsed("REQUEST_TIMEOUT_SECS", 60)?),
            retry,
        })
    }
}

struct Vars<F>(F);

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn required(&self, key: &str) -> Result<String, ConfigError> {
        self.optional(key)
            .ok_or_else(|| ConfigError::MissingVariable(key.to_string()))
    }

    fn parsed<T: FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        match self.optional(key) {
            Some(value) => value
                .parse()
                .map_err(|_| ConfigError::InvalidValue(key.to_string())),
            None => Ok(default),
        }
    }

    fn flag(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.optional(key).map(|value| value.to_ascii_lowercase()) {
            None => Ok(default),
            Some(value) => match value.as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(ConfigError::InvalidValue(key.to_string())),
            },
        }
    }
}

/// Malformed `Display=backing` entry.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid collection registry entry: {0}")]
pub struct RegistryParseError(pub String);

/// Mapping between user-facing collection names and backing collection names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionRegistry {
    entries: Vec<(String, String)>,
}

impl CollectionRegistry {
    /// Parse `Display=backing` pairs separated by `;`. Empty segments are ignored.
    pub fn parse(spec: &str) -> Result<Self, RegistryParseError> {
        let mut entries = Vec::new();
        for entry in spec.split(';').map(str::trim).filter(|entry| !entry.is_empty()) {
            let Some((display, backing)) = entry.split_once('=') else {
                return Err(RegistryParseError(entry.to_string()));
            };
            let (display, backing) = (display.trim(), backing.trim());
            if display.is_empty() || backing.is_empty() {
                return Err(RegistryParseError(entry.to_string()));
            }
            entries.push((display.to_string(), backing.to_string()));
        }
        Ok(Self { entries })
    }

    /// Backing name for `name`, which may be a display name or already a backing name.
    pub fn resolve<'a>(&'a self, name: &'a str) -> &'a str {
        let name = name.trim();
        self.entries
            .iter()
            .find(|(display, _)| display.eq_ignore_ascii_case(name))
            .map_or(name, |(_, backing)| backing.as_str())
    }

    /// Display name for a backing collection, falling back to the backing name.
    pub fn display_name<'a>(&'a self, backing: &'a str) -> &'a str {
        self.entries
            .iter()
            .find(|(_, candidate)| candidate == backing)
            .map_or(backing, |(display, _)| display.as_str())
    }

    /// Registered `(display, backing)` pairs in declaration order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(display, backing)| (display.as_str(), backing.as_str()))
    }
}

impl Default for CollectionRegistry {
    fn default() -> Self {
        Self {
            entries: vec![("My Documents".to_string(), DEFAULT_INGEST_COLLECTION.to_string())],
        }
    }
}

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Load `.env` and the environment, then install the result in the global cache.
pub fn init_config() -> Result<&'static Config, ConfigError> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    tracing::debug!(
        qdrant_url = %config.qdrant_url,
        embedding_url = %config.embedding_url,
        generation_url = %config.generation_url,
        ingest_collection = %config.ingest_collection,
        tokenizer = %config.tokenizer_encoding,
        "Loaded configuration"
    );
    CONFIG
        .set(config)
        .map_err(|_| ConfigError::AlreadyInitialized)?;
    CONFIG.get().ok_or(ConfigError::AlreadyInitialized)
}
