//! Document sources: a directory walker and an in-memory buffer.
//!
//! PDF files are reduced to their text layer; a PDF without one (a scanned image, for
//! instance) loads as an empty document and is dropped during segmentation.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

use crate::processing::{Document, clean_source};

/// File extensions loaded by [`DirectorySource`] unless overridden.
pub const DEFAULT_EXTENSIONS: [&str; 3] = ["txt", "md", PDF_EXTENSION];

const PDF_EXTENSION: &str = "pdf";

/// Errors raised while loading documents.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The configured location does not exist or is not a directory.
    #[error("Document directory not found: {0}")]
    NotFound(PathBuf),
    /// The location exists but could not be read.
    #[error("Failed to read {path}: {source}")]
    Io {
        /// Path that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A PDF could not be parsed into text.
    #[error("Failed to extract text from {path}: {message}")]
    Extraction {
        /// Path that failed.
        path: PathBuf,
        /// Parser message.
        message: String,
    },
}

/// Produces the documents for one ingestion run.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Load every available document. Unreadable individual documents are skipped.
    async fn load(&self) -> Result<Vec<Document>, SourceError>;
}

/// Loads text files beneath a directory, recursively, in file-name order.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
    extensions: Vec<String>,
}

impl DirectorySource {
    /// Load `.txt`, `.md` and `.pdf` files beneath `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            extensions: DEFAULT_EXTENSIONS.iter().map(|ext| ext.to_string()).collect(),
        }
    }

    /// Replace the accepted extensions (compared case-insensitively, without the dot).
    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extensions = extensions
            .into_iter()
            .map(|ext| ext.into().trim_start_matches('.').to_ascii_lowercase())
            .collect();
        self
    }

    fn accepts(&self, path: &Path) -> Option<String> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        self.extensions
            .iter()
            .any(|accepted| *accepted == extension)
            .then_some(extension)
    }
}

#[async_trait]
impl DocumentSource for DirectorySource {
    async fn load(&self) -> Result<Vec<Document>, SourceError> {
        match tokio::fs::metadata(&self.root).await {
            Ok(metadata) if metadata.is_dir() => {}
            Ok(_) => return Err(SourceError::NotFound(self.root.clone())),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Err(SourceError::NotFound(self.root.clone()));
            }
            Err(source) => {
                return Err(SourceError::Io {
                    path: self.root.clone(),
                    source,
                });
            }
        }

        let mut candidates = Vec::new();
        for entry in WalkDir::new(&self.root).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(error) => {
                    tracing::warn!(error = %error, "Skipping unreadable directory entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(extension) = self.accepts(entry.path()) {
                candidates.push((entry.into_path(), extension));
            }
        }

        let mut documents = Vec::with_capacity(candidates.len());
        for (path, extension) in candidates {
            let text = match read_text(&path, &extension).await {
                Ok(text) => text,
                Err(error) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %error,
                        "Skipping unreadable document"
                    );
                    continue;
                }
            };

            let origin = path.to_string_lossy();
            let file_name = clean_source(&origin).unwrap_or_else(|| origin.to_string());
            let mut metadata = Map::new();
            metadata.insert("file_name".into(), Value::String(file_name.clone()));
            metadata.insert("extension".into(), Value::String(extension));
            documents.push(Document::new(file_name, text).with_metadata(metadata));
        }

        tracing::info!(
            root = %self.root.display(),
            documents = documents.len(),
            "Loaded documents from directory"
        );
        Ok(documents)
    }
}

async fn read_text(path: &Path, extension: &str) -> Result<String, SourceError> {
    let io_error = |source| SourceError::Io {
        path: path.to_path_buf(),
        source,
    };
    if extension != PDF_EXTENSION {
        return tokio::fs::read_to_string(path).await.map_err(io_error);
    }

    let bytes = tokio::fs::read(path).await.map_err(io_error)?;
    // The parser is synchronous and panics on some malformed files.
    let extracted =
        tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&bytes)).await;
    let message = match extracted {
        Ok(Ok(text)) => return Ok(text),
        Ok(Err(error)) => error.to_string(),
        Err(error) => error.to_string(),
    };
    Err(SourceError::Extraction {
        path: path.to_path_buf(),
        message,
    })
}

/// Documents already held in memory, such as an upload buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    documents: Vec<Document>,
}

impl MemorySource {
    /// Wrap prepared documents.
    pub fn new(documents: Vec<Document>) -> Self {
        Self { documents }
    }

    /// Build documents from `(origin, text)` pairs.
    pub fn from_texts<I, O, T>(items: I) -> Self
    where
        I: IntoIterator<Item = (O, T)>,
        O: Into<String>,
        T: Into<String>,
    {
        Self::new(
            items
                .into_iter()
                .map(|(origin, text)| Document::new(origin, text))
                .collect(),
        )
    }
}

#[async_trait]
impl DocumentSource for MemorySource {
    async fn load(&self) -> Result<Vec<Document>, SourceError> {
        Ok(self.documents.clone())
    }
}
