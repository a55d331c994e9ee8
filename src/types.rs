//! Shared error taxonomy and hashing primitives for the retrieval engine.

use std::hash::Hasher;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use twox_hash::XxHash64;

/// Errors surfaced by the retrieval engine and its collaborators.
///
/// The variants map onto distinct propagation policies:
///
/// * [`Validation`](RetrievalError::Validation) and
///   [`Conversion`](RetrievalError::Conversion) are fatal to the call and
///   never retried automatically.
/// * [`Embedding`](RetrievalError::Embedding) is transient; the ingestion
///   pipeline retries it with bounded exponential backoff before surfacing.
/// * [`IndexWrite`](RetrievalError::IndexWrite) triggers a full rollback of
///   the in-flight document and is surfaced as
///   [`IngestionFailed`](RetrievalError::IngestionFailed).
/// * [`IngestionInProgress`](RetrievalError::IngestionInProgress) is a
///   concurrency-guard rejection; callers may retry later.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// Malformed input to the chunk store or a collaborator contract.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The conversion/chunking collaborator could not parse the source.
    #[error("document conversion failed: {0}")]
    Conversion(String),

    /// The embedding provider failed (quota, timeout, transport).
    #[error("embedding provider failed: {0}")]
    Embedding(String),

    /// One of the indexes rejected a write.
    #[error("index write failed ({index}): {message}")]
    IndexWrite {
        /// Which index rejected the write (`"vector"` or `"lexical"`).
        index: &'static str,
        message: String,
    },

    /// A chunk or document lookup came up empty.
    #[error("not found: {0}")]
    NotFound(String),

    /// Chunk store backend failure (SQLite, I/O).
    #[error("storage error: {0}")]
    Storage(String),

    /// Another ingestion for the same document is already running.
    #[error("ingestion already in progress for document '{0}'")]
    IngestionInProgress(String),

    /// The caller-supplied ingestion budget elapsed before commit.
    #[error("ingestion timed out for document '{document_id}' after {elapsed_ms}ms")]
    IngestionTimeout { document_id: String, elapsed_ms: u64 },

    /// Ingestion aborted after the document was rolled back to its prior state.
    #[error("ingestion failed for document '{document_id}': {source}")]
    IngestionFailed {
        document_id: String,
        #[source]
        source: Box<RetrievalError>,
    },
}

impl RetrievalError {
    /// Wraps an error that aborted an ingestion after rollback completed.
    pub fn ingestion_failed(document_id: impl Into<String>, source: RetrievalError) -> Self {
        RetrievalError::IngestionFailed {
            document_id: document_id.into(),
            source: Box::new(source),
        }
    }
}

/// Stable content-addressed hash used for both whole-document change
/// detection (`source_hash`) and per-chunk deduplication (`content_hash`).
///
/// Rendered as a fixed-width hex string so it can serve directly as a map key
/// or an embedding id suffix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    /// Hashes raw bytes (whole-document `source_hash`).
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let mut hasher = XxHash64::with_seed(0);
        hasher.write(bytes);
        ContentHash(format!("{:016x}", hasher.finish()))
    }

    /// Hashes chunk text (`content_hash`).
    pub fn of_text(text: &str) -> Self {
        Self::of_bytes(text.as_bytes())
    }

    /// Hex rendering of the hash.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ContentHash {
    fn from(raw: String) -> Self {
        ContentHash(raw)
    }
}
