//! Canonical chunk records and the storage contract both indexes reference.
//!
//! The chunk store is the system of record: every chunk id present in the
//! vector index or the lexical index must resolve here (index parity is
//! enforced by the ingestion pipeline, see [`crate::ingest`]). Two backends
//! are provided:
//!
//! * [`MemoryChunkStore`] — lock-protected in-process store with swap-based
//!   atomic document replacement; the default for tests and embedded use.
//! * [`SqliteChunkStore`] — durable store over `tokio-rusqlite`, one
//!   transaction per document replacement.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ContentHash, RetrievalError};

pub use memory::MemoryChunkStore;
pub use sqlite::SqliteChunkStore;

/// Stable identifier for a chunk, derived from `(document_id, chunk_index)`.
///
/// The rendering is `"{document_id}#{index:04}"`, which keeps ids unique,
/// immutable for a given position, and lexically ordered within a document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkId(String);

impl ChunkId {
    pub fn new(document_id: &str, chunk_index: usize) -> Self {
        ChunkId(format!("{document_id}#{chunk_index:04}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ChunkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ChunkId {
    fn from(raw: String) -> Self {
        ChunkId(raw)
    }
}

impl From<&str> for ChunkId {
    fn from(raw: &str) -> Self {
        ChunkId(raw.to_string())
    }
}

/// Ordered section/heading labels locating a chunk within its source document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SectionPath(pub Vec<String>);

impl SectionPath {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Renders the path as a breadcrumb, e.g. `"Intro > Setup"`.
    pub fn breadcrumb(&self) -> String {
        self.0.join(" > ")
    }
}

impl<S: Into<String>> FromIterator<S> for SectionPath {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        SectionPath(iter.into_iter().map(Into::into).collect())
    }
}

/// Inclusive page span for paginated sources; absent for unpaginated ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRange {
    pub start: u32,
    pub end: u32,
}

impl PageRange {
    pub fn new(start: u32, end: u32) -> Self {
        PageRange {
            start: start.min(end),
            end: start.max(end),
        }
    }

    /// Single-page span.
    pub fn page(page: u32) -> Self {
        Self::new(page, page)
    }
}

impl std::fmt::Display for PageRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.start == self.end {
            write!(f, "p. {}", self.start)
        } else {
            write!(f, "pp. {}-{}", self.start, self.end)
        }
    }
}

/// The atomic retrievable unit referenced by both indexes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Globally unique, immutable once assigned.
    pub chunk_id: ChunkId,
    /// Owning document.
    pub document_id: String,
    /// Hash of `text`, used for change detection and embedding reuse.
    pub content_hash: ContentHash,
    /// Original extracted text.
    pub text: String,
    /// Text enriched with surrounding-document context, derived once at
    /// ingestion. Preferred over `text` for embedding when present.
    pub contextualized_text: Option<String>,
    /// Section/heading provenance for citation.
    pub section_path: SectionPath,
    /// Page provenance for paginated sources.
    pub page_range: Option<PageRange>,
    /// Reference into the vector index; content-addressed, never shared
    /// between distinct texts.
    pub embedding_id: String,
    /// Token count reported by the conversion collaborator.
    pub token_count: usize,
}

impl Chunk {
    /// Text that should be embedded and indexed for this chunk.
    pub fn indexable_text(&self) -> &str {
        self.contextualized_text.as_deref().unwrap_or(&self.text)
    }

    /// Rejects records that would corrupt the store or the parity invariant.
    pub fn validate(&self) -> Result<(), RetrievalError> {
        if self.chunk_id.as_str().is_empty() {
            return Err(RetrievalError::Validation("chunk_id is empty".into()));
        }
        if self.document_id.is_empty() {
            return Err(RetrievalError::Validation(format!(
                "chunk '{}' has no document_id",
                self.chunk_id
            )));
        }
        if self.text.is_empty() {
            return Err(RetrievalError::Validation(format!(
                "chunk '{}' has empty text",
                self.chunk_id
            )));
        }
        if self.embedding_id.is_empty() {
            return Err(RetrievalError::Validation(format!(
                "chunk '{}' has no embedding_id",
                self.chunk_id
            )));
        }
        Ok(())
    }
}

/// Ingestion-time record for a source document; never retrieved directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub document_id: String,
    /// Whole-file hash used to short-circuit re-processing identical bytes.
    pub source_hash: ContentHash,
    pub last_ingested_at: DateTime<Utc>,
}

/// Storage contract for canonical chunk records.
///
/// `replace_document` and `delete_by_document` must be atomic with respect to
/// concurrent readers: a reader observes either the full old chunk set or the
/// full new one, never a partial mix.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Inserts or replaces a chunk by `chunk_id`.
    async fn put(&self, chunk: Chunk) -> Result<(), RetrievalError>;

    /// Fetches a chunk, failing with [`RetrievalError::NotFound`] if absent.
    async fn get(&self, chunk_id: &ChunkId) -> Result<Chunk, RetrievalError>;

    /// All chunks owned by a document, ordered by chunk index.
    async fn get_by_document(&self, document_id: &str) -> Result<Vec<Chunk>, RetrievalError>;

    /// Removes every chunk owned by a document, returning the removed set.
    ///
    /// Deleting an unknown document succeeds with an empty result so
    /// re-ingestion retries stay idempotent.
    async fn delete_by_document(&self, document_id: &str) -> Result<Vec<Chunk>, RetrievalError>;

    /// Atomically replaces a document's record and full chunk set.
    async fn replace_document(
        &self,
        record: DocumentRecord,
        chunks: Vec<Chunk>,
    ) -> Result<(), RetrievalError>;

    /// The stored document record, if the document has been ingested before.
    async fn document(&self, document_id: &str) -> Result<Option<DocumentRecord>, RetrievalError>;
}
