//! Contracts for the external collaborators the engine is built around.
//!
//! The core never implements document conversion, embedding models, or index
//! storage itself; it consumes them through these traits:
//!
//! * [`DocumentConverter`] — raw bytes in, ordered structured chunks out.
//! * [`EmbeddingProvider`] — text in, fixed-length vector out.
//! * [`VectorIndex`] / [`LexicalIndex`] — upsert/delete/search over chunk ids.
//!
//! [`memory`] hosts deterministic in-process implementations used by tests
//! and embedded deployments.

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::store::{ChunkId, PageRange, SectionPath};
use crate::types::RetrievalError;

pub use memory::{
    FailingIndex, MemoryLexicalIndex, MemoryVectorIndex, MockConverter, MockEmbeddingProvider,
};

/// One structured chunk as produced by the conversion collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawChunk {
    /// Extracted text.
    pub text: String,
    /// Text enriched with surrounding-document context, when the converter
    /// supports contextualization.
    pub contextualized_text: Option<String>,
    /// Heading trail locating the chunk in the source.
    pub section_path: SectionPath,
    /// Page span for paginated sources.
    pub page_range: Option<PageRange>,
    /// Token count under the converter's tokenizer.
    pub token_count: usize,
}

impl RawChunk {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let token_count = text.split_whitespace().count();
        RawChunk {
            text,
            contextualized_text: None,
            section_path: SectionPath::default(),
            page_range: None,
            token_count,
        }
    }

    #[must_use]
    pub fn with_section(mut self, section_path: SectionPath) -> Self {
        self.section_path = section_path;
        self
    }

    #[must_use]
    pub fn with_pages(mut self, page_range: PageRange) -> Self {
        self.page_range = Some(page_range);
        self
    }

    #[must_use]
    pub fn with_context(mut self, contextualized_text: impl Into<String>) -> Self {
        self.contextualized_text = Some(contextualized_text.into());
        self
    }
}

/// Document-conversion/chunking collaborator.
///
/// Fails with [`RetrievalError::Conversion`] on unsupported or corrupt input;
/// conversion failures are surfaced to the caller, never retried.
#[async_trait]
pub trait DocumentConverter: Send + Sync {
    /// Converts raw bytes into an ordered sequence of chunks, each bounded by
    /// `max_tokens`.
    async fn convert(
        &self,
        raw_bytes: &[u8],
        max_tokens: usize,
    ) -> Result<Vec<RawChunk>, RetrievalError>;
}

/// Embedding provider collaborator: text to fixed-length vector.
///
/// Failures are [`RetrievalError::Embedding`] and treated as transient by the
/// ingestion pipeline (bounded retry), but surfaced directly at query time.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError>;

    /// Batch variant; the default delegates to [`embed`](Self::embed) per item.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }

    /// Dimensionality of produced vectors.
    fn dimensions(&self) -> usize;
}

/// Dense (semantic) index collaborator.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(&self, chunk_id: &ChunkId, vector: Vec<f32>) -> Result<(), RetrievalError>;

    async fn delete(&self, chunk_id: &ChunkId) -> Result<(), RetrievalError>;

    /// Top-`k` chunk ids by similarity, best first.
    async fn search(
        &self,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<(ChunkId, f32)>, RetrievalError>;
}

/// Sparse (lexical/full-text) index collaborator.
#[async_trait]
pub trait LexicalIndex: Send + Sync {
    async fn upsert(&self, chunk_id: &ChunkId, text: &str) -> Result<(), RetrievalError>;

    async fn delete(&self, chunk_id: &ChunkId) -> Result<(), RetrievalError>;

    /// Top-`k` chunk ids by lexical relevance, best first.
    async fn search(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<(ChunkId, f32)>, RetrievalError>;
}
