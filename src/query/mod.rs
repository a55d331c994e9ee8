//! Query-time orchestration: embed, fuse, hydrate, cite.
//!
//! The orchestrator owns the read path end to end: it embeds the query text,
//! asks the fusion engine for a ranked candidate list, then hydrates each
//! candidate from the chunk store into a citable result. Chunks that vanished
//! between fusion and hydration (a concurrent re-ingestion landed in between)
//! are skipped rather than failing the query; the next search sees the new
//! set.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::fusion::FusionEngine;
use crate::providers::EmbeddingProvider;
use crate::store::{ChunkId, ChunkStore, PageRange, SectionPath};
use crate::types::RetrievalError;

/// A retrieved chunk with enough provenance to cite it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CitedChunk {
    pub chunk_id: ChunkId,
    pub document_id: String,
    pub text: String,
    pub section_path: SectionPath,
    pub page_range: Option<PageRange>,
    pub fused_score: f64,
}

impl CitedChunk {
    /// Human-readable citation label, e.g.
    /// `[manual#0003] Install > Linux, pp. 12-13`.
    pub fn citation(&self) -> String {
        let mut provenance = Vec::new();
        if !self.section_path.is_empty() {
            provenance.push(self.section_path.breadcrumb());
        }
        if let Some(pages) = &self.page_range {
            provenance.push(pages.to_string());
        }
        if provenance.is_empty() {
            format!("[{}]", self.chunk_id)
        } else {
            format!("[{}] {}", self.chunk_id, provenance.join(", "))
        }
    }
}

/// Read-path entry point over the store and both indexes.
pub struct QueryOrchestrator {
    store: Arc<dyn ChunkStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    fusion: FusionEngine,
}

impl QueryOrchestrator {
    pub fn new(
        store: Arc<dyn ChunkStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        fusion: FusionEngine,
    ) -> Self {
        QueryOrchestrator {
            store,
            embedder,
            fusion,
        }
    }

    /// Retrieves the fused top-`top_n` chunks for a query, hydrated and ready
    /// to cite.
    ///
    /// Embedding failures surface as [`RetrievalError::Embedding`]; index
    /// failures follow the fusion engine's degraded-mode policy.
    #[instrument(skip(self), fields(query_len = query_text.len()))]
    pub async fn answer_context(
        &self,
        query_text: &str,
        top_n: usize,
    ) -> Result<Vec<CitedChunk>, RetrievalError> {
        if query_text.trim().is_empty() {
            return Err(RetrievalError::Validation("query text is empty".into()));
        }

        let query_embedding = self.embedder.embed(query_text).await?;
        let ranked = self
            .fusion
            .fuse(query_text, &query_embedding, top_n)
            .await?;

        let mut results = Vec::with_capacity(ranked.len());
        for candidate in ranked {
            match self.store.get(&candidate.chunk_id).await {
                Ok(chunk) => results.push(CitedChunk {
                    chunk_id: chunk.chunk_id,
                    document_id: chunk.document_id,
                    text: chunk.text,
                    section_path: chunk.section_path,
                    page_range: chunk.page_range,
                    fused_score: candidate.fused_score,
                }),
                Err(RetrievalError::NotFound(_)) => {
                    debug!(chunk_id = %candidate.chunk_id, "chunk vanished between fusion and hydration");
                }
                Err(err) => return Err(err),
            }
        }
        debug!(results = results.len(), "query answered");
        Ok(results)
    }
}
