//! Ingestion pipeline keeping the chunk store and both indexes consistent.
//!
//! ```text
//! raw bytes ──► source-hash check ──► converter ──► content-hash dedup
//!                   │ (unchanged)                        │
//!                   ▼                                    ▼
//!               no-op report                embedding cache / provider
//!                                                        │
//!                                                        ▼
//!                              atomic commit: delete prior ──► store swap
//!                                              ──► upsert both indexes
//!                                              (any failure → full rollback)
//! ```
//!
//! Per-document serialization comes from [`IngestionRegistry`]; ingestions
//! for different documents run concurrently. Each document's delete+insert is
//! its own atomic unit: after a successful `ingest` the chunk-id sets in the
//! vector index, the lexical index, and the chunk store agree for that
//! document, and after a failed one they all reflect the pre-ingestion state.

pub mod registry;

use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::IngestionConfig;
use crate::providers::{DocumentConverter, EmbeddingProvider, LexicalIndex, VectorIndex};
use crate::store::{Chunk, ChunkId, ChunkStore, DocumentRecord};
use crate::types::{ContentHash, RetrievalError};

pub use registry::{IngestionRegistry, JobEntry, JobGuard, JobStatus};

/// Outcome class of a successful `ingest` call.
///
/// A failed ingestion is reported through the error channel
/// ([`RetrievalError::IngestionFailed`] and friends), never as a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    /// Source bytes matched the stored `source_hash`; nothing was touched.
    Unchanged,
    /// The document's chunk set was (re)built and committed everywhere.
    Ingested,
}

/// Summary returned by [`IngestionPipeline::ingest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    pub document_id: String,
    pub status: IngestStatus,
    /// Chunks now owned by the document.
    pub chunk_count: usize,
    /// Chunks whose embedding was freshly computed this run.
    pub embedded_chunks: usize,
    /// Chunks that reused a cached embedding (content-hash hit).
    pub reused_embeddings: usize,
}

/// Content-addressed embedding cache shared across ingestions.
///
/// Keyed by `content_hash` rather than `chunk_id`, so edits that reorder but
/// do not change chunk text never trigger recomputation.
#[derive(Clone, Default)]
struct EmbeddingCache {
    vectors: Arc<RwLock<FxHashMap<ContentHash, Arc<Vec<f32>>>>>,
}

impl EmbeddingCache {
    fn get(&self, hash: &ContentHash) -> Option<Arc<Vec<f32>>> {
        self.vectors.read().get(hash).cloned()
    }

    fn insert(&self, hash: ContentHash, vector: Vec<f32>) -> Arc<Vec<f32>> {
        let vector = Arc::new(vector);
        self.vectors.write().insert(hash, vector.clone());
        vector
    }
}

/// Everything computed before any store or index is mutated.
struct PreparedDocument {
    record: DocumentRecord,
    chunks: Vec<Chunk>,
    vectors: FxHashMap<ChunkId, Arc<Vec<f32>>>,
    embedded: usize,
    reused: usize,
}

/// Pre-ingestion state captured for rollback.
struct PriorState {
    record: Option<DocumentRecord>,
    chunks: Vec<Chunk>,
    vectors: FxHashMap<ChunkId, Arc<Vec<f32>>>,
}

/// Drives documents through conversion, deduplication, embedding, and the
/// atomic two-index commit.
#[derive(Clone)]
pub struct IngestionPipeline {
    store: Arc<dyn ChunkStore>,
    converter: Arc<dyn DocumentConverter>,
    embedder: Arc<dyn EmbeddingProvider>,
    vector: Arc<dyn VectorIndex>,
    lexical: Arc<dyn LexicalIndex>,
    config: IngestionConfig,
    registry: IngestionRegistry,
    cache: EmbeddingCache,
}

impl IngestionPipeline {
    pub fn new(
        store: Arc<dyn ChunkStore>,
        converter: Arc<dyn DocumentConverter>,
        embedder: Arc<dyn EmbeddingProvider>,
        vector: Arc<dyn VectorIndex>,
        lexical: Arc<dyn LexicalIndex>,
        config: IngestionConfig,
    ) -> Self {
        let registry = IngestionRegistry::new(config.registry_retain);
        IngestionPipeline {
            store,
            converter,
            embedder,
            vector,
            lexical,
            config,
            registry,
            cache: EmbeddingCache::default(),
        }
    }

    /// Job registry, for status inspection and explicit eviction.
    pub fn registry(&self) -> &IngestionRegistry {
        &self.registry
    }

    /// Ingests one document end to end.
    ///
    /// Identical bytes short-circuit to [`IngestStatus::Unchanged`] without
    /// touching any collaborator. A concurrent ingestion of the same document
    /// is rejected with [`RetrievalError::IngestionInProgress`]. A configured
    /// timeout bounds the conversion and embedding phase; the commit itself is
    /// never interrupted mid-flight.
    pub async fn ingest(
        &self,
        document_id: &str,
        raw_bytes: &[u8],
    ) -> Result<IngestReport, RetrievalError> {
        let guard = self.registry.begin(document_id)?;

        let source_hash = ContentHash::of_bytes(raw_bytes);
        let prior_record = match self.store.document(document_id).await {
            Ok(record) => record,
            Err(err) => {
                guard.fail(&err);
                return Err(err);
            }
        };
        if prior_record.as_ref().map(|r| &r.source_hash) == Some(&source_hash) {
            let chunk_count = match self.store.get_by_document(document_id).await {
                Ok(chunks) => chunks.len(),
                Err(err) => {
                    guard.fail(&err);
                    return Err(err);
                }
            };
            debug!(document_id, %source_hash, "source unchanged, skipping ingestion");
            guard.complete();
            return Ok(IngestReport {
                document_id: document_id.to_string(),
                status: IngestStatus::Unchanged,
                chunk_count,
                embedded_chunks: 0,
                reused_embeddings: 0,
            });
        }

        let started = std::time::Instant::now();
        let outcome = self
            .stage_with_timeout(document_id, raw_bytes, source_hash, prior_record, started)
            .await;
        let (prepared, prior) = match outcome {
            Ok(staged) => staged,
            Err(err) => {
                guard.fail(&err);
                return Err(err);
            }
        };

        let report = IngestReport {
            document_id: document_id.to_string(),
            status: IngestStatus::Ingested,
            chunk_count: prepared.chunks.len(),
            embedded_chunks: prepared.embedded,
            reused_embeddings: prepared.reused,
        };

        if let Err(err) = self.commit(&prepared, &prior).await {
            warn!(document_id, error = %err, "commit failed, rolling document back");
            self.rollback(&prepared, &prior).await;
            let failure = RetrievalError::ingestion_failed(document_id, err);
            guard.fail(&failure);
            return Err(failure);
        }

        info!(
            document_id,
            chunks = report.chunk_count,
            embedded = report.embedded_chunks,
            reused = report.reused_embeddings,
            "document ingested"
        );
        guard.complete();
        Ok(report)
    }

    /// Ingests several documents concurrently, one atomic unit per document.
    ///
    /// Partial failures do not abort the batch; each document reports its own
    /// outcome, in input order.
    pub async fn ingest_all(
        &self,
        documents: Vec<(String, Vec<u8>)>,
    ) -> Vec<(String, Result<IngestReport, RetrievalError>)> {
        let mut handles = Vec::with_capacity(documents.len());
        for (document_id, bytes) in documents {
            let pipeline = self.clone();
            let id_for_task = document_id.clone();
            handles.push((
                document_id,
                tokio::spawn(async move { pipeline.ingest(&id_for_task, &bytes).await }),
            ));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (document_id, handle) in handles {
            let outcome = match handle.await {
                Ok(result) => result,
                Err(join_err) => Err(RetrievalError::ingestion_failed(
                    &document_id,
                    RetrievalError::Storage(format!("ingestion task aborted: {join_err}")),
                )),
            };
            results.push((document_id, outcome));
        }
        results
    }

    /// Everything that happens before mutation — conversion, embedding, and
    /// the prior-state snapshot — under the configured time-box.
    async fn stage_with_timeout(
        &self,
        document_id: &str,
        raw_bytes: &[u8],
        source_hash: ContentHash,
        prior_record: Option<DocumentRecord>,
        started: std::time::Instant,
    ) -> Result<(PreparedDocument, PriorState), RetrievalError> {
        let staging = self.stage(document_id, raw_bytes, source_hash, prior_record);
        match self.config.timeout {
            Some(budget) => match tokio::time::timeout(budget, staging).await {
                Ok(result) => result,
                Err(_) => Err(RetrievalError::IngestionTimeout {
                    document_id: document_id.to_string(),
                    elapsed_ms: started.elapsed().as_millis() as u64,
                }),
            },
            None => staging.await,
        }
    }

    async fn stage(
        &self,
        document_id: &str,
        raw_bytes: &[u8],
        source_hash: ContentHash,
        prior_record: Option<DocumentRecord>,
    ) -> Result<(PreparedDocument, PriorState), RetrievalError> {
        let prepared = self.prepare(document_id, raw_bytes, source_hash).await?;
        let prior = self.capture_prior(document_id, prior_record).await?;
        Ok((prepared, prior))
    }

    /// Conversion, deduplication, and embedding. No mutation happens here.
    async fn prepare(
        &self,
        document_id: &str,
        raw_bytes: &[u8],
        source_hash: ContentHash,
    ) -> Result<PreparedDocument, RetrievalError> {
        let raw_chunks = self
            .converter
            .convert(raw_bytes, self.config.max_tokens)
            .await?;
        debug!(document_id, chunks = raw_chunks.len(), "conversion complete");

        let mut chunks = Vec::with_capacity(raw_chunks.len());
        let mut vectors = FxHashMap::default();
        let mut embedded = 0usize;
        let mut reused = 0usize;

        for (index, raw) in raw_chunks.into_iter().enumerate() {
            if raw.text.trim().is_empty() {
                debug!(document_id, index, "skipping empty chunk from converter");
                continue;
            }
            let content_hash = ContentHash::of_text(&raw.text);
            let chunk = Chunk {
                chunk_id: ChunkId::new(document_id, index),
                document_id: document_id.to_string(),
                embedding_id: format!("emb-{content_hash}"),
                content_hash: content_hash.clone(),
                text: raw.text,
                contextualized_text: raw.contextualized_text,
                section_path: raw.section_path,
                page_range: raw.page_range,
                token_count: raw.token_count,
            };
            chunk.validate()?;

            let vector = match self.cache.get(&content_hash) {
                Some(vector) => {
                    reused += 1;
                    vector
                }
                None => {
                    let fresh = self.embed_with_retry(chunk.indexable_text()).await?;
                    embedded += 1;
                    self.cache.insert(content_hash, fresh)
                }
            };
            vectors.insert(chunk.chunk_id.clone(), vector);
            chunks.push(chunk);
        }

        Ok(PreparedDocument {
            record: DocumentRecord {
                document_id: document_id.to_string(),
                source_hash,
                last_ingested_at: Utc::now(),
            },
            chunks,
            vectors,
            embedded,
            reused,
        })
    }

    /// Snapshot of the pre-ingestion chunk set, with rollback vectors taken
    /// from the embedding cache alone. Prior text that survives into the new
    /// set is already cached by `prepare`; vectors for dropped chunks are
    /// recovered lazily if a rollback actually needs them, so the happy path
    /// never embeds text it is about to discard.
    async fn capture_prior(
        &self,
        document_id: &str,
        record: Option<DocumentRecord>,
    ) -> Result<PriorState, RetrievalError> {
        let chunks = self.store.get_by_document(document_id).await?;
        let mut vectors = FxHashMap::default();
        for chunk in &chunks {
            if let Some(vector) = self.cache.get(&chunk.content_hash) {
                vectors.insert(chunk.chunk_id.clone(), vector);
            }
        }
        Ok(PriorState {
            record,
            chunks,
            vectors,
        })
    }

    /// Delete-then-insert across the store and both indexes.
    async fn commit(
        &self,
        prepared: &PreparedDocument,
        prior: &PriorState,
    ) -> Result<(), RetrievalError> {
        for chunk in &prior.chunks {
            self.vector.delete(&chunk.chunk_id).await?;
            self.lexical.delete(&chunk.chunk_id).await?;
        }

        self.store
            .replace_document(prepared.record.clone(), prepared.chunks.clone())
            .await?;

        for chunk in &prepared.chunks {
            let vector = prepared
                .vectors
                .get(&chunk.chunk_id)
                .cloned()
                .ok_or_else(|| {
                    RetrievalError::Validation(format!(
                        "no embedding prepared for chunk '{}'",
                        chunk.chunk_id
                    ))
                })?;
            self.vector
                .upsert(&chunk.chunk_id, vector.as_ref().clone())
                .await?;
            self.lexical
                .upsert(&chunk.chunk_id, chunk.indexable_text())
                .await?;
        }
        Ok(())
    }

    /// Best-effort restoration of the exact pre-ingestion state.
    async fn rollback(&self, prepared: &PreparedDocument, prior: &PriorState) {
        let prior_ids: FxHashSet<&ChunkId> = prior.chunks.iter().map(|c| &c.chunk_id).collect();

        // Remove anything the aborted commit may have introduced.
        for chunk in &prepared.chunks {
            if prior_ids.contains(&chunk.chunk_id) {
                continue;
            }
            if let Err(err) = self.vector.delete(&chunk.chunk_id).await {
                error!(chunk_id = %chunk.chunk_id, error = %err, "rollback: vector delete failed");
            }
            if let Err(err) = self.lexical.delete(&chunk.chunk_id).await {
                error!(chunk_id = %chunk.chunk_id, error = %err, "rollback: lexical delete failed");
            }
        }

        // Re-install the prior chunk set in both indexes, recovering any
        // vector the cache no longer holds.
        for chunk in &prior.chunks {
            let vector = match prior.vectors.get(&chunk.chunk_id) {
                Some(vector) => Some(vector.clone()),
                None => match self.embed_with_retry(chunk.indexable_text()).await {
                    Ok(fresh) => Some(self.cache.insert(chunk.content_hash.clone(), fresh)),
                    Err(err) => {
                        error!(chunk_id = %chunk.chunk_id, error = %err, "rollback: prior embedding unrecoverable");
                        None
                    }
                },
            };
            if let Some(vector) = vector {
                if let Err(err) = self
                    .vector
                    .upsert(&chunk.chunk_id, vector.as_ref().clone())
                    .await
                {
                    error!(chunk_id = %chunk.chunk_id, error = %err, "rollback: vector upsert failed");
                }
            }
            if let Err(err) = self
                .lexical
                .upsert(&chunk.chunk_id, chunk.indexable_text())
                .await
            {
                error!(chunk_id = %chunk.chunk_id, error = %err, "rollback: lexical upsert failed");
            }
        }

        // Restore the store last so readers only ever see old or new sets.
        let restore = match &prior.record {
            Some(record) => {
                self.store
                    .replace_document(record.clone(), prior.chunks.clone())
                    .await
            }
            None => self
                .store
                .delete_by_document(&prepared.record.document_id)
                .await
                .map(|_| ()),
        };
        if let Err(err) = restore {
            error!(
                document_id = prepared.record.document_id,
                error = %err,
                "rollback: chunk store restore failed"
            );
        }
    }

    /// Embedding with bounded exponential backoff for transient failures.
    async fn embed_with_retry(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.embedder.embed(text).await {
                Ok(vector) => return Ok(vector),
                Err(err @ RetrievalError::Embedding(_))
                    if attempt < self.config.embed_max_attempts =>
                {
                    let delay = self
                        .config
                        .embed_backoff
                        .saturating_mul(2u32.saturating_pow(attempt - 1));
                    warn!(attempt, delay_ms = delay.as_millis() as u64, error = %err,
                        "embedding failed, backing off");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
