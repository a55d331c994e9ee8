//! End-to-end ingestion and retrieval over in-memory collaborators.
//!
//! These tests exercise the invariants the engine promises: idempotent
//! re-ingestion, chunk-id parity across the store and both indexes, embedding
//! reuse for unchanged text, full rollback on a failed commit, per-document
//! serialization, and the ingestion time-box.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use ragweld::config::{FusionConfig, IngestionConfig};
use ragweld::fusion::FusionEngine;
use ragweld::ingest::{IngestStatus, IngestionPipeline, JobStatus};
use ragweld::providers::{
    DocumentConverter, FailingIndex, MemoryLexicalIndex, MemoryVectorIndex, MockConverter,
    MockEmbeddingProvider, RawChunk,
};
use ragweld::query::QueryOrchestrator;
use ragweld::store::{ChunkId, ChunkStore, MemoryChunkStore};
use ragweld::types::RetrievalError;

const DOC_V1: &[u8] = b"# Fusion\n\nReciprocal rank fusion welds two rankings.\n\n\
Vector search finds semantic neighbours.\n\n\
Lexical search finds exact terms.";

// Same first two paragraphs, third removed.
const DOC_V2: &[u8] = b"# Fusion\n\nReciprocal rank fusion welds two rankings.\n\n\
Vector search finds semantic neighbours.";

struct Harness {
    pipeline: IngestionPipeline,
    store: Arc<MemoryChunkStore>,
    vector: Arc<FailingIndex<MemoryVectorIndex>>,
    lexical: Arc<MemoryLexicalIndex>,
    embedder: Arc<MockEmbeddingProvider>,
}

fn harness(config: IngestionConfig) -> Harness {
    let store = Arc::new(MemoryChunkStore::new());
    let vector = Arc::new(FailingIndex::new(MemoryVectorIndex::new(), "vector"));
    let lexical = Arc::new(MemoryLexicalIndex::new());
    let embedder = Arc::new(MockEmbeddingProvider::new());
    let pipeline = IngestionPipeline::new(
        store.clone(),
        Arc::new(MockConverter::new()),
        embedder.clone(),
        vector.clone(),
        lexical.clone(),
        config,
    );
    Harness {
        pipeline,
        store,
        vector,
        lexical,
        embedder,
    }
}

async fn stored_ids(store: &MemoryChunkStore, document_id: &str) -> Vec<ChunkId> {
    let mut ids: Vec<ChunkId> = store
        .get_by_document(document_id)
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.chunk_id)
        .collect();
    ids.sort();
    ids
}

#[tokio::test]
async fn reingesting_identical_bytes_is_a_no_op() {
    let h = harness(IngestionConfig::default());

    let first = h.pipeline.ingest("doc", DOC_V1).await.unwrap();
    assert_eq!(first.status, IngestStatus::Ingested);
    assert_eq!(first.chunk_count, 3);
    let calls_after_first = h.embedder.call_count();

    let second = h.pipeline.ingest("doc", DOC_V1).await.unwrap();
    assert_eq!(second.status, IngestStatus::Unchanged);
    assert_eq!(second.chunk_count, 3);
    assert_eq!(second.embedded_chunks, 0);

    // No collaborator was touched on the unchanged path.
    assert_eq!(h.embedder.call_count(), calls_after_first);
    assert_eq!(h.vector.inner().ids(), stored_ids(&h.store, "doc").await);
}

#[tokio::test]
async fn chunk_id_sets_agree_across_store_and_both_indexes() {
    let h = harness(IngestionConfig::default());
    h.pipeline.ingest("alpha", DOC_V1).await.unwrap();
    h.pipeline.ingest("beta", DOC_V2).await.unwrap();
    // Re-ingest alpha with different content to force a replacement.
    h.pipeline.ingest("alpha", DOC_V2).await.unwrap();

    let mut store_ids = stored_ids(&h.store, "alpha").await;
    store_ids.extend(stored_ids(&h.store, "beta").await);
    store_ids.sort();

    assert_eq!(h.vector.inner().ids(), store_ids);
    assert_eq!(h.lexical.ids(), store_ids);
}

#[tokio::test]
async fn unchanged_chunks_reuse_embeddings_on_reingest() {
    let h = harness(IngestionConfig::default());

    let first = h.pipeline.ingest("doc", DOC_V1).await.unwrap();
    assert_eq!(first.chunk_count, 3);
    assert_eq!(first.embedded_chunks, 3);
    let v1_chunks = h.store.get_by_document("doc").await.unwrap();
    let calls_after_first = h.embedder.call_count();

    let second = h.pipeline.ingest("doc", DOC_V2).await.unwrap();
    assert_eq!(second.status, IngestStatus::Ingested);
    assert_eq!(second.chunk_count, 2);
    assert_eq!(second.embedded_chunks, 0);
    assert_eq!(second.reused_embeddings, 2);
    // No embed call was needed for the surviving text.
    assert_eq!(h.embedder.call_count(), calls_after_first);

    // Surviving chunks keep their content-addressed embedding ids.
    let v2_chunks = h.store.get_by_document("doc").await.unwrap();
    assert_eq!(v2_chunks.len(), 2);
    for (old, new) in v1_chunks.iter().zip(&v2_chunks) {
        assert_eq!(old.embedding_id, new.embedding_id);
        assert_eq!(old.content_hash, new.content_hash);
    }

    // The removed chunk is gone everywhere.
    let removed = ChunkId::new("doc", 2);
    assert!(!h.vector.inner().ids().contains(&removed));
    assert!(!h.lexical.ids().contains(&removed));
    assert!(matches!(
        h.store.get(&removed).await,
        Err(RetrievalError::NotFound(_))
    ));
}

#[tokio::test]
async fn fresh_process_reingest_embeds_only_the_new_chunk_set() {
    let store = Arc::new(MemoryChunkStore::new());
    let vector = Arc::new(MemoryVectorIndex::new());
    let lexical = Arc::new(MemoryLexicalIndex::new());

    let first_embedder = Arc::new(MockEmbeddingProvider::new());
    let first = IngestionPipeline::new(
        store.clone(),
        Arc::new(MockConverter::new()),
        first_embedder.clone(),
        vector.clone(),
        lexical.clone(),
        IngestionConfig::default(),
    );
    first.ingest("doc", DOC_V1).await.unwrap();
    assert_eq!(first_embedder.call_count(), 3);

    // A second pipeline over the same durable state starts with an empty
    // embedding cache, as after a process restart.
    let second_embedder = Arc::new(MockEmbeddingProvider::new());
    let second = IngestionPipeline::new(
        store.clone(),
        Arc::new(MockConverter::new()),
        second_embedder.clone(),
        vector.clone(),
        lexical.clone(),
        IngestionConfig::default(),
    );
    let report = second.ingest("doc", DOC_V2).await.unwrap();
    assert_eq!(report.status, IngestStatus::Ingested);
    assert_eq!(report.chunk_count, 2);
    // Exactly the new chunk set is embedded; text that only existed in the
    // outgoing version costs nothing.
    assert_eq!(second_embedder.call_count(), 2);

    let store_ids = stored_ids(&store, "doc").await;
    assert_eq!(vector.ids(), store_ids);
    assert_eq!(lexical.ids(), store_ids);
}

#[tokio::test]
async fn failed_commit_rolls_back_to_the_prior_state() {
    let h = harness(IngestionConfig::default());
    h.pipeline.ingest("doc", DOC_V1).await.unwrap();
    let prior_chunks = h.store.get_by_document("doc").await.unwrap();
    let prior_ids = stored_ids(&h.store, "doc").await;

    // Trip the vector index partway through the replacement commit.
    h.vector.fail_after_upserts(1);
    let err = h.pipeline.ingest("doc", DOC_V2).await.unwrap_err();
    assert!(matches!(err, RetrievalError::IngestionFailed { .. }));

    // Store, vector index, and lexical index all reflect the pre-failure set.
    assert_eq!(h.store.get_by_document("doc").await.unwrap(), prior_chunks);
    assert_eq!(h.vector.inner().ids(), prior_ids);
    assert_eq!(h.lexical.ids(), prior_ids);

    // The document record still carries the old source hash, so the original
    // bytes short-circuit and the new bytes retry cleanly.
    assert_eq!(
        h.pipeline.ingest("doc", DOC_V1).await.unwrap().status,
        IngestStatus::Unchanged
    );
    let retry = h.pipeline.ingest("doc", DOC_V2).await.unwrap();
    assert_eq!(retry.status, IngestStatus::Ingested);
    assert_eq!(retry.chunk_count, 2);
}

#[tokio::test]
async fn concurrent_ingestion_of_the_same_document_is_rejected() {
    let h = harness(IngestionConfig::default());

    let guard = h.pipeline.registry().begin("doc").unwrap();
    let err = h.pipeline.ingest("doc", DOC_V1).await.unwrap_err();
    assert!(matches!(err, RetrievalError::IngestionInProgress(_)));

    // Other documents are unaffected, and the slot reopens on release.
    h.pipeline.ingest("other", DOC_V1).await.unwrap();
    guard.complete();
    h.pipeline.ingest("doc", DOC_V1).await.unwrap();
}

/// Converter that stalls long enough to blow any small time-box.
struct StallingConverter {
    delay: Duration,
}

#[async_trait]
impl DocumentConverter for StallingConverter {
    async fn convert(
        &self,
        raw_bytes: &[u8],
        max_tokens: usize,
    ) -> Result<Vec<RawChunk>, RetrievalError> {
        tokio::time::sleep(self.delay).await;
        MockConverter::new().convert(raw_bytes, max_tokens).await
    }
}

#[tokio::test]
async fn timed_out_ingestion_commits_nothing() {
    let store = Arc::new(MemoryChunkStore::new());
    let vector = Arc::new(MemoryVectorIndex::new());
    let lexical = Arc::new(MemoryLexicalIndex::new());
    let pipeline = IngestionPipeline::new(
        store.clone(),
        Arc::new(StallingConverter {
            delay: Duration::from_millis(200),
        }),
        Arc::new(MockEmbeddingProvider::new()),
        vector.clone(),
        lexical.clone(),
        IngestionConfig::default().with_timeout(Duration::from_millis(10)),
    );

    let err = pipeline.ingest("doc", DOC_V1).await.unwrap_err();
    assert!(matches!(err, RetrievalError::IngestionTimeout { .. }));

    assert!(store.get_by_document("doc").await.unwrap().is_empty());
    assert!(vector.ids().is_empty());
    assert!(lexical.ids().is_empty());

    let jobs = pipeline.registry().snapshot();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, JobStatus::Failed);
}

#[tokio::test]
async fn batch_ingestion_reports_per_document_outcomes() {
    let h = harness(IngestionConfig::default());
    let results = h
        .pipeline
        .ingest_all(vec![
            ("alpha".to_string(), DOC_V1.to_vec()),
            ("beta".to_string(), DOC_V2.to_vec()),
            ("broken".to_string(), vec![0xff, 0xfe]),
        ])
        .await;

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].0, "alpha");
    assert_eq!(results[0].1.as_ref().unwrap().chunk_count, 3);
    assert_eq!(results[1].1.as_ref().unwrap().chunk_count, 2);
    assert!(matches!(
        results[2].1,
        Err(RetrievalError::Conversion(_))
    ));

    // The two good documents are queryable, the broken one left no trace.
    assert!(h.store.get_by_document("broken").await.unwrap().is_empty());
    let mut store_ids = stored_ids(&h.store, "alpha").await;
    store_ids.extend(stored_ids(&h.store, "beta").await);
    store_ids.sort();
    assert_eq!(h.vector.inner().ids(), store_ids);
}

#[tokio::test]
async fn ingested_documents_are_retrievable_with_citations() {
    let store = Arc::new(MemoryChunkStore::new());
    let vector = Arc::new(MemoryVectorIndex::new());
    let lexical = Arc::new(MemoryLexicalIndex::new());
    let embedder = Arc::new(MockEmbeddingProvider::new());
    let pipeline = IngestionPipeline::new(
        store.clone(),
        Arc::new(MockConverter::new()),
        embedder.clone(),
        vector.clone(),
        lexical.clone(),
        IngestionConfig::default(),
    );
    pipeline.ingest("guide", DOC_V1).await.unwrap();

    let fusion = FusionEngine::new(vector, lexical, FusionConfig::default());
    let orchestrator = QueryOrchestrator::new(store, embedder, fusion);

    let results = orchestrator
        .answer_context("reciprocal rank fusion rankings", 3)
        .await
        .unwrap();
    assert!(!results.is_empty());
    assert_eq!(results[0].document_id, "guide");
    // Section provenance from the converter survives to the citation.
    assert!(results[0].citation().contains("Fusion"));
}
