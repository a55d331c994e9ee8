//! Deterministic in-process collaborators.
//!
//! These back the integration tests and embedded deployments: a mock
//! converter and embedding provider, naive but deterministic vector/lexical
//! indexes, and a failure-injecting wrapper used to exercise rollback paths.

use std::hash::Hasher;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use twox_hash::XxHash64;

use super::{DocumentConverter, EmbeddingProvider, LexicalIndex, RawChunk, VectorIndex};
use crate::store::{ChunkId, SectionPath};
use crate::types::RetrievalError;

/// Converter that treats input bytes as UTF-8 text and splits on blank lines.
///
/// Lines starting with `#` open a new section whose heading becomes the
/// section path for following paragraphs. Good enough to drive the pipeline in
/// tests without a real conversion service.
#[derive(Debug, Default, Clone)]
pub struct MockConverter;

impl MockConverter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DocumentConverter for MockConverter {
    async fn convert(
        &self,
        raw_bytes: &[u8],
        max_tokens: usize,
    ) -> Result<Vec<RawChunk>, RetrievalError> {
        let text = std::str::from_utf8(raw_bytes)
            .map_err(|err| RetrievalError::Conversion(format!("input is not UTF-8: {err}")))?;
        if text.trim().is_empty() {
            return Err(RetrievalError::Conversion("document is empty".into()));
        }

        let mut chunks = Vec::new();
        let mut heading: Option<String> = None;
        for block in text.split("\n\n") {
            let block = block.trim();
            if block.is_empty() {
                continue;
            }
            if let Some(title) = block.strip_prefix('#') {
                heading = Some(title.trim().to_string());
                continue;
            }
            let token_count = block.split_whitespace().count().min(max_tokens);
            let section_path: SectionPath = heading.iter().cloned().collect();
            let contextualized = heading
                .as_ref()
                .map(|h| format!("{h}\n{block}"));
            let mut chunk = RawChunk::new(block);
            chunk.token_count = token_count;
            chunk.section_path = section_path;
            chunk.contextualized_text = contextualized;
            chunks.push(chunk);
        }
        Ok(chunks)
    }
}

/// Deterministic embedding provider seeded by a hash of the input text.
///
/// Identical text always produces the identical vector, so tests can assert
/// embedding-reuse behavior. The provider counts calls and can be primed to
/// fail a number of times to exercise the retry path.
pub struct MockEmbeddingProvider {
    dimensions: usize,
    calls: AtomicUsize,
    failures_remaining: AtomicI64,
}

impl MockEmbeddingProvider {
    pub fn new() -> Self {
        Self::with_dimensions(8)
    }

    pub fn with_dimensions(dimensions: usize) -> Self {
        MockEmbeddingProvider {
            dimensions,
            calls: AtomicUsize::new(0),
            failures_remaining: AtomicI64::new(0),
        }
    }

    /// Number of `embed` calls served so far (failures included).
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Makes the next `n` embed calls fail with a transient error.
    pub fn fail_next(&self, n: i64) {
        self.failures_remaining.store(n, Ordering::SeqCst);
    }
}

impl Default for MockEmbeddingProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failures_remaining.fetch_sub(1, Ordering::SeqCst) > 0 {
            return Err(RetrievalError::Embedding("injected transient failure".into()));
        }
        let mut vector = Vec::with_capacity(self.dimensions);
        for lane in 0..self.dimensions {
            let mut hasher = XxHash64::with_seed(lane as u64);
            hasher.write(text.as_bytes());
            // Map the 64-bit hash onto [-1, 1) per lane.
            let unit = (hasher.finish() as f64) / (u64::MAX as f64);
            vector.push((unit * 2.0 - 1.0) as f32);
        }
        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Brute-force cosine-similarity vector index.
#[derive(Clone, Default)]
pub struct MemoryVectorIndex {
    vectors: Arc<RwLock<FxHashMap<ChunkId, Vec<f32>>>>,
}

impl MemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chunk ids currently indexed, sorted; used by parity assertions.
    pub fn ids(&self) -> Vec<ChunkId> {
        let mut ids: Vec<ChunkId> = self.vectors.read().keys().cloned().collect();
        ids.sort();
        ids
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn upsert(&self, chunk_id: &ChunkId, vector: Vec<f32>) -> Result<(), RetrievalError> {
        self.vectors.write().insert(chunk_id.clone(), vector);
        Ok(())
    }

    async fn delete(&self, chunk_id: &ChunkId) -> Result<(), RetrievalError> {
        self.vectors.write().remove(chunk_id);
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<(ChunkId, f32)>, RetrievalError> {
        let vectors = self.vectors.read();
        let mut scored: Vec<(ChunkId, f32)> = vectors
            .iter()
            .map(|(id, candidate)| (id.clone(), cosine(vector, candidate)))
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(k);
        Ok(scored)
    }
}

/// Term-frequency lexical index; a stand-in for a BM25/FTS collaborator.
#[derive(Clone, Default)]
pub struct MemoryLexicalIndex {
    texts: Arc<RwLock<FxHashMap<ChunkId, String>>>,
}

impl MemoryLexicalIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chunk ids currently indexed, sorted; used by parity assertions.
    pub fn ids(&self) -> Vec<ChunkId> {
        let mut ids: Vec<ChunkId> = self.texts.read().keys().cloned().collect();
        ids.sort();
        ids
    }
}

fn terms(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl LexicalIndex for MemoryLexicalIndex {
    async fn upsert(&self, chunk_id: &ChunkId, text: &str) -> Result<(), RetrievalError> {
        self.texts.write().insert(chunk_id.clone(), text.to_string());
        Ok(())
    }

    async fn delete(&self, chunk_id: &ChunkId) -> Result<(), RetrievalError> {
        self.texts.write().remove(chunk_id);
        Ok(())
    }

    async fn search(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<(ChunkId, f32)>, RetrievalError> {
        let query_terms = terms(query);
        if query_terms.is_empty() {
            return Ok(Vec::new());
        }
        let texts = self.texts.read();
        let mut scored: Vec<(ChunkId, f32)> = texts
            .iter()
            .filter_map(|(id, text)| {
                let doc_terms = terms(text);
                let score: f32 = query_terms
                    .iter()
                    .map(|q| doc_terms.iter().filter(|t| *t == q).count() as f32)
                    .sum();
                (score > 0.0).then(|| (id.clone(), score / (1.0 + doc_terms.len() as f32)))
            })
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(k);
        Ok(scored)
    }
}

/// Wrapper that injects write/search failures into an inner index.
///
/// Used by tests to prove the ingestion pipeline's rollback discipline and the
/// fusion engine's degraded mode.
pub struct FailingIndex<I> {
    inner: I,
    label: &'static str,
    upserts_until_failure: AtomicI64,
    fail_searches: AtomicBool,
}

impl<I> FailingIndex<I> {
    pub fn new(inner: I, label: &'static str) -> Self {
        FailingIndex {
            inner,
            label,
            upserts_until_failure: AtomicI64::new(i64::MAX),
            fail_searches: AtomicBool::new(false),
        }
    }

    /// The wrapped index, for state assertions.
    pub fn inner(&self) -> &I {
        &self.inner
    }

    /// Lets `n` more upserts through, fails the next one, then recovers.
    /// Models a transient write rejection rather than a dead index.
    pub fn fail_after_upserts(&self, n: i64) {
        self.upserts_until_failure.store(n, Ordering::SeqCst);
    }

    /// Clears any pending write failure.
    pub fn heal(&self) {
        self.upserts_until_failure.store(i64::MAX, Ordering::SeqCst);
        self.fail_searches.store(false, Ordering::SeqCst);
    }

    pub fn fail_searches(&self, fail: bool) {
        self.fail_searches.store(fail, Ordering::SeqCst);
    }

    fn check_write(&self) -> Result<(), RetrievalError> {
        if self.upserts_until_failure.fetch_sub(1, Ordering::SeqCst) <= 0 {
            self.upserts_until_failure.store(i64::MAX, Ordering::SeqCst);
            return Err(RetrievalError::IndexWrite {
                index: self.label,
                message: "injected write failure".into(),
            });
        }
        Ok(())
    }

    fn check_search(&self) -> Result<(), RetrievalError> {
        if self.fail_searches.load(Ordering::SeqCst) {
            return Err(RetrievalError::Storage(format!(
                "{} index unreachable: injected search failure",
                self.label
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl<I: VectorIndex> VectorIndex for FailingIndex<I> {
    async fn upsert(&self, chunk_id: &ChunkId, vector: Vec<f32>) -> Result<(), RetrievalError> {
        self.check_write()?;
        self.inner.upsert(chunk_id, vector).await
    }

    async fn delete(&self, chunk_id: &ChunkId) -> Result<(), RetrievalError> {
        self.inner.delete(chunk_id).await
    }

    async fn search(
        &self,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<(ChunkId, f32)>, RetrievalError> {
        self.check_search()?;
        self.inner.search(vector, k).await
    }
}

#[async_trait]
impl<I: LexicalIndex> LexicalIndex for FailingIndex<I> {
    async fn upsert(&self, chunk_id: &ChunkId, text: &str) -> Result<(), RetrievalError> {
        self.check_write()?;
        self.inner.upsert(chunk_id, text).await
    }

    async fn delete(&self, chunk_id: &ChunkId) -> Result<(), RetrievalError> {
        self.inner.delete(chunk_id).await
    }

    async fn search(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<(ChunkId, f32)>, RetrievalError> {
        self.check_search()?;
        self.inner.search(query, k).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn converter_splits_paragraphs_and_tracks_sections() {
        let converter = MockConverter::new();
        let doc = "# Intro\n\nFirst paragraph here.\n\n# Details\n\nSecond paragraph here.";
        let chunks = converter.convert(doc.as_bytes(), 512).await.unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].section_path.breadcrumb(), "Intro");
        assert_eq!(chunks[1].section_path.breadcrumb(), "Details");
        assert!(chunks[0].contextualized_text.as_ref().unwrap().starts_with("Intro"));
    }

    #[tokio::test]
    async fn converter_rejects_non_utf8_and_empty_input() {
        let converter = MockConverter::new();
        assert!(matches!(
            converter.convert(&[0xff, 0xfe], 512).await,
            Err(RetrievalError::Conversion(_))
        ));
        assert!(matches!(
            converter.convert(b"   ", 512).await,
            Err(RetrievalError::Conversion(_))
        ));
    }

    #[tokio::test]
    async fn mock_embeddings_are_deterministic() {
        let provider = MockEmbeddingProvider::new();
        let a = provider.embed("hello world").await.unwrap();
        let b = provider.embed("hello world").await.unwrap();
        let c = provider.embed("goodbye world").await.unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), provider.dimensions());
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn vector_index_ranks_identical_vector_first() {
        let index = MemoryVectorIndex::new();
        let provider = MockEmbeddingProvider::new();
        let target = provider.embed("target text").await.unwrap();
        let other = provider.embed("unrelated text").await.unwrap();
        index.upsert(&ChunkId::from("doc#0000"), target.clone()).await.unwrap();
        index.upsert(&ChunkId::from("doc#0001"), other).await.unwrap();

        let hits = index.search(&target, 2).await.unwrap();
        assert_eq!(hits[0].0.as_str(), "doc#0000");
        assert!(hits[0].1 > hits[1].1);
    }

    #[tokio::test]
    async fn lexical_index_matches_terms() {
        let index = MemoryLexicalIndex::new();
        index
            .upsert(&ChunkId::from("doc#0000"), "rust retrieval engines")
            .await
            .unwrap();
        index
            .upsert(&ChunkId::from("doc#0001"), "completely unrelated prose")
            .await
            .unwrap();

        let hits = index.search("retrieval", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.as_str(), "doc#0000");
        assert!(index.search("", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failing_index_search_failures_are_read_errors() {
        let index = FailingIndex::new(MemoryVectorIndex::new(), "vector");
        index.fail_searches(true);
        let err = index.search(&[1.0], 1).await.unwrap_err();
        assert!(matches!(err, RetrievalError::Storage(_)));
        index.heal();
        assert!(index.search(&[1.0], 1).await.is_ok());
    }

    #[tokio::test]
    async fn failing_index_trips_after_budget() {
        let index = FailingIndex::new(MemoryVectorIndex::new(), "vector");
        index.fail_after_upserts(1);
        assert!(index.upsert(&ChunkId::from("a"), vec![1.0]).await.is_ok());
        let err = index.upsert(&ChunkId::from("b"), vec![1.0]).await.unwrap_err();
        assert!(matches!(err, RetrievalError::IndexWrite { index: "vector", .. }));
        index.heal();
        assert!(index.upsert(&ChunkId::from("b"), vec![1.0]).await.is_ok());
    }
}
