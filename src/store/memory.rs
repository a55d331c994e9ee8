//! In-process chunk store with swap-based atomic document replacement.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use super::{Chunk, ChunkId, ChunkStore, DocumentRecord};
use crate::types::RetrievalError;

#[derive(Default)]
struct Inner {
    /// Per-document chunk sets, each kept ordered by chunk index.
    documents: FxHashMap<String, Vec<Chunk>>,
    records: FxHashMap<String, DocumentRecord>,
}

/// Lock-protected in-memory [`ChunkStore`].
///
/// Document replacement swaps the whole per-document vector under a write
/// lock, so readers holding the lock see either the full old set or the full
/// new set.
#[derive(Clone, Default)]
pub struct MemoryChunkStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of chunks across all documents.
    pub fn len(&self) -> usize {
        self.inner.read().documents.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ChunkStore for MemoryChunkStore {
    async fn put(&self, chunk: Chunk) -> Result<(), RetrievalError> {
        chunk.validate()?;
        let mut inner = self.inner.write();
        let chunks = inner.documents.entry(chunk.document_id.clone()).or_default();
        match chunks.iter_mut().find(|c| c.chunk_id == chunk.chunk_id) {
            Some(existing) => *existing = chunk,
            None => {
                chunks.push(chunk);
                chunks.sort_by(|a, b| a.chunk_id.cmp(&b.chunk_id));
            }
        }
        Ok(())
    }

    async fn get(&self, chunk_id: &ChunkId) -> Result<Chunk, RetrievalError> {
        let inner = self.inner.read();
        inner
            .documents
            .values()
            .flat_map(|chunks| chunks.iter())
            .find(|c| &c.chunk_id == chunk_id)
            .cloned()
            .ok_or_else(|| RetrievalError::NotFound(format!("chunk '{chunk_id}'")))
    }

    async fn get_by_document(&self, document_id: &str) -> Result<Vec<Chunk>, RetrievalError> {
        let inner = self.inner.read();
        Ok(inner.documents.get(document_id).cloned().unwrap_or_default())
    }

    async fn delete_by_document(&self, document_id: &str) -> Result<Vec<Chunk>, RetrievalError> {
        let mut inner = self.inner.write();
        inner.records.remove(document_id);
        Ok(inner.documents.remove(document_id).unwrap_or_default())
    }

    async fn replace_document(
        &self,
        record: DocumentRecord,
        mut chunks: Vec<Chunk>,
    ) -> Result<(), RetrievalError> {
        for chunk in &chunks {
            chunk.validate()?;
            if chunk.document_id != record.document_id {
                return Err(RetrievalError::Validation(format!(
                    "chunk '{}' belongs to '{}', not '{}'",
                    chunk.chunk_id, chunk.document_id, record.document_id
                )));
            }
        }
        chunks.sort_by(|a, b| a.chunk_id.cmp(&b.chunk_id));

        let mut inner = self.inner.write();
        inner.documents.insert(record.document_id.clone(), chunks);
        inner.records.insert(record.document_id.clone(), record);
        Ok(())
    }

    async fn document(&self, document_id: &str) -> Result<Option<DocumentRecord>, RetrievalError> {
        Ok(self.inner.read().records.get(document_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SectionPath;
    use crate::types::ContentHash;
    use chrono::Utc;

    fn chunk(doc: &str, index: usize, text: &str) -> Chunk {
        Chunk {
            chunk_id: ChunkId::new(doc, index),
            document_id: doc.to_string(),
            content_hash: ContentHash::of_text(text),
            text: text.to_string(),
            contextualized_text: None,
            section_path: SectionPath::default(),
            page_range: None,
            embedding_id: format!("emb-{}", ContentHash::of_text(text)),
            token_count: text.split_whitespace().count(),
        }
    }

    fn record(doc: &str) -> DocumentRecord {
        DocumentRecord {
            document_id: doc.to_string(),
            source_hash: ContentHash::of_text(doc),
            last_ingested_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn put_get_roundtrip_and_replace_by_id() {
        let store = MemoryChunkStore::new();
        let original = chunk("doc", 0, "first version");
        store.put(original.clone()).await.unwrap();
        assert_eq!(store.get(&original.chunk_id).await.unwrap(), original);

        let updated = chunk("doc", 0, "second version");
        store.put(updated.clone()).await.unwrap();
        assert_eq!(store.get(&updated.chunk_id).await.unwrap(), updated);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn get_missing_chunk_is_not_found() {
        let store = MemoryChunkStore::new();
        let err = store.get(&ChunkId::new("ghost", 0)).await.unwrap_err();
        assert!(matches!(err, RetrievalError::NotFound(_)));
    }

    #[tokio::test]
    async fn replace_document_swaps_whole_set() {
        let store = MemoryChunkStore::new();
        store
            .replace_document(
                record("doc"),
                vec![chunk("doc", 0, "a"), chunk("doc", 1, "b"), chunk("doc", 2, "c")],
            )
            .await
            .unwrap();
        assert_eq!(store.get_by_document("doc").await.unwrap().len(), 3);

        store
            .replace_document(record("doc"), vec![chunk("doc", 0, "a"), chunk("doc", 1, "d")])
            .await
            .unwrap();
        let chunks = store.get_by_document("doc").await.unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].text, "d");
    }

    #[tokio::test]
    async fn delete_unknown_document_is_a_noop() {
        let store = MemoryChunkStore::new();
        assert!(store.delete_by_document("ghost").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn replace_rejects_foreign_chunks() {
        let store = MemoryChunkStore::new();
        let err = store
            .replace_document(record("doc"), vec![chunk("other", 0, "a")])
            .await
            .unwrap_err();
        assert!(matches!(err, RetrievalError::Validation(_)));
    }
}
