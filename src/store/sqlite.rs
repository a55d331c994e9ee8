//! Durable chunk store over SQLite via `tokio-rusqlite`.
//!
//! Document replacement and deletion run inside a single transaction, which is
//! what makes them atomic for concurrent readers.

use std::path::Path;

use async_trait::async_trait;
use tokio_rusqlite::{Connection, OptionalExtension, params, rusqlite};

use super::{Chunk, ChunkId, ChunkStore, DocumentRecord, PageRange, SectionPath};
use crate::types::{ContentHash, RetrievalError};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS documents (
    document_id      TEXT PRIMARY KEY,
    source_hash      TEXT NOT NULL,
    last_ingested_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS chunks (
    chunk_id            TEXT PRIMARY KEY,
    document_id         TEXT NOT NULL,
    content_hash        TEXT NOT NULL,
    text                TEXT NOT NULL,
    contextualized_text TEXT,
    section_path        TEXT NOT NULL,
    page_start          INTEGER,
    page_end            INTEGER,
    embedding_id        TEXT NOT NULL,
    token_count         INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id);
";

/// SQLite-backed [`ChunkStore`].
#[derive(Clone)]
pub struct SqliteChunkStore {
    conn: Connection,
}

impl SqliteChunkStore {
    /// Opens (and migrates) a store at the given path.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, RetrievalError> {
        let conn = Connection::open(path).await.map_err(storage_err)?;
        Self::migrate(conn).await
    }

    /// Opens an in-memory store, mainly for tests.
    pub async fn open_in_memory() -> Result<Self, RetrievalError> {
        let conn = Connection::open_in_memory().await.map_err(storage_err)?;
        Self::migrate(conn).await
    }

    async fn migrate(conn: Connection) -> Result<Self, RetrievalError> {
        conn.call(|conn| conn.execute_batch(SCHEMA))
            .await
            .map_err(storage_err)?;
        Ok(Self { conn })
    }
}

fn storage_err(err: impl std::fmt::Display) -> RetrievalError {
    RetrievalError::Storage(err.to_string())
}

fn row_to_chunk(row: &rusqlite::Row<'_>) -> rusqlite::Result<Chunk> {
    let section_raw: String = row.get("section_path")?;
    let section_path: Vec<String> = serde_json::from_str(&section_raw).unwrap_or_default();
    let page_start: Option<u32> = row.get("page_start")?;
    let page_end: Option<u32> = row.get("page_end")?;
    let page_range = match (page_start, page_end) {
        (Some(start), Some(end)) => Some(PageRange::new(start, end)),
        _ => None,
    };
    Ok(Chunk {
        chunk_id: ChunkId::from(row.get::<_, String>("chunk_id")?),
        document_id: row.get("document_id")?,
        content_hash: ContentHash::from(row.get::<_, String>("content_hash")?),
        text: row.get("text")?,
        contextualized_text: row.get("contextualized_text")?,
        section_path: SectionPath(section_path),
        page_range,
        embedding_id: row.get("embedding_id")?,
        token_count: row.get::<_, i64>("token_count")? as usize,
    })
}

fn insert_chunk(conn: &rusqlite::Connection, chunk: &Chunk) -> rusqlite::Result<()> {
    let section_json =
        serde_json::to_string(&chunk.section_path.0).unwrap_or_else(|_| "[]".to_string());
    conn.execute(
        "INSERT OR REPLACE INTO chunks \
         (chunk_id, document_id, content_hash, text, contextualized_text, \
          section_path, page_start, page_end, embedding_id, token_count) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            chunk.chunk_id.as_str(),
            chunk.document_id,
            chunk.content_hash.as_str(),
            chunk.text,
            chunk.contextualized_text,
            section_json,
            chunk.page_range.map(|p| p.start),
            chunk.page_range.map(|p| p.end),
            chunk.embedding_id,
            chunk.token_count as i64,
        ],
    )?;
    Ok(())
}

#[async_trait]
impl ChunkStore for SqliteChunkStore {
    async fn put(&self, chunk: Chunk) -> Result<(), RetrievalError> {
        chunk.validate()?;
        self.conn
            .call(move |conn| insert_chunk(conn, &chunk))
            .await
            .map_err(storage_err)
    }

    async fn get(&self, chunk_id: &ChunkId) -> Result<Chunk, RetrievalError> {
        let id = chunk_id.as_str().to_string();
        let found = self
            .conn
            .call(move |conn| {
                conn.query_row(
                    "SELECT * FROM chunks WHERE chunk_id = ?1",
                    params![id],
                    row_to_chunk,
                )
                .optional()
            })
            .await
            .map_err(storage_err)?;
        found.ok_or_else(|| RetrievalError::NotFound(format!("chunk '{chunk_id}'")))
    }

    async fn get_by_document(&self, document_id: &str) -> Result<Vec<Chunk>, RetrievalError> {
        let document_id = document_id.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn
                    .prepare("SELECT * FROM chunks WHERE document_id = ?1 ORDER BY chunk_id")?;
                let rows = stmt.query_map(params![document_id], row_to_chunk)?;
                let mut chunks = Vec::new();
                for row in rows {
                    chunks.push(row?);
                }
                Ok::<_, rusqlite::Error>(chunks)
            })
            .await
            .map_err(storage_err)
    }

    async fn delete_by_document(&self, document_id: &str) -> Result<Vec<Chunk>, RetrievalError> {
        let document_id = document_id.to_string();
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let removed = {
                    let mut stmt = tx.prepare(
                        "SELECT * FROM chunks WHERE document_id = ?1 ORDER BY chunk_id",
                    )?;
                    let rows = stmt.query_map(params![document_id], row_to_chunk)?;
                    let mut chunks = Vec::new();
                    for row in rows {
                        chunks.push(row?);
                    }
                    chunks
                };
                tx.execute(
                    "DELETE FROM chunks WHERE document_id = ?1",
                    params![document_id],
                )?;
                tx.execute(
                    "DELETE FROM documents WHERE document_id = ?1",
                    params![document_id],
                )?;
                tx.commit()?;
                Ok::<_, rusqlite::Error>(removed)
            })
            .await
            .map_err(storage_err)
    }

    async fn replace_document(
        &self,
        record: DocumentRecord,
        chunks: Vec<Chunk>,
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
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "DELETE FROM chunks WHERE document_id = ?1",
                    params![record.document_id],
                )?;
                for chunk in &chunks {
                    insert_chunk(&tx, chunk)?;
                }
                tx.execute(
                    "INSERT OR REPLACE INTO documents \
                     (document_id, source_hash, last_ingested_at) VALUES (?1, ?2, ?3)",
                    params![
                        record.document_id,
                        record.source_hash.as_str(),
                        record.last_ingested_at.to_rfc3339(),
                    ],
                )?;
                tx.commit()?;
                Ok::<_, rusqlite::Error>(())
            })
            .await
            .map_err(storage_err)
    }

    async fn document(&self, document_id: &str) -> Result<Option<DocumentRecord>, RetrievalError> {
        let document_id = document_id.to_string();
        self.conn
            .call(move |conn| {
                conn.query_row(
                    "SELECT document_id, source_hash, last_ingested_at \
                     FROM documents WHERE document_id = ?1",
                    params![document_id],
                    |row| {
                        let raw_ts: String = row.get(2)?;
                        let last_ingested_at = chrono::DateTime::parse_from_rfc3339(&raw_ts)
                            .map(|ts| ts.with_timezone(&chrono::Utc))
                            .unwrap_or_else(|_| chrono::Utc::now());
                        Ok(DocumentRecord {
                            document_id: row.get(0)?,
                            source_hash: ContentHash::from(row.get::<_, String>(1)?),
                            last_ingested_at,
                        })
                    },
                )
                .optional()
            })
            .await
            .map_err(storage_err)
    }
}
