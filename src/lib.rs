//! # ragweld
//!
//! A hybrid retrieval engine: documents are converted, chunked, embedded, and
//! indexed twice (dense vectors + lexical terms); queries hit both indexes and
//! the rankings are welded together with Reciprocal Rank Fusion.
//!
//! ```text
//!                     ┌────────────────────────────────────────┐
//!   raw document ───► │            IngestionPipeline           │
//!                     │  convert → dedup → embed → commit      │
//!                     └──────┬───────────────┬──────────┬──────┘
//!                            ▼               ▼          ▼
//!                      VectorIndex     LexicalIndex  ChunkStore
//!                            ▲               ▲          ▲
//!                            └──────┬────────┘          │
//!                     ┌─────────────────────────┐       │
//!   query text ─────► │    QueryOrchestrator    │ ──────┘
//!                     │  embed → RRF → hydrate  │ ───► cited chunks
//!                     └─────────────────────────┘
//! ```
//!
//! ## Module map
//!
//! * [`types`] — error taxonomy and content hashing.
//! * [`store`] — canonical chunk records and the [`store::ChunkStore`]
//!   contract, with in-memory and SQLite backends.
//! * [`providers`] — collaborator traits (converter, embedder, both indexes)
//!   plus deterministic in-process implementations.
//! * [`ingest`] — the write path: change detection, embedding reuse, the
//!   atomic two-index commit, and the job registry.
//! * [`fusion`] — Reciprocal Rank Fusion over the two ranked lists.
//! * [`query`] — the read path, from query text to cited chunks.
//! * [`config`] — tunables with `RAGWELD_*` environment overrides.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use ragweld::config::{FusionConfig, IngestionConfig};
//! use ragweld::fusion::FusionEngine;
//! use ragweld::ingest::IngestionPipeline;
//! use ragweld::providers::{
//!     MemoryLexicalIndex, MemoryVectorIndex, MockConverter, MockEmbeddingProvider,
//! };
//! use ragweld::query::QueryOrchestrator;
//! use ragweld::store::MemoryChunkStore;
//!
//! # async fn run() -> Result<(), ragweld::types::RetrievalError> {
//! let store = Arc::new(MemoryChunkStore::new());
//! let vector = Arc::new(MemoryVectorIndex::new());
//! let lexical = Arc::new(MemoryLexicalIndex::new());
//! let embedder = Arc::new(MockEmbeddingProvider::new());
//!
//! let pipeline = IngestionPipeline::new(
//!     store.clone(),
//!     Arc::new(MockConverter::new()),
//!     embedder.clone(),
//!     vector.clone(),
//!     lexical.clone(),
//!     IngestionConfig::default(),
//! );
//! pipeline.ingest("guide", b"# Fusion\n\nRRF welds two rankings.").await?;
//!
//! let fusion = FusionEngine::new(vector, lexical, FusionConfig::default());
//! let orchestrator = QueryOrchestrator::new(store, embedder, fusion);
//! for cited in orchestrator.answer_context("how does fusion work", 5).await? {
//!     println!("{}  {}", cited.citation(), cited.text);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod fusion;
pub mod ingest;
pub mod providers;
pub mod query;
pub mod store;
pub mod types;

pub use config::{FusionConfig, IngestionConfig, RetrievalConfig};
pub use fusion::{FusionEngine, RankedResult};
pub use ingest::{IngestReport, IngestStatus, IngestionPipeline, IngestionRegistry};
pub use query::{CitedChunk, QueryOrchestrator};
pub use store::{Chunk, ChunkId, ChunkStore, DocumentRecord, MemoryChunkStore, SqliteChunkStore};
pub use types::{ContentHash, RetrievalError};
