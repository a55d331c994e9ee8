//! Ingest a couple of documents and run hybrid queries against them.
//!
//! ```bash
//! cargo run --example quickstart
//! ```

use std::sync::Arc;

use tracing_subscriber::FmtSubscriber;

use ragweld::config::{FusionConfig, IngestionConfig};
use ragweld::fusion::FusionEngine;
use ragweld::ingest::IngestionPipeline;
use ragweld::providers::{
    MemoryLexicalIndex, MemoryVectorIndex, MockConverter, MockEmbeddingProvider,
};
use ragweld::query::QueryOrchestrator;
use ragweld::store::MemoryChunkStore;
use ragweld::types::RetrievalError;

const FUSION_NOTES: &[u8] = b"# Reciprocal Rank Fusion

RRF combines two ranked lists using 1/(k + rank) contributions, so cosine
similarities and lexical relevance fuse without score normalization.

# Tie-breaking

Ties are broken by the smaller combined rank sum, then by chunk id, which
keeps every query deterministic.";

const INGESTION_NOTES: &[u8] = b"# Change detection

Identical bytes short-circuit on the source hash; unchanged chunk text reuses
its cached embedding by content hash.

# Atomicity

Each document commits as one unit across the chunk store and both indexes,
and a failed commit rolls the document back to its prior state.";

#[tokio::main]
async fn main() -> Result<(), RetrievalError> {
    init_tracing();

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

    let results = pipeline
        .ingest_all(vec![
            ("fusion-notes".to_string(), FUSION_NOTES.to_vec()),
            ("ingestion-notes".to_string(), INGESTION_NOTES.to_vec()),
        ])
        .await;
    for (document_id, outcome) in results {
        let report = outcome?;
        println!(
            "{document_id}: {:?}, {} chunks ({} embedded, {} reused)",
            report.status, report.chunk_count, report.embedded_chunks, report.reused_embeddings
        );
    }

    // Re-ingesting identical bytes is a no-op.
    let again = pipeline.ingest("fusion-notes", FUSION_NOTES).await?;
    println!("fusion-notes again: {:?}", again.status);

    let fusion = FusionEngine::new(vector, lexical, FusionConfig::default());
    let orchestrator = QueryOrchestrator::new(store, embedder, fusion);

    for query in ["how are ties broken", "when are embeddings reused"] {
        println!("\nquery: {query}");
        for cited in orchestrator.answer_context(query, 3).await? {
            println!("  {:.5}  {}", cited.fused_score, cited.citation());
        }
    }

    Ok(())
}

fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let subscriber = FmtSubscriber::builder().with_env_filter("info").finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}
