//! Reciprocal Rank Fusion over the vector and lexical indexes.
//!
//! For each chunk appearing in either ranked list, the fused score is
//!
//! ```text
//! fused(c) = w_vec * 1/(k + rank_vec(c)) + w_lex * 1/(k + rank_lex(c))
//! ```
//!
//! with 1-based ranks and a contribution of zero from any list the chunk is
//! absent from. RRF depends only on rank positions, so the two indexes never
//! need their scores normalized against each other — cosine similarities and
//! BM25-style relevance fuse cleanly.
//!
//! Ordering is fully deterministic: fused score descending, then the smaller
//! sum of present ranks, then `chunk_id` ascending.

use std::cmp::Ordering;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::FusionConfig;
use crate::providers::{LexicalIndex, VectorIndex};
use crate::store::ChunkId;
use crate::types::RetrievalError;

/// Query-time fusion outcome for one chunk. Ephemeral, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedResult {
    pub chunk_id: ChunkId,
    /// 1-based position in the vector result list, if present.
    pub vector_rank: Option<usize>,
    /// 1-based position in the lexical result list, if present.
    pub lexical_rank: Option<usize>,
    pub fused_score: f64,
}

impl RankedResult {
    /// Sum of the ranks the chunk actually holds; the first tie-break key.
    fn rank_sum(&self) -> usize {
        self.vector_rank.unwrap_or(0) + self.lexical_rank.unwrap_or(0)
    }
}

/// Fuses vector and lexical search results into a single ranking.
pub struct FusionEngine {
    vector: Arc<dyn VectorIndex>,
    lexical: Arc<dyn LexicalIndex>,
    config: FusionConfig,
}

impl FusionEngine {
    pub fn new(
        vector: Arc<dyn VectorIndex>,
        lexical: Arc<dyn LexicalIndex>,
        config: FusionConfig,
    ) -> Self {
        FusionEngine {
            vector,
            lexical,
            config,
        }
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    /// Queries both indexes concurrently and fuses their rankings.
    ///
    /// If either index fails the whole call fails, unless
    /// [`FusionConfig::allow_degraded`] is set, in which case the surviving
    /// list is fused alone. An empty list from one side is not a failure; it
    /// simply contributes nothing.
    pub async fn fuse(
        &self,
        query_text: &str,
        query_embedding: &[f32],
        top_n: usize,
    ) -> Result<Vec<RankedResult>, RetrievalError> {
        let (vector_hits, lexical_hits) = tokio::join!(
            self.vector.search(query_embedding, self.config.vector_k),
            self.lexical.search(query_text, self.config.lexical_k),
        );

        let (vector_hits, lexical_hits) = match (vector_hits, lexical_hits) {
            (Ok(v), Ok(l)) => (v, l),
            (Err(err), Ok(l)) if self.config.allow_degraded => {
                warn!(error = %err, "vector index unreachable, degrading to lexical-only");
                (Vec::new(), l)
            }
            (Ok(v), Err(err)) if self.config.allow_degraded => {
                warn!(error = %err, "lexical index unreachable, degrading to vector-only");
                (v, Vec::new())
            }
            (Err(err), _) | (_, Err(err)) => return Err(err),
        };

        debug!(
            vector_hits = vector_hits.len(),
            lexical_hits = lexical_hits.len(),
            "fusing ranked lists"
        );
        Ok(fuse_ranked_lists(
            &vector_hits,
            &lexical_hits,
            &self.config,
            top_n,
        ))
    }
}

/// Pure RRF over two already-ranked lists. Exposed for parity testing.
pub fn fuse_ranked_lists(
    vector_hits: &[(ChunkId, f32)],
    lexical_hits: &[(ChunkId, f32)],
    config: &FusionConfig,
    top_n: usize,
) -> Vec<RankedResult> {
    let mut candidates: FxHashMap<ChunkId, RankedResult> = FxHashMap::default();

    for (position, (chunk_id, _score)) in vector_hits.iter().enumerate() {
        let rank = position + 1;
        let entry = candidates
            .entry(chunk_id.clone())
            .or_insert_with(|| RankedResult {
                chunk_id: chunk_id.clone(),
                vector_rank: None,
                lexical_rank: None,
                fused_score: 0.0,
            });
        entry.vector_rank = Some(rank);
        entry.fused_score += config.vector_weight / (config.k + rank as f64);
    }

    for (position, (chunk_id, _score)) in lexical_hits.iter().enumerate() {
        let rank = position + 1;
        let entry = candidates
            .entry(chunk_id.clone())
            .or_insert_with(|| RankedResult {
                chunk_id: chunk_id.clone(),
                vector_rank: None,
                lexical_rank: None,
                fused_score: 0.0,
            });
        entry.lexical_rank = Some(rank);
        entry.fused_score += config.lexical_weight / (config.k + rank as f64);
    }

    let mut fused: Vec<RankedResult> = candidates.into_values().collect();
    fused.sort_by(|a, b| {
        b.fused_score
            .partial_cmp(&a.fused_score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.rank_sum().cmp(&b.rank_sum()))
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    fused.truncate(top_n);
    fused
}
