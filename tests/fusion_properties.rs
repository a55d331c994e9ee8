//! Property tests for Reciprocal Rank Fusion.
//!
//! RRF is defined purely over rank positions, so rescaling either index's raw
//! scores (cosine vs BM25, normalized or not) must never change the fused
//! output. These properties pin that down over arbitrary ranked lists.

use proptest::prelude::*;

use ragweld::config::FusionConfig;
use ragweld::fusion::fuse_ranked_lists;
use ragweld::store::ChunkId;

fn ranked_ids() -> impl Strategy<Value = Vec<String>> {
    proptest::collection::btree_set("[a-z]{1,6}", 0..8)
        .prop_map(|ids| ids.into_iter().collect::<Vec<_>>())
        .prop_shuffle()
}

/// Descending scores over `ids`, scaled by an arbitrary positive factor.
fn with_scores(ids: &[String], scale: f32) -> Vec<(ChunkId, f32)> {
    ids.iter()
        .enumerate()
        .map(|(i, id)| (ChunkId::from(id.as_str()), scale * (ids.len() - i) as f32))
        .collect()
}

proptest! {
    #[test]
    fn score_magnitudes_never_change_the_fused_output(
        vector_ids in ranked_ids(),
        lexical_ids in ranked_ids(),
        scale in 0.001f32..1000.0,
    ) {
        let config = FusionConfig::default();
        let base = fuse_ranked_lists(
            &with_scores(&vector_ids, 1.0),
            &with_scores(&lexical_ids, 1.0),
            &config,
            16,
        );
        let rescaled = fuse_ranked_lists(
            &with_scores(&vector_ids, scale),
            &with_scores(&lexical_ids, scale),
            &config,
            16,
        );
        prop_assert_eq!(base, rescaled);
    }

    #[test]
    fn fusion_is_deterministic(
        vector_ids in ranked_ids(),
        lexical_ids in ranked_ids(),
    ) {
        let config = FusionConfig::default();
        let once = fuse_ranked_lists(
            &with_scores(&vector_ids, 1.0),
            &with_scores(&lexical_ids, 1.0),
            &config,
            16,
        );
        let twice = fuse_ranked_lists(
            &with_scores(&vector_ids, 1.0),
            &with_scores(&lexical_ids, 1.0),
            &config,
            16,
        );
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn output_covers_the_union_sorted_and_truncated(
        vector_ids in ranked_ids(),
        lexical_ids in ranked_ids(),
        top_n in 0usize..12,
    ) {
        let config = FusionConfig::default();
        let fused = fuse_ranked_lists(
            &with_scores(&vector_ids, 1.0),
            &with_scores(&lexical_ids, 1.0),
            &config,
            top_n,
        );

        let union: std::collections::BTreeSet<&str> = vector_ids
            .iter()
            .chain(&lexical_ids)
            .map(String::as_str)
            .collect();
        prop_assert_eq!(fused.len(), union.len().min(top_n));

        for result in &fused {
            prop_assert!(union.contains(result.chunk_id.as_str()));
            prop_assert!(result.fused_score > 0.0);
            prop_assert!(result.vector_rank.is_some() || result.lexical_rank.is_some());
        }
        for pair in fused.windows(2) {
            prop_assert!(pair[0].fused_score >= pair[1].fused_score);
        }
    }

    #[test]
    fn top_rank_in_both_lists_always_wins(
        mut vector_ids in ranked_ids(),
        mut lexical_ids in ranked_ids(),
    ) {
        vector_ids.retain(|id| id != "winner");
        lexical_ids.retain(|id| id != "winner");
        vector_ids.insert(0, "winner".to_string());
        lexical_ids.insert(0, "winner".to_string());

        let fused = fuse_ranked_lists(
            &with_scores(&vector_ids, 1.0),
            &with_scores(&lexical_ids, 1.0),
            &FusionConfig::default(),
            16,
        );
        prop_assert_eq!(fused[0].chunk_id.as_str(), "winner");
    }
}
