//! RRF Fusion (C3, §4.3): merges per-backend ranked lists into `FusedHit`s
//! by reciprocal-rank fusion, `weight / (rrfK + rank)`, rrfK = 60.
//!
//! Grounded on `HybridRetriever::rrf_fusion` in the teacher's
//! `voice-agent/backend/crates/rag/src/retriever.rs`, generalized from a
//! single dense/sparse weight pair to arbitrary per-backend weights and
//! from a `HashMap`-only merge to the documented tie-break ordering.

use std::collections::HashMap;

use ragquery_core::{Backend, FusedHit, RetrievalHit};

pub const RRF_K: f64 = 60.0;

struct Accumulator {
    fusion_score: f64,
    contributing_backends: std::collections::HashSet<Backend>,
    rank_sum: usize,
    payload: ragquery_core::DocumentPayload,
    content: String,
}

/// Fuses `vector_hits` and `lexical_hits` into one `FusedHit` per distinct
/// `docId`, contributing `weight / (rrfK + rank)` per backend hit and
/// summing across backends (§4.3).
pub fn fuse(
    vector_hits: &[RetrievalHit],
    lexical_hits: &[RetrievalHit],
    vector_weight: f64,
    lexical_weight: f64,
) -> Vec<FusedHit> {
    let mut acc: HashMap<String, Accumulator> = HashMap::new();

    accumulate(&mut acc, vector_hits, vector_weight, Backend::Vector);
    accumulate(&mut acc, lexical_hits, lexical_weight, Backend::Lexical);

    let rank_sums: HashMap<String, usize> = acc
        .iter()
        .map(|(doc_id, entry)| (doc_id.clone(), entry.rank_sum))
        .collect();

    let mut fused: Vec<FusedHit> = acc
        .into_iter()
        .map(|(doc_id, entry)| FusedHit {
            doc_id,
            fusion_score: entry.fusion_score,
            contributing_backends: entry.contributing_backends,
            payload: entry.payload,
            content: entry.content,
        })
        .collect();

    // Primary ordering matches FusedHit::cmp_rank (fusion_score desc, then
    // backend coverage, then docId). The additional "better backend-local
    // rank sum" tie-break (§4.3) is applied here, before the docId
    // fallback, since cmp_rank doesn't know about rank sums.
    fused.sort_by(|a, b| {
        b.fusion_score
            .partial_cmp(&a.fusion_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                b.contributing_backends
                    .len()
                    .cmp(&a.contributing_backends.len())
            })
            .then_with(|| {
                let sum_a = rank_sums.get(&a.doc_id).copied().unwrap_or(usize::MAX);
                let sum_b = rank_sums.get(&b.doc_id).copied().unwrap_or(usize::MAX);
                sum_a.cmp(&sum_b)
            })
            .then_with(|| a.doc_id.cmp(&b.doc_id))
    });

    fused
}

fn accumulate(
    acc: &mut HashMap<String, Accumulator>,
    hits: &[RetrievalHit],
    weight: f64,
    backend: Backend,
) {
    for (idx, hit) in hits.iter().enumerate() {
        let rank = idx + 1;
        let contribution = weight / (RRF_K + rank as f64);

        acc.entry(hit.doc_id.clone())
            .and_modify(|entry| {
                entry.fusion_score += contribution;
                entry.contributing_backends.insert(backend);
                entry.rank_sum += rank;
            })
            .or_insert_with(|| Accumulator {
                fusion_score: contribution,
                contributing_backends: std::collections::HashSet::from([backend]),
                rank_sum: rank,
                payload: hit.payload.clone(),
                content: hit.content.clone(),
            });
    }
}
