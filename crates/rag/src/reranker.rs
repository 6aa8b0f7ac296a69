//! Cross-Encoder Reranker (C4, §4.4): rescoring the top `topIn` fused hits
//! down to `topOut` via a pluggable `RerankerService`, with a bypass path
//! on failure and a disabled-passthrough path.
//!
//! Grounded on the teacher's `HybridRetriever::rerank` fallback-to-
//! `SimpleScorer` pattern (`voice-agent/backend/crates/rag/src/retriever.rs`):
//! a primary scoring call that degrades to a cheap deterministic substitute
//! rather than failing the request.

use std::time::Duration;

use ragquery_config::RerankerConfig;
use ragquery_core::{Error, FusedHit, RerankedHit, RerankerService, Result};
use tracing::warn;

/// Outcome of a rerank call, including whether the bypass path was taken
/// (`rerankerBypassed`, §4.4) — observable for audit/warnings.
pub struct RerankOutcome {
    pub hits: Vec<RerankedHit>,
    pub bypassed: bool,
}

/// Reranks `fused` hits per §4.4: disabled → pure passthrough; enabled →
/// call the reranker on the first `top_in`, degrade to passthrough on
/// failure if `fallback_on_error`, else propagate.
pub async fn rerank(
    reranker: Option<&dyn RerankerService>,
    config: &RerankerConfig,
    query: &str,
    mut fused: Vec<FusedHit>,
) -> Result<RerankOutcome> {
    fused.sort_by(FusedHit::cmp_rank);

    if !config.enabled || reranker.is_none() {
        return Ok(RerankOutcome {
            hits: passthrough(fused, config.top_out),
            bypassed: !config.enabled,
        });
    }
    let reranker = reranker.expect("checked above");

    let candidates: Vec<FusedHit> = fused.into_iter().take(config.top_in).collect();
    let pairs: Vec<(String, String)> = candidates
        .iter()
        .map(|hit| (hit.doc_id.clone(), hit.content.clone()))
        .collect();

    let call = reranker.rerank(query, &pairs);
    let scored = match tokio::time::timeout(Duration::from_millis(config.timeout_ms), call).await {
        Ok(Ok(scores)) if scores.len() == candidates.len() => scores,
        Ok(Ok(_)) => {
            return handle_failure(
                config,
                candidates,
                "reranker returned a different number of scores than candidates",
            );
        }
        Ok(Err(err)) => {
            return handle_failure(config, candidates, &err.to_string());
        }
        Err(_) => {
            return handle_failure(config, candidates, "reranker call timed out");
        }
    };

    let mut reranked: Vec<RerankedHit> = candidates
        .into_iter()
        .zip(scored)
        .map(|(hit, score)| RerankedHit::from_fused(hit, score, 0))
        .collect();
    reranked.sort_by(RerankedHit::cmp_rank);
    reranked.truncate(config.top_out);
    for (idx, hit) in reranked.iter_mut().enumerate() {
        hit.final_rank = idx + 1;
    }

    Ok(RerankOutcome {
        hits: reranked,
        bypassed: false,
    })
}

fn handle_failure(
    config: &RerankerConfig,
    candidates: Vec<FusedHit>,
    message: &str,
) -> Result<RerankOutcome> {
    if config.fallback_on_error {
        warn!(error = message, "reranker failed, falling back to fusion order");
        Ok(RerankOutcome {
            hits: passthrough(candidates, config.top_out),
            bypassed: true,
        })
    } else {
        Err(Error::Reranker(message.to_string()))
    }
}

fn passthrough(mut fused: Vec<FusedHit>, top_out: usize) -> Vec<RerankedHit> {
    fused.sort_by(FusedHit::cmp_rank);
    fused
        .into_iter()
        .take(top_out)
        .enumerate()
        .map(|(idx, hit)| {
            let fusion_score = hit.fusion_score;
            RerankedHit::from_fused(hit, fusion_score, idx + 1)
        })
        .collect()
}
