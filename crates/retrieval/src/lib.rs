//! Retrieval Fan-Out (C2) and RRF Fusion (C3): concurrent dense + lexical
//! search under an ACL filter, merged by reciprocal-rank fusion.

pub mod classify;
pub mod fanout;
pub mod fusion;

pub use classify::{classify_query, AdaptiveWeights, QueryIntent};
pub use fanout::{fan_out, BackendOutcome, FanOutBackends, FanOutResult};
pub use fusion::{fuse, RRF_K};

use std::time::Duration;

use ragquery_config::TenantConfig;
use ragquery_core::{FusedHit, Result, UserContext};

/// Runs C2 then C3 back to back for one query: fan out to both backends,
/// then fuse the results with query-adaptive (or configured) weights.
pub async fn retrieve_and_fuse(
    backends: &FanOutBackends,
    query: &str,
    user_context: &UserContext,
    config: &TenantConfig,
    collection: &str,
) -> Result<Vec<FusedHit>> {
    let (vector_weight, lexical_weight, k_base) = if config.retrieval.query_adaptive_weights {
        let weights = classify_query(query).weights();
        (weights.vector_weight, weights.lexical_weight, weights.k_base)
    } else {
        (
            config.retrieval.vector_weight,
            config.retrieval.lexical_weight,
            config.retrieval.k_base,
        )
    };

    let result = fan_out(
        backends,
        query,
        user_context,
        k_base,
        collection,
        None,
        Duration::from_millis(config.retrieval.vector_timeout_ms),
        Duration::from_millis(config.retrieval.lexical_timeout_ms),
    )
    .await?;

    Ok(fuse(
        &result.vector.hits,
        &result.lexical.hits,
        vector_weight,
        lexical_weight,
    ))
}
