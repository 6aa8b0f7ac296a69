//! Retrieval Fan-Out (C2, §4.2): concurrent dense + lexical search under an
//! ACL filter, tolerant of a single backend failure.
//!
//! Grounded on `HybridRetriever::search` in the teacher's
//! `voice-agent/backend/crates/rag/src/retriever.rs`: `tokio::join!` runs
//! both backend calls concurrently, each wrapped so a failure on one side
//! doesn't abort the other.

use std::sync::Arc;
use std::time::Duration;

use ragquery_core::{Error, RetrievalBackendKind, RetrievalHit, Result, SearchFilter, UserContext};
use tracing::warn;

/// Backends a fan-out call talks to. Kept as a small struct (rather than a
/// trait object pair threaded through every call site) so callers can swap
/// implementations per tenant without touching the fan-out logic itself.
pub struct FanOutBackends {
    pub vector: Arc<dyn ragquery_core::VectorStore>,
    pub lexical: Arc<dyn ragquery_core::LexicalIndex>,
    pub embedder: Arc<dyn ragquery_core::EmbeddingService>,
}

/// One side of a fan-out call's outcome: hits plus whether this backend
/// failed and fell back to empty.
#[derive(Debug, Clone)]
pub struct BackendOutcome {
    pub hits: Vec<RetrievalHit>,
    pub failed: bool,
}

#[derive(Debug, Clone)]
pub struct FanOutResult {
    pub vector: BackendOutcome,
    pub lexical: BackendOutcome,
}

impl FanOutResult {
    /// True if exactly one backend failed — the caller should record a
    /// warning but continue (§4.2).
    pub fn degraded(&self) -> bool {
        self.vector.failed != self.lexical.failed && (self.vector.failed || self.lexical.failed)
    }
}

/// Issues dense vector search and lexical search concurrently under an ACL
/// filter built from `user_context` (§4.2).
///
/// Returns `Unauthorized` without making any backend call if `user_context`
/// is not well-formed. Returns `RetrievalBackend{which: Both}` only if both
/// backends fail; a single-backend failure degrades gracefully.
pub async fn fan_out(
    backends: &FanOutBackends,
    query: &str,
    user_context: &UserContext,
    k: usize,
    collection: &str,
    caller_filter: Option<ragquery_core::FilterPredicate>,
    vector_timeout: Duration,
    lexical_timeout: Duration,
) -> Result<FanOutResult> {
    if !user_context.is_well_formed() {
        return Err(Error::Unauthorized(
            "userContext is missing userId or tenantId".to_string(),
        ));
    }

    let mut filter = SearchFilter::new(
        user_context.tenant_id.to_string(),
        user_context.principals().into_iter().collect(),
    );
    if let Some(predicate) = caller_filter {
        filter = filter.with_predicate(predicate);
    }

    let vector_future = run_vector(backends, collection, query, &filter, k, vector_timeout);
    let lexical_future = run_lexical(backends, query, &filter, k, lexical_timeout);

    let (vector, lexical) = tokio::join!(vector_future, lexical_future);

    if vector.failed && lexical.failed {
        return Err(Error::RetrievalBackend {
            which: RetrievalBackendKind::Both,
            message: "both vector and lexical backends failed or timed out".to_string(),
        });
    }
    if vector.failed {
        warn!("vector backend failed or timed out; continuing with lexical hits only");
    }
    if lexical.failed {
        warn!("lexical backend failed or timed out; continuing with vector hits only");
    }

    Ok(FanOutResult { vector, lexical })
}

async fn run_vector(
    backends: &FanOutBackends,
    collection: &str,
    query: &str,
    filter: &SearchFilter,
    k: usize,
    timeout: Duration,
) -> BackendOutcome {
    let call = async {
        let embedding = backends.embedder.embed(query).await?;
        backends
            .vector
            .search_vectors(collection, Some(embedding), filter, k)
            .await
    };

    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(hits)) => BackendOutcome {
            hits,
            failed: false,
        },
        Ok(Err(err)) => {
            warn!(error = %err, "vector backend call failed");
            BackendOutcome {
                hits: Vec::new(),
                failed: true,
            }
        }
        Err(_) => BackendOutcome {
            hits: Vec::new(),
            failed: true,
        },
    }
}

async fn run_lexical(
    backends: &FanOutBackends,
    query: &str,
    filter: &SearchFilter,
    k: usize,
    timeout: Duration,
) -> BackendOutcome {
    let call = backends.lexical.search_text(query, filter, k);

    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(hits)) => BackendOutcome {
            hits,
            failed: false,
        },
        Ok(Err(err)) => {
            warn!(error = %err, "lexical backend call failed");
            BackendOutcome {
                hits: Vec::new(),
                failed: true,
            }
        }
        Err(_) => BackendOutcome {
            hits: Vec::new(),
            failed: true,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ragquery_core::DocumentPayload;

    struct OkVector;
    #[async_trait]
    impl ragquery_core::VectorStore for OkVector {
        async fn search_vectors(
            &self,
            _collection: &str,
            _embedding: Option<Vec<f32>>,
            _filter: &SearchFilter,
            _limit: usize,
        ) -> Result<Vec<RetrievalHit>> {
            Ok(vec![RetrievalHit {
                doc_id: "d1".into(),
                internal_id: "i1".into(),
                score: 0.9,
                rank: 1,
                payload: DocumentPayload::new("d1", "t1".into()),
                content: "hello".into(),
            }])
        }
    }

    struct FailingLexical;
    #[async_trait]
    impl ragquery_core::LexicalIndex for FailingLexical {
        async fn search_text(
            &self,
            _query: &str,
            _filter: &SearchFilter,
            _limit: usize,
        ) -> Result<Vec<RetrievalHit>> {
            Err(Error::RetrievalBackend {
                which: RetrievalBackendKind::Lexical,
                message: "boom".into(),
            })
        }
    }

    struct StubEmbedder;
    #[async_trait]
    impl ragquery_core::EmbeddingService for StubEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![0.1, 0.2])
        }
    }

    fn backends() -> FanOutBackends {
        FanOutBackends {
            vector: Arc::new(OkVector),
            lexical: Arc::new(FailingLexical),
            embedder: Arc::new(StubEmbedder),
        }
    }

    #[tokio::test]
    async fn unauthorized_when_user_context_malformed() {
        let ctx = UserContext::new("", "t1");
        let result = fan_out(
            &backends(),
            "q",
            &ctx,
            10,
            "docs",
            None,
            Duration::from_millis(100),
            Duration::from_millis(100),
        )
        .await;
        assert!(matches!(result, Err(Error::Unauthorized(_))));
    }

    #[tokio::test]
    async fn single_backend_failure_degrades_not_fails() {
        let ctx = UserContext::new("u1", "t1").with_groups(Vec::new());
        let result = fan_out(
            &backends(),
            "q",
            &ctx,
            10,
            "docs",
            None,
            Duration::from_millis(200),
            Duration::from_millis(200),
        )
        .await
        .expect("single backend failure should not be fatal");
        assert!(result.degraded());
        assert_eq!(result.vector.hits.len(), 1);
        assert!(result.lexical.hits.is_empty());
    }
}
