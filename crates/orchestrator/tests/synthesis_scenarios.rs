//! End-to-end fixtures S1-S6: one `Orchestrator`, wired to lightweight
//! in-process fakes instead of real backends, per fixture. Each test seeds
//! exactly the corpus/config/query the fixture names and asserts its
//! literal expectation.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ragquery_config::{StaticConfigSource, TenantConfigResolver};
use ragquery_core::{
    AuditEntry, AuditSink, CharRatioCounter, DocumentPayload, EmbeddingService, Error,
    GuardrailDecision, LexicalIndex, Query, ReasonCode, Result, RetrievalHit, RerankerService,
    ScoreStats, SearchFilter, UserContext, VectorStore,
};
use ragquery_llm::{Completion, CompletionRequest, LlmBackend, RawStreamItem};
use ragquery_orchestrator::Orchestrator;
use ragquery_retrieval::FanOutBackends;
use tokio::sync::mpsc;

/// A fixed corpus searched by both the dense and lexical fakes. ACL
/// enforcement happens here, mirroring how a real backend would apply the
/// tenant+principal filter the fan-out constructs (§4.2: the fan-out never
/// enforces ACL itself, only builds the filter).
#[derive(Clone)]
struct FixedCorpus {
    docs: Vec<(DocumentPayload, String)>,
}

impl FixedCorpus {
    fn new(docs: Vec<(DocumentPayload, String)>) -> Self {
        Self { docs }
    }

    fn visible(&self, filter: &SearchFilter, limit: usize) -> Vec<RetrievalHit> {
        let principals: HashSet<&str> = filter.acl_principals.iter().map(String::as_str).collect();
        self.docs
            .iter()
            .filter(|(payload, _)| {
                filter.tenant_id.as_deref() == Some(payload.tenant_id.0.as_str())
                    && payload.acl.iter().any(|p| principals.contains(p.as_str()))
            })
            .take(limit)
            .enumerate()
            .map(|(idx, (payload, content))| RetrievalHit {
                doc_id: payload.doc_id.clone(),
                internal_id: format!("internal-{}", payload.doc_id),
                score: 0.9 - (idx as f64 * 0.05),
                rank: idx + 1,
                payload: payload.clone(),
                content: content.clone(),
            })
            .collect()
    }
}

struct FakeVectorStore(FixedCorpus);
#[async_trait]
impl VectorStore for FakeVectorStore {
    async fn search_vectors(
        &self,
        _collection: &str,
        _embedding: Option<Vec<f32>>,
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<RetrievalHit>> {
        Ok(self.0.visible(filter, limit))
    }
}

struct FakeLexicalIndex(FixedCorpus);
#[async_trait]
impl LexicalIndex for FakeLexicalIndex {
    async fn search_text(
        &self,
        _query: &str,
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<RetrievalHit>> {
        Ok(self.0.visible(filter, limit))
    }
}

struct FakeEmbedder;
#[async_trait]
impl EmbeddingService for FakeEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(vec![0.1, 0.2, 0.3])
    }
}

fn backends(corpus: FixedCorpus) -> FanOutBackends {
    FanOutBackends {
        vector: Arc::new(FakeVectorStore(corpus.clone())),
        lexical: Arc::new(FakeLexicalIndex(corpus)),
        embedder: Arc::new(FakeEmbedder),
    }
}

/// Passthrough reranker: preserves fusion order by scoring candidates in
/// the order received, highest first.
struct PassthroughReranker;
#[async_trait]
impl RerankerService for PassthroughReranker {
    async fn rerank(&self, _query: &str, candidates: &[(String, String)]) -> Result<Vec<f64>> {
        let n = candidates.len();
        Ok((0..n).map(|i| (n - i) as f64).collect())
    }
}

/// Always fails — used to exercise the bypass-on-error path (S3).
struct FailingReranker;
#[async_trait]
impl RerankerService for FailingReranker {
    async fn rerank(&self, _query: &str, _candidates: &[(String, String)]) -> Result<Vec<f64>> {
        Err(Error::Reranker("reranker service returned HTTP 500".to_string()))
    }
}

/// Canned, non-streaming completion plus a call counter so tests can assert
/// the guardrail IDK path never reaches the LLM (S2, S5).
struct CannedBackend {
    text: String,
    calls: AtomicUsize,
}

impl CannedBackend {
    fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl LlmBackend for CannedBackend {
    fn provider_name(&self) -> String {
        "canned".to_string()
    }

    async fn complete(&self, _request: &CompletionRequest) -> Result<Completion> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Completion {
            text: self.text.clone(),
            tokens_used: 42,
            model: "canned-model".to_string(),
        })
    }

    async fn complete_streaming(
        &self,
        _request: &CompletionRequest,
    ) -> Result<mpsc::Receiver<RawStreamItem>> {
        let (tx, rx) = mpsc::channel(8);
        let text = self.text.clone();
        tokio::spawn(async move {
            let _ = tx.send(RawStreamItem::Delta(text)).await;
            let _ = tx
                .send(RawStreamItem::Usage {
                    usage: serde_json::json!({"total_tokens": 42}),
                    finish_reason: "stop".to_string(),
                })
                .await;
        });
        Ok(rx)
    }
}

/// A streaming-only backend that drips several chunks with a short delay
/// between each, so a cancellation issued after the first chunk has a real
/// race to win against the rest of the stream (S6).
struct DrippingBackend {
    chunks: Vec<&'static str>,
}

#[async_trait]
impl LlmBackend for DrippingBackend {
    fn provider_name(&self) -> String {
        "dripping".to_string()
    }

    async fn complete(&self, _request: &CompletionRequest) -> Result<Completion> {
        Ok(Completion {
            text: self.chunks.concat(),
            tokens_used: 10,
            model: "dripping-model".to_string(),
        })
    }

    async fn complete_streaming(
        &self,
        _request: &CompletionRequest,
    ) -> Result<mpsc::Receiver<RawStreamItem>> {
        let (tx, rx) = mpsc::channel(1);
        let chunks = self.chunks.clone();
        tokio::spawn(async move {
            for chunk in chunks {
                if tx.send(RawStreamItem::Delta(chunk.to_string())).await.is_err() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(30)).await;
            }
            let _ = tx
                .send(RawStreamItem::Usage {
                    usage: serde_json::json!({"total_tokens": 10}),
                    finish_reason: "stop".to_string(),
                })
                .await;
        });
        Ok(rx)
    }
}

#[derive(Default)]
struct RecordingAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
}

#[async_trait]
impl AuditSink for RecordingAuditSink {
    async fn append(&self, entry: AuditEntry) {
        self.entries.lock().expect("audit mutex poisoned").push(entry);
    }
}

fn resolver() -> Arc<TenantConfigResolver> {
    Arc::new(TenantConfigResolver::new(Arc::new(StaticConfigSource::new())))
}

fn france_doc() -> (DocumentPayload, String) {
    let mut payload = DocumentPayload::new("d1", "t1".into());
    payload.acl = HashSet::from(["group:eu".to_string()]);
    (payload, "The capital of France is Paris.".to_string())
}

/// S1: happy path, markdown format.
#[tokio::test]
async fn s1_happy_path_markdown() {
    let corpus = FixedCorpus::new(vec![france_doc()]);
    let user = UserContext::new("u1", "t1").with_groups(vec!["group:eu".to_string()]);
    let query = Query::new("What is the capital of France?", user);

    let audit = Arc::new(RecordingAuditSink::default());
    let llm: Arc<dyn LlmBackend> = Arc::new(CannedBackend::new("Paris is the capital of France [1]."));

    let orchestrator = Orchestrator {
        retrieval_backends: backends(corpus),
        reranker: Some(Arc::new(PassthroughReranker)),
        llm_backends: vec![llm],
        audit: audit.clone(),
        token_counter: Arc::new(CharRatioCounter),
        config_resolver: resolver(),
        collection: "docs".to_string(),
    };

    let result = orchestrator.ask(query).await.expect("s1 should succeed");

    assert!(result.answer.contains("Paris"));
    assert!(result.answer.contains("[^1]"));
    assert!(result.answer.contains("## Sources"));
    let citation = result.citations.get(&1).expect("citation 1 must exist");
    assert_eq!(citation.doc_id, "d1");
}

/// S2: ACL filter excludes the only document; guardrail returns IDK with
/// `NO_RELEVANT_DOCS` and the LLM is never called.
#[tokio::test]
async fn s2_acl_filter_excludes_everything() {
    let corpus = FixedCorpus::new(vec![france_doc()]);
    let user = UserContext::new("u2", "t1").with_groups(vec!["group:us".to_string()]);
    let query = Query::new("What is the capital of France?", user);

    let llm = Arc::new(CannedBackend::new("should never be produced"));
    let orchestrator = Orchestrator {
        retrieval_backends: backends(corpus),
        reranker: Some(Arc::new(PassthroughReranker)),
        llm_backends: vec![llm.clone()],
        audit: Arc::new(RecordingAuditSink::default()),
        token_counter: Arc::new(CharRatioCounter),
        config_resolver: resolver(),
        collection: "docs".to_string(),
    };

    let result = orchestrator.ask(query).await.expect("guardrail path still returns Ok");

    assert_eq!(result.reason_code, Some(ReasonCode::NoRelevantDocs));
    assert!(result.citations.is_empty());
    assert_eq!(result.model_used, "guardrail");
    assert_eq!(llm.calls.load(Ordering::SeqCst), 0, "LLM must not be called on the IDK path");
}

/// S3: reranker returns an error; `fallbackOnError = true` bypasses it and
/// the pipeline completes with the fusion order preserved.
#[tokio::test]
async fn s3_reranker_bypass_on_failure() {
    let mut eu = HashSet::new();
    eu.insert("group:eu".to_string());
    let docs = vec![
        (
            {
                let mut p = DocumentPayload::new("d1", "t1".into());
                p.acl = eu.clone();
                p
            },
            "The capital of France is Paris.".to_string(),
        ),
        (
            {
                let mut p = DocumentPayload::new("d2", "t1".into());
                p.acl = eu;
                p
            },
            "Paris is also home to the Eiffel Tower.".to_string(),
        ),
    ];
    let corpus = FixedCorpus::new(docs);
    let user = UserContext::new("u1", "t1").with_groups(vec!["group:eu".to_string()]);
    let query = Query::new("What is the capital of France?", user);

    let audit = Arc::new(RecordingAuditSink::default());
    let llm: Arc<dyn LlmBackend> = Arc::new(CannedBackend::new("Paris [1][2]"));

    let orchestrator = Orchestrator {
        retrieval_backends: backends(corpus),
        reranker: Some(Arc::new(FailingReranker)),
        llm_backends: vec![llm],
        audit: audit.clone(),
        token_counter: Arc::new(CharRatioCounter),
        config_resolver: resolver(),
        collection: "docs".to_string(),
    };

    let result = orchestrator.ask(query).await.expect("bypass should still synthesize an answer");
    assert!(!result.answer.is_empty());

    let entries = audit.entries.lock().expect("audit mutex poisoned");
    let warned = entries
        .iter()
        .any(|e| e.warnings.iter().any(|w| w.contains("reranker bypassed")));
    assert!(warned, "audit entry must record the reranker bypass warning");
}

/// S4: a single oversized document is packed under a tiny budget; the
/// packer truncates with a visible ellipsis and still produces an answer.
#[tokio::test]
async fn s4_oversized_document_is_truncated() {
    let mut payload = DocumentPayload::new("d1", "t1".into());
    payload.acl = HashSet::from(["group:eu".to_string()]);
    let huge_content = "word ".repeat(20_000);
    let corpus = FixedCorpus::new(vec![(payload, huge_content)]);

    let user = UserContext::new("u1", "t1").with_groups(vec!["group:eu".to_string()]);
    let mut query = Query::new("Summarize this document.", user);
    query.max_context_tokens = Some(1_000);

    let llm: Arc<dyn LlmBackend> = Arc::new(CannedBackend::new("Here is a summary [1]."));

    let orchestrator = Orchestrator {
        retrieval_backends: backends(corpus),
        reranker: Some(Arc::new(PassthroughReranker)),
        llm_backends: vec![llm],
        audit: Arc::new(RecordingAuditSink::default()),
        token_counter: Arc::new(CharRatioCounter),
        config_resolver: resolver(),
        collection: "docs".to_string(),
    };

    let result = orchestrator.ask(query).await.expect("oversized doc should still synthesize");

    assert!(result.context_truncated);
    assert!(!result.answer.is_empty());
}

/// S5: a prior guardrail decision is trusted verbatim even though
/// retrieval has several high-scoring hits; no LLM call is made.
#[tokio::test]
async fn s5_prior_guardrail_decision_is_trusted() {
    let mut eu = HashSet::new();
    eu.insert("group:eu".to_string());
    let docs: Vec<(DocumentPayload, String)> = (1..=5)
        .map(|i| {
            let mut p = DocumentPayload::new(format!("d{i}"), "t1".into());
            p.acl = eu.clone();
            (p, format!("High scoring content {i}."))
        })
        .collect();
    let corpus = FixedCorpus::new(docs);

    let user = UserContext::new("u1", "t1").with_groups(vec!["group:eu".to_string()]);
    let mut query = Query::new("What does the corpus say?", user);
    query.prior_guardrail_decision = Some(GuardrailDecision {
        is_answerable: false,
        confidence: 0.1,
        score_stats: ScoreStats::empty(),
        reason_code: Some(ReasonCode::LowConfidence),
        rationale: "precomputed upstream".to_string(),
    });

    let llm = Arc::new(CannedBackend::new("should never be produced"));
    let orchestrator = Orchestrator {
        retrieval_backends: backends(corpus),
        reranker: Some(Arc::new(PassthroughReranker)),
        llm_backends: vec![llm.clone()],
        audit: Arc::new(RecordingAuditSink::default()),
        token_counter: Arc::new(CharRatioCounter),
        config_resolver: resolver(),
        collection: "docs".to_string(),
    };

    let result = orchestrator.ask(query).await.expect("trusted prior decision still returns Ok");

    assert_eq!(result.confidence, 0.1);
    assert_eq!(llm.calls.load(Ordering::SeqCst), 0, "a trusted prior IDK decision must skip the LLM call");
}

/// S6: cancelling mid-stream closes the reader promptly with a terminal
/// `error` event and no `done`.
#[tokio::test]
async fn s6_streaming_cancellation() {
    let corpus = FixedCorpus::new(vec![france_doc()]);
    let user = UserContext::new("u1", "t1").with_groups(vec!["group:eu".to_string()]);
    let query = Query::new("What is the capital of France?", user);

    let llm: Arc<dyn LlmBackend> = Arc::new(DrippingBackend {
        chunks: vec!["Paris ", "is ", "the ", "capital ", "of ", "France [1]."],
    });

    let orchestrator = Arc::new(Orchestrator {
        retrieval_backends: backends(corpus),
        reranker: Some(Arc::new(PassthroughReranker)),
        llm_backends: vec![llm],
        audit: Arc::new(RecordingAuditSink::default()),
        token_counter: Arc::new(CharRatioCounter),
        config_resolver: resolver(),
        collection: "docs".to_string(),
    });

    let (mut rx, cancel) = orchestrator.ask_stream(query);

    let first = rx.recv().await.expect("at least one chunk should arrive before cancellation");
    assert_eq!(first.event_type, ragquery_llm::EventType::Chunk);

    cancel.cancel();

    let mut extra_chunks = 0;
    let mut terminal = None;
    while let Some(envelope) = rx.recv().await {
        match envelope.event_type {
            ragquery_llm::EventType::Chunk => extra_chunks += 1,
            ragquery_llm::EventType::Done | ragquery_llm::EventType::Error => {
                terminal = Some(envelope.event_type);
                break;
            }
            _ => {}
        }
    }

    assert!(extra_chunks <= 1, "at most one more chunk may arrive once cancellation wins the race");
    assert_eq!(
        terminal,
        Some(ragquery_llm::EventType::Error),
        "the terminal event after cancellation must be error, never done"
    );
    assert!(rx.recv().await.is_none(), "no further events should follow the terminal error");
}
