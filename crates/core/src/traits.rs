//! External collaborator interfaces (§6.2).
//!
//! The core depends on these interfaces only — not on any concrete vector
//! store, lexical index, reranker model, or LLM provider. Mirrors the
//! teacher's `core::traits::retriever::Retriever` pattern: an `async_trait`
//! for the pluggable backend, plain structs for its inputs/outputs, so
//! production and test implementations are interchangeable behind
//! `Arc<dyn Trait>`.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::Result;
use crate::types::RetrievalHit;

/// A single keyword/structured predicate ANDed into a backend query.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterPredicate {
    Eq(String, serde_json::Value),
    In(String, Vec<serde_json::Value>),
    Contains(String, String),
}

/// The conjunctive filter every backend query is constrained by. The ACL
/// clause is always present and always constructed by the retrieval
/// fan-out, never by a caller (§4.2).
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub tenant_id: Option<String>,
    pub acl_principals: Vec<String>,
    pub predicates: Vec<FilterPredicate>,
}

impl SearchFilter {
    pub fn new(tenant_id: impl Into<String>, acl_principals: Vec<String>) -> Self {
        Self {
            tenant_id: Some(tenant_id.into()),
            acl_principals,
            predicates: Vec::new(),
        }
    }

    pub fn with_predicate(mut self, predicate: FilterPredicate) -> Self {
        self.predicates.push(predicate);
        self
    }
}

/// Dense vector similarity search over a tenant's corpus.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn search_vectors(
        &self,
        collection: &str,
        embedding: Option<Vec<f32>>,
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<RetrievalHit>>;
}

/// Keyword/full-text search. May be backed by the same store as
/// `VectorStore` with a text predicate, or a dedicated engine (§6.2).
#[async_trait]
pub trait LexicalIndex: Send + Sync {
    async fn search_text(
        &self,
        query: &str,
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<RetrievalHit>>;
}

/// Query-time embedding generation (ingest-time embedding is out of scope).
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Cross-encoder `(query, passage)` scoring capability. The core does not
/// specify the model (§4.4) — only this scalar-per-pair contract.
#[async_trait]
pub trait RerankerService: Send + Sync {
    /// `candidates[i]` is `(id, content)`; the returned vec has one score
    /// per input, in the same order.
    async fn rerank(&self, query: &str, candidates: &[(String, String)]) -> Result<Vec<f64>>;
}

/// One audit record (§7). No query text or document content unless a
/// tenant explicitly opts in — enforced by callers, not this trait.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AuditEntry {
    pub request_id: String,
    pub tenant_id: String,
    pub user_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub stage_durations_ms: HashMap<String, u64>,
    pub guardrail_is_answerable: Option<bool>,
    pub guardrail_confidence: Option<f64>,
    pub result_count: usize,
    pub citation_count: usize,
    pub error_code: Option<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// Write-only, fire-and-forget audit sink (§5, §7). Unavailability is
/// logged by the implementation but must never fail the request.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, entry: AuditEntry);
}

/// Token counting capability, tenant-selectable (§4.7, §6.2). Implementors
/// that fail transparently fall back to the character-ratio heuristic —
/// see `CharRatioCounter` in this crate.
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

/// Default token counter: 3.5 characters per token (§4.7's documented
/// fallback), used whenever no tenant-specific counter is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct CharRatioCounter;

impl TokenCounter for CharRatioCounter {
    fn count(&self, text: &str) -> usize {
        ((text.chars().count() as f64) / 3.5).ceil() as usize
    }
}
