//! Request-scoped data model shared by every crate in the workspace.
//!
//! Nothing here survives a single request (§3 "Lifecycle"). The only
//! process-wide state is the tenant config cache, the LLM client pool, and
//! the audit sink — none of which are types defined in this module.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque tenant identifier. Keys every other entity and selects
/// configuration and ACL semantics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TenantId(pub String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TenantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Immutable per-request identity. Required for every retrieval call;
/// absence is a fatal request error (`InvalidRequestError`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserContext {
    pub user_id: String,
    pub tenant_id: TenantId,
    #[serde(default)]
    pub group_ids: Vec<String>,
}

impl UserContext {
    pub fn new(user_id: impl Into<String>, tenant_id: impl Into<TenantId>) -> Self {
        Self {
            user_id: user_id.into(),
            tenant_id: tenant_id.into(),
            group_ids: Vec::new(),
        }
    }

    pub fn with_groups(mut self, group_ids: Vec<String>) -> Self {
        self.group_ids = group_ids;
        self
    }

    /// Basic well-formedness check used by the retrieval fan-out's
    /// authorization precondition (§4.2): missing user or tenant id is
    /// always unauthorized, regardless of ACL outcome.
    pub fn is_well_formed(&self) -> bool {
        !self.user_id.trim().is_empty() && !self.tenant_id.0.trim().is_empty()
    }

    /// The set of principals this user satisfies an ACL against: their own
    /// id plus every group they belong to.
    pub fn principals(&self) -> HashSet<String> {
        let mut set: HashSet<String> = self.group_ids.iter().cloned().collect();
        set.insert(self.user_id.clone());
        set
    }
}

/// Desired answer rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AnswerFormat {
    #[default]
    Markdown,
    Plain,
}

/// A natural-language question plus its authorization and shaping
/// parameters (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub text: String,
    pub user_context: UserContext,
    #[serde(default)]
    pub k: Option<usize>,
    #[serde(default)]
    pub filter: Option<serde_json::Value>,
    #[serde(default)]
    pub format: Option<AnswerFormat>,
    #[serde(default)]
    pub max_context_tokens: Option<usize>,
    #[serde(default)]
    pub prior_guardrail_decision: Option<GuardrailDecision>,
}

impl Query {
    pub fn new(text: impl Into<String>, user_context: UserContext) -> Self {
        Self {
            text: text.into(),
            user_context,
            k: None,
            filter: None,
            format: None,
            max_context_tokens: None,
            prior_guardrail_decision: None,
        }
    }

    /// `text` must be non-empty after trimming (§3).
    pub fn trimmed_text(&self) -> &str {
        self.text.trim()
    }

    pub fn is_text_valid(&self) -> bool {
        !self.trimmed_text().is_empty()
    }

    pub fn format(&self) -> AnswerFormat {
        self.format.unwrap_or_default()
    }
}

/// Which backend contributed a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Vector,
    Lexical,
}

/// Optional document fields. ACL is the authoritative access key; every
/// other field may be absent and the pipeline must still function (§6.4).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DocumentPayload {
    pub doc_id: String,
    pub tenant_id: TenantId,
    /// Principals (user ids and/or group ids) permitted to read this
    /// document.
    #[serde(default)]
    pub acl: HashSet<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub filepath: Option<String>,
    #[serde(default)]
    pub authors: Option<Vec<String>>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub modified_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub lang: Option<String>,
    #[serde(default)]
    pub section_path: Option<String>,
    #[serde(default)]
    pub order_index: Option<i64>,
    #[serde(default)]
    pub header: Option<String>,
    #[serde(default)]
    pub doc_title: Option<String>,
    #[serde(default)]
    pub embedder_version: Option<String>,
}

impl DocumentPayload {
    pub fn new(doc_id: impl Into<String>, tenant_id: TenantId) -> Self {
        Self {
            doc_id: doc_id.into(),
            tenant_id,
            ..Default::default()
        }
    }

    /// `acl ∩ (groupIds ∪ {userId}) ≠ ∅`.
    pub fn is_visible_to(&self, user: &UserContext) -> bool {
        if self.tenant_id != user.tenant_id {
            return false;
        }
        let principals = user.principals();
        self.acl.iter().any(|p| principals.contains(p))
    }
}

/// A single backend's ranked hit (§3). `rank` is backend-local and 1-based.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalHit {
    pub doc_id: String,
    pub internal_id: String,
    pub score: f64,
    pub rank: usize,
    pub payload: DocumentPayload,
    pub content: String,
}

/// A document after reciprocal-rank fusion across backends (§3, §4.3).
/// Invariant: at most one `FusedHit` per `(tenantId, docId)` per query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusedHit {
    pub doc_id: String,
    pub fusion_score: f64,
    pub contributing_backends: HashSet<Backend>,
    pub payload: DocumentPayload,
    pub content: String,
}

impl FusedHit {
    /// Tie-break comparison per §3/§4.3: higher `fusion_score` first, then
    /// wider backend coverage, then lexicographically smaller `doc_id`.
    pub fn cmp_rank(&self, other: &Self) -> std::cmp::Ordering {
        other
            .fusion_score
            .partial_cmp(&self.fusion_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                other
                    .contributing_backends
                    .len()
                    .cmp(&self.contributing_backends.len())
            })
            .then_with(|| self.doc_id.cmp(&other.doc_id))
    }
}

/// A `FusedHit` rescored by the cross-encoder reranker (or passed through
/// unchanged when reranking is bypassed/disabled).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankedHit {
    pub doc_id: String,
    pub fusion_score: f64,
    pub rerank_score: f64,
    pub final_rank: usize,
    pub contributing_backends: HashSet<Backend>,
    pub payload: DocumentPayload,
    pub content: String,
}

impl RerankedHit {
    pub fn from_fused(hit: FusedHit, rerank_score: f64, final_rank: usize) -> Self {
        Self {
            doc_id: hit.doc_id,
            fusion_score: hit.fusion_score,
            rerank_score,
            final_rank,
            contributing_backends: hit.contributing_backends,
            payload: hit.payload,
            content: hit.content,
        }
    }

    /// Tie-break per §3: `rerankScore` desc, then `fusionScore` desc, then
    /// `docId` lexicographic.
    pub fn cmp_rank(&self, other: &Self) -> std::cmp::Ordering {
        other
            .rerank_score
            .partial_cmp(&self.rerank_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                other
                    .fusion_score
                    .partial_cmp(&self.fusion_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| self.doc_id.cmp(&other.doc_id))
    }
}

/// Document age bucket driven by tenant-configured thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FreshnessCategory {
    Fresh,
    Recent,
    Stale,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FreshnessInfo {
    pub age_days: i64,
    pub category: FreshnessCategory,
    pub human_readable: String,
    pub badge: String,
}

/// A numbered reference into the packed context (§3, §4.6). Numbers are
/// dense starting at 1, in the order documents appear in the context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    pub number: u32,
    pub doc_id: String,
    pub source: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub filepath: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub authors: Option<Vec<String>>,
    #[serde(default)]
    pub freshness: Option<FreshnessInfo>,
}

pub type CitationMap = BTreeMap<u32, Citation>;

/// Why the guardrail declined to answer (§4.5). Ordering below matters:
/// `reason_code` is chosen by whichever threshold fails first in this
/// order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReasonCode {
    NoRelevantDocs,
    LowConfidence,
    UnclearAnswer,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScoreStats {
    pub mean: f64,
    pub max: f64,
    pub min: f64,
    pub std_dev: Option<f64>,
    pub count: usize,
}

impl ScoreStats {
    pub fn empty() -> Self {
        Self {
            mean: 0.0,
            max: 0.0,
            min: 0.0,
            std_dev: None,
            count: 0,
        }
    }
}

/// The answerability decision (§3, §4.5). Deterministic: same inputs
/// always produce the same decision and confidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailDecision {
    pub is_answerable: bool,
    pub confidence: f64,
    pub score_stats: ScoreStats,
    #[serde(default)]
    pub reason_code: Option<ReasonCode>,
    pub rationale: String,
}

/// A drop reason recorded in the packer's (debug-only) trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DropReason {
    PerDocCap,
    PerSectionCap,
    Novelty,
    Budget,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackTraceEntry {
    pub doc_id: String,
    pub reason: DropReason,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PackTrace {
    pub selected_ids: Vec<String>,
    pub rejected: Vec<PackTraceEntry>,
    pub tokens_per_selection: HashMap<String, usize>,
}

/// Budget-selected, prompt-ready context (§3, §4.7). Invariant:
/// `tokens_used <= budget`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackedContext {
    pub text: String,
    pub selected_docs: Vec<RerankedHit>,
    pub tokens_used: usize,
    pub truncated: bool,
    pub per_doc_tokens: HashMap<String, usize>,
    #[serde(default)]
    pub trace: Option<PackTrace>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct FreshnessStats {
    pub fresh_count: usize,
    pub recent_count: usize,
    pub stale_count: usize,
}

/// Final, user-facing outcome of `ask`/`askStream` (§3, §6.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisResult {
    pub answer: String,
    pub citations: CitationMap,
    pub tokens_used: usize,
    pub synthesis_time_ms: u64,
    /// Always the guardrail's confidence (§9 Open Question #1), never the
    /// internal post-synthesis heuristic.
    pub confidence: f64,
    pub model_used: String,
    pub context_truncated: bool,
    pub freshness_stats: FreshnessStats,
    #[serde(default)]
    pub reason_code: Option<ReasonCode>,
}
