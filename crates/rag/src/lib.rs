//! Reranker (C4), Answerability Guardrail (C5), Citation Builder (C6), and
//! Context Packer (C7): the post-fusion half of the query-time pipeline.

pub mod citation;
pub mod guardrail;
pub mod packer;
pub mod reranker;

pub use citation::{
    derive_freshness, derive_source, extract_citations, is_dense_numbering, normalize_citations,
    render_bibliography, strip_citations, validate_citations,
};
pub use guardrail::{evaluate, evaluate_reranked, score_stats};
pub use packer::pack;
pub use reranker::{rerank, RerankOutcome};
