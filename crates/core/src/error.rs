//! Top-level error taxonomy (§7). Every crate's local error enum converts
//! into this one via `From`, the same shape the teacher uses for
//! `RagError`/`LlmError` converting into `voice_agent_core::Error`.

use thiserror::Error;

use crate::types::ReasonCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalBackendKind {
    Vector,
    Lexical,
    Both,
}

impl std::fmt::Display for RetrievalBackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Vector => "vector",
            Self::Lexical => "lexical",
            Self::Both => "both",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Retrieval,
    Reranker,
    Guardrail,
    Packing,
    Llm,
    Overall,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Retrieval => "retrieval",
            Self::Reranker => "reranker",
            Self::Guardrail => "guardrail",
            Self::Packing => "packing",
            Self::Llm => "llm",
            Self::Overall => "overall",
        };
        write!(f, "{s}")
    }
}

/// Machine-readable error taxonomy for the query-time pipeline (§7).
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("retrieval backend error ({which}): {message}")]
    RetrievalBackend {
        which: RetrievalBackendKind,
        message: String,
    },

    #[error("reranker error: {0}")]
    Reranker(String),

    #[error("LLM provider error ({provider}): {message}")]
    LlmProvider { provider: String, message: String },

    #[error("citation validation failed: {0}")]
    CitationValidation(String),

    #[error("timeout at stage {stage}: {message}")]
    Timeout { stage: Stage, message: String },

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("audit sink error: {0}")]
    Audit(String),
}

impl Error {
    /// Machine-readable code for audit records (§7: "error code if any").
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::RetrievalBackend { .. } => "RETRIEVAL_BACKEND_ERROR",
            Self::Reranker(_) => "RERANKER_ERROR",
            Self::LlmProvider { .. } => "LLM_PROVIDER_ERROR",
            Self::CitationValidation(_) => "CITATION_VALIDATION_ERROR",
            Self::Timeout { .. } => "TIMEOUT",
            Self::Cancelled(_) => "CANCELLED",
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::Audit(_) => "AUDIT_ERROR",
        }
    }
}

/// Maps a guardrail `ReasonCode` to the IDK-path's equivalent for error
/// reporting convenience (IDK is not itself an error, §7).
pub fn reason_code_str(code: ReasonCode) -> &'static str {
    match code {
        ReasonCode::NoRelevantDocs => "NO_RELEVANT_DOCS",
        ReasonCode::LowConfidence => "LOW_CONFIDENCE",
        ReasonCode::UnclearAnswer => "UNCLEAR_ANSWER",
    }
}

pub type Result<T> = std::result::Result<T, Error>;
