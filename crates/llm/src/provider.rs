//! Provider polymorphism (§9 redesign flag: replaces a runtime string
//! switch with a typed dispatch enum).
//!
//! Grounded on the teacher's `LlmProvider`/`LlmProviderConfig` pair in
//! `voice-agent/backend/crates/llm/src/factory.rs`: a small `Copy` enum
//! with a `from_str` constructor, paired with a config struct carrying the
//! per-provider connection details.

use ragquery_config::LlmProviderSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    AzureOpenAi,
    Vllm,
    Other,
}

impl ProviderKind {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "openai" | "gpt" => Self::OpenAi,
            "anthropic" | "claude" => Self::Anthropic,
            "azure" | "azure-openai" | "azureopenai" => Self::AzureOpenAi,
            "vllm" | "local" | "self-hosted" => Self::Vllm,
            _ => Self::Other,
        }
    }

    pub fn default_endpoint(self) -> &'static str {
        match self {
            Self::OpenAi => "https://api.openai.com/v1/chat/completions",
            Self::Anthropic => "https://api.anthropic.com/v1/messages",
            Self::AzureOpenAi => "",
            Self::Vllm => "http://127.0.0.1:8000/v1/chat/completions",
            Self::Other => "",
        }
    }
}

/// A fully resolved provider target: kind, model id, and endpoint override.
#[derive(Debug, Clone)]
pub struct ResolvedProvider {
    pub kind: ProviderKind,
    pub model: String,
    pub endpoint: String,
}

impl From<&LlmProviderSpec> for ResolvedProvider {
    fn from(spec: &LlmProviderSpec) -> Self {
        let kind = ProviderKind::from_str(&spec.provider);
        let endpoint = spec
            .endpoint
            .clone()
            .unwrap_or_else(|| kind.default_endpoint().to_string());
        Self {
            kind,
            model: spec.model.clone(),
            endpoint,
        }
    }
}
