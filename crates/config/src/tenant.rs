//! `TenantConfig` (§4.1): the flat, typed knob set every other component
//! reads instead of touching environment variables directly (§9 redesign
//! flag "ad-hoc env-var reads scattered across modules").

use serde::{Deserialize, Serialize};

/// Named guardrail threshold preset (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuardrailPreset {
    Permissive,
    Moderate,
    Strict,
    Paranoid,
}

impl GuardrailPreset {
    /// `(min_confidence, min_top_score, min_mean_score, min_result_count)`.
    pub fn thresholds(self) -> (f64, f64, f64, usize) {
        match self {
            Self::Permissive => (0.25, 0.15, 0.10, 1),
            Self::Moderate => (0.45, 0.30, 0.20, 1),
            Self::Strict => (0.60, 0.45, 0.35, 2),
            Self::Paranoid => (0.75, 0.60, 0.50, 3),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    pub k_base: usize,
    pub vector_weight: f64,
    pub lexical_weight: f64,
    pub query_adaptive_weights: bool,
    pub vector_timeout_ms: u64,
    pub lexical_timeout_ms: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k_base: 12,
            vector_weight: 0.6,
            lexical_weight: 0.4,
            query_adaptive_weights: true,
            vector_timeout_ms: 5_000,
            lexical_timeout_ms: 3_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankerConfig {
    pub enabled: bool,
    pub top_in: usize,
    pub top_out: usize,
    pub fallback_on_error: bool,
    pub timeout_ms: u64,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            top_in: 20,
            top_out: 8,
            fallback_on_error: true,
            timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailConfig {
    pub min_confidence: f64,
    pub min_top_score: f64,
    pub min_mean_score: f64,
    pub min_result_count: usize,
    pub preset: GuardrailPreset,
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self::from_preset(GuardrailPreset::Moderate)
    }
}

impl GuardrailConfig {
    pub fn from_preset(preset: GuardrailPreset) -> Self {
        let (min_confidence, min_top_score, min_mean_score, min_result_count) =
            preset.thresholds();
        Self {
            min_confidence,
            min_top_score,
            min_mean_score,
            min_result_count,
            preset,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    pub max_context_tokens: usize,
    pub per_doc_cap: usize,
    pub per_section_cap: usize,
    pub novelty_alpha: f64,
    pub answerability_bonus: f64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: 8_000,
            per_doc_cap: 2,
            per_section_cap: 1,
            novelty_alpha: 0.5,
            answerability_bonus: 0.1,
        }
    }
}

/// A single provider entry — used for both the primary `llm.provider` and
/// each member of `llm.fallback_providers` (§6.3: "list of the same
/// shape").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmProviderSpec {
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub provider: LlmProviderSpec,
    pub temperature: f64,
    pub top_p: f64,
    pub max_output_tokens: usize,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub fallback_providers: Vec<LlmProviderSpec>,
    pub streaming: bool,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProviderSpec {
                provider: "anthropic".to_string(),
                model: "claude-sonnet".to_string(),
                endpoint: None,
            },
            temperature: 0.2,
            top_p: 0.9,
            max_output_tokens: 1024,
            timeout_ms: 25_000,
            max_retries: 3,
            fallback_providers: Vec::new(),
            streaming: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FreshnessConfig {
    pub fresh_days: i64,
    pub recent_days: i64,
}

impl Default for FreshnessConfig {
    fn default() -> Self {
        Self {
            fresh_days: 7,
            recent_days: 30,
        }
    }
}

/// The full per-tenant knob set resolved by C1 (§4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantConfig {
    pub tenant_id: String,
    pub retrieval: RetrievalConfig,
    pub reranker: RerankerConfig,
    pub guardrail: GuardrailConfig,
    pub context: ContextConfig,
    pub llm: LlmConfig,
    pub freshness: FreshnessConfig,
    pub language_default: String,
    pub overall_timeout_ms: u64,
}

impl TenantConfig {
    /// Built-in default used when a tenant has no explicit configuration
    /// (§4.1: "never fails").
    pub fn default_for(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            retrieval: RetrievalConfig::default(),
            reranker: RerankerConfig::default(),
            guardrail: GuardrailConfig::default(),
            context: ContextConfig::default(),
            llm: LlmConfig::default(),
            freshness: FreshnessConfig::default(),
            language_default: "en".to_string(),
            overall_timeout_ms: 45_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preset_thresholds_increase_with_strictness() {
        let (c1, ..) = GuardrailPreset::Permissive.thresholds();
        let (c2, ..) = GuardrailPreset::Moderate.thresholds();
        let (c3, ..) = GuardrailPreset::Strict.thresholds();
        let (c4, ..) = GuardrailPreset::Paranoid.thresholds();
        assert!(c1 < c2 && c2 < c3 && c3 < c4);
    }

    #[test]
    fn default_config_matches_spec_defaults() {
        let cfg = TenantConfig::default_for("t1");
        assert_eq!(cfg.retrieval.k_base, 12);
        assert_eq!(cfg.reranker.top_in, 20);
        assert_eq!(cfg.reranker.top_out, 8);
        assert_eq!(cfg.context.max_context_tokens, 8_000);
        assert_eq!(cfg.context.per_doc_cap, 2);
        assert_eq!(cfg.overall_timeout_ms, 45_000);
    }
}
