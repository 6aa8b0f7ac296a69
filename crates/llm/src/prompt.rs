//! Prompt construction (§4.8): selects a system template by guardrail
//! confidence and embeds the packed context verbatim.

/// Which system template to use, selected by the guardrail's answerability
/// decision going into synthesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardrailHint {
    HighConfidenceAnswerable,
    Default,
}

const HIGH_CONFIDENCE_TEMPLATE: &str = "\
You are answering a question using only the numbered context documents below. \
Answer comprehensively and preserve any tabular or structured content from the \
source material. Cite every factual claim with a [^n] marker matching the \
document number it came from. Never invent a citation number that is not \
present in the context. Do not reference information outside the provided \
context.";

const DEFAULT_TEMPLATE: &str = "\
You are answering a question using only the numbered context documents below. \
If the context does not contain enough information to answer confidently, \
respond exactly with: \"I don't have enough information to answer that.\" \
Do not guess. Cite every factual claim with a [^n] marker matching the \
document number it came from, and never invent a citation number that is not \
present in the context. Do not reference information outside the provided \
context.";

pub fn system_prompt(hint: GuardrailHint) -> &'static str {
    match hint {
        GuardrailHint::HighConfidenceAnswerable => HIGH_CONFIDENCE_TEMPLATE,
        GuardrailHint::Default => DEFAULT_TEMPLATE,
    }
}

/// Builds the full user-turn prompt: the packed context verbatim, then the
/// question.
pub fn user_prompt(context: &str, query: &str) -> String {
    format!("Context:\n{context}\n\nQuestion: {query}")
}
