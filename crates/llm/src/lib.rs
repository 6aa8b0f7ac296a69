pub mod client;
pub mod prompt;
pub mod provider;
pub mod streaming;

pub use client::{
    backoff_delay, resilient_complete, resilient_complete_streaming, Completion,
    CompletionRequest, HttpLlmBackend, LlmBackend, RawStreamItem,
};
pub use prompt::{system_prompt, user_prompt, GuardrailHint};
pub use provider::{ProviderKind, ResolvedProvider};
pub use streaming::{
    extract_total_tokens, normalize_finish_reason, validate_event_order, EventType, FinishReason,
    StreamEnvelope,
};
