//! Streaming Event Normalizer (C10, §4.10): provider-agnostic stream
//! envelope, finish-reason normalization, and token-usage extraction.
//!
//! Grounded on the teacher's SSE line-buffering loop in
//! `voice-agent/backend/crates/llm/src/claude.rs` (`generate_with_tools_stream`):
//! incremental `data: `-prefixed chunks parsed off a growing buffer and
//! forwarded over an mpsc channel — the shape this module's envelope type
//! is designed to travel over.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Chunk,
    Completion,
    Citations,
    Metadata,
    FormattedAnswer,
    ResponseCompleted,
    Error,
    Done,
    ProviderSpecific,
}

impl EventType {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }
}

/// Provider-agnostic stream envelope (§4.10).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEnvelope {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub request_id: String,
    pub data: Value,
}

impl StreamEnvelope {
    pub fn new(event_type: EventType, request_id: impl Into<String>, data: Value, now: DateTime<Utc>) -> Self {
        Self {
            event_type,
            timestamp: now,
            request_id: request_id.into(),
            data,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    FunctionCall,
}

/// Normalizes a provider-specific finish reason string to the canonical
/// set by keyword matching (§4.10).
pub fn normalize_finish_reason(raw: &str) -> FinishReason {
    let lower = raw.to_lowercase();
    if lower.contains("length") || lower.contains("max_token") {
        FinishReason::Length
    } else if lower.contains("filter") || lower.contains("safety") || lower.contains("content") {
        FinishReason::ContentFilter
    } else if lower.contains("tool") || lower.contains("function") {
        FinishReason::FunctionCall
    } else {
        FinishReason::Stop
    }
}

const USAGE_TOTAL_KEYS: &[&str] = &["total_tokens", "totalTokens", "output_tokens", "tokens"];
const USAGE_PARTS_KEYS: &[(&str, &str)] = &[
    ("input_tokens", "output_tokens"),
    ("prompt_tokens", "completion_tokens"),
];

/// Extracts a total token count from a provider's raw usage payload,
/// trying known direct keys first, then summing known part pairs (§4.10).
pub fn extract_total_tokens(usage: &Value) -> Option<u64> {
    for key in USAGE_TOTAL_KEYS {
        if let Some(n) = usage.get(key).and_then(Value::as_u64) {
            return Some(n);
        }
    }
    for (a, b) in USAGE_PARTS_KEYS {
        if let (Some(x), Some(y)) = (
            usage.get(a).and_then(Value::as_u64),
            usage.get(b).and_then(Value::as_u64),
        ) {
            return Some(x + y);
        }
    }
    None
}

/// Verifies the hard ordering contract from §4.9 EMIT / §8 Property 8:
/// `chunk*` precedes `citations` precedes `metadata` precedes
/// `response_completed` precedes `done`; `error` may appear anywhere and
/// terminates the sequence.
pub fn validate_event_order(events: &[EventType]) -> bool {
    let mut stage = 0usize;
    let order = [
        EventType::Citations,
        EventType::Metadata,
        EventType::FormattedAnswer,
        EventType::ResponseCompleted,
        EventType::Done,
    ];

    for (idx, event) in events.iter().enumerate() {
        if *event == EventType::Error {
            return idx == events.len() - 1;
        }
        if *event == EventType::Chunk {
            if stage != 0 {
                return false;
            }
            continue;
        }
        match order.iter().position(|e| e == event) {
            Some(pos) if pos >= stage => stage = pos + 1,
            Some(_) => return false,
            None => {}
        }
    }

    events.last().map(|e| e.is_terminal()).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_reason_keyword_matching() {
        assert_eq!(normalize_finish_reason("max_tokens"), FinishReason::Length);
        assert_eq!(
            normalize_finish_reason("content_filter"),
            FinishReason::ContentFilter
        );
        assert_eq!(normalize_finish_reason("tool_calls"), FinishReason::FunctionCall);
        assert_eq!(normalize_finish_reason("stop"), FinishReason::Stop);
    }

    #[test]
    fn extracts_total_tokens_from_direct_key() {
        let usage = serde_json::json!({"total_tokens": 42});
        assert_eq!(extract_total_tokens(&usage), Some(42));
    }

    #[test]
    fn extracts_total_tokens_by_summing_parts() {
        let usage = serde_json::json!({"prompt_tokens": 10, "completion_tokens": 5});
        assert_eq!(extract_total_tokens(&usage), Some(15));
    }

    #[test]
    fn valid_order_passes() {
        let events = vec![
            EventType::Chunk,
            EventType::Chunk,
            EventType::Citations,
            EventType::Metadata,
            EventType::FormattedAnswer,
            EventType::ResponseCompleted,
            EventType::Done,
        ];
        assert!(validate_event_order(&events));
    }

    #[test]
    fn out_of_order_metadata_fails() {
        let events = vec![EventType::Metadata, EventType::Citations, EventType::Done];
        assert!(!validate_event_order(&events));
    }

    #[test]
    fn error_can_terminate_mid_stream() {
        let events = vec![EventType::Chunk, EventType::Error];
        assert!(validate_event_order(&events));
    }
}
