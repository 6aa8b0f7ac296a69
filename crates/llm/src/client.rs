//! Resilient LLM Client (C8, §4.8): timeout + retry + fallback-provider
//! chain wrapping a per-provider HTTP backend, for both the blocking
//! `complete` and streaming `complete_streaming` capability surfaces.
//!
//! Grounded on the teacher's retry loop in
//! `voice-agent/backend/crates/llm/src/backend.rs` (`is_retryable`,
//! exponential backoff, capped attempts) and the SSE line-buffering loop
//! in `voice-agent/backend/crates/llm/src/claude.rs`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use ragquery_core::{Error, Result};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::warn;

use crate::provider::ResolvedProvider;
use crate::streaming::{extract_total_tokens, normalize_finish_reason, EventType, StreamEnvelope};

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub max_tokens: usize,
    pub temperature: f64,
    pub top_p: f64,
}

#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub tokens_used: u64,
    pub model: String,
}

/// Per-provider HTTP-level capability. One instance is bound to one
/// resolved provider; the resilience wrapper below owns retry/fallback
/// across instances.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    fn provider_name(&self) -> String;

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion>;

    /// Streams raw text deltas plus a final usage/finish-reason payload.
    /// The resilience wrapper turns these into `StreamEnvelope`s.
    async fn complete_streaming(&self, request: &CompletionRequest) -> Result<mpsc::Receiver<RawStreamItem>>;
}

#[derive(Debug, Clone)]
pub enum RawStreamItem {
    Delta(String),
    Usage { usage: serde_json::Value, finish_reason: String },
}

/// A generic HTTP backend speaking an OpenAI-chat-style wire format, used
/// for every provider kind (§6.2: "only HTTP-level semantics are
/// required" — no provider-specific message shaping beyond this).
pub struct HttpLlmBackend {
    client: reqwest::Client,
    provider: ResolvedProvider,
    api_key: Option<String>,
}

impl HttpLlmBackend {
    pub fn new(provider: ResolvedProvider, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            provider,
            api_key,
        }
    }

    fn body(&self, request: &CompletionRequest, stream: bool) -> serde_json::Value {
        json!({
            "model": self.provider.model,
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": request.user},
            ],
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "top_p": request.top_p,
            "stream": stream,
        })
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }
}

fn extract_text(payload: &serde_json::Value) -> Option<String> {
    payload
        .pointer("/choices/0/message/content")
        .and_then(|v| v.as_str())
        .or_else(|| payload.pointer("/content/0/text").and_then(|v| v.as_str()))
        .map(str::to_string)
}

fn extract_delta(payload: &serde_json::Value) -> Option<String> {
    payload
        .pointer("/choices/0/delta/content")
        .and_then(|v| v.as_str())
        .or_else(|| payload.pointer("/delta/text").and_then(|v| v.as_str()))
        .map(str::to_string)
}

#[async_trait]
impl LlmBackend for HttpLlmBackend {
    fn provider_name(&self) -> String {
        format!("{:?}", self.provider.kind)
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        let response = self
            .authorized(self.client.post(&self.provider.endpoint))
            .json(&self.body(request, false))
            .send()
            .await
            .map_err(|e| Error::LlmProvider {
                provider: self.provider_name(),
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(Error::LlmProvider {
                provider: self.provider_name(),
                message: format!("HTTP {}", response.status()),
            });
        }

        let payload: serde_json::Value = response.json().await.map_err(|e| Error::LlmProvider {
            provider: self.provider_name(),
            message: e.to_string(),
        })?;

        let text = extract_text(&payload).unwrap_or_default();
        let tokens_used = payload
            .get("usage")
            .and_then(extract_total_tokens)
            .unwrap_or(0);

        Ok(Completion {
            text,
            tokens_used,
            model: self.provider.model.clone(),
        })
    }

    async fn complete_streaming(&self, request: &CompletionRequest) -> Result<mpsc::Receiver<RawStreamItem>> {
        let response = self
            .authorized(self.client.post(&self.provider.endpoint))
            .json(&self.body(request, true))
            .send()
            .await
            .map_err(|e| Error::LlmProvider {
                provider: self.provider_name(),
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(Error::LlmProvider {
                provider: self.provider_name(),
                message: format!("HTTP {}", response.status()),
            });
        }

        let (tx, rx) = mpsc::channel(512);
        tokio::spawn(async move {
            let mut buffer = String::new();
            let mut byte_stream = response.bytes_stream();

            while let Some(chunk) = byte_stream.next().await {
                let Ok(bytes) = chunk else { break };
                buffer.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(line_end) = buffer.find('\n') {
                    let line = buffer[..line_end].trim().to_string();
                    buffer = buffer[line_end + 1..].to_string();

                    let Some(json_str) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    if json_str == "[DONE]" {
                        return;
                    }
                    let Ok(payload) = serde_json::from_str::<serde_json::Value>(json_str) else {
                        continue;
                    };

                    if let Some(delta) = extract_delta(&payload) {
                        if tx.send(RawStreamItem::Delta(delta)).await.is_err() {
                            return;
                        }
                    }
                    if let Some(usage) = payload.get("usage") {
                        let finish_reason = payload
                            .pointer("/choices/0/finish_reason")
                            .and_then(|v| v.as_str())
                            .unwrap_or("stop")
                            .to_string();
                        let _ = tx
                            .send(RawStreamItem::Usage {
                                usage: usage.clone(),
                                finish_reason,
                            })
                            .await;
                    }
                }
            }
        });

        Ok(rx)
    }
}

/// Computes the exponential backoff delay for a retry attempt: `2^attempt`
/// seconds (§4.8).
pub fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(2u64.saturating_pow(attempt))
}

/// Resilient non-streaming completion (§4.8): retries the primary up to
/// `max_retries` times with exponential backoff, then tries each fallback
/// in order (without its own retry budget), raising `LlmProvider` only if
/// every provider is exhausted.
pub async fn resilient_complete(
    backends: &[Arc<dyn LlmBackend>],
    request: &CompletionRequest,
    max_retries: u32,
    timeout: Duration,
) -> Result<Completion> {
    if backends.is_empty() {
        return Err(Error::LlmProvider {
            provider: "none".to_string(),
            message: "no LLM backends configured".to_string(),
        });
    }

    let (primary, fallbacks) = backends.split_first().expect("checked non-empty above");

    if let Ok(completion) = try_with_retries(primary.as_ref(), request, max_retries, timeout).await
    {
        return Ok(completion);
    }

    for fallback in fallbacks {
        if let Ok(completion) = try_once(fallback.as_ref(), request, timeout).await {
            return Ok(completion);
        }
    }

    Err(Error::LlmProvider {
        provider: "all".to_string(),
        message: "primary and all fallback providers failed".to_string(),
    })
}

async fn try_with_retries(
    backend: &dyn LlmBackend,
    request: &CompletionRequest,
    max_retries: u32,
    timeout: Duration,
) -> Result<Completion> {
    let mut last_err = None;
    for attempt in 0..=max_retries {
        match try_once(backend, request, timeout).await {
            Ok(completion) => return Ok(completion),
            Err(err) => {
                warn!(provider = backend.provider_name(), attempt, error = %err, "LLM call failed");
                last_err = Some(err);
                if attempt < max_retries {
                    tokio::time::sleep(backoff_delay(attempt)).await;
                }
            }
        }
    }
    Err(last_err.expect("loop runs at least once"))
}

async fn try_once(
    backend: &dyn LlmBackend,
    request: &CompletionRequest,
    timeout: Duration,
) -> Result<Completion> {
    match tokio::time::timeout(timeout, backend.complete(request)).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout {
            stage: ragquery_core::Stage::Llm,
            message: format!("{} did not respond within {:?}", backend.provider_name(), timeout),
        }),
    }
}

/// Resilient streaming completion (§4.8): streams from the primary; on
/// failure, tries each fallback's stream in turn; if every stream attempt
/// fails, falls back to a single non-streaming call emitted as one chunk.
/// If that also fails, emits a terminal `error` envelope.
pub async fn resilient_complete_streaming(
    backends: Vec<Arc<dyn LlmBackend>>,
    request: CompletionRequest,
    request_id: String,
    max_retries: u32,
    timeout: Duration,
) -> mpsc::Receiver<StreamEnvelope> {
    let (tx, rx) = mpsc::channel(512);

    tokio::spawn(async move {
        for (idx, backend) in backends.iter().enumerate() {
            let attempts = if idx == 0 { max_retries } else { 0 };
            if stream_once(backend.as_ref(), &request, &request_id, &tx, attempts, timeout).await {
                return;
            }
        }

        match resilient_complete(&backends, &request, 0, timeout).await {
            Ok(completion) => {
                emit_non_streaming_fallback(&tx, &request_id, completion).await;
            }
            Err(err) => {
                emit_error(&tx, &request_id, &err.to_string()).await;
            }
        }
    });

    rx
}

async fn stream_once(
    backend: &dyn LlmBackend,
    request: &CompletionRequest,
    request_id: &str,
    tx: &mpsc::Sender<StreamEnvelope>,
    max_retries: u32,
    timeout: Duration,
) -> bool {
    for attempt in 0..=max_retries {
        let call = backend.complete_streaming(request);
        let mut raw_rx = match tokio::time::timeout(timeout, call).await {
            Ok(Ok(rx)) => rx,
            Ok(Err(err)) => {
                warn!(provider = backend.provider_name(), attempt, error = %err, "stream open failed");
                if attempt < max_retries {
                    tokio::time::sleep(backoff_delay(attempt)).await;
                }
                continue;
            }
            Err(_) => {
                warn!(provider = backend.provider_name(), attempt, "stream open timed out");
                if attempt < max_retries {
                    tokio::time::sleep(backoff_delay(attempt)).await;
                }
                continue;
            }
        };

        let mut total_tokens = 0u64;
        let mut finish_reason = "stop".to_string();
        let mut text = String::new();

        while let Some(item) = raw_rx.recv().await {
            match item {
                RawStreamItem::Delta(delta) => {
                    text.push_str(&delta);
                    let envelope = StreamEnvelope::new(
                        EventType::Chunk,
                        request_id,
                        json!({ "text": delta }),
                        now(),
                    );
                    if tx.send(envelope).await.is_err() {
                        return true;
                    }
                }
                RawStreamItem::Usage { usage, finish_reason: fr } => {
                    total_tokens = extract_total_tokens(&usage).unwrap_or(0);
                    finish_reason = fr;
                }
            }
        }

        if text.is_empty() && total_tokens == 0 {
            if attempt < max_retries {
                tokio::time::sleep(backoff_delay(attempt)).await;
                continue;
            }
            return false;
        }

        let completion_envelope = StreamEnvelope::new(
            EventType::Completion,
            request_id,
            json!({
                "total_tokens": total_tokens,
                "finish_reason": format!("{:?}", normalize_finish_reason(&finish_reason)),
                "model": backend.provider_name(),
            }),
            now(),
        );
        let _ = tx.send(completion_envelope).await;
        return true;
    }
    false
}

async fn emit_non_streaming_fallback(
    tx: &mpsc::Sender<StreamEnvelope>,
    request_id: &str,
    completion: Completion,
) {
    let chunk = StreamEnvelope::new(
        EventType::Chunk,
        request_id,
        json!({ "text": completion.text }),
        now(),
    );
    let _ = tx.send(chunk).await;

    let completion_envelope = StreamEnvelope::new(
        EventType::Completion,
        request_id,
        json!({
            "total_tokens": completion.tokens_used,
            "finish_reason": "stop",
            "model": completion.model,
        }),
        now(),
    );
    let _ = tx.send(completion_envelope).await;
}

async fn emit_error(tx: &mpsc::Sender<StreamEnvelope>, request_id: &str, message: &str) {
    let envelope = StreamEnvelope::new(
        EventType::Error,
        request_id,
        json!({ "message": message }),
        now(),
    );
    let _ = tx.send(envelope).await;
}

fn now() -> chrono::DateTime<chrono::Utc> {
    chrono::Utc::now()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyBackend {
        fail_times: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl LlmBackend for FlakyBackend {
        fn provider_name(&self) -> String {
            "flaky".to_string()
        }

        async fn complete(&self, _request: &CompletionRequest) -> Result<Completion> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_times {
                Err(Error::LlmProvider {
                    provider: "flaky".to_string(),
                    message: "transient".to_string(),
                })
            } else {
                Ok(Completion {
                    text: "answer".to_string(),
                    tokens_used: 10,
                    model: "flaky-model".to_string(),
                })
            }
        }

        async fn complete_streaming(
            &self,
            _request: &CompletionRequest,
        ) -> Result<mpsc::Receiver<RawStreamItem>> {
            let (_tx, rx) = mpsc::channel(1);
            Ok(rx)
        }
    }

    fn request() -> CompletionRequest {
        CompletionRequest {
            system: "sys".to_string(),
            user: "user".to_string(),
            max_tokens: 100,
            temperature: 0.2,
            top_p: 0.9,
        }
    }

    #[tokio::test]
    async fn retries_until_success_within_budget() {
        let backend: Arc<dyn LlmBackend> = Arc::new(FlakyBackend {
            fail_times: 2,
            calls: AtomicU32::new(0),
        });
        let result = resilient_complete(&[backend], &request(), 3, Duration::from_secs(5)).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn falls_back_to_second_provider_when_primary_exhausted() {
        let primary: Arc<dyn LlmBackend> = Arc::new(FlakyBackend {
            fail_times: 100,
            calls: AtomicU32::new(0),
        });
        let fallback: Arc<dyn LlmBackend> = Arc::new(FlakyBackend {
            fail_times: 0,
            calls: AtomicU32::new(0),
        });
        let result = resilient_complete(
            &[primary, fallback],
            &request(),
            0,
            Duration::from_secs(5),
        )
        .await;
        assert!(result.is_ok());
        assert_eq!(result.unwrap().text, "answer");
    }

    #[tokio::test]
    async fn exhausting_every_provider_raises_llm_provider_error() {
        let primary: Arc<dyn LlmBackend> = Arc::new(FlakyBackend {
            fail_times: 100,
            calls: AtomicU32::new(0),
        });
        let result = resilient_complete(&[primary], &request(), 1, Duration::from_secs(5)).await;
        assert!(matches!(result, Err(Error::LlmProvider { .. })));
    }

    #[test]
    fn backoff_grows_exponentially() {
        assert_eq!(backoff_delay(0), Duration::from_secs(1));
        assert_eq!(backoff_delay(1), Duration::from_secs(2));
        assert_eq!(backoff_delay(2), Duration::from_secs(4));
    }
}
