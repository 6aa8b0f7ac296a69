//! Answer Synthesis Orchestrator (C9, §4.9): the top-level state machine
//! wiring the Tenant Config Resolver, Retrieval Fan-Out, RRF Fusion,
//! Reranker, Answerability Guardrail, Citation Builder, Context Packer,
//! and LLM Client into one request.
//!
//! `VALIDATING -> GUARDRAIL_CHECK -> {IDK_EMIT | PACKING -> LLM_CALL ->
//! FORMATTING -> EMIT}`

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use ragquery_config::TenantConfigResolver;
use ragquery_core::{
    AnswerFormat, AuditEntry, AuditSink, Error, FreshnessCategory, FreshnessStats, GuardrailDecision,
    Query, RerankedHit, RerankerService, Result, Stage, SynthesisResult, TokenCounter,
};
use ragquery_llm::{
    resilient_complete, resilient_complete_streaming, system_prompt, user_prompt, CompletionRequest,
    EventType, GuardrailHint, LlmBackend, StreamEnvelope,
};
use ragquery_rag::{
    derive_freshness, evaluate_reranked, extract_citations, normalize_citations, pack,
    render_bibliography, rerank, strip_citations,
};
use ragquery_retrieval::{retrieve_and_fuse, FanOutBackends};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const HIGH_CONFIDENCE_THRESHOLD: f64 = 0.7;

fn idk_template(reason_code: ragquery_core::ReasonCode) -> String {
    use ragquery_core::ReasonCode;
    match reason_code {
        ReasonCode::NoRelevantDocs => {
            "I couldn't find any documents relevant to that question. Try rephrasing it or \
             narrowing its scope."
                .to_string()
        }
        ReasonCode::LowConfidence => {
            "I found some potentially relevant documents, but I'm not confident enough in them \
             to answer reliably. Try rephrasing your question or narrowing its scope."
                .to_string()
        }
        ReasonCode::UnclearAnswer => {
            "The available documents don't clearly answer that question. Try asking a more \
             specific question."
                .to_string()
        }
    }
}

fn tally_freshness(
    hits: &[RerankedHit],
    config: &ragquery_config::FreshnessConfig,
    now: chrono::DateTime<Utc>,
) -> FreshnessStats {
    let mut stats = FreshnessStats::default();
    for hit in hits {
        match derive_freshness(hit, config, now).category {
            FreshnessCategory::Fresh => stats.fresh_count += 1,
            FreshnessCategory::Recent => stats.recent_count += 1,
            FreshnessCategory::Stale => stats.stale_count += 1,
        }
    }
    stats
}

fn guardrail_hint(decision: &GuardrailDecision) -> GuardrailHint {
    if decision.is_answerable && decision.confidence >= HIGH_CONFIDENCE_THRESHOLD {
        GuardrailHint::HighConfidenceAnswerable
    } else {
        GuardrailHint::Default
    }
}

/// The wired set of collaborators a request is synthesized against (§6.2).
pub struct Orchestrator {
    pub retrieval_backends: FanOutBackends,
    pub reranker: Option<Arc<dyn RerankerService>>,
    pub llm_backends: Vec<Arc<dyn LlmBackend>>,
    pub audit: Arc<dyn AuditSink>,
    pub token_counter: Arc<dyn TokenCounter>,
    pub config_resolver: Arc<TenantConfigResolver>,
    pub collection: String,
}

struct PipelineOutcome {
    result: SynthesisResult,
    raw_answer: String,
    avg_candidate_score: f64,
}

impl Orchestrator {
    fn validate(query: &Query) -> Result<()> {
        if !query.is_text_valid() {
            return Err(Error::InvalidRequest("query text must be non-empty".to_string()));
        }
        if !query.user_context.is_well_formed() {
            return Err(Error::Unauthorized(
                "userContext is missing userId or tenantId".to_string(),
            ));
        }
        Ok(())
    }

    /// Non-streaming `ask` (§6.1).
    pub async fn ask(&self, query: Query) -> Result<SynthesisResult> {
        self.run(query).await.map(|outcome| outcome.result)
    }

    /// Runs `ask` then applies the "Enhanced variant" post-hoc quality
    /// checks (§4.9): every threshold violation becomes a warning, except
    /// citation validity, which raises `CitationValidation`.
    pub async fn ask_checked(
        &self,
        query: Query,
        thresholds: &crate::quality::QualityThresholds,
    ) -> Result<(SynthesisResult, Vec<String>)> {
        let outcome = self.run(query).await?;

        if !ragquery_rag::validate_citations(&outcome.raw_answer, &outcome.result.citations) {
            return Err(Error::CitationValidation(
                "synthesized answer references a citation number outside the packed context"
                    .to_string(),
            ));
        }

        let warnings = crate::quality::check_thresholds(
            thresholds,
            outcome.result.confidence,
            outcome.result.citations.len(),
            outcome.result.synthesis_time_ms,
        );
        for warning in &warnings {
            warn!(warning, "quality threshold violation");
        }

        Ok((outcome.result, warnings))
    }

    async fn run(&self, query: Query) -> Result<PipelineOutcome> {
        Self::validate(&query)?;

        let config = self
            .config_resolver
            .resolve(&query.user_context.tenant_id.0);
        let overall_timeout = Duration::from_millis(config.overall_timeout_ms);

        match tokio::time::timeout(overall_timeout, self.run_inner(&query, &config)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                stage: Stage::Overall,
                message: format!("request exceeded overall budget of {overall_timeout:?}"),
            }),
        }
    }

    async fn run_inner(
        &self,
        query: &Query,
        config: &ragquery_config::TenantConfig,
    ) -> Result<PipelineOutcome> {
        let start = Instant::now();
        let request_id = uuid::Uuid::new_v4().to_string();
        let mut stage_durations_ms = HashMap::new();

        let retrieval_start = Instant::now();
        let fused = retrieve_and_fuse(
            &self.retrieval_backends,
            query.trimmed_text(),
            &query.user_context,
            config,
            &self.collection,
        )
        .await?;
        stage_durations_ms.insert("retrieval".to_string(), retrieval_start.elapsed().as_millis() as u64);

        let rerank_start = Instant::now();
        let rerank_outcome = rerank(
            self.reranker.as_deref(),
            &config.reranker,
            query.trimmed_text(),
            fused,
        )
        .await?;
        stage_durations_ms.insert("reranker".to_string(), rerank_start.elapsed().as_millis() as u64);

        let guardrail_start = Instant::now();
        let decision = evaluate_reranked(
            &config.guardrail,
            &rerank_outcome.hits,
            query.prior_guardrail_decision.clone(),
        );
        stage_durations_ms.insert("guardrail".to_string(), guardrail_start.elapsed().as_millis() as u64);

        let now = Utc::now();

        let outcome = if !decision.is_answerable {
            let reason_code = decision.reason_code.expect("not-answerable implies a reason code");
            let answer = idk_template(reason_code);
            let freshness_stats = tally_freshness(&rerank_outcome.hits, &config.freshness, now);

            PipelineOutcome {
                result: SynthesisResult {
                    answer: answer.clone(),
                    citations: Default::default(),
                    tokens_used: 0,
                    synthesis_time_ms: start.elapsed().as_millis() as u64,
                    confidence: decision.confidence,
                    model_used: "guardrail".to_string(),
                    context_truncated: false,
                    freshness_stats,
                    reason_code: Some(reason_code),
                },
                raw_answer: answer,
                avg_candidate_score: decision.score_stats.mean,
            }
        } else {
            let pack_start = Instant::now();
            let packed = pack(
                self.token_counter.as_ref(),
                query.trimmed_text(),
                rerank_outcome.hits.clone(),
                &config.context,
                query
                    .max_context_tokens
                    .unwrap_or(config.context.max_context_tokens),
                false,
            );
            stage_durations_ms.insert("packing".to_string(), pack_start.elapsed().as_millis() as u64);

            let citations = extract_citations(&packed.selected_docs, &config.freshness, now);
            let freshness_stats = tally_freshness(&packed.selected_docs, &config.freshness, now);

            let hint = guardrail_hint(&decision);
            let request = CompletionRequest {
                system: system_prompt(hint).to_string(),
                user: user_prompt(&packed.text, query.trimmed_text()),
                max_tokens: config.llm.max_output_tokens,
                temperature: config.llm.temperature,
                top_p: config.llm.top_p,
            };

            let llm_start = Instant::now();
            let completion = resilient_complete(
                &self.llm_backends,
                &request,
                config.llm.max_retries,
                Duration::from_millis(config.llm.timeout_ms),
            )
            .await?;
            stage_durations_ms.insert("llm".to_string(), llm_start.elapsed().as_millis() as u64);

            let normalized = normalize_citations(&completion.text, &citations);
            let answer = match query.format() {
                AnswerFormat::Plain => strip_citations(&normalized),
                AnswerFormat::Markdown => match render_bibliography(&citations) {
                    Some(bibliography) => format!("{normalized}{bibliography}"),
                    None => normalized,
                },
            };

            let avg_candidate_score = if rerank_outcome.hits.is_empty() {
                0.0
            } else {
                rerank_outcome.hits.iter().map(|h| h.rerank_score).sum::<f64>()
                    / rerank_outcome.hits.len() as f64
            };

            PipelineOutcome {
                result: SynthesisResult {
                    answer,
                    citations,
                    tokens_used: completion.tokens_used as usize,
                    synthesis_time_ms: start.elapsed().as_millis() as u64,
                    confidence: decision.confidence,
                    model_used: completion.model,
                    context_truncated: packed.truncated,
                    freshness_stats,
                    reason_code: None,
                },
                raw_answer: completion.text,
                avg_candidate_score,
            }
        };

        let quality = crate::quality::quality_score(
            &outcome.raw_answer,
            outcome.result.context_truncated,
            outcome.avg_candidate_score,
            &outcome.result.freshness_stats,
        );

        let mut warnings = Vec::new();
        if rerank_outcome.bypassed {
            warnings.push("reranker bypassed".to_string());
        }
        if quality < 0.4 {
            warnings.push(format!("low heuristic answer quality ({quality:.2})"));
        }

        self.audit
            .append(AuditEntry {
                request_id,
                tenant_id: query.user_context.tenant_id.to_string(),
                user_id: query.user_context.user_id.clone(),
                timestamp: now,
                stage_durations_ms,
                guardrail_is_answerable: Some(decision.is_answerable),
                guardrail_confidence: Some(decision.confidence),
                result_count: rerank_outcome.hits.len(),
                citation_count: outcome.result.citations.len(),
                error_code: None,
                warnings,
            })
            .await;

        info!(
            tenant_id = %query.user_context.tenant_id,
            confidence = outcome.result.confidence,
            "synthesis completed"
        );

        Ok(outcome)
    }

    /// Streaming `askStream` (§6.1, §4.9 EMIT): forwards `chunk` events as
    /// they arrive from the LLM client, then emits `citations` ->
    /// `metadata` -> `formatted_answer` -> `response_completed` -> `done`
    /// in exactly that order. The IDK path emits a single `chunk` with the
    /// refusal text, then `metadata`, then `done`.
    ///
    /// The returned `CancellationToken` lets a caller cancel mid-stream
    /// (§5 "Cancellation propagates to every in-flight child"): once
    /// cancelled, the terminal event becomes `error` with a cancellation
    /// reason and `done` is never emitted, per §8 Property 6.
    pub fn ask_stream(self: Arc<Self>, query: Query) -> (mpsc::Receiver<StreamEnvelope>, CancellationToken) {
        let (tx, rx) = mpsc::channel(512);
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();

        tokio::spawn(async move {
            if let Err(err) = self.stream_inner(query, &tx, &task_cancel).await {
                emit(&tx, EventType::Error, "unknown", json!({ "message": err.to_string() })).await;
            }
        });

        (rx, cancel)
    }

    /// Resolves tenant config, then runs the streaming pipeline under the
    /// same overall-budget timeout `run` enforces for `ask` (§4.9). On
    /// timeout, emits a terminal `error` directly rather than propagating
    /// back to `ask_stream`'s catch-all, since that would double-emit.
    async fn stream_inner(
        &self,
        query: Query,
        tx: &mpsc::Sender<StreamEnvelope>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        Self::validate(&query)?;

        let config = self
            .config_resolver
            .resolve(&query.user_context.tenant_id.0);
        let overall_timeout = Duration::from_millis(config.overall_timeout_ms);
        let request_id = uuid::Uuid::new_v4().to_string();

        match tokio::time::timeout(
            overall_timeout,
            self.stream_pipeline(query, &config, &request_id, tx, cancel),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                emit(
                    tx,
                    EventType::Error,
                    &request_id,
                    json!({ "message": format!(
                        "request exceeded overall budget of {overall_timeout:?}"
                    ) }),
                )
                .await;
                Ok(())
            }
        }
    }

    async fn stream_pipeline(
        &self,
        query: Query,
        config: &ragquery_config::TenantConfig,
        request_id: &str,
        tx: &mpsc::Sender<StreamEnvelope>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let fused = retrieve_and_fuse(
            &self.retrieval_backends,
            query.trimmed_text(),
            &query.user_context,
            config,
            &self.collection,
        )
        .await?;

        let rerank_outcome = rerank(
            self.reranker.as_deref(),
            &config.reranker,
            query.trimmed_text(),
            fused,
        )
        .await?;

        let decision = evaluate_reranked(
            &config.guardrail,
            &rerank_outcome.hits,
            query.prior_guardrail_decision.clone(),
        );

        let now = Utc::now();

        if !decision.is_answerable {
            let reason_code = decision.reason_code.expect("not-answerable implies a reason code");
            let answer = idk_template(reason_code);
            emit(tx, EventType::Chunk, request_id, json!({ "text": answer })).await;
            emit(
                tx,
                EventType::Metadata,
                request_id,
                json!({
                    "model_used": "guardrail",
                    "confidence": decision.confidence,
                    "reason_code": format!("{:?}", reason_code),
                    "context_truncated": false,
                }),
            )
            .await;
            emit(tx, EventType::Done, &request_id, json!({})).await;
            return Ok(());
        }

        let packed = pack(
            self.token_counter.as_ref(),
            query.trimmed_text(),
            rerank_outcome.hits.clone(),
            &config.context,
            query
                .max_context_tokens
                .unwrap_or(config.context.max_context_tokens),
            false,
        );
        let citations = extract_citations(&packed.selected_docs, &config.freshness, now);

        let hint = guardrail_hint(&decision);
        let request = CompletionRequest {
            system: system_prompt(hint).to_string(),
            user: user_prompt(&packed.text, query.trimmed_text()),
            max_tokens: config.llm.max_output_tokens,
            temperature: config.llm.temperature,
            top_p: config.llm.top_p,
        };

        let mut llm_rx = resilient_complete_streaming(
            self.llm_backends.clone(),
            request,
            request_id.to_string(),
            config.llm.max_retries,
            Duration::from_millis(config.llm.timeout_ms),
        )
        .await;

        let mut raw_answer = String::new();
        let mut tokens_used = 0u64;
        let mut model_used = String::new();

        loop {
            let envelope = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    emit(
                        tx,
                        EventType::Error,
                        request_id,
                        json!({ "message": "request cancelled", "reason": "cancelled" }),
                    )
                    .await;
                    return Ok(());
                }
                next = llm_rx.recv() => match next {
                    Some(envelope) => envelope,
                    None => break,
                },
            };

            match envelope.event_type {
                EventType::Chunk => {
                    if let Some(text) = envelope.data.get("text").and_then(|v| v.as_str()) {
                        raw_answer.push_str(text);
                    }
                    if tx.send(envelope).await.is_err() {
                        // receiver dropped; stop pulling from the LLM stream
                        return Ok(());
                    }
                }
                EventType::Completion => {
                    tokens_used = envelope
                        .data
                        .get("total_tokens")
                        .and_then(|v| v.as_u64())
                        .unwrap_or(0);
                    model_used = envelope
                        .data
                        .get("model")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string();
                }
                EventType::Error => {
                    let _ = tx.send(envelope).await;
                    return Ok(());
                }
                _ => {}
            }
        }

        let normalized = normalize_citations(&raw_answer, &citations);
        let formatted = match query.format() {
            AnswerFormat::Plain => strip_citations(&normalized),
            AnswerFormat::Markdown => match render_bibliography(&citations) {
                Some(bibliography) => format!("{normalized}{bibliography}"),
                None => normalized,
            },
        };

        emit(
            tx,
            EventType::Citations,
            &request_id,
            serde_json::to_value(&citations).unwrap_or(json!({})),
        )
        .await;
        emit(
            tx,
            EventType::Metadata,
            &request_id,
            json!({
                "model_used": model_used,
                "confidence": decision.confidence,
                "tokens_used": tokens_used,
                "context_truncated": packed.truncated,
            }),
        )
        .await;
        emit(
            tx,
            EventType::FormattedAnswer,
            &request_id,
            json!({ "text": formatted }),
        )
        .await;
        emit(
            tx,
            EventType::ResponseCompleted,
            &request_id,
            json!({ "citation_count": citations.len() }),
        )
        .await;
        emit(tx, EventType::Done, &request_id, json!({})).await;

        Ok(())
    }
}

async fn emit(
    tx: &mpsc::Sender<StreamEnvelope>,
    event_type: EventType,
    request_id: &str,
    data: serde_json::Value,
) {
    let envelope = StreamEnvelope::new(event_type, request_id, data, Utc::now());
    let _ = tx.send(envelope).await;
}
