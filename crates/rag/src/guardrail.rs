//! Answerability Guardrail (C5, §4.5): deterministic confidence scoring and
//! the not-answerable reason-code decision. A prior decision, if supplied,
//! is trusted verbatim rather than recomputed.
//!
//! There is no direct teacher analogue — the closest relative is the
//! teacher's confidence-threshold early-exit logic in
//! `voice-agent/backend/crates/rag/src/reranker.rs`'s `ExitStrategy`, which
//! this module generalizes from a per-layer inference decision to a
//! per-request answerability decision over retrieval scores.

use ragquery_config::GuardrailConfig;
use ragquery_core::{GuardrailDecision, ReasonCode, RerankedHit, ScoreStats};

const CONSISTENCY_SPREAD: f64 = 0.8;
const COUNT_SCORE_DIVISOR: f64 = 5.0;

fn clamp01(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}

pub fn score_stats(scores: &[f64]) -> ScoreStats {
    if scores.is_empty() {
        return ScoreStats::empty();
    }
    let count = scores.len();
    let sum: f64 = scores.iter().sum();
    let mean = sum / count as f64;
    let max = scores.iter().cloned().fold(f64::MIN, f64::max);
    let min = scores.iter().cloned().fold(f64::MAX, f64::min);
    let variance = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / count as f64;

    ScoreStats {
        mean,
        max,
        min,
        std_dev: Some(variance.sqrt()),
        count,
    }
}

fn confidence(stats: &ScoreStats) -> f64 {
    if stats.count == 0 {
        return 0.0;
    }
    let consistency = (1.0 - (stats.max - stats.min) / CONSISTENCY_SPREAD).max(0.0);
    let count_score = (stats.count as f64 / COUNT_SCORE_DIVISOR).min(1.0);

    0.4 * clamp01(stats.mean) + 0.3 * clamp01(stats.max) + 0.2 * consistency + 0.1 * count_score
}

/// Evaluates answerability over `reranked` (preferred) or `fused` scores
/// (§4.5). If `prior` is `Some`, it is returned unchanged — no
/// re-evaluation.
pub fn evaluate(
    config: &GuardrailConfig,
    scores: &[f64],
    prior: Option<GuardrailDecision>,
) -> GuardrailDecision {
    if let Some(decision) = prior {
        return decision;
    }

    let stats = score_stats(scores);
    let conf = confidence(&stats);

    let confidence_ok = conf >= config.min_confidence;
    let top_ok = stats.max >= config.min_top_score;
    let mean_ok = stats.mean >= config.min_mean_score;
    let count_ok = stats.count >= config.min_result_count;

    let is_answerable = confidence_ok && top_ok && mean_ok && count_ok;

    let reason_code = if is_answerable {
        None
    } else if !count_ok || stats.count == 0 {
        Some(ReasonCode::NoRelevantDocs)
    } else if !confidence_ok {
        Some(ReasonCode::LowConfidence)
    } else {
        Some(ReasonCode::UnclearAnswer)
    };

    let rationale = if is_answerable {
        "all guardrail thresholds satisfied".to_string()
    } else {
        let mut failing = Vec::new();
        if !count_ok {
            failing.push(format!(
                "result count {} below minimum {}",
                stats.count, config.min_result_count
            ));
        }
        if !confidence_ok {
            failing.push(format!(
                "confidence {:.3} below minimum {:.3}",
                conf, config.min_confidence
            ));
        }
        if !top_ok {
            failing.push(format!(
                "top score {:.3} below minimum {:.3}",
                stats.max, config.min_top_score
            ));
        }
        if !mean_ok {
            failing.push(format!(
                "mean score {:.3} below minimum {:.3}",
                stats.mean, config.min_mean_score
            ));
        }
        format!("not answerable: {}", failing.join("; "))
    };

    GuardrailDecision {
        is_answerable,
        confidence: conf,
        score_stats: stats,
        reason_code,
        rationale,
    }
}

/// Convenience wrapper pulling scores out of the effective candidate list
/// (reranked hits if present, otherwise the caller passes fused scores
/// directly via `evaluate`).
pub fn evaluate_reranked(
    config: &GuardrailConfig,
    hits: &[RerankedHit],
    prior: Option<GuardrailDecision>,
) -> GuardrailDecision {
    let scores: Vec<f64> = hits.iter().map(|h| h.rerank_score).collect();
    evaluate(config, &scores, prior)
}
