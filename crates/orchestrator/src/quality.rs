//! Heuristic answer quality score (§4.9): informs warnings only, never
//! gates synthesis — gating is the guardrail's job alone.

use once_cell::sync::Lazy;
use ragquery_core::FreshnessStats;
use regex::Regex;

const BASE_SCORE: f64 = 0.8;
const TRUNCATED_PENALTY: f64 = 0.8;
const SHORT_ANSWER_PENALTY: f64 = 0.6;
const SHORT_ANSWER_THRESHOLD: usize = 50;
const REFUSAL_FLOOR: f64 = 0.1;

static REFUSAL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)don'?t have enough information|cannot answer|unable to answer|no relevant (documents|information)")
        .expect("static regex is valid")
});

fn freshness_factor(stats: &FreshnessStats) -> f64 {
    let total = stats.fresh_count + stats.recent_count + stats.stale_count;
    if total == 0 {
        return 1.0;
    }
    let weighted = stats.fresh_count + stats.recent_count;
    0.6 + 0.4 * (weighted as f64 / total as f64)
}

/// Computes the heuristic quality score (§4.9). `avg_candidate_score` is
/// the mean of the scores feeding the answer (rerank scores, typically).
pub fn quality_score(
    answer: &str,
    truncated: bool,
    avg_candidate_score: f64,
    freshness_stats: &FreshnessStats,
) -> f64 {
    let mut score = BASE_SCORE;
    if truncated {
        score *= TRUNCATED_PENALTY;
    }
    score *= (avg_candidate_score + 0.3).min(1.0);
    score *= freshness_factor(freshness_stats);
    if answer.chars().count() < SHORT_ANSWER_THRESHOLD {
        score *= SHORT_ANSWER_PENALTY;
    }
    if REFUSAL_PATTERN.is_match(answer) {
        return score.min(REFUSAL_FLOOR);
    }
    score.clamp(0.0, 1.0)
}

/// Enhanced post-hoc thresholds (§4.9 "Enhanced variant"): every violation
/// is a warning string, never a hard failure — citation validity is
/// checked separately by the caller, which alone may raise an error.
pub struct QualityThresholds {
    pub min_confidence: f64,
    pub min_citations: usize,
    pub max_latency_ms: u64,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            min_confidence: 0.3,
            min_citations: 1,
            max_latency_ms: 45_000,
        }
    }
}

pub fn check_thresholds(
    thresholds: &QualityThresholds,
    confidence: f64,
    citation_count: usize,
    latency_ms: u64,
) -> Vec<String> {
    let mut warnings = Vec::new();
    if confidence < thresholds.min_confidence {
        warnings.push(format!(
            "confidence {confidence:.3} below quality threshold {:.3}",
            thresholds.min_confidence
        ));
    }
    if citation_count < thresholds.min_citations {
        warnings.push(format!(
            "citation count {citation_count} below quality threshold {}",
            thresholds.min_citations
        ));
    }
    if latency_ms > thresholds.max_latency_ms {
        warnings.push(format!(
            "latency {latency_ms}ms exceeded quality threshold {}ms",
            thresholds.max_latency_ms
        ));
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refusal_text_is_floored() {
        let stats = FreshnessStats {
            fresh_count: 1,
            recent_count: 0,
            stale_count: 0,
        };
        let score = quality_score(
            "I don't have enough information to answer that.",
            false,
            0.9,
            &stats,
        );
        assert!(score <= REFUSAL_FLOOR);
    }

    #[test]
    fn truncated_and_short_answers_are_penalized() {
        let stats = FreshnessStats {
            fresh_count: 2,
            recent_count: 0,
            stale_count: 0,
        };
        let full = quality_score("a long and complete answer that exceeds fifty characters easily", false, 0.7, &stats);
        let truncated = quality_score("a long and complete answer that exceeds fifty characters easily", true, 0.7, &stats);
        assert!(truncated < full);
    }

    #[test]
    fn thresholds_emit_warnings_not_errors() {
        let thresholds = QualityThresholds::default();
        let warnings = check_thresholds(&thresholds, 0.1, 0, 100_000);
        assert_eq!(warnings.len(), 3);
    }
}
