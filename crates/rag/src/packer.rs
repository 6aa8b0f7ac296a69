//! Context Packer (C7, §4.7): greedy, cap- and novelty-constrained
//! selection of reranked chunks into a token-budgeted prompt context.
//!
//! Grounded on the teacher's `Turn::estimated_tokens` char-ratio heuristic
//! (`voice-agent/backend/crates/rag/src/compressor.rs`) for the token
//! accounting, generalized here behind the `TokenCounter` trait so a real
//! tokenizer can be swapped in per tenant.

use std::collections::{HashMap, HashSet};

use ragquery_config::ContextConfig;
use ragquery_core::{DropReason, PackTrace, PackTraceEntry, PackedContext, RerankedHit, TokenCounter};

use crate::citation::derive_source;

const ELLIPSIS: &str = "...";

fn tokenize_words(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

/// Cheap keyword-overlap answerability signal (§4.7 step 2): `1` if the
/// candidate shares any token with the query, else `0`.
fn overlaps_query(query_tokens: &HashSet<String>, content: &str) -> f64 {
    let content_tokens = tokenize_words(content);
    if query_tokens.intersection(&content_tokens).next().is_some() {
        1.0
    } else {
        0.0
    }
}

struct Candidate {
    hit: RerankedHit,
    effective_score: f64,
    tokens: HashSet<String>,
}

/// Packs `hits` into a token-budgeted context per §4.7. `debug_trace`
/// controls whether the (otherwise discarded) selection trace is retained.
pub fn pack(
    counter: &dyn TokenCounter,
    query: &str,
    mut hits: Vec<RerankedHit>,
    config: &ContextConfig,
    budget: usize,
    debug_trace: bool,
) -> PackedContext {
    hits.sort_by(RerankedHit::cmp_rank);

    let query_tokens = tokenize_words(query);
    let mut candidates: Vec<Candidate> = hits
        .into_iter()
        .map(|hit| {
            let b = overlaps_query(&query_tokens, &hit.content);
            let effective_score = hit.rerank_score + config.answerability_bonus * b;
            let tokens = tokenize_words(&hit.content);
            Candidate {
                hit,
                effective_score,
                tokens,
            }
        })
        .collect();
    candidates.sort_by(|a, b| {
        b.effective_score
            .partial_cmp(&a.effective_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.hit.doc_id.cmp(&b.hit.doc_id))
    });

    let mut per_doc_count: HashMap<String, usize> = HashMap::new();
    let mut per_section_count: HashMap<(String, String), usize> = HashMap::new();
    let mut selected: Vec<RerankedHit> = Vec::new();
    let mut selected_tokens: Vec<HashSet<String>> = Vec::new();
    let mut per_doc_tokens: HashMap<String, usize> = HashMap::new();
    let mut tokens_used = 0usize;
    let mut truncated = false;
    let mut trace = PackTrace::default();
    let mut selected_order_index: HashMap<String, Vec<i64>> = HashMap::new();

    for candidate in candidates {
        let doc_id = candidate.hit.doc_id.clone();
        let section_key = candidate
            .hit
            .payload
            .section_path
            .clone()
            .unwrap_or_default();
        let order_index = candidate.hit.payload.order_index;

        let is_contiguous_extension = order_index
            .zip(selected_order_index.get(&doc_id))
            .map(|(idx, seen)| seen.iter().any(|s| (s - idx).abs() == 1))
            .unwrap_or(false);

        let doc_count = *per_doc_count.get(&doc_id).unwrap_or(&0);
        if doc_count >= config.per_doc_cap {
            record_rejection(&mut trace, debug_trace, &doc_id, DropReason::PerDocCap);
            continue;
        }

        let section_count = *per_section_count
            .get(&(doc_id.clone(), section_key.clone()))
            .unwrap_or(&0);
        if section_count >= config.per_section_cap && !is_contiguous_extension {
            record_rejection(&mut trace, debug_trace, &doc_id, DropReason::PerSectionCap);
            continue;
        }

        let max_sim = selected_tokens
            .iter()
            .map(|s| jaccard(s, &candidate.tokens))
            .fold(0.0_f64, f64::max);
        let novelty_score =
            (1.0 - config.novelty_alpha) * candidate.effective_score - config.novelty_alpha * max_sim;
        if novelty_score < 0.0 && !selected.is_empty() {
            record_rejection(&mut trace, debug_trace, &doc_id, DropReason::Novelty);
            continue;
        }

        let source = derive_source(&candidate.hit);
        let header = format!("[Document {}] (Source: {source})\n", selected.len() + 1);
        let full_text = format!("{header}{}\n\n", candidate.hit.content);
        let cost = counter.count(&full_text);
        let remaining = budget.saturating_sub(tokens_used);

        if cost > remaining {
            if selected.is_empty() {
                let (fitted_content, fitted_cost) =
                    truncate_to_budget(counter, &header, &candidate.hit.content, budget);
                truncated = true;
                tokens_used += fitted_cost;
                per_doc_tokens.insert(doc_id.clone(), fitted_cost);
                *per_doc_count.entry(doc_id.clone()).or_insert(0) += 1;
                *per_section_count
                    .entry((doc_id.clone(), section_key.clone()))
                    .or_insert(0) += 1;
                if let Some(idx) = order_index {
                    selected_order_index.entry(doc_id).or_default().push(idx);
                }
                let mut hit = candidate.hit;
                hit.content = fitted_content;
                selected_tokens.push(candidate.tokens);
                selected.push(hit);
                continue;
            }
            record_rejection(&mut trace, debug_trace, &doc_id, DropReason::Budget);
            continue;
        }

        tokens_used += cost;
        per_doc_tokens.insert(doc_id.clone(), cost);
        *per_doc_count.entry(doc_id.clone()).or_insert(0) += 1;
        *per_section_count
            .entry((doc_id.clone(), section_key.clone()))
            .or_insert(0) += 1;
        if let Some(idx) = order_index {
            selected_order_index.entry(doc_id).or_default().push(idx);
        }
        selected_tokens.push(candidate.tokens);
        selected.push(candidate.hit);
    }

    if debug_trace {
        trace.selected_ids = selected.iter().map(|h| h.doc_id.clone()).collect();
        trace.tokens_per_selection = per_doc_tokens.clone();
    }

    let text = render_text(&selected, truncated);

    PackedContext {
        text,
        selected_docs: selected,
        tokens_used,
        truncated,
        per_doc_tokens,
        trace: if debug_trace { Some(trace) } else { None },
    }
}

fn record_rejection(
    trace: &mut PackTrace,
    debug_trace: bool,
    doc_id: &str,
    reason: DropReason,
) {
    if debug_trace {
        trace.rejected.push(PackTraceEntry {
            doc_id: doc_id.to_string(),
            reason,
        });
    }
}

/// Truncates `content` so that `header + content + ellipsis` fits within
/// `budget` tokens, per §4.7 step 4: the first document never counts as
/// rejected purely on size.
fn truncate_to_budget(
    counter: &dyn TokenCounter,
    header: &str,
    content: &str,
    budget: usize,
) -> (String, usize) {
    let header_cost = counter.count(header);
    let ellipsis_cost = counter.count(ELLIPSIS);
    if header_cost + ellipsis_cost >= budget {
        return (ELLIPSIS.to_string(), budget);
    }

    let mut low = 0usize;
    let mut high = content.chars().count();
    let mut best = String::new();

    while low <= high {
        let mid = (low + high) / 2;
        let candidate: String = content.chars().take(mid).collect();
        let candidate_with_ellipsis = format!("{candidate}{ELLIPSIS}");
        let cost = header_cost + counter.count(&candidate_with_ellipsis);
        if cost <= budget {
            best = candidate_with_ellipsis;
            low = mid + 1;
        } else {
            if mid == 0 {
                break;
            }
            high = mid - 1;
        }
    }

    let total_cost = header_cost + counter.count(&best);
    (best, total_cost)
}

fn render_text(selected: &[RerankedHit], truncated: bool) -> String {
    let mut out = String::new();
    for (idx, hit) in selected.iter().enumerate() {
        let number = idx + 1;
        let source = derive_source(hit);
        out.push_str(&format!("[Document {number}] (Source: {source})\n"));
        out.push_str(&hit.content);
        out.push_str("\n\n");
    }
    if truncated && !selected.is_empty() {
        out.push_str("(context truncated to fit budget)\n");
    }
    out
}
