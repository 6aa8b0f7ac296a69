//! Citation Builder (C6, §4.6): numbering, freshness derivation, marker
//! validation/normalization, and bibliography rendering.
//!
//! No direct teacher analogue exists for citation bookkeeping; the marker
//! scanning below follows the teacher's general preference for `once_cell`
//! static regexes over per-call compilation (seen throughout
//! `voice-agent/backend/crates/rag`).

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use ragquery_config::FreshnessConfig;
use ragquery_core::{Citation, CitationMap, FreshnessCategory, FreshnessInfo, RerankedHit};
use regex::Regex;
use tracing::warn;

static CITATION_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[\^?(\d+)\]").expect("static regex is valid"));

/// Assigns citation numbers 1..N to `hits` in their given (already packed)
/// order, deriving source precedence and freshness per §4.6. A hit whose
/// extraction fails (currently: none of the checks here can fail, but the
/// shape is kept so future extraction steps can skip-and-log per-document)
/// is omitted from the map.
pub fn extract_citations(
    hits: &[RerankedHit],
    freshness_config: &FreshnessConfig,
    now: DateTime<Utc>,
) -> CitationMap {
    let mut map = CitationMap::new();
    for (idx, hit) in hits.iter().enumerate() {
        let number = (idx + 1) as u32;
        let source = derive_source(hit);
        let freshness = derive_freshness(hit, freshness_config, now);

        if source.trim().is_empty() {
            warn!(doc_id = %hit.doc_id, "citation source derivation failed, skipping");
            continue;
        }

        map.insert(
            number,
            Citation {
                number,
                doc_id: hit.doc_id.clone(),
                source,
                url: hit.payload.url.clone(),
                filepath: hit.payload.filepath.clone(),
                version: hit.payload.version.clone(),
                authors: hit.payload.authors.clone(),
                freshness: Some(freshness),
            },
        );
    }
    map
}

pub fn derive_source(hit: &RerankedHit) -> String {
    if let Some(url) = &hit.payload.url {
        if let Ok(parsed) = url::Url::parse(url) {
            let host = parsed.host_str().unwrap_or_default();
            return format!("{host}{}", parsed.path());
        }
        return url.clone();
    }
    if let Some(filepath) = &hit.payload.filepath {
        if let Some(name) = filepath.rsplit('/').next() {
            if !name.is_empty() {
                return name.to_string();
            }
        }
    }
    if !hit.doc_id.trim().is_empty() {
        return hit.doc_id.clone();
    }
    hit.doc_id.clone()
}

pub fn derive_freshness(
    hit: &RerankedHit,
    config: &FreshnessConfig,
    now: DateTime<Utc>,
) -> FreshnessInfo {
    let reference = hit.payload.modified_at.or(hit.payload.created_at);
    let Some(reference) = reference else {
        return FreshnessInfo {
            age_days: i64::MAX,
            category: FreshnessCategory::Stale,
            human_readable: "unknown".to_string(),
            badge: badge_for(FreshnessCategory::Stale),
        };
    };

    let age_days = (now - reference).num_days().max(0);
    let category = if age_days <= config.fresh_days {
        FreshnessCategory::Fresh
    } else if age_days <= config.recent_days {
        FreshnessCategory::Recent
    } else {
        FreshnessCategory::Stale
    };

    FreshnessInfo {
        age_days,
        category,
        human_readable: human_readable_age(age_days),
        badge: badge_for(category),
    }
}

fn badge_for(category: FreshnessCategory) -> String {
    match category {
        FreshnessCategory::Fresh => "●".to_string(),
        FreshnessCategory::Recent => "◐".to_string(),
        FreshnessCategory::Stale => "○".to_string(),
    }
}

fn human_readable_age(age_days: i64) -> String {
    if age_days <= 0 {
        return "today".to_string();
    }
    if age_days < 7 {
        return format!("{age_days} day(s) ago");
    }
    if age_days < 30 {
        return format!("{} week(s) ago", age_days / 7);
    }
    if age_days < 365 {
        return format!("{} month(s) ago", age_days / 30);
    }
    format!("{} year(s) ago", age_days / 365)
}

/// `validateCitations` (§4.6): false iff any marker in `answer_text`
/// references a number absent from `citations`.
pub fn validate_citations(answer_text: &str, citations: &CitationMap) -> bool {
    CITATION_MARKER
        .captures_iter(answer_text)
        .all(|capture| match capture[1].parse::<u32>() {
            Ok(n) => citations.contains_key(&n),
            Err(_) => false,
        })
}

/// Deletes markers referencing numbers absent from `citations`, and
/// normalizes every remaining marker to `[^n]` form. Idempotent: running
/// this twice on already-normalized text is a no-op.
pub fn normalize_citations(answer_text: &str, citations: &CitationMap) -> String {
    CITATION_MARKER
        .replace_all(answer_text, |caps: &regex::Captures| {
            match caps[1].parse::<u32>() {
                Ok(n) if citations.contains_key(&n) => format!("[^{n}]"),
                _ => String::new(),
            }
        })
        .into_owned()
}

/// Strips all citation markers — used for `AnswerFormat::Plain` (§4.9
/// FORMATTING).
pub fn strip_citations(answer_text: &str) -> String {
    CITATION_MARKER.replace_all(answer_text, "").into_owned()
}

/// Renders the trailing bibliography section (§4.6), ordered by citation
/// number ascending. Returns `None` if `citations` is empty.
pub fn render_bibliography(citations: &CitationMap) -> Option<String> {
    if citations.is_empty() {
        return None;
    }

    let mut out = String::from("\n\n## Sources\n");
    for (number, citation) in citations {
        out.push_str(&format!("\n{number}. "));
        if let Some(authors) = &citation.authors {
            if !authors.is_empty() {
                out.push_str(&authors.join(", "));
                out.push_str(" — ");
            }
        }
        out.push_str(&citation.source);
        if let Some(version) = &citation.version {
            out.push_str(&format!(" (v{version})"));
        }
        if let Some(freshness) = &citation.freshness {
            out.push_str(&format!(
                " {} {}",
                freshness.badge, freshness.human_readable
            ));
        }
        if let Some(url) = &citation.url {
            out.push_str(&format!(" <{url}>"));
        } else if let Some(filepath) = &citation.filepath {
            out.push_str(&format!(" ({filepath})"));
        }
    }
    Some(out)
}

/// Used by `validateCitations`'s "no gaps" invariant (§8 Property 3):
/// checks `citations` keys form `{1, ..., n}` with no gaps.
pub fn is_dense_numbering(citations: &CitationMap) -> bool {
    let expected: BTreeSet<u32> = (1..=citations.len() as u32).collect();
    let actual: BTreeSet<u32> = citations.keys().copied().collect();
    expected == actual
}
