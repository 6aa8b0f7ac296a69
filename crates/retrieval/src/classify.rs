//! Query-adaptive weight classification (§4.3): a pure, rule-based split
//! between "definition/measurement/procedure" queries and "exploratory"
//! ones, used to pick fusion weights and `kBase` before C2/C3 run.
//!
//! Grounded on the teacher's `QueryExpander`-adjacent rule-based text
//! classification style (`voice-agent/backend/crates/rag/src/query_expansion.rs`):
//! plain string heuristics, no ML, deterministic.

use once_cell::sync::Lazy;
use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryIntent {
    DefinitionOrProcedure,
    Exploratory,
}

/// Weights and candidate pool size picked for an intent (§4.3).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdaptiveWeights {
    pub vector_weight: f64,
    pub lexical_weight: f64,
    pub k_base: usize,
}

impl QueryIntent {
    pub fn weights(self) -> AdaptiveWeights {
        match self {
            Self::DefinitionOrProcedure => AdaptiveWeights {
                vector_weight: 0.5,
                lexical_weight: 0.5,
                k_base: 16,
            },
            Self::Exploratory => AdaptiveWeights {
                vector_weight: 0.7,
                lexical_weight: 0.3,
                k_base: 12,
            },
        }
    }
}

static INTERROGATIVE_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(what|when|where|who|how|which|why|is|are|does|do|can|list|define)\b")
        .expect("static regex is valid")
});

static NUMERIC_OR_ENTITY_SIGNAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[0-9]|\b[A-Z][a-zA-Z]*[A-Z][a-zA-Z]*\b|\b[A-Z]{2,}\b")
        .expect("static regex is valid")
});

const SHORT_QUERY_WORD_LIMIT: usize = 12;

/// Classifies `query` by the rules in §4.3: short + interrogative +
/// (numeric or named-entity signal) → `DefinitionOrProcedure`; otherwise
/// `Exploratory`. Pure function of the query text alone.
pub fn classify_query(query: &str) -> QueryIntent {
    let trimmed = query.trim();
    let word_count = trimmed.split_whitespace().count();

    let is_short = word_count > 0 && word_count <= SHORT_QUERY_WORD_LIMIT;
    let is_interrogative = INTERROGATIVE_PREFIX.is_match(trimmed) || trimmed.ends_with('?');
    let has_signal = NUMERIC_OR_ENTITY_SIGNAL.is_match(trimmed);

    if is_short && is_interrogative && has_signal {
        QueryIntent::DefinitionOrProcedure
    } else {
        QueryIntent::Exploratory
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_interrogative_with_entity_is_definition() {
        let intent = classify_query("What is the MTBF of the XJ200 pump?");
        assert_eq!(intent, QueryIntent::DefinitionOrProcedure);
        assert_eq!(intent.weights().k_base, 16);
    }

    #[test]
    fn short_interrogative_without_signal_is_exploratory() {
        let intent = classify_query("What do you think about this");
        assert_eq!(intent, QueryIntent::Exploratory);
    }

    #[test]
    fn long_rambling_query_is_exploratory() {
        let intent = classify_query(
            "tell me everything you know about how our procurement process has evolved \
             over the last several years across all regional offices",
        );
        assert_eq!(intent, QueryIntent::Exploratory);
        assert_eq!(intent.weights().vector_weight, 0.7);
    }

    #[test]
    fn how_to_procedure_question_is_definition() {
        let intent = classify_query("How do I reset the Model3000 controller?");
        assert_eq!(intent, QueryIntent::DefinitionOrProcedure);
    }
}
