//! Curated rules describing the cognitive style of each pool.
//!
//! The left pool holds pattern continuity: absolute language, validation,
//! procedures, known pitfalls. The right pool holds pattern violation:
//! exploration, alternatives, anomalies, reframing. The classifier scores
//! new knowledge against these rules directly, without a vector index.

use std::collections::HashSet;

use serde::Serialize;

use crate::core::Pool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetaRule {
    pub id: &'static str,
    pub pool: Pool,
    pub description: &'static str,
    /// Single words match whole words; phrases match as substrings.
    pub keywords: &'static [&'static str],
    pub tags: &'static [&'static str],
}

const fn left(
    id: &'static str,
    description: &'static str,
    keywords: &'static [&'static str],
    tags: &'static [&'static str],
) -> MetaRule {
    MetaRule {
        id,
        pool: Pool::Left,
        description,
        keywords,
        tags,
    }
}

const fn right(
    id: &'static str,
    description: &'static str,
    keywords: &'static [&'static str],
    tags: &'static [&'static str],
) -> MetaRule {
    MetaRule {
        id,
        pool: Pool::Right,
        description,
        keywords,
        tags,
    }
}

pub const META_RULES: &[MetaRule] = &[
    left(
        "left_absolute_language",
        "Uses absolute language",
        &["always", "never", "must", "ensure", "require"],
        &["language", "absolute"],
    ),
    left(
        "left_validation",
        "Describes a validation or verification step",
        &["check", "validate", "verify", "confirm"],
        &["validation"],
    ),
    left(
        "left_required_fields",
        "Specifies required fields or constraints",
        &["required", "mandatory", "must have", "field", "fields"],
        &["constraints"],
    ),
    left(
        "left_binary_questions",
        "Asks a question with a binary answer",
        &["yes/no", "true/false", "pass/fail", "whether"],
        &["questions", "binary"],
    ),
    left(
        "left_defined_choices",
        "Requests a choice from defined options",
        &["which of", "select from", "choose between", "option", "options"],
        &["questions", "multiple_choice"],
    ),
    left(
        "left_step_by_step",
        "Describes a step-by-step procedure or checklist",
        &["step", "steps", "checklist", "procedure", "then"],
        &["procedures"],
    ),
    left(
        "left_exact_format",
        "Specifies exact format or schema requirements",
        &["format", "schema", "exact", "exactly", "specification"],
        &["schema", "format"],
    ),
    left(
        "left_known_pitfalls",
        "Warns about specific errors or known pitfalls",
        &["avoid", "prevent", "watch for", "error", "errors"],
        &["pitfalls", "errors"],
    ),
    left(
        "left_confirms_pattern",
        "Confirms a known pattern or rule",
        &["known", "confirms", "rule", "consistent"],
        &["pattern_recognition"],
    ),
    left(
        "left_replicates_procedure",
        "Replicates a proven pattern or procedure",
        &["proven", "replicate", "repeat", "same way"],
        &["pattern_replication"],
    ),
    left(
        "left_constraint_reasoning",
        "Reasons from logic or constraints",
        &["logic", "logical", "constraint", "deterministic"],
        &["logic"],
    ),
    right(
        "right_exploratory_language",
        "Uses exploratory language",
        &["try", "consider", "explore", "experiment", "maybe"],
        &["language", "exploratory"],
    ),
    right(
        "right_alternatives",
        "Suggests alternatives or variations",
        &["alternative", "alternatives", "variant", "different approach", "another way"],
        &["alternatives"],
    ),
    right(
        "right_challenged_assumptions",
        "Challenges assumptions",
        &["what if", "question whether", "assume", "assumption", "reconsider"],
        &["assumptions"],
    ),
    right(
        "right_why_questions",
        "Asks why or requests an explanation",
        &["why", "how come", "what causes"],
        &["questions", "why"],
    ),
    right(
        "right_possibility_expansion",
        "Expands the possibility space",
        &["what else", "what other", "could we", "possibility", "possibilities"],
        &["questions", "possibility"],
    ),
    right(
        "right_anomalies",
        "Describes a pattern violation or anomaly",
        &["breaks pattern", "unexpected", "contradicts", "anomaly", "anomalies"],
        &["anomaly", "violation"],
    ),
    right(
        "right_edge_cases",
        "Describes edge cases or boundary conditions",
        &["edge case", "corner case", "unusual", "boundary"],
        &["edge_cases"],
    ),
    right(
        "right_reframing",
        "Suggests creative reframing or recombination",
        &["reframe", "combine", "remix", "analogous"],
        &["creativity", "reframing"],
    ),
    right(
        "right_novelty_seeking",
        "Seeks novelty",
        &["novel", "unconventional", "break from tradition"],
        &["novelty"],
    ),
    right(
        "right_pattern_break",
        "Recognizes a pattern break or contradiction",
        &["pattern break", "contradiction", "inconsistent"],
        &["pattern_disruption"],
    ),
    right(
        "right_mutation",
        "Mutates a pattern or proposes a novel variation",
        &["mutate", "variation", "tweak"],
        &["pattern_mutation"],
    ),
    right(
        "right_abstraction",
        "Is abstract, conceptual or analogy-based",
        &["abstract", "conceptual", "analogy", "metaphor"],
        &["abstract"],
    ),
];

/// Rules describing `pool`. Empty for the shared pool.
pub fn rules_for(pool: Pool) -> impl Iterator<Item = &'static MetaRule> {
    META_RULES.iter().filter(move |r| r.pool == pool)
}

/// Lowercased text prepared for keyword matching.
#[derive(Debug)]
pub struct MatchText {
    lower: String,
    words: HashSet<String>,
}

impl MatchText {
    pub fn new(text: &str) -> Self {
        let lower = text.to_lowercase();
        let words = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_string)
            .collect();
        Self { lower, words }
    }

    pub fn contains(&self, keyword: &str) -> bool {
        if keyword.chars().all(char::is_alphanumeric) {
            self.words.contains(keyword)
        } else {
            self.lower.contains(keyword)
        }
    }
}

impl MetaRule {
    /// Number of keywords present in `text`.
    pub fn hits(&self, text: &MatchText) -> usize {
        self.keywords.iter().filter(|k| text.contains(k)).count()
    }

    pub fn keyword_ratio(&self, text: &MatchText) -> f64 {
        if self.keywords.is_empty() {
            return 0.0;
        }
        self.hits(text) as f64 / self.keywords.len() as f64
    }
}
