//! Pool classification for new knowledge.
//!
//! Scores a candidate bullet against the [`META_RULES`] of the left and
//! right pools and decides where it belongs. Close or weak scores are
//! ambiguous: they keep the source pool as a hint and may be handed to the
//! LLM for a tie-break.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use super::meta_rules::{rules_for, MatchText, MetaRule, META_RULES};
use crate::backends::{call_with_timeout, LlmClient};
use crate::config::Config;
use crate::core::{BulletKind, Pool};

/// Gap above which one pool clearly wins.
const CLEAR_GAP: f64 = 0.3;
/// Gap below which the scores are too close to call.
const CLOSE_GAP: f64 = 0.2;
/// Both scores below this means nothing matched well.
const WEAK_SCORE: f64 = 0.4;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub pool: Pool,
    pub confidence: f64,
    pub reasoning: String,
    /// Ids of the best matching rules of the chosen pool.
    pub matched_rules: Vec<&'static str>,
    pub left_score: f64,
    pub right_score: f64,
    /// Needs review: the source hint was used.
    pub ambiguous: bool,
}

/// Kind affinity: checklists and tool rules lean left, patterns and
/// concepts lean right.
fn kind_alignment(kind: BulletKind, rule: &MetaRule) -> f64 {
    match (kind, rule.pool) {
        (BulletKind::Checklist | BulletKind::ToolRule, Pool::Left) => 1.0,
        (BulletKind::Pattern | BulletKind::Concept, Pool::Right) => 1.0,
        _ => 0.5,
    }
}

fn tag_jaccard(rule: &MetaRule, tags: &[String]) -> f64 {
    if tags.is_empty() {
        return 0.0;
    }
    let a: HashSet<&str> = rule.tags.iter().copied().collect();
    let b: HashSet<&str> = tags.iter().map(String::as_str).collect();
    let union = a.union(&b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(&b).count() as f64 / union as f64
}

/// Score `text` against the rules of `pool`.
///
/// Rules with at least one keyword hit are ranked by hits; each contributes
/// `max(0.5, 1 - 0.1 * rank) * 0.4 + keyword_ratio * 0.3 + tag_jaccard * 0.2
/// + kind_alignment * 0.1`. The pool score is the mean, capped at 1.
pub fn score_pool(
    text: &str,
    kind: BulletKind,
    tags: &[String],
    pool: Pool,
) -> (f64, Vec<&'static MetaRule>) {
    let text = MatchText::new(text);
    let mut matched: Vec<(usize, &'static MetaRule)> = rules_for(pool)
        .map(|r| (r.hits(&text), r))
        .filter(|(hits, _)| *hits > 0)
        .collect();
    // stable: ties keep table order
    matched.sort_by(|a, b| b.0.cmp(&a.0));
    let rules: Vec<&'static MetaRule> = matched.into_iter().map(|(_, r)| r).collect();
    if rules.is_empty() {
        return (0.0, rules);
    }

    let total: f64 = rules
        .iter()
        .enumerate()
        .map(|(rank, rule)| {
            let rank_bonus = (1.0 - 0.1 * rank as f64).max(0.5);
            rank_bonus * 0.4
                + rule.keyword_ratio(&text) * 0.3
                + tag_jaccard(rule, tags) * 0.2
                + kind_alignment(kind, rule) * 0.1
        })
        .sum();
    ((total / rules.len() as f64).min(1.0), rules)
}

/// Turn the two pool scores into a decision.
pub fn decide(
    left_score: f64,
    right_score: f64,
    source_hint: Pool,
    left_rules: &[&'static MetaRule],
    right_rules: &[&'static MetaRule],
) -> Classification {
    let gap = (left_score - right_score).abs();
    let (winner, win, lose, rules) = if left_score > right_score {
        (Pool::Left, left_score, right_score, left_rules)
    } else {
        (Pool::Right, right_score, left_score, right_rules)
    };
    let ids = |n: usize| rules.iter().take(n).map(|r| r.id).collect::<Vec<_>>();

    let (pool, confidence, reasoning, matched_rules, ambiguous) = if gap > CLEAR_GAP {
        (
            winner,
            (0.6 + win * 0.4).min(0.95),
            format!("Strong {} pattern match (score: {:.2} vs {:.2})", winner, win, lose),
            ids(3),
            false,
        )
    } else if left_score < WEAK_SCORE && right_score < WEAK_SCORE {
        (
            source_hint,
            0.5,
            format!("No clear pattern match, defaulting to source pool ({})", source_hint),
            Vec::new(),
            true,
        )
    } else if gap < CLOSE_GAP {
        (
            source_hint,
            0.6,
            format!(
                "Ambiguous classification (scores: L={:.2}, R={:.2}), using source hint",
                left_score, right_score
            ),
            Vec::new(),
            true,
        )
    } else {
        (
            winner,
            (0.5 + win * 0.35).min(0.85),
            format!("Moderate {} preference (score: {:.2} vs {:.2})", winner, win, lose),
            ids(2),
            false,
        )
    };

    Classification {
        pool,
        confidence,
        reasoning,
        matched_rules,
        left_score,
        right_score,
        ambiguous,
    }
}

/// Parse a `HEMISPHERE / CONFIDENCE / REASONING` answer.
///
/// Anything mentioning "left" is left, otherwise right; confidence defaults
/// to 0.5.
pub fn parse_classification(answer: &str) -> (Pool, f64, String) {
    let mut pool = Pool::Left;
    let mut confidence = 0.5;
    let mut reasoning = String::new();
    for line in answer.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim().to_ascii_uppercase().as_str() {
            "HEMISPHERE" | "POOL" => {
                pool = if value.to_lowercase().contains("left") {
                    Pool::Left
                } else {
                    Pool::Right
                };
            }
            "CONFIDENCE" => confidence = value.parse::<f64>().unwrap_or(0.5).clamp(0.0, 1.0),
            "REASONING" => reasoning = value.to_string(),
            _ => {}
        }
    }
    (pool, confidence, reasoning)
}

fn examples(rules: &[&'static MetaRule]) -> String {
    if rules.is_empty() {
        return "  (no strong matches)".to_string();
    }
    rules
        .iter()
        .take(3)
        .map(|r| format!("  - {}", r.description))
        .collect::<Vec<_>>()
        .join("\n")
}

#[allow(clippy::too_many_arguments)]
fn classification_prompt(
    text: &str,
    kind: BulletKind,
    tags: &[String],
    source_hint: Pool,
    left_score: f64,
    right_score: f64,
    left_rules: &[&'static MetaRule],
    right_rules: &[&'static MetaRule],
) -> String {
    format!(
        r#"You are classifying a procedural memory bullet into the LEFT or RIGHT pool.

BULLET TO CLASSIFY:
Text: "{text}"
Type: {kind}
Tags: {tags}
Source: the {source} pool executed the task that generated this

RULE MATCHING RESULTS:
Left pool rules (score: {left_score:.2}):
{left}

Right pool rules (score: {right_score:.2}):
{right}

LEFT POOL (pattern continuity):
- Confirmatory, absolute language (always, never, must)
- Binary decisions, validation, verification
- Precise rules, required fields, schemas
- Step-by-step procedures
- Specific error prevention

RIGHT POOL (pattern violation):
- Exploratory language (try, consider, maybe)
- Alternatives, variations, reframings
- Assumption-challenging, open questions
- Edge cases, anomalies, pattern violations
- Novelty-seeking, creativity

Classify the bullet by its cognitive style, not its execution context:

HEMISPHERE: left | right
CONFIDENCE: 0.0-1.0
REASONING: One sentence explaining why
"#,
        tags = tags.join(", "),
        source = source_hint,
        left = examples(left_rules),
        right = examples(right_rules),
    )
}

pub struct HemisphereClassifier {
    llm: Option<Arc<dyn LlmClient>>,
    timeout: Duration,
}

impl HemisphereClassifier {
    pub fn new(config: &Config) -> Self {
        Self {
            llm: None,
            timeout: Duration::from_millis(config.memory.collaborator_timeout_ms),
        }
    }

    /// Use the LLM to settle ambiguous classifications.
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Rules the classifier evaluates.
    pub fn rules(&self) -> &'static [MetaRule] {
        META_RULES
    }

    /// Rule-based classification only.
    pub fn classify_rules(
        &self,
        text: &str,
        kind: BulletKind,
        source_hint: Pool,
        tags: &[String],
    ) -> Classification {
        let (left_score, left_rules) = score_pool(text, kind, tags, Pool::Left);
        let (right_score, right_rules) = score_pool(text, kind, tags, Pool::Right);
        tracing::debug!(left_score, right_score, "pool scores");
        decide(left_score, right_score, source_hint, &left_rules, &right_rules)
    }

    /// Classify, asking the LLM when the rules are inconclusive.
    pub async fn classify(
        &self,
        text: &str,
        kind: BulletKind,
        source_hint: Pool,
        tags: &[String],
    ) -> Classification {
        let (left_score, left_rules) = score_pool(text, kind, tags, Pool::Left);
        let (right_score, right_rules) = score_pool(text, kind, tags, Pool::Right);
        let mut result = decide(left_score, right_score, source_hint, &left_rules, &right_rules);

        if let (true, Some(llm)) = (result.ambiguous, &self.llm) {
            let prompt = classification_prompt(
                text,
                kind,
                tags,
                source_hint,
                left_score,
                right_score,
                &left_rules,
                &right_rules,
            );
            result = match call_with_timeout(llm.name(), self.timeout, llm.invoke(&prompt)).await {
                Ok(answer) => {
                    let (pool, confidence, reasoning) = parse_classification(&answer);
                    Classification {
                        pool,
                        confidence,
                        reasoning: format!("LLM classification: {}", reasoning),
                        matched_rules: Vec::new(),
                        left_score,
                        right_score,
                        ambiguous: false,
                    }
                }
                Err(e) => {
                    tracing::error!("LLM classification failed: {}", e);
                    Classification {
                        pool: source_hint,
                        confidence: 0.5,
                        reasoning: "LLM classification failed, using source hint".to_string(),
                        matched_rules: Vec::new(),
                        left_score,
                        right_score,
                        ambiguous: true,
                    }
                }
            };
        }

        tracing::info!(
            pool = %result.pool,
            confidence = result.confidence,
            ambiguous = result.ambiguous,
            "bullet classified"
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::testing::{CountingLlm, HangingLlm};

    fn classifier() -> HemisphereClassifier {
        HemisphereClassifier::new(&Config::default())
    }

    #[test]
    fn test_left_text_classified_left() {
        let c = classifier().classify_rules(
            "Always validate required fields before saving",
            BulletKind::Checklist,
            Pool::Right,
            &[],
        );
        assert_eq!(c.pool, Pool::Left);
        assert!(!c.ambiguous);
        assert!(c.left_score > c.right_score);
        assert!(c.confidence <= 0.95);
        assert!(!c.matched_rules.is_empty());
    }

    #[test]
    fn test_right_text_classified_right() {
        let c = classifier().classify_rules(
            "Consider an alternative approach when the obvious one stalls",
            BulletKind::Pattern,
            Pool::Left,
            &[],
        );
        assert_eq!(c.pool, Pool::Right);
        assert!(!c.ambiguous);
    }

    #[test]
    fn test_no_match_uses_source_hint() {
        let c = classifier().classify_rules("Lunch is at noon", BulletKind::Heuristic, Pool::Right, &[]);
        assert_eq!(c.pool, Pool::Right);
        assert_eq!(c.confidence, 0.5);
        assert!(c.ambiguous);
        assert_eq!((c.left_score, c.right_score), (0.0, 0.0));
    }

    #[test]
    fn test_decide_bands() {
        let clear = decide(0.9, 0.2, Pool::Right, &[], &[]);
        assert_eq!(clear.pool, Pool::Left);
        assert!((clear.confidence - 0.95).abs() < 1e-9);

        let close = decide(0.55, 0.45, Pool::Right, &[], &[]);
        assert_eq!(close.pool, Pool::Right);
        assert_eq!(close.confidence, 0.6);
        assert!(close.ambiguous);

        let moderate = decide(0.3, 0.55, Pool::Left, &[], &[]);
        assert_eq!(moderate.pool, Pool::Right);
        assert!((moderate.confidence - (0.5 + 0.55 * 0.35)).abs() < 1e-9);
        assert!(!moderate.ambiguous);
    }

    #[test]
    fn test_score_pool_formula() {
        // one rule, one of five keywords, no tags, neutral kind
        let (score, rules) = score_pool("Never do this", BulletKind::Heuristic, &[], Pool::Left);
        assert_eq!(rules.len(), 1);
        assert!((score - (0.4 + 0.2 * 0.3 + 0.05)).abs() < 1e-9);

        let tags = vec!["language".to_string(), "absolute".to_string()];
        let (tagged, _) = score_pool("Never do this", BulletKind::Heuristic, &tags, Pool::Left);
        assert!((tagged - score - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_parse_classification() {
        let (pool, conf, why) =
            parse_classification("HEMISPHERE: Right\nCONFIDENCE: 0.72\nREASONING: exploratory");
        assert_eq!(pool, Pool::Right);
        assert_eq!(conf, 0.72);
        assert_eq!(why, "exploratory");
        assert_eq!(parse_classification("garbage").1, 0.5);
    }

    #[tokio::test]
    async fn test_llm_breaks_ties() {
        let llm = Arc::new(CountingLlm::new("HEMISPHERE: right\nCONFIDENCE: 0.8\nREASONING: odd"));
        let c = classifier()
            .with_llm(llm.clone())
            .classify("Lunch is at noon", BulletKind::Heuristic, Pool::Left, &[])
            .await;
        assert_eq!(llm.calls(), 1);
        assert_eq!(c.pool, Pool::Right);
        assert!(!c.ambiguous);
        assert!(c.reasoning.starts_with("LLM classification"));
    }

    #[tokio::test]
    async fn test_llm_skipped_when_confident() {
        let llm = Arc::new(CountingLlm::new("HEMISPHERE: right"));
        let c = classifier()
            .with_llm(llm.clone())
            .classify(
                "Always validate required fields before saving",
                BulletKind::Checklist,
                Pool::Left,
                &[],
            )
            .await;
        assert_eq!(llm.calls(), 0);
        assert_eq!(c.pool, Pool::Left);
    }

    #[tokio::test]
    async fn test_llm_timeout_falls_back() {
        let mut config = Config::default();
        config.memory.collaborator_timeout_ms = 20;
        let c = HemisphereClassifier::new(&config)
            .with_llm(Arc::new(HangingLlm))
            .classify("Lunch is at noon", BulletKind::Heuristic, Pool::Right, &[])
            .await;
        assert_eq!(c.pool, Pool::Right);
        assert!(c.ambiguous);
    }
}
