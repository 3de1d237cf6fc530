//! Contradiction detection between bullets.
//!
//! Two bullets conflict when they talk about the same thing and one
//! prescribes while the other forbids: "Always retry on timeout" against
//! "Never retry on timeout". Similarity is measured with the polarity
//! words removed, otherwise the markers themselves would pull opposite
//! statements apart.

use std::collections::HashSet;

use serde::Serialize;

use crate::config::ConflictsConfig;
use crate::core::Bullet;
use crate::util::jaccard;

/// Single-word negation markers.
const NEGATIVE_WORDS: &[&str] = &["never", "avoid"];
/// Single-word affirmative markers.
const POSITIVE_WORDS: &[&str] = &["must", "always", "required"];
/// First words of the two-word negations "do not" and "must not".
const NEGATION_LEADS: &[&str] = &["do", "must"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Polarity {
    Negative,
    Positive,
    Neutral,
}

impl Polarity {
    pub fn opposes(self, other: Polarity) -> bool {
        matches!(
            (self, other),
            (Polarity::Negative, Polarity::Positive) | (Polarity::Positive, Polarity::Negative)
        )
    }
}

fn tokens(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric() && c != '\'')
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect()
}

/// Split a text into its polarity and its remaining content words.
fn analyze(text: &str) -> (Polarity, HashSet<String>) {
    let words = tokens(text);
    let mut negative = false;
    let mut positive = false;
    let mut content = HashSet::new();

    let mut i = 0;
    while i < words.len() {
        let word = words[i].as_str();
        let next_is_not = words.get(i + 1).is_some_and(|n| n == "not");
        if NEGATION_LEADS.contains(&word) && next_is_not {
            negative = true;
            i += 2;
            continue;
        }
        if NEGATIVE_WORDS.contains(&word) {
            negative = true;
        } else if POSITIVE_WORDS.contains(&word) {
            positive = true;
        } else {
            content.insert(words[i].clone());
        }
        i += 1;
    }

    // negation dominates: "must always avoid" forbids
    let polarity = if negative {
        Polarity::Negative
    } else if positive {
        Polarity::Positive
    } else {
        Polarity::Neutral
    };
    (polarity, content)
}

pub fn polarity(text: &str) -> Polarity {
    analyze(text).0
}

/// Word Jaccard similarity with polarity markers removed.
pub fn content_similarity(a: &str, b: &str) -> f64 {
    jaccard(&analyze(a).1, &analyze(b).1)
}

#[derive(Debug, Clone)]
pub struct ConflictDetector {
    enabled: bool,
    similarity_threshold: f64,
}

impl ConflictDetector {
    pub fn new(config: &ConflictsConfig) -> Self {
        Self {
            enabled: config.enabled,
            similarity_threshold: config.similarity_threshold,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Similar enough and of opposite polarity.
    pub fn is_conflict(&self, a: &str, b: &str) -> bool {
        let (pa, ca) = analyze(a);
        let (pb, cb) = analyze(b);
        pa.opposes(pb) && jaccard(&ca, &cb) >= self.similarity_threshold
    }

    /// Existing bullets that contradict `incoming`. Empty when disabled.
    pub fn find_conflicts<'a>(&self, incoming: &str, existing: &'a [Bullet]) -> Vec<&'a Bullet> {
        if !self.enabled {
            return Vec::new();
        }
        existing
            .iter()
            .filter(|b| self.is_conflict(incoming, &b.text))
            .collect()
    }
}
