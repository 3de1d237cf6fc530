//! Explicit teaching between pools.
//!
//! Teaching only files a suggestion; the bullet reaches the target pool
//! later, through delivery, and starts quarantined there.

use std::sync::Arc;

use super::suggestions::{Suggestion, SuggestionStore};
use crate::core::Pool;
use crate::error::{CortexError, Result};
use crate::memory::KnowledgeStore;

pub const DEFAULT_REASON: &str = "teaching";

/// Replacements applied in order. Two-word forms come first so that
/// "must not" does not become "should not".
const NEUTRAL_FORMS: &[(&[&str], &str)] = &[
    (&["must", "not"], "avoid"),
    (&["do", "not"], "avoid"),
    (&["never"], "avoid"),
    (&["must"], "should"),
    (&["always"], "usually"),
    (&["required"], "recommended"),
];

/// A run of word characters or of everything else.
#[derive(Debug, Clone, PartialEq)]
enum Piece {
    Word(String),
    Gap(String),
}

fn pieces(text: &str) -> Vec<Piece> {
    let is_word = |c: char| c.is_alphanumeric() || c == '_';
    let mut out: Vec<Piece> = Vec::new();
    for c in text.chars() {
        match (out.last_mut(), is_word(c)) {
            (Some(Piece::Word(w)), true) => w.push(c),
            (Some(Piece::Gap(g)), false) => g.push(c),
            (_, true) => out.push(Piece::Word(c.to_string())),
            (_, false) => out.push(Piece::Gap(c.to_string())),
        }
    }
    out
}

/// Length in pieces of a match of `words` starting at `pieces[start]`.
/// Words in a multi-word form are separated by exactly one space.
fn match_len(pieces: &[Piece], start: usize, words: &[&str]) -> Option<usize> {
    let mut i = start;
    for (n, expected) in words.iter().enumerate() {
        if n > 0 {
            match pieces.get(i) {
                Some(Piece::Gap(g)) if g == " " => i += 1,
                _ => return None,
            }
        }
        match pieces.get(i) {
            Some(Piece::Word(w)) if w.eq_ignore_ascii_case(expected) => i += 1,
            _ => return None,
        }
    }
    Some(i - start)
}

fn replace_form(text: &str, words: &[&str], replacement: &str) -> String {
    let pieces = pieces(text);
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < pieces.len() {
        if let Some(len) = match_len(&pieces, i, words) {
            out.push_str(replacement);
            i += len;
            continue;
        }
        match &pieces[i] {
            Piece::Word(s) | Piece::Gap(s) => out.push_str(s),
        }
        i += 1;
    }
    out
}

/// Soften prescriptive wording so a rule reads as a hint in its new pool.
///
/// Whole words only, case-insensitive; replacements are lowercase.
pub fn translate(text: &str) -> String {
    NEUTRAL_FORMS
        .iter()
        .fold(text.to_string(), |acc, (words, replacement)| {
            replace_form(&acc, words, replacement)
        })
}

pub struct TeachingApi {
    store: Arc<KnowledgeStore>,
    suggestions: Arc<SuggestionStore>,
}

impl TeachingApi {
    pub fn new(store: Arc<KnowledgeStore>, suggestions: Arc<SuggestionStore>) -> Self {
        Self { store, suggestions }
    }

    /// Suggest an existing bullet to another pool.
    ///
    /// Fails with `NotFound` for an unknown bullet and `AlreadyExists` when
    /// the bullet already has an active suggestion for `to_pool`.
    pub fn teach_bullet(
        &self,
        from_pool: Pool,
        to_pool: Pool,
        bullet_id: &str,
        translate_text: bool,
        reason: &str,
    ) -> Result<Suggestion> {
        let bullet = self
            .store
            .find(bullet_id)?
            .ok_or_else(|| CortexError::not_found("bullet", bullet_id))?;
        let text = if translate_text {
            translate(&bullet.text)
        } else {
            bullet.text.clone()
        };
        let suggestion = self.suggestions.create(
            Suggestion::new(from_pool, to_pool, bullet_id, text)
                .with_tags(bullet.tags)
                .with_reason(reason),
        )?;
        tracing::info!(
            suggestion_id = %suggestion.id,
            bullet_id,
            %from_pool,
            %to_pool,
            "bullet taught"
        );
        Ok(suggestion)
    }

    /// Suggest free text that has no origin bullet.
    pub fn teach_text(
        &self,
        from_pool: Pool,
        to_pool: Pool,
        text: &str,
        tags: Vec<String>,
        translate_text: bool,
        reason: &str,
    ) -> Result<Suggestion> {
        let text = if translate_text {
            translate(text)
        } else {
            text.to_string()
        };
        let suggestion = self.suggestions.create(
            Suggestion::new(from_pool, to_pool, "", text)
                .with_tags(tags)
                .with_reason(reason),
        )?;
        tracing::info!(suggestion_id = %suggestion.id, %from_pool, %to_pool, "text taught");
        Ok(suggestion)
    }
}
