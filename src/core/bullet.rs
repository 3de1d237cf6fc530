//! Bullet entity types.
//!
//! A bullet is one atomic piece of procedural knowledge. It belongs to a
//! single pool for its whole life, carries outcome counters that only ever
//! grow, and moves through a small lifecycle (quarantined, active,
//! deprecated). Promotion never moves a bullet: it creates a shared copy.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CortexError;

/// Free-form metadata attached to bullets and suggestions.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Score weight for each helpful outcome.
pub const HELPFUL_WEIGHT: f64 = 0.05;

/// Score penalty for each harmful outcome.
pub const HARMFUL_WEIGHT: f64 = 0.10;

/// Confidence floor applied to bullets copied into the shared pool.
pub const SHARED_CONFIDENCE_FLOOR: f64 = 0.8;

// =============================================================================
// Pool
// =============================================================================

/// Knowledge pool a bullet lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pool {
    /// Pattern continuity: rules, validation, procedures.
    Left,
    /// Pattern violation: exploration, alternatives, anomalies.
    Right,
    /// Consensus knowledge validated in one of the other pools.
    Shared,
}

impl Pool {
    pub fn all() -> &'static [Pool] {
        &[Pool::Left, Pool::Right, Pool::Shared]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Pool::Left => "left",
            Pool::Right => "right",
            Pool::Shared => "shared",
        }
    }

    /// The other pool of the left/right pair. Shared maps to itself.
    pub fn opposite(&self) -> Pool {
        match self {
            Pool::Left => Pool::Right,
            Pool::Right => Pool::Left,
            Pool::Shared => Pool::Shared,
        }
    }
}

impl fmt::Display for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Pool {
    type Err = CortexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "left" => Ok(Pool::Left),
            "right" => Ok(Pool::Right),
            "shared" => Ok(Pool::Shared),
            other => Err(CortexError::invalid_policy("pool", other)),
        }
    }
}

// =============================================================================
// Kind and status
// =============================================================================

/// What sort of knowledge a bullet encodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulletKind {
    ToolRule,
    Heuristic,
    Checklist,
    Pitfall,
    Template,
    Example,
    Pattern,
    Concept,
}

impl BulletKind {
    pub fn all() -> &'static [BulletKind] {
        &[
            BulletKind::ToolRule,
            BulletKind::Heuristic,
            BulletKind::Checklist,
            BulletKind::Pitfall,
            BulletKind::Template,
            BulletKind::Example,
            BulletKind::Pattern,
            BulletKind::Concept,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BulletKind::ToolRule => "tool_rule",
            BulletKind::Heuristic => "heuristic",
            BulletKind::Checklist => "checklist",
            BulletKind::Pitfall => "pitfall",
            BulletKind::Template => "template",
            BulletKind::Example => "example",
            BulletKind::Pattern => "pattern",
            BulletKind::Concept => "concept",
        }
    }

    /// Section heading used when rendering a playbook.
    pub fn section_title(&self) -> &'static str {
        match self {
            BulletKind::ToolRule => "TOOL USAGE RULES",
            BulletKind::Heuristic => "STRATEGIES AND HEURISTICS",
            BulletKind::Checklist => "CHECKLISTS",
            BulletKind::Pitfall => "COMMON MISTAKES TO AVOID",
            BulletKind::Template => "USEFUL CODE SNIPPETS AND TEMPLATES",
            BulletKind::Example => "CONCRETE EXAMPLES",
            BulletKind::Pattern => "RECOGNIZED PATTERNS",
            BulletKind::Concept => "DOMAIN CONCEPTS",
        }
    }
}

impl fmt::Display for BulletKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BulletKind {
    type Err = CortexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        BulletKind::all()
            .iter()
            .copied()
            .find(|k| k.as_str() == wanted)
            .ok_or_else(|| CortexError::invalid_policy("bullet kind", s))
    }
}

/// Lifecycle status of a bullet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BulletStatus {
    /// Provisional, awaiting outcome validation.
    Quarantined,
    /// Trusted and retrievable.
    Active,
    /// Soft-deleted; excluded from retrieval.
    Deprecated,
}

impl BulletStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BulletStatus::Quarantined => "quarantined",
            BulletStatus::Active => "active",
            BulletStatus::Deprecated => "deprecated",
        }
    }
}

impl fmt::Display for BulletStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BulletStatus {
    type Err = CortexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "quarantined" => Ok(BulletStatus::Quarantined),
            "active" => Ok(BulletStatus::Active),
            "deprecated" => Ok(BulletStatus::Deprecated),
            other => Err(CortexError::invalid_policy("bullet status", other)),
        }
    }
}

// =============================================================================
// Bullet
// =============================================================================

/// Atomic unit of procedural knowledge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bullet {
    /// Unique identifier (format: pb_{pool}_{millis}_{suffix}).
    pub id: String,
    pub text: String,
    pub pool: Pool,
    pub kind: BulletKind,
    pub tags: Vec<String>,
    pub status: BulletStatus,
    pub confidence: f64,
    pub helpful_count: u32,
    pub harmful_count: u32,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    /// Trace that produced this bullet (empty for manual entries).
    #[serde(default)]
    pub source_trace_id: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Bullet {
    /// Create a quarantined bullet with a fresh id.
    pub fn new(text: impl Into<String>, pool: Pool, kind: BulletKind) -> Self {
        Self {
            id: generate_bullet_id(pool),
            text: text.into().trim().to_string(),
            pool,
            kind,
            tags: Vec::new(),
            status: BulletStatus::Quarantined,
            confidence: 0.5,
            helpful_count: 0,
            harmful_count: 0,
            created_at: Utc::now(),
            last_used_at: None,
            source_trace_id: String::new(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_status(mut self, status: BulletStatus) -> Self {
        self.status = status;
        self
    }

    /// Set the confidence, clamped to [0, 1].
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = clamp_unit(confidence);
        self
    }

    pub fn with_source_trace(mut self, trace_id: impl Into<String>) -> Self {
        self.source_trace_id = trace_id.into();
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Ranking score: confidence plus an asymmetric outcome adjustment.
    pub fn score(&self) -> f64 {
        self.confidence + HELPFUL_WEIGHT * self.helpful_count as f64
            - HARMFUL_WEIGHT * self.harmful_count as f64
    }

    pub fn usage_count(&self) -> u32 {
        self.helpful_count + self.harmful_count
    }

    /// Fraction of outcomes that were helpful, 0.0 when never used.
    pub fn helpful_ratio(&self) -> f64 {
        let total = self.usage_count();
        if total == 0 {
            0.0
        } else {
            self.helpful_count as f64 / total as f64
        }
    }

    /// Age in fractional days at `now`.
    pub fn age_days(&self, now: DateTime<Utc>) -> f64 {
        (now - self.created_at).num_seconds().max(0) as f64 / 86_400.0
    }

    /// Record one outcome. Counters only ever increase.
    pub fn mark(&mut self, helpful: bool) {
        if helpful {
            self.helpful_count = self.helpful_count.saturating_add(1);
        } else {
            self.harmful_count = self.harmful_count.saturating_add(1);
        }
    }

    /// Quarantined bullet with enough clean positive evidence.
    pub fn should_activate(&self, activation_threshold: u32) -> bool {
        self.status == BulletStatus::Quarantined
            && self.helpful_count >= activation_threshold
            && self.harmful_count == 0
    }

    /// Active pool-local bullet ready to be copied into the shared pool.
    pub fn should_promote(&self, promotion_threshold: u32) -> bool {
        self.status == BulletStatus::Active
            && self.pool != Pool::Shared
            && self.helpful_count >= promotion_threshold
            && self.harmful_count == 0
    }

    /// Id used for this bullet's shared-pool copy.
    pub fn shared_copy_id(&self) -> String {
        format!("shared__{}", self.id)
    }

    /// Build the shared-pool copy of this bullet.
    ///
    /// The copy keeps text, kind, counters and timestamps, gains a provenance
    /// tag and `promoted_from` metadata, and is active with confidence
    /// floored at [`SHARED_CONFIDENCE_FLOOR`].
    pub fn promoted_copy(&self) -> Bullet {
        let mut tags = self.tags.clone();
        let provenance = format!("promoted-from-{}", self.pool);
        if !tags.contains(&provenance) {
            tags.push(provenance);
        }
        let mut metadata = self.metadata.clone();
        metadata.insert("promoted_from".to_string(), self.id.clone().into());
        Bullet {
            id: self.shared_copy_id(),
            text: self.text.clone(),
            pool: Pool::Shared,
            kind: self.kind,
            tags,
            status: BulletStatus::Active,
            confidence: self.confidence.max(SHARED_CONFIDENCE_FLOOR),
            helpful_count: self.helpful_count,
            harmful_count: self.harmful_count,
            created_at: self.created_at,
            last_used_at: self.last_used_at,
            source_trace_id: if self.source_trace_id.is_empty() {
                format!("promoted_from:{}", self.pool)
            } else {
                self.source_trace_id.clone()
            },
            metadata,
        }
    }

    /// Lowercased, whitespace-collapsed text used for exact dedup.
    pub fn normalized_text(&self) -> String {
        normalize_text(&self.text)
    }
}

/// Generate a bullet id: `pb_{pool}_{unix_millis}_{8 hex}`.
pub fn generate_bullet_id(pool: Pool) -> String {
    let millis = Utc::now().timestamp_millis();
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("pb_{}_{}_{}", pool, millis, &suffix[..8])
}

/// Lowercase and collapse whitespace.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

pub(crate) fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
