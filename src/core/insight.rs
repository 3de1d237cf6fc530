//! Reflection insights.
//!
//! Insights are transient: the reflector produces them and the curator
//! either turns them into bullets or drops them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::bullet::{clamp_unit, BulletKind};
use crate::error::CortexError;

/// Kind of insight extracted by reflection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightKind {
    Strategy,
    Pitfall,
    Pattern,
    ToolRule,
    Heuristic,
    EdgeCase,
}

impl InsightKind {
    pub fn all() -> &'static [InsightKind] {
        &[
            InsightKind::Strategy,
            InsightKind::Pitfall,
            InsightKind::Pattern,
            InsightKind::ToolRule,
            InsightKind::Heuristic,
            InsightKind::EdgeCase,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InsightKind::Strategy => "strategy",
            InsightKind::Pitfall => "pitfall",
            InsightKind::Pattern => "pattern",
            InsightKind::ToolRule => "tool_rule",
            InsightKind::Heuristic => "heuristic",
            InsightKind::EdgeCase => "edge_case",
        }
    }

    /// Bullet kind an insight of this kind is stored as.
    pub fn bullet_kind(&self) -> BulletKind {
        match self {
            InsightKind::Strategy => BulletKind::Heuristic,
            InsightKind::Pitfall => BulletKind::Pitfall,
            InsightKind::Pattern => BulletKind::Pattern,
            InsightKind::ToolRule => BulletKind::ToolRule,
            InsightKind::Heuristic => BulletKind::Heuristic,
            InsightKind::EdgeCase => BulletKind::Pitfall,
        }
    }
}

impl fmt::Display for InsightKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InsightKind {
    type Err = CortexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        InsightKind::all()
            .iter()
            .copied()
            .find(|k| k.as_str() == wanted)
            .ok_or_else(|| CortexError::invalid_policy("insight kind", s))
    }
}

/// Priority hint carried by an insight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    /// Lenient parse: unknown values become medium.
    pub fn parse_lenient(value: &str) -> Priority {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Priority::Low,
            "high" => Priority::High,
            _ => Priority::Medium,
        }
    }
}

/// How deeply to reflect on a trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReflectionDepth {
    None,
    Shallow,
    Medium,
    Deep,
}

impl ReflectionDepth {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReflectionDepth::None => "none",
            ReflectionDepth::Shallow => "shallow",
            ReflectionDepth::Medium => "medium",
            ReflectionDepth::Deep => "deep",
        }
    }
}

impl fmt::Display for ReflectionDepth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Candidate knowledge produced by reflection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReflectionInsight {
    pub kind: InsightKind,
    pub text: String,
    pub confidence: f64,
    pub evidence: Vec<String>,
    pub tags: Vec<String>,
    pub priority: Priority,
    pub source_trace_id: String,
}

impl ReflectionInsight {
    pub fn new(kind: InsightKind, text: impl Into<String>, confidence: f64) -> Self {
        Self {
            kind,
            text: text.into(),
            confidence: clamp_unit(confidence),
            evidence: Vec::new(),
            tags: Vec::new(),
            priority: Priority::Medium,
            source_trace_id: String::new(),
        }
    }

    pub fn with_tags<S: Into<String>>(mut self, tags: impl IntoIterator<Item = S>) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_evidence(mut self, evidence: impl Into<String>) -> Self {
        self.evidence.push(evidence.into());
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_trace(mut self, trace_id: impl Into<String>) -> Self {
        self.source_trace_id = trace_id.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insight_to_bullet_kind_mapping() {
        assert_eq!(InsightKind::Strategy.bullet_kind(), BulletKind::Heuristic);
        assert_eq!(InsightKind::EdgeCase.bullet_kind(), BulletKind::Pitfall);
        assert_eq!(InsightKind::ToolRule.bullet_kind(), BulletKind::ToolRule);
        assert_eq!(InsightKind::Pattern.bullet_kind(), BulletKind::Pattern);
    }

    #[test]
    fn test_parse_insight_kind() {
        assert_eq!("edge-case".parse::<InsightKind>().unwrap(), InsightKind::EdgeCase);
        assert_eq!("TOOL_RULE".parse::<InsightKind>().unwrap(), InsightKind::ToolRule);
        assert!("musing".parse::<InsightKind>().is_err());
    }

    #[test]
    fn test_priority_lenient() {
        assert_eq!(Priority::parse_lenient("HIGH"), Priority::High);
        assert_eq!(Priority::parse_lenient("urgent"), Priority::Medium);
    }

    #[test]
    fn test_confidence_clamped() {
        let insight = ReflectionInsight::new(InsightKind::Pitfall, "x", -0.3);
        assert_eq!(insight.confidence, 0.0);
    }
}
