//! Bullet quality analysis for pruning.
//!
//! Pure functions over a bullet's usage history. Nothing here touches the
//! store or fails.
//!
//! A bullet is low quality when any of these hold under the chosen policy:
//! 1. `harmful_ratio_exceeded`: used, and harmful > helpful * ratio
//! 2. `never_used_and_old`: never used and older than the never-used age
//! 3. `quarantine_expired`: still quarantined past the quarantine age
//! 4. `low_confidence_and_stale`: confidence < 0.2, never used, older than
//!    the low-confidence age

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{Bullet, BulletStatus};
use crate::error::CortexError;

/// Confidence below which an unused bullet counts as low confidence.
pub const LOW_CONFIDENCE_THRESHOLD: f64 = 0.2;

/// Named pruning policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrunePolicy {
    Aggressive,
    #[default]
    Balanced,
    Conservative,
}

/// Thresholds a policy applies. Ages are whole days.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolicyThresholds {
    pub harmful_ratio: f64,
    pub never_used_age: i64,
    pub quarantine_age: i64,
    pub low_confidence_age: i64,
}

impl PrunePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aggressive => "aggressive",
            Self::Balanced => "balanced",
            Self::Conservative => "conservative",
        }
    }

    pub fn thresholds(&self) -> PolicyThresholds {
        match self {
            Self::Aggressive => PolicyThresholds {
                harmful_ratio: 1.0,
                never_used_age: 7,
                quarantine_age: 14,
                low_confidence_age: 7,
            },
            Self::Balanced => PolicyThresholds {
                harmful_ratio: 1.5,
                never_used_age: 14,
                quarantine_age: 30,
                low_confidence_age: 14,
            },
            Self::Conservative => PolicyThresholds {
                harmful_ratio: 2.0,
                never_used_age: 30,
                quarantine_age: 60,
                low_confidence_age: 30,
            },
        }
    }
}

impl fmt::Display for PrunePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PrunePolicy {
    type Err = CortexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aggressive" => Ok(Self::Aggressive),
            "balanced" => Ok(Self::Balanced),
            "conservative" => Ok(Self::Conservative),
            other => Err(CortexError::invalid_policy("prune policy", other)),
        }
    }
}

/// Why a bullet is a prune candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PruneReason {
    HarmfulRatioExceeded,
    NeverUsedAndOld,
    QuarantineExpired,
    LowConfidenceAndStale,
}

impl PruneReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HarmfulRatioExceeded => "harmful_ratio_exceeded",
            Self::NeverUsedAndOld => "never_used_and_old",
            Self::QuarantineExpired => "quarantine_expired",
            Self::LowConfidenceAndStale => "low_confidence_and_stale",
        }
    }
}

impl fmt::Display for PruneReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PruneReason {
    type Err = CortexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        [
            Self::HarmfulRatioExceeded,
            Self::NeverUsedAndOld,
            Self::QuarantineExpired,
            Self::LowConfidenceAndStale,
        ]
        .into_iter()
        .find(|r| r.as_str() == wanted)
        .ok_or_else(|| CortexError::invalid_policy("prune reason", s))
    }
}

/// Quality evaluation of one bullet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub bullet_id: String,
    pub quality_score: f64,
    pub usage: u32,
    pub helpful_ratio: f64,
    pub age_days: i64,
    pub days_since_used: Option<i64>,
    pub is_low_quality: bool,
    pub reasons: Vec<PruneReason>,
}

/// Evaluate a bullet under `policy` as of `now`.
pub fn analyze(bullet: &Bullet, policy: PrunePolicy, now: DateTime<Utc>) -> QualityMetrics {
    let age_days = (now - bullet.created_at).num_days();
    let usage = bullet.usage_count();
    let reasons = prune_reasons(bullet, policy, age_days);

    QualityMetrics {
        bullet_id: bullet.id.clone(),
        quality_score: quality_score(bullet),
        usage,
        helpful_ratio: bullet.helpful_ratio(),
        age_days,
        days_since_used: bullet.last_used_at.map(|t| (now - t).num_days()),
        is_low_quality: !reasons.is_empty(),
        reasons,
    }
}

fn prune_reasons(bullet: &Bullet, policy: PrunePolicy, age_days: i64) -> Vec<PruneReason> {
    let t = policy.thresholds();
    let uses = bullet.usage_count();
    let mut reasons = Vec::new();

    if uses > 0 && bullet.harmful_count as f64 > bullet.helpful_count as f64 * t.harmful_ratio {
        reasons.push(PruneReason::HarmfulRatioExceeded);
    }
    if uses == 0 && age_days > t.never_used_age {
        reasons.push(PruneReason::NeverUsedAndOld);
    }
    if bullet.status == BulletStatus::Quarantined && age_days > t.quarantine_age {
        reasons.push(PruneReason::QuarantineExpired);
    }
    if bullet.confidence < LOW_CONFIDENCE_THRESHOLD && uses == 0 && age_days > t.low_confidence_age
    {
        reasons.push(PruneReason::LowConfidenceAndStale);
    }
    reasons
}

/// Overall quality in [0, 1]. Unused bullets are capped at half their confidence.
pub fn quality_score(bullet: &Bullet) -> f64 {
    let uses = bullet.usage_count();
    if uses == 0 {
        return bullet.confidence * 0.5;
    }
    let usage_weight = ((uses as f64).ln_1p() / 10.0).min(1.0);
    let score = bullet.helpful_ratio() * 0.5 + usage_weight * 0.3 + bullet.confidence * 0.2;
    score.clamp(0.0, 1.0)
}

/// Bullets that are low quality under `policy`, paired with their metrics.
pub fn find_low_quality<'a>(
    bullets: &'a [Bullet],
    policy: PrunePolicy,
    now: DateTime<Utc>,
) -> Vec<(&'a Bullet, QualityMetrics)> {
    let found: Vec<_> = bullets
        .iter()
        .map(|b| (b, analyze(b, policy, now)))
        .filter(|(_, m)| m.is_low_quality)
        .collect();
    tracing::debug!(
        analyzed = bullets.len(),
        low_quality = found.len(),
        policy = %policy,
        "quality analysis"
    );
    found
}

/// Bucket names in display order.
pub const QUALITY_BUCKETS: &[&str] = &["excellent", "good", "fair", "poor", "very_poor"];

/// Count of bullets per quality bucket.
pub fn quality_distribution(bullets: &[Bullet]) -> BTreeMap<&'static str, usize> {
    let mut distribution: BTreeMap<&'static str, usize> =
        QUALITY_BUCKETS.iter().map(|b| (*b, 0)).collect();
    for bullet in bullets {
        let score = quality_score(bullet);
        let bucket = if score >= 0.8 {
            "excellent"
        } else if score >= 0.6 {
            "good"
        } else if score >= 0.4 {
            "fair"
        } else if score >= 0.2 {
            "poor"
        } else {
            "very_poor"
        };
        *distribution.entry(bucket).or_insert(0) += 1;
    }
    distribution
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{BulletKind, Pool};
    use chrono::Duration;
    use proptest::prelude::*;

    fn bullet_aged(days: i64) -> Bullet {
        Bullet::new("some rule", Pool::Left, BulletKind::Heuristic)
            .with_created_at(Utc::now() - Duration::days(days))
    }

    #[test]
    fn test_policy_parse() {
        assert_eq!("Aggressive".parse::<PrunePolicy>().unwrap(), PrunePolicy::Aggressive);
        assert!("reckless".parse::<PrunePolicy>().is_err());
        assert_eq!(PrunePolicy::default(), PrunePolicy::Balanced);
    }

    #[test]
    fn test_never_used_and_quarantine_by_policy() {
        let now = Utc::now();
        let b = bullet_aged(10);

        let aggressive = analyze(&b, PrunePolicy::Aggressive, now);
        assert_eq!(aggressive.reasons, vec![PruneReason::NeverUsedAndOld]);

        let balanced = analyze(&b, PrunePolicy::Balanced, now);
        assert!(!balanced.is_low_quality);

        let old = bullet_aged(40);
        let reasons = analyze(&old, PrunePolicy::Balanced, now).reasons;
        assert_eq!(
            reasons,
            vec![PruneReason::NeverUsedAndOld, PruneReason::QuarantineExpired]
        );
    }

    #[test]
    fn test_harmful_ratio() {
        let now = Utc::now();
        let mut b = bullet_aged(1).with_status(BulletStatus::Active);
        b.helpful_count = 2;
        b.harmful_count = 3;
        let m = analyze(&b, PrunePolicy::Balanced, now);
        assert!(m.reasons.is_empty(), "3 > 2 * 1.5 is false");

        b.harmful_count = 4;
        let m = analyze(&b, PrunePolicy::Balanced, now);
        assert_eq!(m.reasons, vec![PruneReason::HarmfulRatioExceeded]);
        assert!(analyze(&b, PrunePolicy::Conservative, now).reasons.is_empty());
    }

    #[test]
    fn test_low_confidence_and_stale() {
        let now = Utc::now();
        let b = bullet_aged(20)
            .with_confidence(0.1)
            .with_status(BulletStatus::Active);
        let m = analyze(&b, PrunePolicy::Balanced, now);
        assert!(m.reasons.contains(&PruneReason::LowConfidenceAndStale));
        assert!(m.reasons.contains(&PruneReason::NeverUsedAndOld));
    }

    #[test]
    fn test_quality_score_formula() {
        let b = bullet_aged(0).with_confidence(0.8);
        assert!((quality_score(&b) - 0.4).abs() < 1e-9);

        let mut used = bullet_aged(0).with_confidence(0.5);
        used.helpful_count = 3;
        used.harmful_count = 1;
        let expected = 0.75 * 0.5 + (4.0f64.ln_1p() / 10.0) * 0.3 + 0.5 * 0.2;
        assert!((quality_score(&used) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_find_low_quality_and_distribution() {
        let now = Utc::now();
        let mut good = bullet_aged(100).with_confidence(1.0).with_status(BulletStatus::Active);
        good.helpful_count = 50;
        let stale = bullet_aged(100).with_confidence(0.1);
        let bullets = vec![good, stale];

        let low = find_low_quality(&bullets, PrunePolicy::Balanced, now);
        assert_eq!(low.len(), 1);
        assert_eq!(low[0].0.id, bullets[1].id);

        let dist = quality_distribution(&bullets);
        assert_eq!(dist["excellent"], 1);
        assert_eq!(dist["very_poor"], 1);
        assert_eq!(dist.values().sum::<usize>(), 2);
    }

    #[test]
    fn test_reason_names() {
        assert_eq!(
            "quarantine_expired".parse::<PruneReason>().unwrap(),
            PruneReason::QuarantineExpired
        );
        assert_eq!(
            serde_json::to_value(PruneReason::NeverUsedAndOld).unwrap(),
            "never_used_and_old"
        );
    }

    proptest! {
        #[test]
        fn prop_quality_score_in_unit_range(
            confidence in 0.0f64..=1.0,
            helpful in 0u32..1000,
            harmful in 0u32..1000,
        ) {
            let mut b = Bullet::new("x", Pool::Right, BulletKind::Pattern).with_confidence(confidence);
            b.helpful_count = helpful;
            b.harmful_count = harmful;
            let s = quality_score(&b);
            prop_assert!((0.0..=1.0).contains(&s));
        }
    }
}
