//! Delivering pending suggestions into their target pool.
//!
//! Delivery happens between tasks: only when the controller reports low
//! pressure (and idleness, if configured), a few suggestions at a time.
//! Each delivered suggestion becomes a quarantined bullet in the target
//! pool that has to earn activation like any other.

use std::sync::Arc;

use serde_json::Value;

use super::conflict::ConflictDetector;
use super::diversity::DiversityMetrics;
use super::suggestions::{Suggestion, SuggestionStore};
use crate::config::{Config, SuggestionsConfig};
use crate::core::{BulletKind, BulletStatus, Metadata, Pool};
use crate::error::{CortexError, Result};
use crate::memory::{KnowledgeStore, NewBullet};
use crate::meta::TickProfile;
use crate::util::word_jaccard;

/// Tag carried by every taught bullet.
pub const TAUGHT_TAG: &str = "taught";
/// Word overlap at which a target-pool bullet counts as already known.
pub const EQUIVALENCE_THRESHOLD: f64 = 0.9;
/// Same-pool bullets checked for contradictions.
const CONFLICT_CANDIDATES: usize = 20;
const EQUIVALENCE_CANDIDATES: usize = 5;

/// Whether the system is calm enough to accept taught knowledge.
pub fn can_deliver(profile: &TickProfile, config: &SuggestionsConfig) -> bool {
    if !config.enabled {
        return false;
    }
    if config.deliver_when_idle && !profile.is_idle {
        return false;
    }
    profile.pressure <= config.max_pressure
}

pub struct SuggestionDelivery {
    store: Arc<KnowledgeStore>,
    suggestions: Arc<SuggestionStore>,
    config: SuggestionsConfig,
    conflicts: ConflictDetector,
    diversity: DiversityMetrics,
}

impl SuggestionDelivery {
    pub fn new(
        store: Arc<KnowledgeStore>,
        suggestions: Arc<SuggestionStore>,
        config: &Config,
    ) -> Self {
        Self {
            store,
            suggestions,
            config: config.suggestions.clone(),
            conflicts: ConflictDetector::new(&config.conflicts),
            diversity: DiversityMetrics::new(&config.diversity),
        }
    }

    /// Deliver up to `limit` (default: the configured budget) pending
    /// suggestions, oldest first. Returns the ones delivered.
    ///
    /// Rejected suggestions (same source and target, or already known in
    /// the target) are resolved and do not count as delivered.
    pub async fn deliver_pending(
        &self,
        profile: &TickProfile,
        to_pool: Option<Pool>,
        limit: Option<usize>,
    ) -> Result<Vec<Suggestion>> {
        if !can_deliver(profile, &self.config) {
            return Ok(Vec::new());
        }

        if self.diversity.throttles() {
            let report = self.diversity.compute(&self.store, 200).await?;
            if report.converged {
                tracing::info!(
                    tag_divergence = report.tag_divergence,
                    "pools converged, holding suggestions"
                );
                return Ok(Vec::new());
            }
        }

        if self.config.expiry_days > 0 {
            self.suggestions.expire_old(self.config.expiry_days)?;
        }

        let limit = limit.unwrap_or(self.config.deliver_budget);
        let mut delivered = Vec::new();
        for suggestion in self.suggestions.list_pending(to_pool)?.into_iter().take(limit) {
            if suggestion.from_pool == suggestion.to_pool {
                self.suggestions.resolve(&suggestion.id, false, "invalid_target")?;
                continue;
            }
            if self.has_equivalent(&suggestion).await? {
                self.suggestions
                    .resolve(&suggestion.id, false, "duplicate_in_target")?;
                continue;
            }

            match self.suggestions.claim_delivery(&suggestion.id) {
                Ok(_) => {}
                Err(CortexError::InvalidState { message }) => {
                    tracing::debug!(
                        suggestion_id = %suggestion.id,
                        %message,
                        "suggestion no longer pending"
                    );
                    continue;
                }
                Err(e) => return Err(e),
            }
            let bullet_id = match self.apply(&suggestion).await {
                Ok(id) => id,
                Err(e) => {
                    if let Err(release) = self.suggestions.release_claim(&suggestion.id) {
                        tracing::warn!(
                            suggestion_id = %suggestion.id,
                            error = %release,
                            "failed to release delivery claim"
                        );
                    }
                    return Err(e);
                }
            };
            delivered.push(self.suggestions.mark_delivered(&suggestion.id, Some(&bullet_id))?);
            tracing::info!(
                suggestion_id = %suggestion.id,
                bullet_id = %bullet_id,
                to_pool = %suggestion.to_pool,
                "suggestion delivered"
            );
        }
        Ok(delivered)
    }

    async fn has_equivalent(&self, suggestion: &Suggestion) -> Result<bool> {
        let candidates = self
            .store
            .similar(&suggestion.text, suggestion.to_pool, EQUIVALENCE_CANDIDATES)
            .await?;
        Ok(candidates
            .iter()
            .any(|b| word_jaccard(&b.text, &suggestion.text) >= EQUIVALENCE_THRESHOLD))
    }

    /// Add the taught bullet and flag contradictions. Returns its id.
    async fn apply(&self, suggestion: &Suggestion) -> Result<String> {
        let kind = match self.store.find(&suggestion.origin_bullet_id)? {
            Some(origin) => origin.kind,
            None => BulletKind::Heuristic,
        };

        let mut tags = suggestion.tags.clone();
        if !tags.iter().any(|t| t == TAUGHT_TAG) {
            tags.push(TAUGHT_TAG.to_string());
        }
        let mut metadata = Metadata::new();
        metadata.insert("suggestion_id".into(), Value::from(suggestion.id.clone()));
        metadata.insert(
            "origin_bullet_id".into(),
            Value::from(suggestion.origin_bullet_id.clone()),
        );
        metadata.insert(
            "taught_from".into(),
            Value::from(suggestion.from_pool.as_str()),
        );

        let bullet = self
            .store
            .add(
                NewBullet::new(&suggestion.text, suggestion.to_pool, kind)
                    .with_tags(tags)
                    .with_confidence(0.5)
                    .with_status(BulletStatus::Quarantined)
                    .with_metadata(metadata),
            )
            .await?;

        if self.conflicts.enabled() {
            let existing: Vec<_> = self
                .store
                .similar(&bullet.text, bullet.pool, CONFLICT_CANDIDATES + 1)
                .await?
                .into_iter()
                .filter(|b| b.id != bullet.id)
                .take(CONFLICT_CANDIDATES)
                .collect();
            let conflicting: Vec<Value> = self
                .conflicts
                .find_conflicts(&bullet.text, &existing)
                .into_iter()
                .map(|b| Value::from(b.id.clone()))
                .collect();
            if !conflicting.is_empty() {
                tracing::warn!(
                    bullet_id = %bullet.id,
                    conflicts = conflicting.len(),
                    "taught bullet contradicts existing knowledge"
                );
                let mut patch = Metadata::new();
                patch.insert("conflicts_with".into(), Value::Array(conflicting));
                self.store.update_metadata(&bullet.id, patch)?;
            }
        }
        Ok(bullet.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::store::tests::{add, test_store};
    use crate::teaching::suggestions::SuggestionStatus;
    use tempfile::TempDir;

    fn idle() -> TickProfile {
        TickProfile {
            is_idle: true,
            ..Default::default()
        }
    }

    struct Fixture {
        _temp: TempDir,
        store: Arc<KnowledgeStore>,
        suggestions: Arc<SuggestionStore>,
        delivery: SuggestionDelivery,
    }

    fn fixture(config: Config) -> Fixture {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(test_store());
        let suggestions = Arc::new(SuggestionStore::in_dir(temp.path()));
        let delivery = SuggestionDelivery::new(Arc::clone(&store), Arc::clone(&suggestions), &config);
        Fixture {
            _temp: temp,
            store,
            suggestions,
            delivery,
        }
    }

    fn no_throttle() -> Config {
        let mut config = Config::default();
        config.diversity.throttle_on_convergence = false;
        config
    }

    #[test]
    fn test_can_deliver_gates() {
        let config = SuggestionsConfig::default();
        assert!(can_deliver(&idle(), &config));
        assert!(!can_deliver(&TickProfile::default(), &config));
        let busy = TickProfile {
            is_idle: true,
            pressure: 0.5,
            ..Default::default()
        };
        assert!(!can_deliver(&busy, &config));

        let anytime = SuggestionsConfig {
            deliver_when_idle: false,
            ..Default::default()
        };
        assert!(can_deliver(&TickProfile::default(), &anytime));
        let off = SuggestionsConfig {
            enabled: false,
            ..Default::default()
        };
        assert!(!can_deliver(&idle(), &off));
    }

    #[tokio::test]
    async fn test_delivers_quarantined_copy() {
        let f = fixture(no_throttle());
        let origin = add(&f.store, "Validate request payloads before parsing", Pool::Left).await;
        let s = f
            .suggestions
            .create(
                Suggestion::new(Pool::Left, Pool::Right, &origin.id, &origin.text)
                    .with_tags(vec!["validation".into()]),
            )
            .unwrap();

        let delivered = f.delivery.deliver_pending(&idle(), None, None).await.unwrap();
        assert_eq!(delivered.len(), 1);
        let bullet_id = delivered[0].delivered_bullet_id.clone().unwrap();
        let bullet = f.store.get(&bullet_id).unwrap();
        assert_eq!(bullet.pool, Pool::Right);
        assert_eq!(bullet.status, BulletStatus::Quarantined);
        assert!(bullet.tags.contains(&"taught".to_string()));
        assert_eq!(bullet.metadata["suggestion_id"], Value::from(s.id.clone()));
        assert_eq!(bullet.metadata["taught_from"], Value::from("left"));
        assert_eq!(
            f.suggestions.get(&s.id).unwrap().status,
            SuggestionStatus::Delivered
        );
    }

    #[tokio::test]
    async fn test_rejections() {
        let f = fixture(no_throttle());
        add(&f.store, "Profile before optimizing hot loops", Pool::Right).await;
        let dup = f
            .suggestions
            .create(Suggestion::new(
                Pool::Left,
                Pool::Right,
                "pb_left_x",
                "profile before optimizing hot loops",
            ))
            .unwrap();
        let same = f
            .suggestions
            .create(Suggestion::new(Pool::Left, Pool::Left, "pb_left_y", "Anything at all here"))
            .unwrap();

        let delivered = f.delivery.deliver_pending(&idle(), None, Some(5)).await.unwrap();
        assert!(delivered.is_empty());
        let dup = f.suggestions.get(&dup.id).unwrap();
        assert_eq!(dup.status, SuggestionStatus::Rejected);
        assert_eq!(dup.resolution_reason, "duplicate_in_target");
        assert_eq!(
            f.suggestions.get(&same.id).unwrap().resolution_reason,
            "invalid_target"
        );
    }

    #[tokio::test]
    async fn test_budget_and_gate() {
        let f = fixture(no_throttle());
        for text in ["Write the failing test first", "Keep functions small and focused"] {
            f.suggestions
                .create(Suggestion::new(Pool::Left, Pool::Right, "", text))
                .unwrap();
        }
        assert!(f
            .delivery
            .deliver_pending(&TickProfile::default(), None, None)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            f.delivery.deliver_pending(&idle(), None, None).await.unwrap().len(),
            1
        );
        assert_eq!(f.suggestions.list_pending(None).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_conflicts_flagged() {
        let f = fixture(no_throttle());
        let existing = add(&f.store, "Never retry failed payments automatically", Pool::Right).await;
        f.suggestions
            .create(Suggestion::new(
                Pool::Left,
                Pool::Right,
                "",
                "Always retry failed payments automatically",
            ))
            .unwrap();

        let delivered = f.delivery.deliver_pending(&idle(), None, None).await.unwrap();
        let bullet = f
            .store
            .get(delivered[0].delivered_bullet_id.as_deref().unwrap())
            .unwrap();
        assert_eq!(
            bullet.metadata["conflicts_with"],
            Value::Array(vec![Value::from(existing.id)])
        );
    }

    #[tokio::test]
    async fn test_converged_pools_hold_delivery() {
        // identical tag distributions: divergence 0
        let f = fixture(Config::default());
        for pool in [Pool::Left, Pool::Right] {
            f.store
                .add(
                    NewBullet::new("Shared habit of checking logs", pool, BulletKind::Heuristic)
                        .with_tags(vec!["logs".into()]),
                )
                .await
                .unwrap();
        }
        f.suggestions
            .create(Suggestion::new(Pool::Left, Pool::Right, "", "Read the error message twice"))
            .unwrap();
        assert!(f
            .delivery
            .deliver_pending(&idle(), None, None)
            .await
            .unwrap()
            .is_empty());
    }
}
