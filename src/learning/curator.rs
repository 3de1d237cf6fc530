//! Curation of reflection insights into bullets.
//!
//! The curator is the only part of the learning cycle that writes to the
//! knowledge store. New bullets always start quarantined; they have to
//! earn activation through outcomes.

use std::sync::Arc;

use serde_json::Value;

use super::classifier::HemisphereClassifier;
use crate::config::{Config, CuratorConfig, SuggestionsConfig};
use crate::core::{Bullet, BulletStatus, Metadata, Pool, ReflectionInsight};
use crate::error::{CortexError, Result};
use crate::memory::{KnowledgeStore, NewBullet};
use crate::teaching::{Suggestion, SuggestionStatus, SuggestionStore};
use crate::util::word_jaccard;

/// Candidates compared when checking for duplicates.
const DUPLICATE_CANDIDATES: usize = 5;

pub const OUTCOME_REASON: &str = "suggested_from_outcome";

pub struct Curator {
    store: Arc<KnowledgeStore>,
    suggestions: Option<Arc<SuggestionStore>>,
    classifier: HemisphereClassifier,
    config: CuratorConfig,
    suggestion_config: SuggestionsConfig,
}

impl Curator {
    pub fn new(store: Arc<KnowledgeStore>, config: &Config) -> Self {
        Self {
            store,
            suggestions: None,
            classifier: HemisphereClassifier::new(config),
            config: config.curator.clone(),
            suggestion_config: config.suggestions.clone(),
        }
    }

    pub fn with_suggestions(mut self, suggestions: Arc<SuggestionStore>) -> Self {
        self.suggestions = Some(suggestions);
        self
    }

    pub fn with_classifier(mut self, classifier: HemisphereClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn store(&self) -> &Arc<KnowledgeStore> {
        &self.store
    }

    /// Whether an insight is worth a bullet at all.
    pub fn accepts(&self, insight: &ReflectionInsight) -> bool {
        if insight.confidence < self.config.min_confidence {
            tracing::debug!(confidence = insight.confidence, "skipping low-confidence insight");
            return false;
        }
        if insight.text.chars().count() < self.config.min_text_len {
            tracing::debug!("skipping trivial insight");
            return false;
        }
        true
    }

    /// Id of an existing bullet in `pool` or the shared pool with nearly the
    /// same wording.
    pub async fn find_duplicate(&self, text: &str, pool: Pool) -> Result<Option<String>> {
        let mut pools = vec![pool];
        if pool != Pool::Shared {
            pools.push(Pool::Shared);
        }
        for p in pools {
            let candidates = self.store.similar(text, p, DUPLICATE_CANDIDATES).await?;
            if let Some(existing) = candidates
                .into_iter()
                .find(|b| word_jaccard(&b.text, text) > self.config.duplicate_similarity)
            {
                return Ok(Some(existing.id));
            }
        }
        Ok(None)
    }

    /// Turn insights into quarantined bullets in `pool`.
    ///
    /// Low-quality insights and near-duplicates are skipped. With
    /// auto-assign on, a confident classification may place the bullet in
    /// the other pool; otherwise the classifier's opinion is kept in the
    /// bullet's metadata for review.
    pub async fn curate(&self, insights: &[ReflectionInsight], pool: Pool) -> Result<Vec<Bullet>> {
        let mut created = Vec::new();
        for insight in insights {
            if !self.accepts(insight) {
                continue;
            }
            if let Some(existing) = self.find_duplicate(&insight.text, pool).await? {
                tracing::debug!(existing = %existing, "duplicate insight, skipping");
                continue;
            }

            let kind = insight.kind.bullet_kind();
            let mut target = pool;
            let mut metadata = Metadata::new();
            if self.config.auto_assign && pool != Pool::Shared {
                let result = self
                    .classifier
                    .classify(&insight.text, kind, pool, &insight.tags)
                    .await;
                if result.confidence >= self.config.auto_assign_threshold && !result.ambiguous {
                    if result.pool != pool {
                        metadata.insert("classified_from".into(), Value::from(pool.as_str()));
                    }
                    target = result.pool;
                } else {
                    let priority = if result.confidence < self.config.review_threshold {
                        "high"
                    } else {
                        "medium"
                    };
                    metadata.insert(
                        "classifier_suggestion".into(),
                        Value::from(result.pool.as_str()),
                    );
                    metadata.insert("classifier_confidence".into(), Value::from(result.confidence));
                    metadata.insert("classifier_reasoning".into(), Value::from(result.reasoning));
                    metadata.insert("review_priority".into(), Value::from(priority));
                }
            }

            let mut new = NewBullet::new(&insight.text, target, kind)
                .with_tags(insight.tags.clone())
                .with_confidence(insight.confidence)
                .with_status(BulletStatus::Quarantined)
                .with_metadata(metadata);
            if !insight.source_trace_id.is_empty() {
                new = new.with_source_trace(&insight.source_trace_id);
            }
            let bullet = self.store.add(new).await?;
            tracing::info!(
                bullet_id = %bullet.id,
                kind = %bullet.kind,
                pool = %bullet.pool,
                "bullet created"
            );
            created.push(bullet);
        }
        tracing::info!(count = created.len(), %pool, "insights curated");
        Ok(created)
    }

    /// Outcome-based eligibility for teaching another pool.
    pub fn should_suggest(&self, bullet: &Bullet) -> bool {
        let c = &self.suggestion_config;
        bullet.status == BulletStatus::Active
            && bullet.helpful_count >= c.suggest_threshold
            && bullet.harmful_count <= c.harmful_tolerance
            && bullet.confidence >= c.min_confidence
    }

    async fn has_equivalent(&self, text: &str, pool: Pool) -> Result<bool> {
        Ok(self
            .store
            .similar(text, pool, DUPLICATE_CANDIDATES)
            .await?
            .iter()
            .any(|b| word_jaccard(&b.text, text) > self.config.duplicate_similarity))
    }

    fn pending_full(&self, suggestions: &SuggestionStore) -> Result<bool> {
        let max = self.suggestion_config.max_pending;
        Ok(max > 0 && suggestions.count(Some(SuggestionStatus::Pending))? >= max)
    }

    /// File suggestions for eligible bullets into the opposite pool.
    ///
    /// Shared bullets, bullets already known to the shared or target pool,
    /// and bullets with an active suggestion are skipped. Stops once the
    /// pending limit is reached.
    pub async fn generate_suggestions(
        &self,
        bullets: &[Bullet],
        from_pool: Pool,
        reason: &str,
    ) -> Result<Vec<Suggestion>> {
        let Some(suggestions) = &self.suggestions else {
            return Ok(Vec::new());
        };
        if !self.suggestion_config.enabled || from_pool == Pool::Shared {
            return Ok(Vec::new());
        }
        let target = from_pool.opposite();

        let mut created = Vec::new();
        for bullet in bullets {
            if self.pending_full(suggestions)? {
                break;
            }
            if bullet.pool == Pool::Shared || !self.should_suggest(bullet) {
                continue;
            }
            if self.has_equivalent(&bullet.text, Pool::Shared).await?
                || self.has_equivalent(&bullet.text, target).await?
                || suggestions.exists_active(&bullet.id, Some(target))?
            {
                continue;
            }

            let suggestion = Suggestion::new(from_pool, target, &bullet.id, &bullet.text)
                .with_tags(bullet.tags.clone())
                .with_reason(reason);
            match suggestions.create(suggestion) {
                Ok(s) => {
                    tracing::info!(suggestion_id = %s.id, bullet_id = %bullet.id, %target, "suggestion filed");
                    created.push(s);
                }
                Err(CortexError::AlreadyExists { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{BulletKind, InsightKind};
    use crate::memory::store::tests::{add, test_store, test_store_with};
    use tempfile::TempDir;

    fn insight(text: &str, confidence: f64) -> ReflectionInsight {
        ReflectionInsight::new(InsightKind::Strategy, text, confidence)
            .with_tags(["parsing"])
            .with_trace("trace_left_1")
    }

    fn curator(store: KnowledgeStore) -> Curator {
        Curator::new(Arc::new(store), &Config::default())
    }

    #[tokio::test]
    async fn test_curate_filters_and_creates() {
        let c = curator(test_store());
        let insights = vec![
            insight("Check table headers before parsing reports", 0.8),
            insight("Too unsure to keep around at all", 0.4),
            insight("short", 0.9),
        ];
        let created = c.curate(&insights, Pool::Left).await.unwrap();
        assert_eq!(created.len(), 1);
        let b = &created[0];
        assert_eq!(b.status, BulletStatus::Quarantined);
        assert_eq!(b.kind, BulletKind::Heuristic);
        assert_eq!(b.tags, vec!["parsing"]);
        assert_eq!(b.source_trace_id, "trace_left_1");
    }

    #[tokio::test]
    async fn test_curate_skips_duplicates() {
        let store = test_store();
        add(&store, "Check table headers before parsing reports", Pool::Left).await;
        let c = curator(store);
        let created = c
            .curate(&[insight("check table headers before parsing reports", 0.8)], Pool::Left)
            .await
            .unwrap();
        assert!(created.is_empty());
    }

    #[tokio::test]
    async fn test_shared_copy_counts_as_duplicate() {
        let store = test_store();
        add(&store, "Pin dependency versions in lockfiles", Pool::Shared).await;
        let c = curator(store);
        let dup = c
            .find_duplicate("Pin dependency versions in lockfiles", Pool::Right)
            .await
            .unwrap();
        assert!(dup.is_some());
    }

    #[tokio::test]
    async fn test_auto_assign_moves_confident_bullets() {
        let mut config = Config::default();
        config.curator.auto_assign = true;
        config.curator.auto_assign_threshold = 0.7;
        let c = Curator::new(Arc::new(test_store_with(config.clone())), &config);

        let checklist = ReflectionInsight::new(
            InsightKind::ToolRule,
            "Always validate required fields before saving",
            0.8,
        );
        let created = c.curate(&[checklist], Pool::Right).await.unwrap();
        assert_eq!(created[0].pool, Pool::Left);
        assert_eq!(created[0].metadata["classified_from"], Value::from("right"));

        let vague = ReflectionInsight::new(InsightKind::Heuristic, "Lunch orders arrive at noon", 0.8);
        let created = c.curate(&[vague], Pool::Right).await.unwrap();
        assert_eq!(created[0].pool, Pool::Right);
        assert_eq!(created[0].metadata["review_priority"], Value::from("high"));
        assert_eq!(created[0].metadata["classifier_suggestion"], Value::from("right"));
    }

    async fn eligible(store: &KnowledgeStore, text: &str, pool: Pool) -> Bullet {
        let b = store
            .add(NewBullet::new(text, pool, BulletKind::Heuristic).with_confidence(0.8))
            .await
            .unwrap();
        store.record_outcome(&[b.id.clone()], true).unwrap();
        store.record_outcome(&[b.id.clone()], true).unwrap();
        store.get(&b.id).unwrap()
    }

    #[tokio::test]
    async fn test_generate_suggestions() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(test_store());
        let suggestions = Arc::new(SuggestionStore::in_dir(temp.path()));
        let c = Curator::new(Arc::clone(&store), &Config::default())
            .with_suggestions(Arc::clone(&suggestions));

        let good = eligible(&store, "Snapshot the database before migrations", Pool::Left).await;
        let fresh = add(&store, "Quarantined bullets are not suggested", Pool::Left).await;
        assert_eq!(good.status, BulletStatus::Active);

        let made = c
            .generate_suggestions(&[good.clone(), fresh], Pool::Left, OUTCOME_REASON)
            .await
            .unwrap();
        assert_eq!(made.len(), 1);
        assert_eq!(made[0].to_pool, Pool::Right);
        assert_eq!(made[0].origin_bullet_id, good.id);
        assert_eq!(made[0].reason, OUTCOME_REASON);

        // active pair already exists
        let again = c
            .generate_suggestions(&[good], Pool::Left, OUTCOME_REASON)
            .await
            .unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn test_suggestions_skip_known_in_target() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(test_store());
        let suggestions = Arc::new(SuggestionStore::in_dir(temp.path()));
        let c = Curator::new(Arc::clone(&store), &Config::default())
            .with_suggestions(Arc::clone(&suggestions));

        let good = eligible(&store, "Read the changelog before upgrading", Pool::Left).await;
        add(&store, "Read the changelog before upgrading", Pool::Right).await;
        let made = c
            .generate_suggestions(&[good], Pool::Left, OUTCOME_REASON)
            .await
            .unwrap();
        assert!(made.is_empty());
    }

    #[tokio::test]
    async fn test_pending_limit() {
        let temp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.suggestions.max_pending = 1;
        let store = Arc::new(test_store_with(config.clone()));
        let suggestions = Arc::new(SuggestionStore::in_dir(temp.path()));
        let c = Curator::new(Arc::clone(&store), &config).with_suggestions(suggestions);

        let a = eligible(&store, "Prefer small pull requests", Pool::Left).await;
        let b = eligible(&store, "Tag releases with semantic versions", Pool::Left).await;
        let made = c
            .generate_suggestions(&[a, b], Pool::Left, OUTCOME_REASON)
            .await
            .unwrap();
        assert_eq!(made.len(), 1);
    }

    #[tokio::test]
    async fn test_no_store_no_suggestions() {
        let store = test_store();
        let good = eligible(&store, "Snapshot the database before migrations", Pool::Left).await;
        let c = curator(store);
        assert!(c
            .generate_suggestions(&[good], Pool::Left, OUTCOME_REASON)
            .await
            .unwrap()
            .is_empty());
    }
}
