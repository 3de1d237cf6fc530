//! Cross-pool suggestions.
//!
//! A suggestion proposes copying a proven bullet from one pool into the
//! other. It starts pending, becomes delivered once a quarantined copy
//! exists in the target pool, and ends accepted, rejected or expired.
//! Only one pending or delivered suggestion may exist per origin bullet and
//! target pool.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::Pool;
use crate::error::{CortexError, Result};
use crate::stats::{EventKind, EventLog};
use crate::storage::JsonlFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionStatus {
    #[default]
    Pending,
    Delivered,
    Accepted,
    Rejected,
    Expired,
}

impl SuggestionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Delivered => "delivered",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
        }
    }

    /// Pending or delivered.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Delivered)
    }
}

impl fmt::Display for SuggestionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SuggestionStatus {
    type Err = CortexError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "delivered" => Ok(Self::Delivered),
            "accepted" => Ok(Self::Accepted),
            "rejected" => Ok(Self::Rejected),
            "expired" => Ok(Self::Expired),
            other => Err(CortexError::invalid_policy("suggestion status", other)),
        }
    }
}

pub fn generate_suggestion_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("sg_{}", &hex[..10])
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub id: String,
    pub from_pool: Pool,
    pub to_pool: Pool,
    pub origin_bullet_id: String,
    pub text: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub status: SuggestionStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub delivered_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub trace_ids: Vec<String>,
    #[serde(default)]
    pub delivered_bullet_id: Option<String>,
    #[serde(default)]
    pub resolution_reason: String,
}

impl Suggestion {
    /// A pending suggestion with a fresh id.
    pub fn new(
        from_pool: Pool,
        to_pool: Pool,
        origin_bullet_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: generate_suggestion_id(),
            from_pool,
            to_pool,
            origin_bullet_id: origin_bullet_id.into(),
            text: text.into(),
            tags: Vec::new(),
            reason: String::new(),
            status: SuggestionStatus::Pending,
            created_at: Utc::now(),
            delivered_at: None,
            resolved_at: None,
            trace_ids: Vec::new(),
            delivered_bullet_id: None,
            resolution_reason: String::new(),
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn with_trace_ids(mut self, trace_ids: Vec<String>) -> Self {
        self.trace_ids = trace_ids;
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}

/// JSONL-backed suggestion store (`suggestions.jsonl`).
#[derive(Debug)]
pub struct SuggestionStore {
    file: JsonlFile<Suggestion>,
    events: Option<Arc<EventLog>>,
}

impl SuggestionStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            file: JsonlFile::new(path.as_ref()),
            events: None,
        }
    }

    pub fn in_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join("suggestions.jsonl"))
    }

    pub fn with_events(mut self, events: Arc<EventLog>) -> Self {
        self.events = Some(events);
        self
    }

    fn record_event(&self, event: EventKind) {
        if let Some(events) = &self.events {
            events.record(event);
        }
    }

    /// Store a new suggestion.
    ///
    /// Fails with `AlreadyExists` if the id is taken or the origin bullet
    /// already has an active suggestion for the same target pool. Free-text
    /// suggestions (empty origin) are never paired.
    pub fn create(&self, suggestion: Suggestion) -> Result<Suggestion> {
        self.file.update(|records| {
            if records.iter().any(|s| s.id == suggestion.id) {
                return Err(CortexError::already_exists("suggestion", &suggestion.id));
            }
            if !suggestion.origin_bullet_id.is_empty()
                && records.iter().any(|s| {
                    s.status.is_active()
                        && s.origin_bullet_id == suggestion.origin_bullet_id
                        && s.to_pool == suggestion.to_pool
                })
            {
                return Err(CortexError::already_exists(
                    "active suggestion",
                    format!("{} -> {}", suggestion.origin_bullet_id, suggestion.to_pool),
                ));
            }
            records.push(suggestion.clone());
            Ok(())
        })?;

        tracing::debug!(
            suggestion_id = %suggestion.id,
            origin = %suggestion.origin_bullet_id,
            to_pool = %suggestion.to_pool,
            "suggestion created"
        );
        self.record_event(EventKind::SuggestionCreated {
            suggestion_id: suggestion.id.clone(),
            origin_bullet_id: suggestion.origin_bullet_id.clone(),
            to_pool: suggestion.to_pool,
        });
        Ok(suggestion)
    }

    pub fn get(&self, id: &str) -> Result<Suggestion> {
        self.file
            .read_all()?
            .into_iter()
            .find(|s| s.id == id)
            .ok_or_else(|| CortexError::not_found("suggestion", id))
    }

    /// All suggestions, oldest first, optionally filtered by status.
    pub fn list(&self, status: Option<SuggestionStatus>) -> Result<Vec<Suggestion>> {
        let mut items: Vec<Suggestion> = self
            .file
            .read_all()?
            .into_iter()
            .filter(|s| status.map_or(true, |st| s.status == st))
            .collect();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(items)
    }

    /// Pending suggestions, oldest first.
    pub fn list_pending(&self, to_pool: Option<Pool>) -> Result<Vec<Suggestion>> {
        Ok(self
            .list(Some(SuggestionStatus::Pending))?
            .into_iter()
            .filter(|s| to_pool.map_or(true, |p| s.to_pool == p))
            .collect())
    }

    pub fn count(&self, status: Option<SuggestionStatus>) -> Result<usize> {
        Ok(self
            .file
            .read_all()?
            .iter()
            .filter(|s| status.map_or(true, |st| s.status == st))
            .count())
    }

    pub fn exists_active(&self, origin_bullet_id: &str, to_pool: Option<Pool>) -> Result<bool> {
        Ok(self.file.read_all()?.iter().any(|s| {
            s.status.is_active()
                && s.origin_bullet_id == origin_bullet_id
                && to_pool.map_or(true, |p| s.to_pool == p)
        }))
    }

    /// Move a pending suggestion to delivered before its bullet exists, so
    /// no concurrent resolve or delivery can act on it in between.
    pub fn claim_delivery(&self, id: &str) -> Result<Suggestion> {
        self.file.update(|records| {
            let s = records
                .iter_mut()
                .find(|s| s.id == id)
                .ok_or_else(|| CortexError::not_found("suggestion", id))?;
            if s.status != SuggestionStatus::Pending {
                return Err(CortexError::invalid_state(format!(
                    "suggestion {} is {}, not pending",
                    id, s.status
                )));
            }
            s.status = SuggestionStatus::Delivered;
            s.delivered_at = Some(Utc::now());
            Ok(s.clone())
        })
    }

    /// Undo a claim whose bullet could not be created.
    pub fn release_claim(&self, id: &str) -> Result<Suggestion> {
        self.file.update(|records| {
            let s = records
                .iter_mut()
                .find(|s| s.id == id)
                .ok_or_else(|| CortexError::not_found("suggestion", id))?;
            if s.status != SuggestionStatus::Delivered || s.delivered_bullet_id.is_some() {
                return Err(CortexError::invalid_state(format!(
                    "suggestion {} has no open claim",
                    id
                )));
            }
            s.status = SuggestionStatus::Pending;
            s.delivered_at = None;
            Ok(s.clone())
        })
    }

    /// Mark delivered, recording the bullet created in the target pool.
    ///
    /// Only pending suggestions, or claimed ones still waiting for their
    /// bullet, can be delivered.
    pub fn mark_delivered(&self, id: &str, bullet_id: Option<&str>) -> Result<Suggestion> {
        let updated = self.file.update(|records| {
            let s = records
                .iter_mut()
                .find(|s| s.id == id)
                .ok_or_else(|| CortexError::not_found("suggestion", id))?;
            let claimed =
                s.status == SuggestionStatus::Delivered && s.delivered_bullet_id.is_none();
            if s.status != SuggestionStatus::Pending && !claimed {
                return Err(CortexError::invalid_state(format!(
                    "suggestion {} is already {}",
                    id, s.status
                )));
            }
            s.status = SuggestionStatus::Delivered;
            s.delivered_at.get_or_insert_with(Utc::now);
            if let Some(bullet_id) = bullet_id {
                s.delivered_bullet_id = Some(bullet_id.to_string());
            }
            Ok(s.clone())
        })?;

        self.record_event(EventKind::SuggestionDelivered {
            suggestion_id: updated.id.clone(),
            bullet_id: updated.delivered_bullet_id.clone().unwrap_or_default(),
        });
        Ok(updated)
    }

    /// Accept or reject an active suggestion.
    pub fn resolve(&self, id: &str, accepted: bool, reason: &str) -> Result<Suggestion> {
        let updated = self.file.update(|records| {
            let s = records
                .iter_mut()
                .find(|s| s.id == id)
                .ok_or_else(|| CortexError::not_found("suggestion", id))?;
            if !s.status.is_active() {
                return Err(CortexError::invalid_state(format!(
                    "suggestion {} is already {}",
                    id, s.status
                )));
            }
            s.status = if accepted {
                SuggestionStatus::Accepted
            } else {
                SuggestionStatus::Rejected
            };
            s.resolved_at = Some(Utc::now());
            if !reason.is_empty() {
                s.resolution_reason = reason.to_string();
            }
            Ok(s.clone())
        })?;

        self.record_event(EventKind::SuggestionResolved {
            suggestion_id: updated.id.clone(),
            status: updated.status.as_str().to_string(),
        });
        Ok(updated)
    }

    /// Expire active suggestions older than `max_age_days`, measured from
    /// delivery for delivered ones and creation otherwise. Zero days never
    /// expires anything.
    pub fn expire_old(&self, max_age_days: u32) -> Result<usize> {
        self.expire_old_at(max_age_days, Utc::now())
    }

    pub fn expire_old_at(&self, max_age_days: u32, now: DateTime<Utc>) -> Result<usize> {
        if max_age_days == 0 {
            return Ok(0);
        }
        let cutoff = now - chrono::Duration::days(i64::from(max_age_days));

        let expired = self.file.update(|records| {
            let mut expired = Vec::new();
            for s in records.iter_mut().filter(|s| s.status.is_active()) {
                let since = match s.status {
                    SuggestionStatus::Delivered => s.delivered_at.unwrap_or(s.created_at),
                    _ => s.created_at,
                };
                if since < cutoff {
                    s.status = SuggestionStatus::Expired;
                    s.resolved_at = Some(now);
                    expired.push(s.id.clone());
                }
            }
            Ok(expired)
        })?;

        for id in &expired {
            self.record_event(EventKind::SuggestionResolved {
                suggestion_id: id.clone(),
                status: SuggestionStatus::Expired.as_str().to_string(),
            });
        }
        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "expired stale suggestions");
        }
        Ok(expired.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    fn store(temp: &TempDir) -> SuggestionStore {
        SuggestionStore::in_dir(temp.path())
    }

    fn suggestion(origin: &str) -> Suggestion {
        Suggestion::new(Pool::Left, Pool::Right, origin, "Validate inputs early")
    }

    #[test]
    fn test_id_format() {
        let id = generate_suggestion_id();
        assert!(id.starts_with("sg_"));
        assert_eq!(id.len(), 13);
    }

    #[test]
    fn test_single_active_per_pair() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let first = store.create(suggestion("pb_left_1")).unwrap();

        assert!(matches!(
            store.create(suggestion("pb_left_1")),
            Err(CortexError::AlreadyExists { .. })
        ));
        assert!(store.exists_active("pb_left_1", Some(Pool::Right)).unwrap());
        assert!(!store.exists_active("pb_left_1", Some(Pool::Shared)).unwrap());

        // a different target pool is a different pair
        let other = Suggestion::new(Pool::Left, Pool::Shared, "pb_left_1", "x");
        store.create(other).unwrap();

        // once resolved, the pair is free again
        store.resolve(&first.id, false, "not useful").unwrap();
        store.create(suggestion("pb_left_1")).unwrap();
        assert_eq!(store.count(None).unwrap(), 3);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let s = store.create(suggestion("a")).unwrap();
        let mut again = suggestion("b");
        again.id = s.id.clone();
        assert!(store.create(again).is_err());
    }

    #[test]
    fn test_pending_order_and_filter() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let now = Utc::now();
        store
            .create(suggestion("late").with_created_at(now))
            .unwrap();
        store
            .create(suggestion("early").with_created_at(now - Duration::hours(1)))
            .unwrap();
        store
            .create(Suggestion::new(Pool::Right, Pool::Left, "r", "Try the opposite"))
            .unwrap();

        let pending = store.list_pending(Some(Pool::Right)).unwrap();
        let origins: Vec<&str> = pending.iter().map(|s| s.origin_bullet_id.as_str()).collect();
        assert_eq!(origins, vec!["early", "late"]);
        assert_eq!(store.list_pending(None).unwrap().len(), 3);
    }

    #[test]
    fn test_lifecycle() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let s = store.create(suggestion("o")).unwrap();

        let delivered = store.mark_delivered(&s.id, Some("pb_right_9")).unwrap();
        assert_eq!(delivered.status, SuggestionStatus::Delivered);
        assert!(delivered.delivered_at.is_some());
        assert_eq!(store.count(Some(SuggestionStatus::Pending)).unwrap(), 0);

        let accepted = store.resolve(&s.id, true, "").unwrap();
        assert_eq!(accepted.status, SuggestionStatus::Accepted);
        assert_eq!(accepted.delivered_bullet_id.as_deref(), Some("pb_right_9"));
        assert!(matches!(
            store.resolve(&s.id, false, ""),
            Err(CortexError::InvalidState { .. })
        ));
        assert!(matches!(
            store.mark_delivered("sg_missing", None),
            Err(CortexError::NotFound { .. })
        ));
    }

    #[test]
    fn test_resolved_suggestion_cannot_be_delivered() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let first = store.create(suggestion("o")).unwrap();
        store.resolve(&first.id, false, "not useful").unwrap();
        store.create(suggestion("o")).unwrap();

        assert!(matches!(
            store.mark_delivered(&first.id, Some("pb_right_1")),
            Err(CortexError::InvalidState { .. })
        ));
        assert!(matches!(
            store.claim_delivery(&first.id),
            Err(CortexError::InvalidState { .. })
        ));
        let active = store
            .list(None)
            .unwrap()
            .into_iter()
            .filter(|s| s.status.is_active() && s.origin_bullet_id == "o")
            .count();
        assert_eq!(active, 1);
    }

    #[test]
    fn test_claim_then_deliver_or_release() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let s = store.create(suggestion("o")).unwrap();

        let claimed = store.claim_delivery(&s.id).unwrap();
        assert_eq!(claimed.status, SuggestionStatus::Delivered);
        assert!(store.claim_delivery(&s.id).is_err());

        let t = store.create(suggestion("p")).unwrap();
        store.claim_delivery(&t.id).unwrap();
        let released = store.release_claim(&t.id).unwrap();
        assert_eq!(released.status, SuggestionStatus::Pending);
        assert!(released.delivered_at.is_none());

        store.claim_delivery(&t.id).unwrap();
        let delivered = store.mark_delivered(&t.id, Some("pb_right_2")).unwrap();
        assert_eq!(delivered.delivered_bullet_id.as_deref(), Some("pb_right_2"));
        assert!(store.release_claim(&t.id).is_err());
        assert!(store.mark_delivered(&t.id, Some("pb_right_3")).is_err());
    }

    #[test]
    fn test_expire_old() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let now = Utc::now();
        store
            .create(suggestion("old").with_created_at(now - Duration::days(10)))
            .unwrap();
        store.create(suggestion("new")).unwrap();

        assert_eq!(store.expire_old_at(0, now).unwrap(), 0);
        assert_eq!(store.expire_old_at(7, now).unwrap(), 1);
        assert_eq!(store.count(Some(SuggestionStatus::Expired)).unwrap(), 1);
        assert!(!store.exists_active("old", None).unwrap());
    }

    #[test]
    fn test_events_recorded() {
        let temp = TempDir::new().unwrap();
        let events = Arc::new(EventLog::new(temp.path().join("events.log")));
        let store = store(&temp).with_events(Arc::clone(&events));
        let s = store.create(suggestion("o")).unwrap();
        store.mark_delivered(&s.id, Some("b")).unwrap();
        store.resolve(&s.id, true, "").unwrap();
        assert_eq!(events.read_all().unwrap().len(), 3);
    }
}
