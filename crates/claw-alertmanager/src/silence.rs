//! Silences and the in-memory silence store.
//!
//! Silences are never removed when deleted: deletion expires them so the
//! history stays inspectable. Expired silences are only dropped by
//! [`SilenceStore::gc`] once they are older than a retention window.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{AlertmanagerError, Result};
use crate::matcher::{matches_all, parse_matchers, Matcher};
use crate::types::LabelSet;

/// Lifecycle state of a silence at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SilenceState {
    /// Starts in the future.
    Pending,
    /// Currently suppressing matching alerts.
    Active,
    /// Ended, either naturally or by deletion.
    Expired,
}

impl fmt::Display for SilenceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Expired => "expired",
        };
        write!(f, "{s}")
    }
}

/// A silence that suppresses alerts matching all of its matchers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Silence {
    /// Unique identifier for this silence.
    pub id: String,
    /// Label matchers; all must match for an alert to be silenced.
    pub matchers: Vec<Matcher>,
    /// When the silence starts.
    pub starts_at: DateTime<Utc>,
    /// When the silence ends.
    pub ends_at: DateTime<Utc>,
    /// Who created the silence.
    pub created_by: String,
    /// Comment explaining the silence.
    pub comment: String,
    /// Last time the silence was modified (created or expired).
    pub updated_at: DateTime<Utc>,
    /// Creation order within the store.
    #[serde(default)]
    pub sequence: u64,
}

impl Silence {
    /// Returns the state of the silence at `now`.
    #[must_use]
    pub fn state_at(&self, now: DateTime<Utc>) -> SilenceState {
        if now < self.starts_at {
            SilenceState::Pending
        } else if now < self.ends_at {
            SilenceState::Active
        } else {
            SilenceState::Expired
        }
    }

    /// Returns true if the silence is active at `now`.
    #[must_use]
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.state_at(now) == SilenceState::Active
    }

    /// Returns true if the silence is active at `now` and all matchers match.
    #[must_use]
    pub fn mutes(&self, labels: &LabelSet, now: DateTime<Utc>) -> bool {
        self.is_active_at(now) && matches_all(&self.matchers, labels)
    }

    /// Checks a listing filter against this silence's own matchers: some
    /// matcher must target the same label with a value the filter accepts.
    fn passes_filter(&self, filter: &Matcher) -> bool {
        self.matchers
            .iter()
            .any(|m| m.name() == filter.name() && filter.matches_value(m.value()))
    }
}

/// Input for creating a silence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostableSilence {
    /// Label matchers.
    pub matchers: Vec<Matcher>,
    /// When the silence starts.
    pub starts_at: DateTime<Utc>,
    /// When the silence ends.
    pub ends_at: DateTime<Utc>,
    /// Who created the silence.
    pub created_by: String,
    /// Comment explaining the silence.
    #[serde(default)]
    pub comment: String,
}

impl PostableSilence {
    /// Creates a silence request.
    #[must_use]
    pub fn new(
        matchers: Vec<Matcher>,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
        created_by: impl Into<String>,
        comment: impl Into<String>,
    ) -> Self {
        Self {
            matchers,
            starts_at,
            ends_at,
            created_by: created_by.into(),
            comment: comment.into(),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.matchers.is_empty() {
            return Err(AlertmanagerError::invalid_payload(
                "silence must have at least one matcher",
            ));
        }
        if self.ends_at <= self.starts_at {
            return Err(AlertmanagerError::invalid_payload(
                "silence end time must be after start time",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct SilenceSet {
    by_id: HashMap<String, Silence>,
    next_sequence: u64,
}

impl SilenceSet {
    fn insert_new(&mut self, request: PostableSilence, now: DateTime<Utc>) -> String {
        let id = Uuid::new_v4().to_string();
        let silence = Silence {
            id: id.clone(),
            matchers: request.matchers,
            starts_at: request.starts_at,
            ends_at: request.ends_at,
            created_by: request.created_by,
            comment: request.comment,
            updated_at: now,
            sequence: self.next_sequence,
        };
        self.next_sequence += 1;
        self.by_id.insert(id.clone(), silence);
        id
    }

    fn expire(&mut self, id: &str, now: DateTime<Utc>) -> Result<bool> {
        let silence = self
            .by_id
            .get_mut(id)
            .ok_or_else(|| AlertmanagerError::SilenceNotFound { id: id.to_string() })?;

        match silence.state_at(now) {
            SilenceState::Expired => Ok(false),
            SilenceState::Pending => {
                silence.starts_at = now;
                silence.ends_at = now;
                silence.updated_at = now;
                Ok(true)
            }
            SilenceState::Active => {
                silence.ends_at = now;
                silence.updated_at = now;
                Ok(true)
            }
        }
    }
}

/// Thread-safe silence store.
///
/// A single read-write lock guards the whole set, so mutations are
/// linearizable with [`SilenceStore::list`] and [`SilenceStore::is_silenced`].
#[derive(Debug, Default)]
pub struct SilenceStore {
    silences: RwLock<SilenceSet>,
}

impl SilenceStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restores a store from a snapshot produced by [`SilenceStore::snapshot`].
    #[must_use]
    pub fn from_snapshot(silences: Vec<Silence>) -> Self {
        let next_sequence = silences.iter().map(|s| s.sequence + 1).max().unwrap_or(0);
        let by_id = silences.into_iter().map(|s| (s.id.clone(), s)).collect();
        Self {
            silences: RwLock::new(SilenceSet {
                by_id,
                next_sequence,
            }),
        }
    }

    /// Returns every silence, expired ones included, in creation order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Silence> {
        self.ordered(|_| true)
    }

    /// Creates a silence and returns its ID.
    ///
    /// # Errors
    ///
    /// Returns `AlertmanagerError::InvalidPayload` if there are no matchers or
    /// the end time is not after the start time.
    pub fn create(&self, request: PostableSilence) -> Result<String> {
        request.validate()?;
        let matchers = request.matchers.clone();
        let ends_at = request.ends_at;

        let id = self.silences.write().insert_new(request, Utc::now());

        info!(silence_id = %id, matchers = ?matchers, ends_at = %ends_at, "created silence");
        Ok(id)
    }

    /// Replaces a silence with a new version: the old one is expired and a new
    /// silence with a fresh ID is created under the same lock.
    ///
    /// # Errors
    ///
    /// Returns `AlertmanagerError::SilenceNotFound` for an unknown ID and
    /// `AlertmanagerError::InvalidPayload` for an invalid replacement.
    pub fn update(&self, id: &str, request: PostableSilence) -> Result<String> {
        request.validate()?;
        let now = Utc::now();

        let mut silences = self.silences.write();
        silences.expire(id, now)?;
        let new_id = silences.insert_new(request, now);
        drop(silences);

        info!(old_silence_id = %id, silence_id = %new_id, "updated silence");
        Ok(new_id)
    }

    /// Gets a silence by ID.
    ///
    /// # Errors
    ///
    /// Returns `AlertmanagerError::SilenceNotFound` if the silence doesn't exist.
    pub fn get(&self, id: &str) -> Result<Silence> {
        self.silences
            .read()
            .by_id
            .get(id)
            .cloned()
            .ok_or_else(|| AlertmanagerError::SilenceNotFound { id: id.to_string() })
    }

    /// Expires a silence.
    ///
    /// Deleting an already expired silence succeeds without changing it.
    ///
    /// # Errors
    ///
    /// Returns `AlertmanagerError::SilenceNotFound` if the silence doesn't exist.
    pub fn delete(&self, id: &str) -> Result<()> {
        self.delete_at(id, Utc::now())
    }

    /// Expires a silence as of `now`.
    ///
    /// # Errors
    ///
    /// Returns `AlertmanagerError::SilenceNotFound` if the silence doesn't exist.
    pub fn delete_at(&self, id: &str, now: DateTime<Utc>) -> Result<()> {
        if self.silences.write().expire(id, now)? {
            info!(silence_id = %id, "expired silence");
        } else {
            debug!(silence_id = %id, "silence already expired");
        }
        Ok(())
    }

    /// Lists silences in creation order, keeping those that pass every filter.
    #[must_use]
    pub fn list(&self, filters: &[Matcher]) -> Vec<Silence> {
        self.ordered(|s| filters.iter().all(|f| s.passes_filter(f)))
    }

    /// Lists silences using textual filters such as `alertname="Foo"`.
    ///
    /// # Errors
    ///
    /// Returns `AlertmanagerError::InvalidPayload` for a malformed filter.
    pub fn list_filtered<S: AsRef<str>>(&self, filters: &[S]) -> Result<Vec<Silence>> {
        let filters = parse_matchers(filters)?;
        Ok(self.list(&filters))
    }

    /// Returns all silences active at `now`.
    #[must_use]
    pub fn active_at(&self, now: DateTime<Utc>) -> Vec<Silence> {
        self.ordered(|s| s.is_active_at(now))
    }

    /// Checks whether a label set is silenced at `now`, returning the IDs of
    /// every active silence that matches.
    #[must_use]
    pub fn is_silenced(&self, labels: &LabelSet, now: DateTime<Utc>) -> (bool, Vec<String>) {
        let ids: Vec<String> = self
            .ordered(|s| s.mutes(labels, now))
            .into_iter()
            .map(|s| s.id)
            .collect();
        (!ids.is_empty(), ids)
    }

    /// Drops silences that expired more than `retention` before `now`.
    /// Returns the number removed.
    pub fn gc(&self, now: DateTime<Utc>, retention: ChronoDuration) -> usize {
        let mut silences = self.silences.write();
        let before = silences.by_id.len();
        silences
            .by_id
            .retain(|_, s| s.state_at(now) != SilenceState::Expired || now - s.ends_at < retention);
        let removed = before - silences.by_id.len();
        drop(silences);

        if removed > 0 {
            info!(removed, "garbage collected expired silences");
        }
        removed
    }

    /// Returns the number of stored silences, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.silences.read().by_id.len()
    }

    /// Returns true if the store holds no silences.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn ordered(&self, keep: impl Fn(&Silence) -> bool) -> Vec<Silence> {
        let silences = self.silences.read();
        let mut out: Vec<Silence> = silences.by_id.values().filter(|s| keep(s)).cloned().collect();
        drop(silences);
        out.sort_by_key(|s| s.sequence);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::label_set;
    use proptest::prelude::*;

    fn hours(h: i64) -> ChronoDuration {
        ChronoDuration::hours(h)
    }

    fn foo_matchers() -> Vec<Matcher> {
        vec![Matcher::equal("alertname", "Foo").unwrap()]
    }

    fn request(matchers: Vec<Matcher>, start: DateTime<Utc>, end: DateTime<Utc>) -> PostableSilence {
        PostableSilence::new(matchers, start, end, "admin", "maintenance")
    }

    mod create_tests {
        use super::*;

        #[test]
        fn create_and_get() {
            let store = SilenceStore::new();
            let now = Utc::now();
            let id = store.create(request(foo_matchers(), now, now + hours(1))).unwrap();

            let silence = store.get(&id).unwrap();
            assert_eq!(silence.created_by, "admin");
            assert_eq!(silence.comment, "maintenance");
            assert_eq!(silence.matchers, foo_matchers());
        }

        #[test]
        fn create_without_matchers_fails() {
            let store = SilenceStore::new();
            let now = Utc::now();
            let result = store.create(request(vec![], now, now + hours(1)));
            assert!(matches!(result, Err(AlertmanagerError::InvalidPayload { .. })));
            assert!(store.is_empty());
        }

        #[test]
        fn create_with_equal_bounds_fails() {
            let store = SilenceStore::new();
            let now = Utc::now();
            let result = store.create(request(foo_matchers(), now, now));
            assert!(matches!(result, Err(AlertmanagerError::InvalidPayload { .. })));
        }

        #[test]
        fn get_unknown_fails() {
            let store = SilenceStore::new();
            assert!(matches!(
                store.get("nope"),
                Err(AlertmanagerError::SilenceNotFound { .. })
            ));
        }

        proptest! {
            #[test]
            fn end_not_after_start_always_rejected(offset_secs in 0i64..1_000_000) {
                let store = SilenceStore::new();
                let start = Utc::now();
                let end = start - ChronoDuration::seconds(offset_secs);
                let result = store.create(request(foo_matchers(), start, end));
                let rejected = matches!(result, Err(AlertmanagerError::InvalidPayload { .. }));
                prop_assert!(rejected);
            }
        }
    }

    mod matching_tests {
        use super::*;

        #[test]
        fn active_silence_matches() {
            let store = SilenceStore::new();
            let now = Utc::now();
            let id = store.create(request(foo_matchers(), now - hours(1), now + hours(1))).unwrap();

            let labels = label_set(&[("alertname", "Foo"), ("severity", "critical")]);
            let (silenced, ids) = store.is_silenced(&labels, now);
            assert!(silenced);
            assert_eq!(ids, vec![id]);
        }

        #[test]
        fn all_matchers_must_match() {
            let store = SilenceStore::new();
            let now = Utc::now();
            let matchers = vec![
                Matcher::equal("alertname", "Foo").unwrap(),
                Matcher::parse(r#"severity=~"warn.*""#).unwrap(),
            ];
            store.create(request(matchers, now - hours(1), now + hours(1))).unwrap();

            let critical = label_set(&[("alertname", "Foo"), ("severity", "critical")]);
            assert!(!store.is_silenced(&critical, now).0);

            let warning = label_set(&[("alertname", "Foo"), ("severity", "warning")]);
            assert!(store.is_silenced(&warning, now).0);
        }

        #[test]
        fn pending_and_expired_do_not_match() {
            let store = SilenceStore::new();
            let now = Utc::now();
            store.create(request(foo_matchers(), now + hours(1), now + hours(2))).unwrap();
            store.create(request(foo_matchers(), now - hours(2), now - hours(1))).unwrap();

            let labels = label_set(&[("alertname", "Foo")]);
            assert_eq!(store.is_silenced(&labels, now), (false, vec![]));
        }

        #[test]
        fn window_is_half_open() {
            let store = SilenceStore::new();
            let t0 = Utc::now();
            store.create(request(foo_matchers(), t0, t0 + hours(1))).unwrap();
            let labels = label_set(&[("alertname", "Foo")]);

            assert!(store.is_silenced(&labels, t0).0);
            assert!(store.is_silenced(&labels, t0 + ChronoDuration::minutes(30)).0);
            assert!(!store.is_silenced(&labels, t0 + hours(1)).0);
            assert!(!store.is_silenced(&labels, t0 + hours(2)).0);
        }

        #[test]
        fn multiple_silences_report_all_ids() {
            let store = SilenceStore::new();
            let now = Utc::now();
            let first = store.create(request(foo_matchers(), now - hours(1), now + hours(1))).unwrap();
            let second = store
                .create(request(
                    vec![Matcher::parse(r#"severity!="info""#).unwrap()],
                    now - hours(1),
                    now + hours(1),
                ))
                .unwrap();

            let labels = label_set(&[("alertname", "Foo"), ("severity", "critical")]);
            let (_, ids) = store.is_silenced(&labels, now);
            assert_eq!(ids, vec![first, second]);
        }
    }

    mod delete_tests {
        use super::*;

        #[test]
        fn delete_unsilences() {
            let store = SilenceStore::new();
            let now = Utc::now();
            let id = store.create(request(foo_matchers(), now - hours(1), now + hours(1))).unwrap();
            let labels = label_set(&[("alertname", "Foo")]);
            assert!(store.is_silenced(&labels, Utc::now()).0);

            store.delete(&id).unwrap();

            assert!(!store.is_silenced(&labels, Utc::now()).0);
            let silence = store.get(&id).unwrap();
            assert_eq!(silence.state_at(Utc::now()), SilenceState::Expired);
        }

        #[test]
        fn delete_pending_collapses_window() {
            let store = SilenceStore::new();
            let now = Utc::now();
            let id = store.create(request(foo_matchers(), now + hours(1), now + hours(2))).unwrap();

            store.delete_at(&id, now).unwrap();

            let silence = store.get(&id).unwrap();
            assert_eq!(silence.starts_at, now);
            assert_eq!(silence.ends_at, now);
            assert_eq!(silence.state_at(now), SilenceState::Expired);
        }

        #[test]
        fn delete_twice_is_noop() {
            let store = SilenceStore::new();
            let now = Utc::now();
            let id = store.create(request(foo_matchers(), now - hours(1), now + hours(1))).unwrap();

            store.delete_at(&id, now).unwrap();
            let after_first = store.get(&id).unwrap();
            store.delete_at(&id, now + hours(1)).unwrap();
            assert_eq!(store.get(&id).unwrap(), after_first);
        }

        #[test]
        fn delete_unknown_fails() {
            let store = SilenceStore::new();
            assert!(matches!(
                store.delete("missing"),
                Err(AlertmanagerError::SilenceNotFound { .. })
            ));
        }

        #[test]
        fn update_expires_old_version() {
            let store = SilenceStore::new();
            let now = Utc::now();
            let old = store.create(request(foo_matchers(), now - hours(1), now + hours(1))).unwrap();

            let new = store
                .update(&old, request(foo_matchers(), now - hours(1), now + hours(4)))
                .unwrap();

            assert_ne!(old, new);
            assert_eq!(store.get(&old).unwrap().state_at(Utc::now()), SilenceState::Expired);
            assert_eq!(store.get(&new).unwrap().state_at(Utc::now()), SilenceState::Active);
            assert_eq!(store.len(), 2);
        }
    }

    mod list_tests {
        use super::*;

        #[test]
        fn list_in_creation_order() {
            let store = SilenceStore::new();
            let now = Utc::now();
            let ids: Vec<String> = (0..5)
                .map(|i| {
                    let m = vec![Matcher::equal("alertname", format!("A{i}")).unwrap()];
                    store.create(request(m, now, now + hours(1))).unwrap()
                })
                .collect();

            let listed: Vec<String> = store.list(&[]).into_iter().map(|s| s.id).collect();
            assert_eq!(listed, ids);
        }

        #[test]
        fn list_filters_on_silence_matchers() {
            let store = SilenceStore::new();
            let now = Utc::now();
            let foo = store.create(request(foo_matchers(), now, now + hours(1))).unwrap();
            store
                .create(request(
                    vec![Matcher::equal("alertname", "Bar").unwrap()],
                    now,
                    now + hours(1),
                ))
                .unwrap();

            let listed = store.list_filtered(&[r#"alertname="Foo""#]).unwrap();
            assert_eq!(listed.len(), 1);
            assert_eq!(listed[0].id, foo);

            let regex = store.list_filtered(&[r#"alertname=~"Foo|Bar""#]).unwrap();
            assert_eq!(regex.len(), 2);

            let other_label = store.list_filtered(&[r#"team="db""#]).unwrap();
            assert!(other_label.is_empty());
        }

        #[test]
        fn list_bad_filter_fails() {
            let store = SilenceStore::new();
            assert!(matches!(
                store.list_filtered(&["not a matcher"]),
                Err(AlertmanagerError::InvalidPayload { .. })
            ));
        }

        #[test]
        fn list_includes_expired() {
            let store = SilenceStore::new();
            let now = Utc::now();
            let id = store.create(request(foo_matchers(), now - hours(1), now + hours(1))).unwrap();
            store.delete(&id).unwrap();
            assert_eq!(store.list(&[]).len(), 1);
            assert!(store.active_at(Utc::now()).is_empty());
        }
    }

    mod persistence_tests {
        use super::*;

        #[test]
        fn snapshot_restores_matchers_and_order() {
            let store = SilenceStore::new();
            let now = Utc::now();
            let first = store
                .create(request(
                    vec![Matcher::parse(r#"instance=~"node-[0-9]+""#).unwrap()],
                    now - hours(1),
                    now + hours(1),
                ))
                .unwrap();
            let second = store.create(request(foo_matchers(), now - hours(1), now + hours(1))).unwrap();

            let json = serde_json::to_string(&store.snapshot()).unwrap();
            let restored = SilenceStore::from_snapshot(serde_json::from_str(&json).unwrap());

            let ids: Vec<String> = restored.list(&[]).into_iter().map(|s| s.id).collect();
            assert_eq!(ids, vec![first.clone(), second]);

            let labels = label_set(&[("instance", "node-7")]);
            assert_eq!(restored.is_silenced(&labels, now).1, vec![first]);

            let third = restored.create(request(foo_matchers(), now, now + hours(1))).unwrap();
            assert_eq!(restored.list(&[]).last().map(|s| s.id.clone()), Some(third));
        }

        #[test]
        fn gc_drops_only_old_expired() {
            let store = SilenceStore::new();
            let now = Utc::now();
            store.create(request(foo_matchers(), now - hours(10), now - hours(5))).unwrap();
            store.create(request(foo_matchers(), now - hours(2), now - hours(1))).unwrap();
            store.create(request(foo_matchers(), now - hours(1), now + hours(1))).unwrap();

            assert_eq!(store.gc(now, hours(3)), 1);
            assert_eq!(store.len(), 2);
        }
    }
}
