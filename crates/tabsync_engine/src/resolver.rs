//! Conflict detection and policy-driven resolution.

use crate::config::ResolverConfig;
use crate::error::SyncResult;
use crate::store::StateStore;
use crate::traits::{AlertNotifier, Clock};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tabsync_model::{
    diff_fields, Conflict, ConflictStatus, FieldPriorities, FieldPriority, Record, Resolution,
    ResolutionAction, ResolutionStrategy,
};
use tracing::{info, warn};

const CONFLICT_PREFIX: &str = "conflict:";

/// A conflict persisted to the manual-review queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredConflict {
    conflict: Conflict,
    status: ConflictStatus,
}

/// Options for resolving one conflict.
#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    /// Strategy to apply; `None` uses the configured default.
    pub strategy: Option<ResolutionStrategy>,
    /// Per-field priorities for [`ResolutionStrategy::Merge`].
    pub field_priorities: FieldPriorities,
}

impl ResolveOptions {
    /// Uses the resolver's configured default strategy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the strategy.
    pub fn with_strategy(mut self, strategy: ResolutionStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Sets the per-field merge priorities.
    pub fn with_field_priorities(mut self, priorities: FieldPriorities) -> Self {
        self.field_priorities = priorities;
        self
    }
}

/// Detects conflicts between local and incoming record versions and
/// resolves them by policy.
///
/// Detection is heuristic: the local side counts as concurrently edited
/// when its last-modified timestamp falls inside the configured recency
/// window. A record with no timestamp at all is conservatively treated as
/// modified, which biases toward detecting conflicts; see
/// [`ResolverConfig::recency_window`].
pub struct ConflictResolver {
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    config: RwLock<ResolverConfig>,
    notifier: Option<Arc<dyn AlertNotifier>>,
}

impl ConflictResolver {
    /// Creates a resolver with the default policy.
    pub fn new(store: Arc<dyn StateStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            config: RwLock::new(ResolverConfig::default()),
            notifier: None,
        }
    }

    /// Attaches an alert notifier, used when `notify_on_conflict` is set.
    pub fn with_notifier(mut self, notifier: Arc<dyn AlertNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Replaces the process-wide policy knobs.
    pub fn configure(&self, config: ResolverConfig) {
        *self.config.write() = config;
    }

    /// Returns a copy of the current policy.
    pub fn config(&self) -> ResolverConfig {
        self.config.read().clone()
    }

    /// Decides whether the local and incoming versions conflict.
    ///
    /// Returns `None` when the local side was not recently modified (the
    /// incoming side is free to overwrite) or when the sides agree on every
    /// compared field. A returned conflict always carries at least one
    /// field conflict.
    pub fn detect_conflict(
        &self,
        local_record: &Record,
        incoming_data: &Record,
        remote_record: &Record,
    ) -> Option<Conflict> {
        if !self.was_recently_modified(local_record) {
            return None;
        }

        let field_conflicts = diff_fields(local_record, incoming_data);
        if field_conflicts.is_empty() {
            return None;
        }

        let conflict = Conflict::new(
            self.clock.now(),
            local_record.clone(),
            incoming_data.clone(),
            remote_record.clone(),
            field_conflicts,
        );

        let config = self.config.read();
        if config.log_conflicts {
            warn!(
                conflict_id = %conflict.id,
                record_id = conflict.record_id().unwrap_or("<unknown>"),
                fields = conflict.field_conflicts.len(),
                "conflict detected"
            );
        }
        if config.notify_on_conflict {
            if let Some(notifier) = &self.notifier {
                notifier.notify(
                    "sync conflict detected",
                    &format!(
                        "record {} has {} conflicting field(s)",
                        conflict.record_id().unwrap_or("<unknown>"),
                        conflict.field_conflicts.len()
                    ),
                );
            }
        }

        Some(conflict)
    }

    /// Resolves a conflict according to the requested (or default) strategy.
    ///
    /// Pure with respect to its inputs: for a fixed conflict and strategy,
    /// repeated calls yield the same action and data. `Manual` additionally
    /// persists the conflict to the review queue (idempotently, keyed by
    /// conflict id).
    pub fn resolve(&self, conflict: &Conflict, options: &ResolveOptions) -> SyncResult<Resolution> {
        let strategy = options
            .strategy
            .unwrap_or_else(|| self.config.read().default_strategy);

        let resolution = match strategy {
            ResolutionStrategy::RemoteWins => Resolution {
                strategy,
                action: ResolutionAction::Update,
                data: conflict.incoming_record.clone(),
                message: "remote version applied".into(),
                review_required: false,
            },
            ResolutionStrategy::LocalWins => Resolution {
                strategy,
                action: ResolutionAction::Skip,
                data: conflict.local_record.clone(),
                message: "local version kept".into(),
                review_required: false,
            },
            ResolutionStrategy::NewestWins => self.resolve_newest_wins(conflict),
            ResolutionStrategy::Merge => {
                self.resolve_merge(conflict, &options.field_priorities)
            }
            ResolutionStrategy::Manual => {
                self.enqueue_for_review(conflict)?;
                Resolution {
                    strategy,
                    action: ResolutionAction::Skip,
                    data: conflict.local_record.clone(),
                    message: "queued for manual review".into(),
                    review_required: true,
                }
            }
        };

        Ok(resolution)
    }

    /// Returns every queued conflict still awaiting review.
    ///
    /// Malformed queue rows are logged and skipped.
    pub fn pending_conflicts(&self) -> SyncResult<Vec<Conflict>> {
        let mut pending = Vec::new();
        for key in self.store.keys_with_prefix(CONFLICT_PREFIX)? {
            let Some(value) = self.store.get(&key)? else {
                continue;
            };
            match serde_json::from_value::<StoredConflict>(value) {
                Ok(stored) if stored.status == ConflictStatus::Pending => {
                    pending.push(stored.conflict);
                }
                Ok(_) => {}
                Err(e) => warn!(key, error = %e, "malformed conflict row skipped"),
            }
        }
        Ok(pending)
    }

    /// Marks one queued conflict as resolved.
    ///
    /// Returns false (with a warning) when the id is unknown.
    pub fn mark_resolved(&self, conflict_id: &str) -> SyncResult<bool> {
        let key = conflict_key(conflict_id);
        let Some(value) = self.store.get(&key)? else {
            warn!(conflict_id, "conflict not found in review queue");
            return Ok(false);
        };

        let mut stored: StoredConflict = serde_json::from_value(value)?;
        stored.status = ConflictStatus::Resolved;
        self.store.put(&key, serde_json::to_value(&stored)?)?;
        info!(conflict_id, "conflict marked resolved");
        Ok(true)
    }

    /// Bulk-deletes every resolved queue entry. Returns the number removed.
    pub fn clear_resolved(&self) -> SyncResult<usize> {
        let mut removed = 0;
        for key in self.store.keys_with_prefix(CONFLICT_PREFIX)? {
            let Some(value) = self.store.get(&key)? else {
                continue;
            };
            let is_resolved = serde_json::from_value::<StoredConflict>(value)
                .map(|stored| stored.status == ConflictStatus::Resolved)
                .unwrap_or(false);
            if is_resolved {
                self.store.remove(&key)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// The modified-recently heuristic.
    ///
    /// True when the record's last-modified timestamp is newer than the
    /// configured lookback window; a record with no timestamp is treated as
    /// modified.
    fn was_recently_modified(&self, record: &Record) -> bool {
        let Some(modified_at) = record.modified_at() else {
            return true;
        };
        modified_at > self.clock.now() - self.config.read().recency_window
    }

    fn resolve_newest_wins(&self, conflict: &Conflict) -> Resolution {
        let epoch = DateTime::<Utc>::UNIX_EPOCH;
        let local_ts = conflict.local_record.modified_at().unwrap_or(epoch);
        let remote_ts = conflict.remote_record.modified_at().unwrap_or(epoch);

        // Tie-break rule: remote wins on equal timestamps.
        if local_ts > remote_ts {
            Resolution {
                strategy: ResolutionStrategy::NewestWins,
                action: ResolutionAction::Skip,
                data: conflict.local_record.clone(),
                message: "local version is newer".into(),
                review_required: false,
            }
        } else {
            Resolution {
                strategy: ResolutionStrategy::NewestWins,
                action: ResolutionAction::Update,
                data: conflict.incoming_record.clone(),
                message: "remote version is newer".into(),
                review_required: false,
            }
        }
    }

    fn resolve_merge(&self, conflict: &Conflict, priorities: &FieldPriorities) -> Resolution {
        let mut merged = conflict.local_record.clone();
        for field_conflict in &conflict.field_conflicts {
            let priority = priorities
                .get(&field_conflict.field)
                .copied()
                .unwrap_or_default();
            if priority == FieldPriority::Remote {
                merged.insert(
                    field_conflict.field.clone(),
                    field_conflict.remote_value.clone(),
                );
            }
        }

        Resolution {
            strategy: ResolutionStrategy::Merge,
            action: ResolutionAction::Update,
            data: merged,
            message: "field-level merge applied".into(),
            review_required: false,
        }
    }

    fn enqueue_for_review(&self, conflict: &Conflict) -> SyncResult<()> {
        let stored = StoredConflict {
            conflict: conflict.clone(),
            status: ConflictStatus::Pending,
        };
        self.store
            .put(&conflict_key(&conflict.id), serde_json::to_value(&stored)?)
    }
}

fn conflict_key(conflict_id: &str) -> String {
    format!("{CONFLICT_PREFIX}{conflict_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{FixedClock, MemoryNotifier};
    use crate::store::MemoryStateStore;
    use chrono::Duration;
    use tabsync_model::{ID_FIELD, MODIFIED_FIELD};

    fn setup() -> (ConflictResolver, Arc<FixedClock>) {
        let store = Arc::new(MemoryStateStore::new());
        let clock = Arc::new(FixedClock::new(Utc::now()));
        (ConflictResolver::new(store, clock.clone()), clock)
    }

    fn modified_ago(clock: &FixedClock, minutes: i64) -> String {
        (clock.now() - Duration::minutes(minutes)).to_rfc3339()
    }

    #[test]
    fn stale_local_record_never_conflicts() {
        let (resolver, clock) = setup();

        let local = Record::new()
            .set(ID_FIELD, "C1")
            .set(MODIFIED_FIELD, modified_ago(&clock, 60))
            .set("name", "Acme");
        let incoming = Record::new().set(ID_FIELD, "C1").set("name", "Acme Inc");

        assert!(resolver
            .detect_conflict(&local, &incoming, &incoming)
            .is_none());
    }

    #[test]
    fn missing_timestamp_counts_as_modified() {
        let (resolver, _) = setup();

        let local = Record::new().set(ID_FIELD, "C1").set("name", "Acme");
        let incoming = Record::new().set(ID_FIELD, "C1").set("name", "Acme Inc");

        let conflict = resolver
            .detect_conflict(&local, &incoming, &incoming)
            .unwrap();
        assert_eq!(conflict.field_conflicts.len(), 1);
    }

    #[test]
    fn agreement_yields_no_conflict() {
        let (resolver, clock) = setup();

        let local = Record::new()
            .set(ID_FIELD, "C1")
            .set(MODIFIED_FIELD, modified_ago(&clock, 1))
            .set("name", "Acme");
        let incoming = Record::new().set(ID_FIELD, "C1").set("name", "Acme");

        assert!(resolver
            .detect_conflict(&local, &incoming, &incoming)
            .is_none());
    }

    #[test]
    fn two_field_conflict_scenario() {
        let (resolver, clock) = setup();

        let local = Record::new()
            .set(ID_FIELD, "C1")
            .set(MODIFIED_FIELD, modified_ago(&clock, 1))
            .set("name", "Acme")
            .set("email", "old@x.com");
        let incoming = Record::new()
            .set(ID_FIELD, "C1")
            .set("name", "Acme Inc")
            .set("email", "new@x.com");

        let conflict = resolver
            .detect_conflict(&local, &incoming, &incoming)
            .unwrap();
        let mut fields: Vec<_> = conflict
            .field_conflicts
            .iter()
            .map(|c| c.field.as_str())
            .collect();
        fields.sort_unstable();
        assert_eq!(fields, vec!["email", "name"]);

        let resolution = resolver
            .resolve(
                &conflict,
                &ResolveOptions::new().with_strategy(ResolutionStrategy::RemoteWins),
            )
            .unwrap();
        assert_eq!(resolution.action, ResolutionAction::Update);
        assert_eq!(
            resolution.data.get("name"),
            Some(&serde_json::json!("Acme Inc"))
        );
    }

    #[test]
    fn recency_window_is_configurable() {
        let (resolver, clock) = setup();
        resolver.configure(ResolverConfig::new().with_recency_window(Duration::hours(2)));

        let local = Record::new()
            .set(ID_FIELD, "C1")
            .set(MODIFIED_FIELD, modified_ago(&clock, 60))
            .set("name", "Acme");
        let incoming = Record::new().set(ID_FIELD, "C1").set("name", "Acme Inc");

        assert!(resolver
            .detect_conflict(&local, &incoming, &incoming)
            .is_some());
    }

    fn sample_conflict(resolver: &ConflictResolver, clock: &FixedClock) -> Conflict {
        let local = Record::new()
            .set(ID_FIELD, "C1")
            .set(MODIFIED_FIELD, modified_ago(clock, 1))
            .set("a", "local-a")
            .set("b", "local-b");
        let incoming = Record::new()
            .set(ID_FIELD, "C1")
            .set("a", "remote-a")
            .set("b", "remote-b");
        resolver
            .detect_conflict(&local, &incoming, &incoming)
            .unwrap()
    }

    #[test]
    fn local_wins_skips() {
        let (resolver, clock) = setup();
        let conflict = sample_conflict(&resolver, &clock);

        let resolution = resolver
            .resolve(
                &conflict,
                &ResolveOptions::new().with_strategy(ResolutionStrategy::LocalWins),
            )
            .unwrap();
        assert_eq!(resolution.action, ResolutionAction::Skip);
        assert_eq!(resolution.data, conflict.local_record);
    }

    #[test]
    fn newest_wins_and_remote_wins_ties() {
        let (resolver, clock) = setup();
        let ts = modified_ago(&clock, 1);

        let make = |local_ts: &str, remote_ts: &str| {
            let local = Record::new()
                .set(ID_FIELD, "C1")
                .set(MODIFIED_FIELD, local_ts)
                .set("v", "local");
            let incoming = Record::new().set(ID_FIELD, "C1").set("v", "remote");
            let remote = Record::new()
                .set(ID_FIELD, "C1")
                .set(MODIFIED_FIELD, remote_ts)
                .set("v", "remote");
            resolver.detect_conflict(&local, &incoming, &remote).unwrap()
        };

        // Local newer: keep local.
        let conflict = make(&ts, &modified_ago(&clock, 2));
        let resolution = resolver
            .resolve(
                &conflict,
                &ResolveOptions::new().with_strategy(ResolutionStrategy::NewestWins),
            )
            .unwrap();
        assert_eq!(resolution.action, ResolutionAction::Skip);

        // Equal timestamps: remote wins the tie.
        let conflict = make(&ts, &ts);
        let resolution = resolver
            .resolve(
                &conflict,
                &ResolveOptions::new().with_strategy(ResolutionStrategy::NewestWins),
            )
            .unwrap();
        assert_eq!(resolution.action, ResolutionAction::Update);
        assert_eq!(resolution.data.get("v"), Some(&serde_json::json!("remote")));

        // Missing local timestamp compares as epoch: remote wins.
        let local = Record::new().set(ID_FIELD, "C1").set("v", "local");
        let incoming = Record::new().set(ID_FIELD, "C1").set("v", "remote");
        let remote = Record::new()
            .set(ID_FIELD, "C1")
            .set(MODIFIED_FIELD, ts)
            .set("v", "remote");
        let conflict = resolver.detect_conflict(&local, &incoming, &remote).unwrap();
        let resolution = resolver
            .resolve(
                &conflict,
                &ResolveOptions::new().with_strategy(ResolutionStrategy::NewestWins),
            )
            .unwrap();
        assert_eq!(resolution.action, ResolutionAction::Update);
    }

    #[test]
    fn merge_honors_field_priorities() {
        let (resolver, clock) = setup();
        let conflict = sample_conflict(&resolver, &clock);

        let mut priorities = FieldPriorities::new();
        priorities.insert("a".into(), FieldPriority::Local);
        priorities.insert("b".into(), FieldPriority::Remote);

        let resolution = resolver
            .resolve(
                &conflict,
                &ResolveOptions::new()
                    .with_strategy(ResolutionStrategy::Merge)
                    .with_field_priorities(priorities),
            )
            .unwrap();

        assert_eq!(resolution.action, ResolutionAction::Update);
        assert_eq!(resolution.data.get("a"), Some(&serde_json::json!("local-a")));
        assert_eq!(resolution.data.get("b"), Some(&serde_json::json!("remote-b")));
        // Untouched fields stay local.
        assert_eq!(resolution.data.id(), Some("C1"));
        assert_eq!(
            resolution.data.get(MODIFIED_FIELD),
            conflict.local_record.get(MODIFIED_FIELD)
        );
    }

    #[test]
    fn merge_defaults_unlisted_fields_to_remote() {
        let (resolver, clock) = setup();
        let conflict = sample_conflict(&resolver, &clock);

        let resolution = resolver
            .resolve(
                &conflict,
                &ResolveOptions::new().with_strategy(ResolutionStrategy::Merge),
            )
            .unwrap();
        assert_eq!(resolution.data.get("a"), Some(&serde_json::json!("remote-a")));
        assert_eq!(resolution.data.get("b"), Some(&serde_json::json!("remote-b")));
    }

    #[test]
    fn resolve_is_deterministic() {
        let (resolver, clock) = setup();
        let conflict = sample_conflict(&resolver, &clock);
        let options = ResolveOptions::new().with_strategy(ResolutionStrategy::NewestWins);

        let first = resolver.resolve(&conflict, &options).unwrap();
        let second = resolver.resolve(&conflict, &options).unwrap();
        assert_eq!(first.action, second.action);
        assert_eq!(first.data, second.data);
    }

    #[test]
    fn manual_queue_lifecycle() {
        let (resolver, clock) = setup();
        let conflict = sample_conflict(&resolver, &clock);

        let resolution = resolver
            .resolve(
                &conflict,
                &ResolveOptions::new().with_strategy(ResolutionStrategy::Manual),
            )
            .unwrap();
        assert_eq!(resolution.action, ResolutionAction::Skip);
        assert!(resolution.review_required);

        let pending = resolver.pending_conflicts().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, conflict.id);

        // Unknown ids are a warned no-op.
        assert!(!resolver.mark_resolved("nope").unwrap());

        assert!(resolver.mark_resolved(&conflict.id).unwrap());
        assert!(resolver.pending_conflicts().unwrap().is_empty());

        assert_eq!(resolver.clear_resolved().unwrap(), 1);
    }

    #[test]
    fn malformed_queue_rows_are_skipped() {
        let store = Arc::new(MemoryStateStore::new());
        let clock = Arc::new(FixedClock::new(Utc::now()));
        store
            .put("conflict:broken", serde_json::json!("not a conflict"))
            .unwrap();
        let resolver = ConflictResolver::new(store, clock);

        assert!(resolver.pending_conflicts().unwrap().is_empty());
    }

    #[test]
    fn notify_on_conflict() {
        let store = Arc::new(MemoryStateStore::new());
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let notifier = Arc::new(MemoryNotifier::new());
        let resolver =
            ConflictResolver::new(store, clock).with_notifier(notifier.clone());
        resolver.configure(ResolverConfig::new().with_notify_on_conflict(true));

        let local = Record::new().set(ID_FIELD, "C1").set("name", "Acme");
        let incoming = Record::new().set(ID_FIELD, "C1").set("name", "Acme Inc");
        resolver.detect_conflict(&local, &incoming, &incoming);

        assert_eq!(notifier.alerts().len(), 1);
    }
}
