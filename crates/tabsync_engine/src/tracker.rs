//! Durable change tracking: per-record mutation log and sync watermarks.

use crate::error::SyncResult;
use crate::store::StateStore;
use crate::traits::{Clock, Repository};
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tabsync_model::{record_checksum, ChangeLogEntry, EntityType, Record, SyncDirection, Watermark};
use tracing::{debug, warn};

const WATERMARK_PREFIX: &str = "watermark:";
const CHANGELOG_PREFIX: &str = "changelog:";

const ALL_DIRECTIONS: [SyncDirection; 3] = [
    SyncDirection::RemoteToLocal,
    SyncDirection::LocalToRemote,
    SyncDirection::Bidirectional,
];

/// Aggregate change-tracking counts for one entity type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackerStats {
    /// Total change-log entries on record.
    pub total_entries: usize,
    /// Entries from the last 24 hours.
    pub last_24h: usize,
    /// Entries from the last 7 days.
    pub last_7d: usize,
    /// Entries from the last 30 days.
    pub last_30d: usize,
    /// Remote-to-local watermark, if any.
    pub remote_to_local: Option<DateTime<Utc>>,
    /// Local-to-remote watermark, if any.
    pub local_to_remote: Option<DateTime<Utc>>,
}

/// Tracks applied record mutations and last-successful-sync watermarks.
///
/// The per-entity change log is append-only and bounded: when it would
/// exceed `max_log_entries`, the oldest entries are evicted before the log
/// is persisted. Watermarks are one per (entity type, direction) pair and
/// are overwritten on every successful run.
pub struct ChangeTracker {
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    max_log_entries: AtomicUsize,
}

impl ChangeTracker {
    /// Creates a tracker with the default log cap of 500 entries.
    pub fn new(store: Arc<dyn StateStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            max_log_entries: AtomicUsize::new(500),
        }
    }

    /// Sets the per-entity change-log cap.
    pub fn with_max_log_entries(self, max: usize) -> Self {
        self.set_max_log_entries(max);
        self
    }

    /// Sets the per-entity change-log cap on a shared tracker. The
    /// orchestrator applies its configured cap through this at construction.
    pub fn set_max_log_entries(&self, max: usize) {
        self.max_log_entries.store(max, Ordering::Relaxed);
    }

    /// Returns the watermark for an (entity type, direction) pair.
    ///
    /// Never fails: storage errors and malformed rows are logged and treated
    /// as "no watermark", which makes the next run a full sync.
    pub fn last_sync_time(
        &self,
        entity_type: &EntityType,
        direction: SyncDirection,
    ) -> Option<DateTime<Utc>> {
        let key = watermark_key(entity_type, direction);
        let value = match self.store.get(&key) {
            Ok(value) => value?,
            Err(e) => {
                warn!(key, error = %e, "failed to read watermark");
                return None;
            }
        };

        match serde_json::from_value::<Watermark>(value) {
            Ok(watermark) => Some(watermark.last_sync_time),
            Err(e) => {
                warn!(key, error = %e, "malformed watermark row");
                None
            }
        }
    }

    /// Sets the watermark for an (entity type, direction) pair to "now".
    ///
    /// Idempotent: re-invocation just overwrites with a fresh timestamp.
    pub fn update_last_sync_time(
        &self,
        entity_type: &EntityType,
        direction: SyncDirection,
    ) -> SyncResult<()> {
        let watermark = Watermark {
            entity_type: entity_type.clone(),
            direction,
            last_sync_time: self.clock.now(),
        };
        self.store.put(
            &watermark_key(entity_type, direction),
            serde_json::to_value(&watermark)?,
        )
    }

    /// Appends a change-log entry for an applied record mutation.
    ///
    /// The entry's checksum is computed over `data`'s canonical
    /// serialization. If the log would exceed the cap, the oldest entries
    /// are evicted first.
    pub fn track_change(
        &self,
        entity_type: &EntityType,
        record_id: &str,
        direction: SyncDirection,
        data: &Record,
    ) -> SyncResult<()> {
        let mut log = self.load_log(entity_type)?;
        log.push(ChangeLogEntry::new(
            entity_type.clone(),
            record_id,
            direction,
            self.clock.now(),
            record_checksum(data),
        ));

        let cap = self.max_log_entries.load(Ordering::Relaxed);
        if log.len() > cap {
            let excess = log.len() - cap;
            log.drain(..excess);
            debug!(
                entity_type = %entity_type,
                evicted = excess,
                "change log truncated to cap"
            );
        }

        self.save_log(entity_type, &log)
    }

    /// Resolves the records modified since a watermark.
    ///
    /// A `None` watermark means no sync has ever completed; the caller
    /// should treat this as a full-sync case, so `Ok(None)` is returned.
    /// Otherwise the de-duplicated set of record ids whose most recent entry
    /// is newer than `since` is resolved against the repository; ids that no
    /// longer exist locally are skipped.
    pub fn modified_records(
        &self,
        entity_type: &EntityType,
        since: Option<DateTime<Utc>>,
        repository: &dyn Repository,
    ) -> SyncResult<Option<Vec<Record>>> {
        let Some(since) = since else {
            return Ok(None);
        };

        let log = self.load_log(entity_type)?;
        let mut modified_ids = BTreeSet::new();
        for id in log.iter().map(|entry| entry.record_id.as_str()) {
            let latest = log
                .iter()
                .rev()
                .find(|entry| entry.record_id == id)
                .map(|entry| entry.timestamp);
            if latest.is_some_and(|ts| ts > since) {
                modified_ids.insert(id.to_string());
            }
        }

        let mut records = Vec::with_capacity(modified_ids.len());
        for id in modified_ids {
            if let Some(record) = repository.find_by_id(entity_type, &id)? {
                records.push(record);
            }
        }
        Ok(Some(records))
    }

    /// Returns true if `new_data` differs from the most recently tracked
    /// checksum for the record.
    ///
    /// A record with no tracked history counts as changed (conservative
    /// default).
    pub fn has_changed(
        &self,
        entity_type: &EntityType,
        record_id: &str,
        new_data: &Record,
    ) -> SyncResult<bool> {
        let log = self.load_log(entity_type)?;
        let last_checksum = log
            .iter()
            .rev()
            .find(|entry| entry.record_id == record_id)
            .map(|entry| entry.checksum.as_str());

        Ok(match last_checksum {
            Some(checksum) => checksum != record_checksum(new_data),
            None => true,
        })
    }

    /// Returns the full ordered history for one record, oldest first.
    pub fn change_history(
        &self,
        entity_type: &EntityType,
        record_id: &str,
    ) -> SyncResult<Vec<ChangeLogEntry>> {
        Ok(self
            .load_log(entity_type)?
            .into_iter()
            .filter(|entry| entry.record_id == record_id)
            .collect())
    }

    /// Deletes all watermarks and the change log for an entity type,
    /// forcing the next run to be a full sync.
    pub fn clear_tracking(&self, entity_type: &EntityType) -> SyncResult<()> {
        for direction in ALL_DIRECTIONS {
            self.store.remove(&watermark_key(entity_type, direction))?;
        }
        self.store.remove(&changelog_key(entity_type))
    }

    /// Deletes change-log entries older than the cutoff, across all known
    /// entity types. Watermarks are untouched. Returns the number of
    /// entries removed.
    pub fn cleanup(&self, days_to_keep: i64) -> SyncResult<usize> {
        let cutoff = self.clock.now() - Duration::days(days_to_keep);
        let mut removed = 0;

        for key in self.store.keys_with_prefix(CHANGELOG_PREFIX)? {
            let Some(value) = self.store.get(&key)? else {
                continue;
            };
            let log: Vec<ChangeLogEntry> = serde_json::from_value(value)?;
            let kept: Vec<ChangeLogEntry> = log
                .iter()
                .filter(|entry| entry.timestamp >= cutoff)
                .cloned()
                .collect();

            removed += log.len() - kept.len();
            if kept.len() != log.len() {
                self.store.put(&key, serde_json::to_value(&kept)?)?;
            }
        }

        debug!(removed, days_to_keep, "change log cleanup complete");
        Ok(removed)
    }

    /// Returns aggregate counts and both watermarks for an entity type.
    pub fn stats(&self, entity_type: &EntityType) -> SyncResult<TrackerStats> {
        let log = self.load_log(entity_type)?;
        let now = self.clock.now();

        let within = |days: i64| {
            log.iter()
                .filter(|entry| entry.timestamp >= now - Duration::days(days))
                .count()
        };

        Ok(TrackerStats {
            total_entries: log.len(),
            last_24h: within(1),
            last_7d: within(7),
            last_30d: within(30),
            remote_to_local: self.last_sync_time(entity_type, SyncDirection::RemoteToLocal),
            local_to_remote: self.last_sync_time(entity_type, SyncDirection::LocalToRemote),
        })
    }

    fn load_log(&self, entity_type: &EntityType) -> SyncResult<Vec<ChangeLogEntry>> {
        match self.store.get(&changelog_key(entity_type))? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(Vec::new()),
        }
    }

    fn save_log(&self, entity_type: &EntityType, log: &[ChangeLogEntry]) -> SyncResult<()> {
        self.store
            .put(&changelog_key(entity_type), serde_json::to_value(log)?)
    }
}

fn watermark_key(entity_type: &EntityType, direction: SyncDirection) -> String {
    format!("{WATERMARK_PREFIX}{entity_type}:{direction}")
}

fn changelog_key(entity_type: &EntityType) -> String {
    format!("{CHANGELOG_PREFIX}{entity_type}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{FixedClock, MemoryRepository};
    use crate::store::MemoryStateStore;
    use tabsync_model::ID_FIELD;

    fn setup() -> (ChangeTracker, Arc<FixedClock>, Arc<MemoryRepository>) {
        let store = Arc::new(MemoryStateStore::new());
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let tracker = ChangeTracker::new(store, clock.clone());
        (tracker, clock, Arc::new(MemoryRepository::new()))
    }

    fn orders() -> EntityType {
        EntityType::from("orders")
    }

    #[test]
    fn watermark_lifecycle() {
        let (tracker, clock, _) = setup();

        assert!(tracker
            .last_sync_time(&orders(), SyncDirection::RemoteToLocal)
            .is_none());

        tracker
            .update_last_sync_time(&orders(), SyncDirection::RemoteToLocal)
            .unwrap();
        assert_eq!(
            tracker.last_sync_time(&orders(), SyncDirection::RemoteToLocal),
            Some(clock.now())
        );

        // The other direction has its own watermark.
        assert!(tracker
            .last_sync_time(&orders(), SyncDirection::LocalToRemote)
            .is_none());
    }

    #[test]
    fn has_changed_semantics() {
        let (tracker, _, _) = setup();
        let record = Record::new().set(ID_FIELD, "O1").set("qty", 1);

        // No prior entry counts as changed.
        assert!(tracker.has_changed(&orders(), "O1", &record).unwrap());

        tracker
            .track_change(&orders(), "O1", SyncDirection::RemoteToLocal, &record)
            .unwrap();

        assert!(!tracker.has_changed(&orders(), "O1", &record).unwrap());

        let modified = record.clone().set("qty", 2);
        assert!(tracker.has_changed(&orders(), "O1", &modified).unwrap());
    }

    #[test]
    fn change_history_is_oldest_first() {
        let (tracker, clock, _) = setup();

        for qty in 1..=3 {
            let record = Record::new().set(ID_FIELD, "O1").set("qty", qty);
            tracker
                .track_change(&orders(), "O1", SyncDirection::RemoteToLocal, &record)
                .unwrap();
            clock.advance(Duration::seconds(10));
        }

        let history = tracker.change_history(&orders(), "O1").unwrap();
        assert_eq!(history.len(), 3);
        assert!(history[0].timestamp < history[2].timestamp);
    }

    #[test]
    fn log_is_bounded() {
        let store = Arc::new(MemoryStateStore::new());
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let tracker = ChangeTracker::new(store, clock.clone()).with_max_log_entries(5);

        for i in 0..10 {
            let record = Record::new().set(ID_FIELD, format!("O{i}"));
            tracker
                .track_change(
                    &orders(),
                    &format!("O{i}"),
                    SyncDirection::RemoteToLocal,
                    &record,
                )
                .unwrap();
            clock.advance(Duration::seconds(1));
        }

        let stats = tracker.stats(&orders()).unwrap();
        assert_eq!(stats.total_entries, 5);

        // The oldest entries were evicted.
        assert!(tracker.change_history(&orders(), "O0").unwrap().is_empty());
        assert_eq!(tracker.change_history(&orders(), "O9").unwrap().len(), 1);
    }

    #[test]
    fn modified_records_without_watermark_signals_full_sync() {
        let (tracker, _, repo) = setup();
        assert!(tracker
            .modified_records(&orders(), None, repo.as_ref())
            .unwrap()
            .is_none());
    }

    #[test]
    fn modified_records_incremental_correctness() {
        let (tracker, clock, repo) = setup();

        // Two records tracked before the watermark.
        for id in ["O1", "O2"] {
            let record = Record::new().set(ID_FIELD, id);
            repo.seed(&orders(), record.clone());
            tracker
                .track_change(&orders(), id, SyncDirection::RemoteToLocal, &record)
                .unwrap();
        }

        clock.advance(Duration::minutes(1));
        let watermark = clock.now();
        clock.advance(Duration::minutes(1));

        // O2 modified again after the watermark, O3 is brand new.
        for id in ["O2", "O3"] {
            let record = Record::new().set(ID_FIELD, id).set("touched", true);
            repo.seed(&orders(), record.clone());
            tracker
                .track_change(&orders(), id, SyncDirection::RemoteToLocal, &record)
                .unwrap();
        }

        let modified = tracker
            .modified_records(&orders(), Some(watermark), repo.as_ref())
            .unwrap()
            .unwrap();

        let ids: Vec<_> = modified.iter().filter_map(Record::id).collect();
        assert_eq!(ids, vec!["O2", "O3"]);
    }

    #[test]
    fn modified_records_skips_missing_rows() {
        let (tracker, clock, repo) = setup();
        let watermark = clock.now() - Duration::minutes(5);

        let record = Record::new().set(ID_FIELD, "gone");
        tracker
            .track_change(&orders(), "gone", SyncDirection::RemoteToLocal, &record)
            .unwrap();

        let modified = tracker
            .modified_records(&orders(), Some(watermark), repo.as_ref())
            .unwrap()
            .unwrap();
        assert!(modified.is_empty());
    }

    #[test]
    fn clear_tracking_removes_watermarks_and_log() {
        let (tracker, _, _) = setup();

        let record = Record::new().set(ID_FIELD, "O1");
        tracker
            .track_change(&orders(), "O1", SyncDirection::RemoteToLocal, &record)
            .unwrap();
        tracker
            .update_last_sync_time(&orders(), SyncDirection::RemoteToLocal)
            .unwrap();
        tracker
            .update_last_sync_time(&orders(), SyncDirection::LocalToRemote)
            .unwrap();

        tracker.clear_tracking(&orders()).unwrap();

        assert!(tracker
            .last_sync_time(&orders(), SyncDirection::RemoteToLocal)
            .is_none());
        assert!(tracker
            .last_sync_time(&orders(), SyncDirection::LocalToRemote)
            .is_none());
        assert_eq!(tracker.stats(&orders()).unwrap().total_entries, 0);
    }

    #[test]
    fn cleanup_bound_leaves_watermarks_untouched() {
        let (tracker, clock, _) = setup();

        // One old entry, one fresh entry.
        let record = Record::new().set(ID_FIELD, "O1");
        tracker
            .track_change(&orders(), "O1", SyncDirection::RemoteToLocal, &record)
            .unwrap();
        clock.advance(Duration::days(45));
        tracker
            .track_change(&orders(), "O2", SyncDirection::RemoteToLocal, &record)
            .unwrap();
        tracker
            .update_last_sync_time(&orders(), SyncDirection::RemoteToLocal)
            .unwrap();

        let removed = tracker.cleanup(30).unwrap();
        assert_eq!(removed, 1);

        let stats = tracker.stats(&orders()).unwrap();
        assert_eq!(stats.total_entries, 1);
        assert!(stats.remote_to_local.is_some());

        let cutoff = clock.now() - Duration::days(30);
        for entry in tracker.change_history(&orders(), "O2").unwrap() {
            assert!(entry.timestamp >= cutoff);
        }
    }

    #[test]
    fn stats_windows() {
        let (tracker, clock, _) = setup();
        let record = Record::new().set(ID_FIELD, "O1");

        // 10 days old, 2 days old, 1 hour old.
        tracker
            .track_change(&orders(), "a", SyncDirection::RemoteToLocal, &record)
            .unwrap();
        clock.advance(Duration::days(8));
        tracker
            .track_change(&orders(), "b", SyncDirection::RemoteToLocal, &record)
            .unwrap();
        clock.advance(Duration::days(2) - Duration::hours(1));
        tracker
            .track_change(&orders(), "c", SyncDirection::RemoteToLocal, &record)
            .unwrap();
        clock.advance(Duration::hours(1));

        let stats = tracker.stats(&orders()).unwrap();
        assert_eq!(stats.total_entries, 3);
        assert_eq!(stats.last_24h, 1);
        assert_eq!(stats.last_7d, 2);
        assert_eq!(stats.last_30d, 3);
    }
}
