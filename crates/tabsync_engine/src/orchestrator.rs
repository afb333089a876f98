//! Drives one sync run for one entity type.

use crate::config::EngineConfig;
use crate::error::{SyncError, SyncResult};
use crate::resolver::{ConflictResolver, ResolveOptions};
use crate::tracker::ChangeTracker;
use crate::traits::{Clock, EntityTransform, Filter, FilterOp, RemoteClient, RemoteQuery, Repository};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tabsync_model::{
    EntityType, FieldPriorities, Record, ResolutionAction, ResolutionStrategy, SyncDirection,
    MODIFIED_FIELD,
};
use tracing::{info, warn};

/// Options for one sync run.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Direction of the run.
    pub direction: SyncDirection,
    /// Force a full fetch even when a watermark exists.
    pub full_sync: bool,
    /// Extra filter applied to the remote fetch.
    pub filter: Option<Filter>,
    /// Overrides the engine default for conflict detection.
    pub detect_conflicts: Option<bool>,
    /// Overrides the resolver's default strategy.
    pub strategy: Option<ResolutionStrategy>,
    /// Per-field priorities for merge resolution.
    pub field_priorities: FieldPriorities,
}

impl SyncOptions {
    /// Creates options for a remote-to-local incremental run.
    pub fn new() -> Self {
        Self {
            direction: SyncDirection::RemoteToLocal,
            full_sync: false,
            filter: None,
            detect_conflicts: None,
            strategy: None,
            field_priorities: FieldPriorities::new(),
        }
    }

    /// Sets the direction.
    pub fn with_direction(mut self, direction: SyncDirection) -> Self {
        self.direction = direction;
        self
    }

    /// Forces a full fetch.
    pub fn with_full_sync(mut self, full: bool) -> Self {
        self.full_sync = full;
        self
    }

    /// Adds an extra remote filter.
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Overrides conflict detection for this run.
    pub fn with_detect_conflicts(mut self, detect: bool) -> Self {
        self.detect_conflicts = Some(detect);
        self
    }

    /// Overrides the resolution strategy for this run.
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

impl Default for SyncOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-run counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Records fetched from the source side.
    pub fetched: u64,
    /// Records created on the destination side.
    pub created: u64,
    /// Records updated on the destination side.
    pub updated: u64,
    /// Records deleted (kept for report shape; no tombstone feed exists).
    pub deleted: u64,
    /// Records skipped (conflict resolution kept the destination).
    pub skipped: u64,
    /// Records that failed and were isolated.
    pub failed: u64,
    /// Conflicts detected.
    pub conflicts: u64,
}

/// One isolated per-record failure.
#[derive(Debug, Clone)]
pub struct RecordError {
    /// Identity of the failing record, when known.
    pub record_id: String,
    /// Error message.
    pub message: String,
}

/// Result of one sync run.
#[derive(Debug, Clone)]
pub struct SyncReport {
    /// Entity type that was synced.
    pub entity_type: EntityType,
    /// Direction of the run.
    pub direction: SyncDirection,
    /// Whether any pass performed a full (unbounded) fetch.
    pub full_sync: bool,
    /// Wall-clock start of the run.
    pub started: DateTime<Utc>,
    /// Wall-clock end of the run.
    pub completed: DateTime<Utc>,
    /// Elapsed duration, `completed - started` per the injected clock.
    pub duration: Duration,
    /// Per-run counters.
    pub stats: SyncStats,
    /// Isolated per-record failures.
    pub errors: Vec<RecordError>,
}

/// Binding of an entity type to its remote resource and shape transform.
#[derive(Clone)]
struct EntityBinding {
    resource: String,
    transform: Arc<dyn EntityTransform>,
}

/// Orchestrates sync runs: fetch, transform, conflict adjudication, write,
/// change tracking, statistics.
///
/// Runs for the same entity type are serialized with a per-entity lock; a
/// second concurrent call fails fast with [`SyncError::RunInProgress`]
/// rather than racing on the watermark. A cancellation flag is checked
/// between batches.
pub struct SyncOrchestrator {
    config: EngineConfig,
    repository: Arc<dyn Repository>,
    remote: Arc<dyn RemoteClient>,
    tracker: Arc<ChangeTracker>,
    resolver: Arc<ConflictResolver>,
    clock: Arc<dyn Clock>,
    bindings: RwLock<HashMap<EntityType, EntityBinding>>,
    run_locks: Mutex<HashMap<EntityType, Arc<Mutex<()>>>>,
    cancelled: AtomicBool,
}

impl SyncOrchestrator {
    /// Creates an orchestrator over the given collaborators.
    ///
    /// The configured change-log cap is applied to the tracker here, so
    /// `EngineConfig::max_log_entries` governs the shared tracker.
    pub fn new(
        config: EngineConfig,
        repository: Arc<dyn Repository>,
        remote: Arc<dyn RemoteClient>,
        tracker: Arc<ChangeTracker>,
        resolver: Arc<ConflictResolver>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        tracker.set_max_log_entries(config.max_log_entries);
        Self {
            config,
            repository,
            remote,
            tracker,
            resolver,
            clock,
            bindings: RwLock::new(HashMap::new()),
            run_locks: Mutex::new(HashMap::new()),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Registers an entity type: its remote resource name and transform.
    pub fn bind(
        &self,
        entity_type: EntityType,
        resource: impl Into<String>,
        transform: Arc<dyn EntityTransform>,
    ) {
        self.bindings.write().insert(
            entity_type,
            EntityBinding {
                resource: resource.into(),
                transform,
            },
        );
    }

    /// Returns the change tracker.
    pub fn tracker(&self) -> &ChangeTracker {
        &self.tracker
    }

    /// Returns the conflict resolver.
    pub fn resolver(&self) -> &ConflictResolver {
        &self.resolver
    }

    /// Cancels any ongoing run; checked between batches.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Resets the cancelled flag.
    pub fn reset_cancel(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    fn check_cancelled(&self) -> SyncResult<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Performs one sync run for one entity type.
    ///
    /// Fails only on setup errors (no binding, concurrent run) or when the
    /// candidate fetch itself fails; per-record failures are isolated into
    /// `stats.failed` plus an `errors` entry and never abort the run.
    pub fn sync(&self, entity_type: &EntityType, options: &SyncOptions) -> SyncResult<SyncReport> {
        let binding = self
            .bindings
            .read()
            .get(entity_type)
            .cloned()
            .ok_or_else(|| SyncError::NoBinding(entity_type.clone()))?;

        let lock = self.entity_lock(entity_type);
        let _guard = lock
            .try_lock()
            .ok_or_else(|| SyncError::RunInProgress(entity_type.clone()))?;

        self.reset_cancel();
        let started = self.clock.now();
        let mut stats = SyncStats::default();
        let mut errors = Vec::new();
        let mut full_sync = false;

        match options.direction {
            SyncDirection::RemoteToLocal => {
                full_sync |=
                    self.pass_remote_to_local(entity_type, &binding, options, &mut stats, &mut errors)?;
            }
            SyncDirection::LocalToRemote => {
                full_sync |=
                    self.pass_local_to_remote(entity_type, &binding, options, &mut stats, &mut errors)?;
            }
            SyncDirection::Bidirectional => {
                full_sync |=
                    self.pass_remote_to_local(entity_type, &binding, options, &mut stats, &mut errors)?;
                full_sync |=
                    self.pass_local_to_remote(entity_type, &binding, options, &mut stats, &mut errors)?;
            }
        }

        let completed = self.clock.now();
        let report = SyncReport {
            entity_type: entity_type.clone(),
            direction: options.direction,
            full_sync,
            started,
            completed,
            // A clock stepping backwards clamps to zero.
            duration: (completed - started).to_std().unwrap_or_default(),
            stats,
            errors,
        };
        log_summary(&report);
        Ok(report)
    }

    /// Remote-to-local pass. Returns true when the fetch was full.
    fn pass_remote_to_local(
        &self,
        entity_type: &EntityType,
        binding: &EntityBinding,
        options: &SyncOptions,
        stats: &mut SyncStats,
        errors: &mut Vec<RecordError>,
    ) -> SyncResult<bool> {
        let watermark = self
            .tracker
            .last_sync_time(entity_type, SyncDirection::RemoteToLocal);
        let full = options.full_sync || watermark.is_none();

        let mut query = RemoteQuery::new();
        if let Some(filter) = &options.filter {
            query = query.with_filter(filter.clone());
        }
        if let (false, Some(since)) = (full, watermark) {
            query = query.with_filter(Filter::new(
                MODIFIED_FIELD,
                FilterOp::Ge,
                since.to_rfc3339(),
            ));
        }

        // A failed candidate fetch is fatal to the run.
        let records = self.remote.get(&binding.resource, &query)?;
        stats.fetched += records.len() as u64;

        for batch in records.chunks(self.config.batch_size.max(1)) {
            self.check_cancelled()?;
            for record in batch {
                if let Err(e) = self.apply_remote_record(entity_type, binding, options, record, stats)
                {
                    isolate_record_error(record.id(), e, stats, errors)?;
                }
            }
        }

        self.tracker
            .update_last_sync_time(entity_type, SyncDirection::RemoteToLocal)?;
        Ok(full)
    }

    fn apply_remote_record(
        &self,
        entity_type: &EntityType,
        binding: &EntityBinding,
        options: &SyncOptions,
        remote_record: &Record,
        stats: &mut SyncStats,
    ) -> SyncResult<()> {
        let incoming = binding.transform.to_local(remote_record)?;
        let id = incoming
            .id()
            .map(String::from)
            .ok_or_else(|| SyncError::Transform("transformed record has no id".into()))?;

        let existing = self.repository.find_by_id(entity_type, &id)?;
        let Some(local) = existing else {
            let created = self.repository.create(entity_type, incoming)?;
            let created_id = created.id().unwrap_or(&id).to_string();
            self.tracker.track_change(
                entity_type,
                &created_id,
                SyncDirection::RemoteToLocal,
                &created,
            )?;
            stats.created += 1;
            return Ok(());
        };

        let detect = options
            .detect_conflicts
            .unwrap_or(self.config.detect_conflicts);
        if detect {
            if let Some(conflict) = self
                .resolver
                .detect_conflict(&local, &incoming, remote_record)
            {
                stats.conflicts += 1;
                let resolve_options = ResolveOptions {
                    strategy: options.strategy,
                    field_priorities: options.field_priorities.clone(),
                };
                let resolution = self.resolver.resolve(&conflict, &resolve_options)?;
                match resolution.action {
                    ResolutionAction::Update => {
                        let updated = self.repository.update(entity_type, &id, resolution.data)?;
                        self.tracker.track_change(
                            entity_type,
                            &id,
                            SyncDirection::RemoteToLocal,
                            &updated,
                        )?;
                        stats.updated += 1;
                    }
                    ResolutionAction::Skip => {
                        stats.skipped += 1;
                    }
                }
                return Ok(());
            }
        }

        let updated = self.repository.update(entity_type, &id, incoming)?;
        self.tracker
            .track_change(entity_type, &id, SyncDirection::RemoteToLocal, &updated)?;
        stats.updated += 1;
        Ok(())
    }

    /// Local-to-remote pass. Returns true when the candidate set was full.
    fn pass_local_to_remote(
        &self,
        entity_type: &EntityType,
        binding: &EntityBinding,
        options: &SyncOptions,
        stats: &mut SyncStats,
        errors: &mut Vec<RecordError>,
    ) -> SyncResult<bool> {
        let watermark = self
            .tracker
            .last_sync_time(entity_type, SyncDirection::LocalToRemote);

        let (candidates, full) = if options.full_sync {
            (self.repository.find_all(entity_type, None)?, true)
        } else {
            match self
                .tracker
                .modified_records(entity_type, watermark, self.repository.as_ref())?
            {
                Some(records) => (records, false),
                // No watermark yet: full sync.
                None => (self.repository.find_all(entity_type, None)?, true),
            }
        };
        stats.fetched += candidates.len() as u64;

        for batch in candidates.chunks(self.config.batch_size.max(1)) {
            self.check_cancelled()?;
            for record in batch {
                if let Err(e) = self.push_local_record(entity_type, binding, record, stats) {
                    isolate_record_error(record.id(), e, stats, errors)?;
                }
            }
        }

        self.tracker
            .update_last_sync_time(entity_type, SyncDirection::LocalToRemote)?;
        Ok(full)
    }

    fn push_local_record(
        &self,
        entity_type: &EntityType,
        binding: &EntityBinding,
        record: &Record,
        stats: &mut SyncStats,
    ) -> SyncResult<()> {
        let id = record
            .id()
            .map(String::from)
            .ok_or_else(|| SyncError::Repository("local record has no id".into()))?;
        let outgoing = binding.transform.to_remote(record)?;

        if self.remote.get_by_id(&binding.resource, &id)?.is_some() {
            self.remote.update(&binding.resource, &id, outgoing)?;
            stats.updated += 1;
        } else {
            self.remote.create(&binding.resource, outgoing)?;
            stats.created += 1;
        }

        self.tracker
            .track_change(entity_type, &id, SyncDirection::LocalToRemote, record)?;
        Ok(())
    }

    fn entity_lock(&self, entity_type: &EntityType) -> Arc<Mutex<()>> {
        self.run_locks
            .lock()
            .entry(entity_type.clone())
            .or_default()
            .clone()
    }
}

/// Folds a per-record failure into the run counters, re-raising only
/// cancellation.
fn isolate_record_error(
    record_id: Option<&str>,
    error: SyncError,
    stats: &mut SyncStats,
    errors: &mut Vec<RecordError>,
) -> SyncResult<()> {
    if matches!(error, SyncError::Cancelled) {
        return Err(error);
    }
    let record_id = record_id.unwrap_or("<unknown>").to_string();
    warn!(record_id = %record_id, error = %error, "record failed, continuing run");
    stats.failed += 1;
    errors.push(RecordError {
        record_id,
        message: error.to_string(),
    });
    Ok(())
}

fn log_summary(report: &SyncReport) {
    info!(
        entity_type = %report.entity_type,
        direction = %report.direction,
        full_sync = report.full_sync,
        fetched = report.stats.fetched,
        created = report.stats.created,
        updated = report.stats.updated,
        deleted = report.stats.deleted,
        skipped = report.stats.skipped,
        failed = report.stats.failed,
        conflicts = report.stats.conflicts,
        duration_ms = report.duration.as_millis() as u64,
        "sync run complete"
    );
    for error in &report.errors {
        warn!(record_id = %error.record_id, message = %error.message, "sync record error");
    }
}
