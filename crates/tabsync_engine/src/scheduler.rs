//! Recurring sync schedules: registry, trigger reconciliation, due runs.

use crate::error::{SyncError, SyncResult};
use crate::orchestrator::{SyncOptions, SyncOrchestrator};
use crate::store::StateStore;
use crate::traits::{AlertNotifier, Clock};
use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tabsync_model::{EntityType, SyncDirection};
use tracing::{error, info, warn};
use uuid::Uuid;

const SCHEDULE_PREFIX: &str = "schedule:";

/// How often a scheduled sync fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScheduleFrequency {
    /// Every 15 minutes.
    Every15Minutes,
    /// Every hour.
    Hourly,
    /// Every 6 hours.
    Every6Hours,
    /// Once a day at the given hour (UTC, 0-23).
    Daily {
        /// Hour of day.
        hour: u32,
    },
    /// Once a week at the given weekday and hour (UTC).
    Weekly {
        /// Day of week, 0 = Monday through 6 = Sunday.
        weekday: u32,
        /// Hour of day.
        hour: u32,
    },
}

impl ScheduleFrequency {
    /// Parses a frequency name with optional hour/weekday parameters.
    pub fn from_name(name: &str, hour: Option<u32>, weekday: Option<u32>) -> SyncResult<Self> {
        match name {
            "every_15_minutes" => Ok(Self::Every15Minutes),
            "hourly" => Ok(Self::Hourly),
            "every_6_hours" => Ok(Self::Every6Hours),
            "daily" => Ok(Self::Daily {
                hour: hour.unwrap_or(0).min(23),
            }),
            "weekly" => Ok(Self::Weekly {
                weekday: weekday.unwrap_or(0).min(6),
                hour: hour.unwrap_or(0).min(23),
            }),
            other => Err(SyncError::UnknownFrequency(other.to_string())),
        }
    }

    /// Returns the next fire time strictly after `now`.
    pub fn next_run_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match *self {
            Self::Every15Minutes => now + Duration::minutes(15),
            Self::Hourly => now + Duration::hours(1),
            Self::Every6Hours => now + Duration::hours(6),
            Self::Daily { hour } => {
                let today = at_hour(now, hour);
                if today > now {
                    today
                } else {
                    today + Duration::days(1)
                }
            }
            Self::Weekly { weekday, hour } => {
                let today_fire = at_hour(now, hour);
                let now_weekday = now.weekday().num_days_from_monday();
                let mut days_ahead = i64::from((weekday + 7 - now_weekday) % 7);
                if days_ahead == 0 && today_fire <= now {
                    days_ahead = 7;
                }
                today_fire + Duration::days(days_ahead)
            }
        }
    }
}

fn at_hour(now: DateTime<Utc>, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(now.year(), now.month(), now.day(), hour.min(23), 0, 0)
        .single()
        .unwrap_or(now)
}

/// Persisted sync options for a schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleOptions {
    /// Direction of the scheduled runs.
    pub direction: SyncDirection,
    /// Whether the scheduled runs force a full fetch.
    pub full_sync: bool,
}

impl Default for ScheduleOptions {
    fn default() -> Self {
        Self {
            direction: SyncDirection::RemoteToLocal,
            full_sync: false,
        }
    }
}

impl From<&ScheduleOptions> for SyncOptions {
    fn from(options: &ScheduleOptions) -> Self {
        SyncOptions::new()
            .with_direction(options.direction)
            .with_full_sync(options.full_sync)
    }
}

/// Persisted record of one recurring sync registration.
///
/// Distinct from the underlying trigger mechanism: the descriptor lives in
/// the registry, the trigger in the [`TriggerSet`], and the two are kept
/// 1:1 by [`ScheduleManager::cleanup_orphaned_triggers`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleDescriptor {
    /// Unique schedule id.
    pub schedule_id: String,
    /// Entity type the schedule syncs.
    pub entity_type: EntityType,
    /// Fire frequency.
    pub frequency: ScheduleFrequency,
    /// Options passed to each run.
    pub options: ScheduleOptions,
    /// When the schedule was registered.
    pub created_at: DateTime<Utc>,
    /// Next fire time.
    pub next_run: DateTime<Utc>,
}

/// The live periodic trigger mechanism.
///
/// Abstracted so the registry can be reconciled against whatever actually
/// fires the runs (an OS timer, a cron table, the in-process
/// [`crate::ScheduleRunner`]).
pub trait TriggerSet: Send + Sync {
    /// Installs a live trigger for a schedule.
    fn install(&self, schedule_id: &str, entity_type: &EntityType) -> SyncResult<()>;

    /// Removes a live trigger. Removing a missing trigger is not an error.
    fn remove(&self, schedule_id: &str) -> SyncResult<()>;

    /// Returns the ids of all live triggers.
    fn active_ids(&self) -> SyncResult<Vec<String>>;
}

/// An in-memory trigger set.
#[derive(Debug, Default)]
pub struct MemoryTriggerSet {
    triggers: RwLock<BTreeMap<String, EntityType>>,
}

impl MemoryTriggerSet {
    /// Creates an empty trigger set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a trigger directly, simulating an orphan left behind by a
    /// crashed registration.
    pub fn install_raw(&self, schedule_id: &str, entity_type: &EntityType) {
        self.triggers
            .write()
            .insert(schedule_id.to_string(), entity_type.clone());
    }

    /// Returns true if a trigger with this id is live.
    pub fn contains(&self, schedule_id: &str) -> bool {
        self.triggers.read().contains_key(schedule_id)
    }
}

impl TriggerSet for MemoryTriggerSet {
    fn install(&self, schedule_id: &str, entity_type: &EntityType) -> SyncResult<()> {
        self.triggers
            .write()
            .insert(schedule_id.to_string(), entity_type.clone());
        Ok(())
    }

    fn remove(&self, schedule_id: &str) -> SyncResult<()> {
        self.triggers.write().remove(schedule_id);
        Ok(())
    }

    fn active_ids(&self) -> SyncResult<Vec<String>> {
        Ok(self.triggers.read().keys().cloned().collect())
    }
}

/// Registers, removes, and reconciles recurring sync schedules, and runs
/// the ones that are due.
///
/// One active schedule per entity type: registering a new one first removes
/// any existing schedule for that entity. A failed scheduled run is logged
/// (and optionally alerted) but never propagates past the trigger boundary;
/// the next tick is the retry.
pub struct ScheduleManager {
    store: Arc<dyn StateStore>,
    triggers: Arc<dyn TriggerSet>,
    clock: Arc<dyn Clock>,
    notifier: Option<Arc<dyn AlertNotifier>>,
}

impl ScheduleManager {
    /// Creates a manager over the given registry store and trigger set.
    pub fn new(
        store: Arc<dyn StateStore>,
        triggers: Arc<dyn TriggerSet>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            triggers,
            clock,
            notifier: None,
        }
    }

    /// Attaches an alert notifier for failed scheduled runs.
    pub fn with_notifier(mut self, notifier: Arc<dyn AlertNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Registers a recurring sync, replacing any existing schedule for the
    /// entity type. Returns the new schedule id.
    pub fn schedule_sync(
        &self,
        entity_type: &EntityType,
        frequency: ScheduleFrequency,
        options: ScheduleOptions,
    ) -> SyncResult<String> {
        self.remove_schedule(entity_type)?;

        let schedule_id = Uuid::new_v4().to_string();
        self.triggers.install(&schedule_id, entity_type)?;

        let now = self.clock.now();
        let descriptor = ScheduleDescriptor {
            schedule_id: schedule_id.clone(),
            entity_type: entity_type.clone(),
            frequency,
            options,
            created_at: now,
            next_run: frequency.next_run_after(now),
        };
        self.save(&descriptor)?;

        info!(
            entity_type = %entity_type,
            schedule_id = %schedule_id,
            "sync scheduled"
        );
        Ok(schedule_id)
    }

    /// Removes every schedule (trigger and registry entry) for an entity
    /// type. Returns the number removed.
    pub fn remove_schedule(&self, entity_type: &EntityType) -> SyncResult<usize> {
        let mut removed = 0;
        for descriptor in self.all_schedules()? {
            if descriptor.entity_type == *entity_type {
                self.triggers.remove(&descriptor.schedule_id)?;
                self.store.remove(&schedule_key(&descriptor.schedule_id))?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Reads the full schedule registry. Malformed rows are logged and
    /// skipped.
    pub fn all_schedules(&self) -> SyncResult<Vec<ScheduleDescriptor>> {
        let mut schedules = Vec::new();
        for key in self.store.keys_with_prefix(SCHEDULE_PREFIX)? {
            let Some(value) = self.store.get(&key)? else {
                continue;
            };
            match serde_json::from_value::<ScheduleDescriptor>(value) {
                Ok(descriptor) => schedules.push(descriptor),
                Err(e) => warn!(key, error = %e, "malformed schedule row skipped"),
            }
        }
        Ok(schedules)
    }

    /// Returns the schedule for one entity type, if any.
    pub fn schedule_for(&self, entity_type: &EntityType) -> SyncResult<Option<ScheduleDescriptor>> {
        Ok(self
            .all_schedules()?
            .into_iter()
            .find(|descriptor| descriptor.entity_type == *entity_type))
    }

    /// Reconciles live triggers against the registry.
    ///
    /// Triggers with no registry entry are deleted. Registry entries with
    /// no live trigger are left stale; the next `schedule_sync` for that
    /// entity replaces them, since recreation requires re-registration.
    /// Returns the number of orphaned triggers removed.
    pub fn cleanup_orphaned_triggers(&self) -> SyncResult<usize> {
        let registered: HashSet<String> = self
            .all_schedules()?
            .into_iter()
            .map(|descriptor| descriptor.schedule_id)
            .collect();

        let mut removed = 0;
        for id in self.triggers.active_ids()? {
            if !registered.contains(&id) {
                self.triggers.remove(&id)?;
                removed += 1;
                warn!(schedule_id = %id, "orphaned trigger removed");
            }
        }
        Ok(removed)
    }

    /// Runs every schedule whose fire time has arrived.
    ///
    /// Run failures are logged (and alerted when a notifier is attached)
    /// but never propagate; the schedule's next fire time is always
    /// advanced. Returns the number of schedules that fired.
    pub fn run_due(&self, orchestrator: &SyncOrchestrator) -> SyncResult<usize> {
        let now = self.clock.now();
        let mut fired = 0;

        for mut descriptor in self.all_schedules()? {
            if descriptor.next_run > now {
                continue;
            }

            let options = SyncOptions::from(&descriptor.options);
            match orchestrator.sync(&descriptor.entity_type, &options) {
                Ok(report) => {
                    info!(
                        entity_type = %descriptor.entity_type,
                        schedule_id = %descriptor.schedule_id,
                        failed = report.stats.failed,
                        conflicts = report.stats.conflicts,
                        "scheduled sync completed"
                    );
                }
                Err(e) => {
                    error!(
                        entity_type = %descriptor.entity_type,
                        schedule_id = %descriptor.schedule_id,
                        error = %e,
                        "scheduled sync failed"
                    );
                    if let Some(notifier) = &self.notifier {
                        notifier.notify(
                            &format!("scheduled sync failed: {}", descriptor.entity_type),
                            &e.to_string(),
                        );
                    }
                }
            }

            descriptor.next_run = descriptor.frequency.next_run_after(now);
            self.save(&descriptor)?;
            fired += 1;
        }

        Ok(fired)
    }

    fn save(&self, descriptor: &ScheduleDescriptor) -> SyncResult<()> {
        self.store.put(
            &schedule_key(&descriptor.schedule_id),
            serde_json::to_value(descriptor)?,
        )
    }
}

fn schedule_key(schedule_id: &str) -> String {
    format!("{SCHEDULE_PREFIX}{schedule_id}")
}
