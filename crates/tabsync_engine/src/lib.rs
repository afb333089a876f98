//! # Tabsync Engine
//!
//! Bidirectional synchronization between a remote record-oriented service
//! and a local tabular store.
//!
//! This crate provides:
//! - Change tracker (per-record mutation log + sync watermarks)
//! - Conflict detector/resolver with pluggable strategies
//! - Sync orchestrator (full and incremental runs, batched, per-record
//!   failure isolation)
//! - Schedule manager and an in-process periodic runner
//!
//! ## Architecture
//!
//! One sync run at a time per entity type: the schedule manager (or a
//! manual caller) invokes the orchestrator, which consults the change
//! tracker for the watermark, fetches candidates, adjudicates conflicts
//! through the resolver, writes through the [`Repository`] seam, and
//! reports statistics.
//!
//! ## Key invariants
//!
//! - At most one watermark per (entity type, direction) pair
//! - The change log is append-only and bounded (oldest evicted first)
//! - A single bad record never fails a run; fetch failures do
//! - Runs for the same entity type are serialized; a concurrent call
//!   fails fast rather than racing on the watermark

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod memory;
mod orchestrator;
mod resolver;
mod runner;
mod scheduler;
mod store;
mod tracker;
mod traits;

pub use config::{EngineConfig, ResolverConfig};
pub use error::{SyncError, SyncResult};
pub use memory::{
    FixedClock, IdentityTransform, MemoryNotifier, MemoryRemote, MemoryRepository,
};
pub use orchestrator::{RecordError, SyncOptions, SyncOrchestrator, SyncReport, SyncStats};
pub use resolver::{ConflictResolver, ResolveOptions};
pub use runner::ScheduleRunner;
pub use scheduler::{
    MemoryTriggerSet, ScheduleDescriptor, ScheduleFrequency, ScheduleManager, ScheduleOptions,
    TriggerSet,
};
pub use store::{MemoryStateStore, StateStore};
pub use tracker::{ChangeTracker, TrackerStats};
pub use traits::{
    AlertNotifier, Clock, EntityTransform, Filter, FilterOp, RemoteClient, RemoteQuery,
    Repository, SystemClock,
};
