//! # Tabsync Model
//!
//! Record, conflict, and change-log types for the tabsync engine.
//!
//! This crate provides:
//! - `Record` for schemaless tabular/remote records
//! - `EntityType` and `SyncDirection` namespace keys
//! - `Conflict` and resolution strategy types
//! - `ChangeLogEntry` and `Watermark` persistence types
//! - Canonical checksums for change detection
//!
//! This is a pure types crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod changelog;
mod checksum;
mod conflict;
mod direction;
mod record;

pub use changelog::{ChangeLogEntry, Watermark};
pub use checksum::record_checksum;
pub use conflict::{
    diff_fields, Conflict, ConflictStatus, FieldConflict, FieldConflictKind, FieldPriorities,
    FieldPriority, Resolution, ResolutionAction, ResolutionStrategy,
};
pub use direction::SyncDirection;
pub use record::{EntityType, Record, CREATED_FIELD, ID_FIELD, MODIFIED_FIELD};
