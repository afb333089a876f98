//! Persisted change-log and watermark types.

use crate::direction::SyncDirection;
use crate::record::EntityType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An append-only entry recording one applied record mutation.
///
/// Entries are immutable once written. The change log for an entity type is
/// bounded: when it would exceed the configured cap, the oldest entries are
/// evicted first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeLogEntry {
    /// Entity type the record belongs to.
    pub entity_type: EntityType,
    /// Identity of the changed record.
    pub record_id: String,
    /// Direction of the pass that applied the change.
    pub direction: SyncDirection,
    /// When the change was applied.
    pub timestamp: DateTime<Utc>,
    /// Checksum of the record's field values at write time.
    pub checksum: String,
}

impl ChangeLogEntry {
    /// Creates a new entry.
    pub fn new(
        entity_type: EntityType,
        record_id: impl Into<String>,
        direction: SyncDirection,
        timestamp: DateTime<Utc>,
        checksum: impl Into<String>,
    ) -> Self {
        Self {
            entity_type,
            record_id: record_id.into(),
            direction,
            timestamp,
            checksum: checksum.into(),
        }
    }
}

/// Last successful sync time for one (entity type, direction) pair.
///
/// At most one watermark exists per pair. It is overwritten after every
/// successful run and deleted only by an explicit tracking reset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Watermark {
    /// Entity type the watermark covers.
    pub entity_type: EntityType,
    /// Direction the watermark covers.
    pub direction: SyncDirection,
    /// Completion time of the last successful run.
    pub last_sync_time: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_roundtrip() {
        let entry = ChangeLogEntry::new(
            EntityType::from("orders"),
            "O-42",
            SyncDirection::RemoteToLocal,
            Utc::now(),
            "abc123",
        );

        let json = serde_json::to_string(&entry).unwrap();
        let back: ChangeLogEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn watermark_roundtrip() {
        let watermark = Watermark {
            entity_type: EntityType::from("customers"),
            direction: SyncDirection::LocalToRemote,
            last_sync_time: Utc::now(),
        };

        let json = serde_json::to_string(&watermark).unwrap();
        let back: Watermark = serde_json::from_str(&json).unwrap();
        assert_eq!(back, watermark);
    }
}
