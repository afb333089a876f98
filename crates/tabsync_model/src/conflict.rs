//! Conflict detection and resolution types.

use crate::record::{Record, CREATED_FIELD, ID_FIELD};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// How two field values disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldConflictKind {
    /// Same JSON type, different value.
    ValueDiff,
    /// Different JSON types.
    TypeMismatch,
}

/// One disagreeing field between the local and incoming versions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldConflict {
    /// Field name.
    pub field: String,
    /// Local side's value.
    pub local_value: Value,
    /// Incoming (remote-derived) value.
    pub remote_value: Value,
    /// How the values disagree.
    pub kind: FieldConflictKind,
}

/// Diffs every field present in `incoming` against `local`.
///
/// Identity and creation-time fields are excluded: they never participate in
/// conflict detection. A field missing on the local side still counts as a
/// conflict (the incoming side would introduce it), with a `Null` local value.
pub fn diff_fields(local: &Record, incoming: &Record) -> Vec<FieldConflict> {
    let mut conflicts = Vec::new();

    for (field, remote_value) in incoming.fields() {
        if field == ID_FIELD || field == CREATED_FIELD {
            continue;
        }

        let local_value = local.get(field).cloned().unwrap_or(Value::Null);
        if &local_value == remote_value {
            continue;
        }

        let kind = if json_type(&local_value) == json_type(remote_value) {
            FieldConflictKind::ValueDiff
        } else {
            FieldConflictKind::TypeMismatch
        };

        conflicts.push(FieldConflict {
            field: field.clone(),
            local_value,
            remote_value: remote_value.clone(),
            kind,
        });
    }

    conflicts
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A detected disagreement between the local and remote versions of one
/// record where the local side was independently modified.
///
/// A conflict always carries at least one [`FieldConflict`]; detection
/// returns nothing when the sides agree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    /// Unique conflict id.
    pub id: String,
    /// When the conflict was detected.
    pub detected_at: DateTime<Utc>,
    /// The local record as stored.
    pub local_record: Record,
    /// The remote record transformed into the local shape.
    pub incoming_record: Record,
    /// The remote record in its original shape.
    pub remote_record: Record,
    /// The disagreeing fields (never empty).
    pub field_conflicts: Vec<FieldConflict>,
}

impl Conflict {
    /// Creates a conflict with a fresh id.
    pub fn new(
        detected_at: DateTime<Utc>,
        local_record: Record,
        incoming_record: Record,
        remote_record: Record,
        field_conflicts: Vec<FieldConflict>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            detected_at,
            local_record,
            incoming_record,
            remote_record,
            field_conflicts,
        }
    }

    /// Returns the identity of the conflicted record, if known.
    pub fn record_id(&self) -> Option<&str> {
        self.local_record.id().or_else(|| self.incoming_record.id())
    }
}

/// Review-queue status of a persisted conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStatus {
    /// Awaiting manual review.
    Pending,
    /// Reviewed and resolved.
    Resolved,
}

/// Policy used to pick a winner (or merge) when a conflict is detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// Incoming data overwrites local.
    RemoteWins,
    /// Local data is kept; no write happens.
    LocalWins,
    /// The side with the newer last-modified timestamp wins.
    NewestWins,
    /// Field-by-field merge driven by per-field priorities.
    Merge,
    /// Queue the conflict for manual review; no write happens.
    Manual,
}

/// Which side a merged field is taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldPriority {
    /// Keep the local value.
    Local,
    /// Take the remote value (the default when unspecified).
    #[default]
    Remote,
}

/// Per-field merge priorities for [`ResolutionStrategy::Merge`].
pub type FieldPriorities = BTreeMap<String, FieldPriority>;

/// What the orchestrator should do with the resolved data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionAction {
    /// Write `data` to the local store.
    Update,
    /// Leave the local record untouched.
    Skip,
}

/// Outcome of resolving one conflict.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// Strategy that produced this outcome.
    pub strategy: ResolutionStrategy,
    /// What to do with `data`.
    pub action: ResolutionAction,
    /// The winning (or merged) record.
    pub data: Record,
    /// Human-readable explanation for logs.
    pub message: String,
    /// True when the conflict was queued for manual review.
    pub review_required: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::MODIFIED_FIELD;

    #[test]
    fn diff_excludes_identity_and_creation_fields() {
        let local = Record::new()
            .set(ID_FIELD, "C1")
            .set(CREATED_FIELD, "2026-01-01T00:00:00+00:00")
            .set("name", "Acme");
        let incoming = Record::new()
            .set(ID_FIELD, "C1-other")
            .set(CREATED_FIELD, "2026-02-02T00:00:00+00:00")
            .set("name", "Acme");

        assert!(diff_fields(&local, &incoming).is_empty());
    }

    #[test]
    fn diff_reports_value_and_type_mismatches() {
        let local = Record::new().set("name", "Acme").set("qty", 3);
        let incoming = Record::new().set("name", "Acme Inc").set("qty", "three");

        let conflicts = diff_fields(&local, &incoming);
        assert_eq!(conflicts.len(), 2);

        let name = conflicts.iter().find(|c| c.field == "name").unwrap();
        assert_eq!(name.kind, FieldConflictKind::ValueDiff);

        let qty = conflicts.iter().find(|c| c.field == "qty").unwrap();
        assert_eq!(qty.kind, FieldConflictKind::TypeMismatch);
    }

    #[test]
    fn diff_counts_fields_missing_locally() {
        let local = Record::new().set("name", "Acme");
        let incoming = Record::new().set("name", "Acme").set("tier", "gold");

        let conflicts = diff_fields(&local, &incoming);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].field, "tier");
        assert_eq!(conflicts[0].local_value, Value::Null);
    }

    #[test]
    fn diff_ignores_fields_only_on_local() {
        // Only fields present in the incoming record are compared.
        let local = Record::new().set("name", "Acme").set("internal_note", "x");
        let incoming = Record::new().set("name", "Acme");

        assert!(diff_fields(&local, &incoming).is_empty());
    }

    #[test]
    fn conflict_ids_are_unique() {
        let local = Record::new().set(ID_FIELD, "C1").set(MODIFIED_FIELD, "bad");
        let incoming = Record::new().set("name", "B");
        let diff = diff_fields(&local, &incoming);

        let a = Conflict::new(
            Utc::now(),
            local.clone(),
            incoming.clone(),
            incoming.clone(),
            diff.clone(),
        );
        let b = Conflict::new(Utc::now(), local, incoming.clone(), incoming, diff);

        assert_ne!(a.id, b.id);
        assert_eq!(a.record_id(), Some("C1"));
    }

    #[test]
    fn field_priority_defaults_to_remote() {
        assert_eq!(FieldPriority::default(), FieldPriority::Remote);
    }
}
