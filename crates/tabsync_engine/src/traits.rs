//! External collaborator seams.
//!
//! The engine never talks to a concrete store or service directly: the local
//! tabular store, the remote record service, per-entity shape transforms,
//! the clock, and alert delivery are all injected through these traits.

use crate::error::SyncResult;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tabsync_model::{EntityType, Record};

/// A source of "now", injected so tests control time.
pub trait Clock: Send + Sync {
    /// Returns the current wall-clock time.
    fn now(&self) -> DateTime<Utc>;
}

/// The production clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// The local tabular store, keyed by entity type and record id.
pub trait Repository: Send + Sync {
    /// Looks up one record by identity.
    fn find_by_id(&self, entity_type: &EntityType, id: &str) -> SyncResult<Option<Record>>;

    /// Returns all records, optionally restricted by a filter.
    fn find_all(&self, entity_type: &EntityType, criteria: Option<&Filter>)
        -> SyncResult<Vec<Record>>;

    /// Creates a record, returning it as stored (with identity assigned).
    fn create(&self, entity_type: &EntityType, data: Record) -> SyncResult<Record>;

    /// Replaces a record's fields, returning it as stored.
    fn update(&self, entity_type: &EntityType, id: &str, data: Record) -> SyncResult<Record>;

    /// Returns true if a record with this identity exists.
    fn exists(&self, entity_type: &EntityType, id: &str) -> SyncResult<bool>;
}

/// Comparison operator in a query filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Ge,
    /// Less than.
    Lt,
    /// Less than or equal.
    Le,
}

/// A single field comparison.
///
/// Ordering operators compare numbers numerically and strings
/// lexicographically; RFC 3339 timestamps compare lexicographically in
/// chronological order, which is what incremental fetches rely on.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    /// Field name.
    pub field: String,
    /// Comparison operator.
    pub op: FilterOp,
    /// Value to compare against.
    pub value: Value,
}

impl Filter {
    /// Creates a filter.
    pub fn new(field: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    /// Evaluates the filter against a record. A missing field only matches
    /// `Ne`.
    pub fn matches(&self, record: &Record) -> bool {
        let field_value = record.get(&self.field);
        match self.op {
            FilterOp::Eq => field_value == Some(&self.value),
            FilterOp::Ne => field_value != Some(&self.value),
            FilterOp::Gt | FilterOp::Ge | FilterOp::Lt | FilterOp::Le => {
                let Some(value) = field_value else {
                    return false;
                };
                let Some(ordering) = compare_values(value, &self.value) else {
                    return false;
                };
                match self.op {
                    FilterOp::Gt => ordering.is_gt(),
                    FilterOp::Ge => ordering.is_ge(),
                    FilterOp::Lt => ordering.is_lt(),
                    FilterOp::Le => ordering.is_le(),
                    _ => unreachable!(),
                }
            }
        }
    }
}

fn compare_values(left: &Value, right: &Value) -> Option<std::cmp::Ordering> {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => {
            l.as_f64().and_then(|l| r.as_f64().and_then(|r| l.partial_cmp(&r)))
        }
        (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
        _ => None,
    }
}

/// Query options for fetching records from the remote service.
#[derive(Debug, Clone, Default)]
pub struct RemoteQuery {
    /// Field comparisons, all of which must match.
    pub filters: Vec<Filter>,
    /// Field projection; `None` fetches every field.
    pub fields: Option<Vec<String>>,
    /// Field to order results by (ascending).
    pub order_by: Option<String>,
    /// Maximum number of records to return.
    pub limit: Option<usize>,
    /// Number of records to skip.
    pub offset: Option<usize>,
}

impl RemoteQuery {
    /// Creates an unconstrained query (a full fetch).
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a filter.
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Sets the field projection.
    pub fn with_fields(mut self, fields: Vec<String>) -> Self {
        self.fields = Some(fields);
        self
    }

    /// Sets the ordering field.
    pub fn with_order_by(mut self, field: impl Into<String>) -> Self {
        self.order_by = Some(field.into());
        self
    }

    /// Sets the page size.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sets the page offset.
    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Returns true if the query has no filters (a full fetch).
    pub fn is_unfiltered(&self) -> bool {
        self.filters.is_empty()
    }
}

/// The remote record-oriented service.
pub trait RemoteClient: Send + Sync {
    /// Fetches records matching a query.
    fn get(&self, resource: &str, query: &RemoteQuery) -> SyncResult<Vec<Record>>;

    /// Looks up one record by identity; `None` when the service reports 404.
    fn get_by_id(&self, resource: &str, id: &str) -> SyncResult<Option<Record>>;

    /// Creates a record, returning it as stored.
    fn create(&self, resource: &str, data: Record) -> SyncResult<Record>;

    /// Updates a record, returning it as stored.
    fn update(&self, resource: &str, id: &str, data: Record) -> SyncResult<Record>;
}

/// Per-entity-type shape transform between the two stores.
pub trait EntityTransform: Send + Sync {
    /// Maps a remote record into the local shape.
    fn to_local(&self, remote: &Record) -> SyncResult<Record>;

    /// Maps a local record into the remote shape.
    fn to_remote(&self, local: &Record) -> SyncResult<Record>;
}

/// Delivery seam for operational alerts (failed scheduled runs, conflicts).
///
/// The actual delivery mechanism (mail, chat, pager) lives outside the
/// engine.
pub trait AlertNotifier: Send + Sync {
    /// Delivers one alert.
    fn notify(&self, subject: &str, body: &str);
}
