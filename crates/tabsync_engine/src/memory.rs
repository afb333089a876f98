//! In-memory collaborator implementations.
//!
//! These back the test suite and small single-process deployments; real
//! deployments supply their own [`Repository`] and [`RemoteClient`].

use crate::error::{SyncError, SyncResult};
use crate::traits::{
    AlertNotifier, Clock, EntityTransform, Filter, RemoteClient, RemoteQuery, Repository,
};
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use tabsync_model::{EntityType, Record, ID_FIELD};
use uuid::Uuid;

/// An in-memory local tabular store.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    tables: RwLock<HashMap<String, BTreeMap<String, Record>>>,
}

impl MemoryRepository {
    /// Creates an empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a record directly, bypassing the sync path.
    pub fn seed(&self, entity_type: &EntityType, record: Record) {
        if let Some(id) = record.id().map(String::from) {
            self.tables
                .write()
                .entry(entity_type.as_str().to_string())
                .or_default()
                .insert(id, record);
        }
    }

    /// Returns the number of records for an entity type.
    pub fn count(&self, entity_type: &EntityType) -> usize {
        self.tables
            .read()
            .get(entity_type.as_str())
            .map_or(0, BTreeMap::len)
    }
}

impl Repository for MemoryRepository {
    fn find_by_id(&self, entity_type: &EntityType, id: &str) -> SyncResult<Option<Record>> {
        Ok(self
            .tables
            .read()
            .get(entity_type.as_str())
            .and_then(|table| table.get(id).cloned()))
    }

    fn find_all(
        &self,
        entity_type: &EntityType,
        criteria: Option<&Filter>,
    ) -> SyncResult<Vec<Record>> {
        let tables = self.tables.read();
        let Some(table) = tables.get(entity_type.as_str()) else {
            return Ok(Vec::new());
        };
        Ok(table
            .values()
            .filter(|record| criteria.map_or(true, |filter| filter.matches(record)))
            .cloned()
            .collect())
    }

    fn create(&self, entity_type: &EntityType, mut data: Record) -> SyncResult<Record> {
        let id = match data.id() {
            Some(id) => id.to_string(),
            None => {
                let id = Uuid::new_v4().to_string();
                data.insert(ID_FIELD, id.clone());
                id
            }
        };

        self.tables
            .write()
            .entry(entity_type.as_str().to_string())
            .or_default()
            .insert(id, data.clone());
        Ok(data)
    }

    fn update(&self, entity_type: &EntityType, id: &str, mut data: Record) -> SyncResult<Record> {
        let mut tables = self.tables.write();
        let table = tables
            .get_mut(entity_type.as_str())
            .ok_or_else(|| SyncError::Repository(format!("no such record: {id}")))?;
        if !table.contains_key(id) {
            return Err(SyncError::Repository(format!("no such record: {id}")));
        }

        data.insert(ID_FIELD, id.to_string());
        table.insert(id.to_string(), data.clone());
        Ok(data)
    }

    fn exists(&self, entity_type: &EntityType, id: &str) -> SyncResult<bool> {
        Ok(self
            .tables
            .read()
            .get(entity_type.as_str())
            .is_some_and(|table| table.contains_key(id)))
    }
}

/// An in-memory remote record service.
///
/// Supports the full [`RemoteQuery`] surface (filters, projection, ordering,
/// paging) and records every query it receives so tests can assert whether a
/// fetch was full or incremental.
#[derive(Debug, Default)]
pub struct MemoryRemote {
    resources: RwLock<HashMap<String, BTreeMap<String, Record>>>,
    queries: RwLock<Vec<RemoteQuery>>,
    fail_next_get: RwLock<Option<String>>,
}

impl MemoryRemote {
    /// Creates an empty remote.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a record directly.
    pub fn seed(&self, resource: &str, record: Record) {
        if let Some(id) = record.id().map(String::from) {
            self.resources
                .write()
                .entry(resource.to_string())
                .or_default()
                .insert(id, record);
        }
    }

    /// Returns every query received so far.
    pub fn queries(&self) -> Vec<RemoteQuery> {
        self.queries.read().clone()
    }

    /// Makes the next `get` fail with a retryable remote error.
    pub fn fail_next_get(&self, message: impl Into<String>) {
        *self.fail_next_get.write() = Some(message.into());
    }

    /// Returns the number of records for a resource.
    pub fn count(&self, resource: &str) -> usize {
        self.resources
            .read()
            .get(resource)
            .map_or(0, BTreeMap::len)
    }
}

impl RemoteClient for MemoryRemote {
    fn get(&self, resource: &str, query: &RemoteQuery) -> SyncResult<Vec<Record>> {
        if let Some(message) = self.fail_next_get.write().take() {
            return Err(SyncError::remote_retryable(message));
        }

        self.queries.write().push(query.clone());

        let resources = self.resources.read();
        let Some(table) = resources.get(resource) else {
            return Ok(Vec::new());
        };

        let mut records: Vec<Record> = table
            .values()
            .filter(|record| query.filters.iter().all(|filter| filter.matches(record)))
            .cloned()
            .collect();

        if let Some(order_by) = &query.order_by {
            records.sort_by(|a, b| {
                let left = a.get(order_by).map(|v| v.to_string()).unwrap_or_default();
                let right = b.get(order_by).map(|v| v.to_string()).unwrap_or_default();
                left.cmp(&right)
            });
        }

        let offset = query.offset.unwrap_or(0);
        let limit = query.limit.unwrap_or(usize::MAX);
        let mut page: Vec<Record> = records.into_iter().skip(offset).take(limit).collect();

        if let Some(fields) = &query.fields {
            for record in &mut page {
                let projected = fields
                    .iter()
                    .filter_map(|f| record.get(f).map(|v| (f.clone(), v.clone())))
                    .fold(Record::new(), |acc, (f, v)| acc.set(f, v));
                *record = projected;
            }
        }

        Ok(page)
    }

    fn get_by_id(&self, resource: &str, id: &str) -> SyncResult<Option<Record>> {
        Ok(self
            .resources
            .read()
            .get(resource)
            .and_then(|table| table.get(id).cloned()))
    }

    fn create(&self, resource: &str, mut data: Record) -> SyncResult<Record> {
        let id = match data.id() {
            Some(id) => id.to_string(),
            None => {
                let id = Uuid::new_v4().to_string();
                data.insert(ID_FIELD, id.clone());
                id
            }
        };

        self.resources
            .write()
            .entry(resource.to_string())
            .or_default()
            .insert(id, data.clone());
        Ok(data)
    }

    fn update(&self, resource: &str, id: &str, mut data: Record) -> SyncResult<Record> {
        let mut resources = self.resources.write();
        let table = resources
            .get_mut(resource)
            .ok_or_else(|| SyncError::remote_fatal(format!("unknown resource: {resource}")))?;
        if !table.contains_key(id) {
            return Err(SyncError::remote_fatal(format!("no such record: {id}")));
        }

        data.insert(ID_FIELD, id.to_string());
        table.insert(id.to_string(), data.clone());
        Ok(data)
    }
}

/// A transform that passes records through unchanged.
///
/// Suitable when both stores share a field vocabulary; domain deployments
/// register their own [`EntityTransform`] per entity type.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityTransform;

impl EntityTransform for IdentityTransform {
    fn to_local(&self, remote: &Record) -> SyncResult<Record> {
        Ok(remote.clone())
    }

    fn to_remote(&self, local: &Record) -> SyncResult<Record> {
        Ok(local.clone())
    }
}

/// A controllable clock for tests.
#[derive(Debug)]
pub struct FixedClock {
    now: RwLock<DateTime<Utc>>,
}

impl FixedClock {
    /// Creates a clock frozen at the given instant.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(now),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.write();
        *now += by;
    }

    /// Sets the clock to an absolute instant.
    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.write() = at;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read()
    }
}

/// A notifier that records alerts instead of delivering them.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    alerts: RwLock<Vec<(String, String)>>,
}

impl MemoryNotifier {
    /// Creates an empty notifier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every alert received so far.
    pub fn alerts(&self) -> Vec<(String, String)> {
        self.alerts.read().clone()
    }
}

impl AlertNotifier for MemoryNotifier {
    fn notify(&self, subject: &str, body: &str) {
        self.alerts
            .write()
            .push((subject.to_string(), body.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::FilterOp;

    fn orders() -> EntityType {
        EntityType::from("orders")
    }

    #[test]
    fn repository_crud() {
        let repo = MemoryRepository::new();

        let created = repo
            .create(&orders(), Record::new().set(ID_FIELD, "O1").set("qty", 1))
            .unwrap();
        assert_eq!(created.id(), Some("O1"));
        assert!(repo.exists(&orders(), "O1").unwrap());

        repo.update(&orders(), "O1", Record::new().set("qty", 2))
            .unwrap();
        let found = repo.find_by_id(&orders(), "O1").unwrap().unwrap();
        assert_eq!(found.get("qty"), Some(&serde_json::json!(2)));

        assert!(repo.update(&orders(), "missing", Record::new()).is_err());
    }

    #[test]
    fn repository_generates_missing_ids() {
        let repo = MemoryRepository::new();
        let created = repo.create(&orders(), Record::new().set("qty", 1)).unwrap();
        assert!(created.id().is_some());
    }

    #[test]
    fn repository_find_all_with_criteria() {
        let repo = MemoryRepository::new();
        repo.seed(&orders(), Record::new().set(ID_FIELD, "O1").set("qty", 1));
        repo.seed(&orders(), Record::new().set(ID_FIELD, "O2").set("qty", 9));

        let filter = Filter::new("qty", FilterOp::Gt, 5);
        let matched = repo.find_all(&orders(), Some(&filter)).unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].id(), Some("O2"));
    }

    #[test]
    fn remote_query_surface() {
        let remote = MemoryRemote::new();
        for i in 1..=5 {
            remote.seed(
                "orders",
                Record::new().set(ID_FIELD, format!("O{i}")).set("qty", i),
            );
        }

        let query = RemoteQuery::new()
            .with_filter(Filter::new("qty", FilterOp::Ge, 2))
            .with_order_by("qty")
            .with_offset(1)
            .with_limit(2);

        let page = remote.get("orders", &query).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].id(), Some("O3"));
        assert_eq!(page[1].id(), Some("O4"));

        assert_eq!(remote.queries().len(), 1);
    }

    #[test]
    fn remote_projection() {
        let remote = MemoryRemote::new();
        remote.seed(
            "orders",
            Record::new().set(ID_FIELD, "O1").set("qty", 3).set("note", "x"),
        );

        let query = RemoteQuery::new().with_fields(vec![ID_FIELD.into(), "qty".into()]);
        let page = remote.get("orders", &query).unwrap();
        assert_eq!(page[0].len(), 2);
        assert!(page[0].get("note").is_none());
    }

    #[test]
    fn remote_injected_failure() {
        let remote = MemoryRemote::new();
        remote.fail_next_get("rate limited");

        let err = remote.get("orders", &RemoteQuery::new()).unwrap_err();
        assert!(err.is_retryable());

        // Subsequent calls succeed.
        assert!(remote.get("orders", &RemoteQuery::new()).is_ok());
    }

    #[test]
    fn fixed_clock_advances() {
        let start = Utc::now();
        let clock = FixedClock::new(start);
        assert_eq!(clock.now(), start);

        clock.advance(Duration::minutes(10));
        assert_eq!(clock.now(), start + Duration::minutes(10));
    }
}
