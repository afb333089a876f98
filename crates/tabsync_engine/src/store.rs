//! Persisted state seam.
//!
//! Watermarks, change logs, the schedule registry, and the conflict review
//! queue all live behind [`StateStore`]: a format-agnostic JSON document
//! store keyed by string. Keys are namespaced by component
//! (`watermark:`, `changelog:`, `schedule:`, `conflict:`).

use crate::error::SyncResult;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;

/// A key-value store of JSON documents.
pub trait StateStore: Send + Sync {
    /// Reads a document.
    fn get(&self, key: &str) -> SyncResult<Option<Value>>;

    /// Writes a document, replacing any previous value.
    fn put(&self, key: &str, value: Value) -> SyncResult<()>;

    /// Deletes a document. Deleting a missing key is not an error.
    fn remove(&self, key: &str) -> SyncResult<()>;

    /// Returns all keys starting with `prefix`, in sorted order.
    fn keys_with_prefix(&self, prefix: &str) -> SyncResult<Vec<String>>;
}

/// An in-memory state store.
///
/// Backs tests and single-process deployments; durable deployments plug in
/// their own [`StateStore`].
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    entries: RwLock<BTreeMap<String, Value>>,
}

impl MemoryStateStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored documents.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl StateStore for MemoryStateStore {
    fn get(&self, key: &str) -> SyncResult<Option<Value>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(&self, key: &str, value: Value) -> SyncResult<()> {
        self.entries.write().insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> SyncResult<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> SyncResult<Vec<String>> {
        Ok(self
            .entries
            .read()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn put_get_remove() {
        let store = MemoryStateStore::new();

        store.put("a", json!({"x": 1})).unwrap();
        assert_eq!(store.get("a").unwrap(), Some(json!({"x": 1})));

        store.remove("a").unwrap();
        assert_eq!(store.get("a").unwrap(), None);

        // Removing a missing key is fine.
        store.remove("a").unwrap();
    }

    #[test]
    fn prefix_scan_is_sorted_and_bounded() {
        let store = MemoryStateStore::new();
        store.put("changelog:orders", json!([])).unwrap();
        store.put("changelog:customers", json!([])).unwrap();
        store.put("watermark:orders:remote_to_local", json!({})).unwrap();

        let keys = store.keys_with_prefix("changelog:").unwrap();
        assert_eq!(keys, vec!["changelog:customers", "changelog:orders"]);

        assert!(store.keys_with_prefix("conflict:").unwrap().is_empty());
    }
}
