//! In-memory store backend — tests and degraded (non-persisted) operation.

use crate::StoreError;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Process-local key-value map. Clones share the same underlying map.
///
/// Methods are synchronous (no I/O) but infallible only in shape: they
/// return `Result` to keep the contract identical to the SQLite backend.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<BTreeMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.lock().get(key).cloned())
    }

    pub fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    pub fn delete(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.lock().remove(key).is_some())
    }

    /// Atomic under the map lock: exactly one of any number of racing
    /// callers observes `true` for the same key.
    pub fn put_if_absent(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        let mut map = self.lock();
        if map.contains_key(key) {
            Ok(false)
        } else {
            map.insert(key.to_string(), value.to_string());
            Ok(true)
        }
    }

    pub fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, StoreError> {
        Ok(self
            .lock()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let store = MemoryStore::new();
        store.set("a", "1").unwrap();
        assert_eq!(store.get("a").unwrap().as_deref(), Some("1"));
        assert!(store.delete("a").unwrap());
        assert_eq!(store.get("a").unwrap(), None);
        assert!(!store.delete("a").unwrap());
    }

    #[test]
    fn test_put_if_absent() {
        let store = MemoryStore::new();
        assert!(store.put_if_absent("k", "first").unwrap());
        assert!(!store.put_if_absent("k", "second").unwrap());
        assert_eq!(store.get("k").unwrap().as_deref(), Some("first"));
    }

    #[test]
    fn test_clones_share_state() {
        let store = MemoryStore::new();
        let other = store.clone();
        store.set("k", "v").unwrap();
        assert_eq!(other.get("k").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn test_scan_prefix_sorted() {
        let store = MemoryStore::new();
        store.set("attendance/2024-01-15/2", "t2").unwrap();
        store.set("attendance/2024-01-15/1", "t1").unwrap();
        store.set("attendance/2024-01-16/1", "t3").unwrap();
        store.set("students/1", "s").unwrap();

        let rows = store.scan_prefix("attendance/2024-01-15/").unwrap();
        assert_eq!(
            rows,
            vec![
                ("attendance/2024-01-15/1".to_string(), "t1".to_string()),
                ("attendance/2024-01-15/2".to_string(), "t2".to_string()),
            ]
        );
    }

    #[test]
    fn test_concurrent_put_if_absent_single_winner() {
        let store = MemoryStore::new();
        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(std::thread::spawn(move || {
                store.put_if_absent("key", &format!("writer-{i}")).unwrap()
            }));
        }
        let wins: usize = handles
            .into_iter()
            .map(|h| h.join().unwrap() as usize)
            .sum();
        assert_eq!(wins, 1);
    }
}
