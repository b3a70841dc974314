//! Failover wrapper — degraded non-persistent mode when the primary store
//! is unavailable.
//!
//! Every operation tries the primary backend first; on failure it logs
//! once, flips the degraded flag, and retries against the in-memory
//! fallback. Degraded mode keeps scans working (read/write, not
//! persisted); the flag is surfaced through the daemon's status call.

use crate::memory::MemoryStore;
use crate::{StoreBackend, StoreError};
use std::sync::atomic::{AtomicBool, Ordering};

pub struct FailoverStore {
    primary: StoreBackend,
    fallback: MemoryStore,
    degraded: AtomicBool,
}

impl FailoverStore {
    pub fn new(primary: StoreBackend) -> Self {
        // A memory primary means persistence was already lost at startup.
        let degraded = matches!(primary, StoreBackend::Memory(_));
        Self {
            primary,
            fallback: MemoryStore::new(),
            degraded: AtomicBool::new(degraded),
        }
    }

    /// Non-persistent store from the start (primary open failed).
    pub fn memory_only() -> Self {
        Self::new(StoreBackend::Memory(MemoryStore::new()))
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    /// "sqlite", or "memory" when running non-persisted.
    pub fn mode(&self) -> &'static str {
        self.primary.kind()
    }

    fn note_failure(&self, op: &'static str, err: &StoreError) {
        if !self.degraded.swap(true, Ordering::Relaxed) {
            tracing::warn!(%err, op, "primary store unavailable; degrading to non-persistent mode");
        } else {
            tracing::debug!(%err, op, "primary store still unavailable");
        }
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.primary.get(key).await {
            Ok(v) => Ok(v),
            Err(err) => {
                self.note_failure("get", &err);
                self.fallback.get(key)
            }
        }
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        match self.primary.set(key, value).await {
            Ok(()) => Ok(()),
            Err(err) => {
                self.note_failure("set", &err);
                self.fallback.set(key, value)
            }
        }
    }

    pub async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        match self.primary.delete(key).await {
            Ok(v) => Ok(v),
            Err(err) => {
                self.note_failure("delete", &err);
                self.fallback.delete(key)
            }
        }
    }

    /// Conditional write with failover.
    ///
    /// If the primary dies mid-call it is unknowable whether its write
    /// landed; the fallback then owns dedup for the remainder of the
    /// outage. The narrow double-count window this opens on primary
    /// recovery is a documented accepted race, not a silent one.
    pub async fn put_if_absent(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        match self.primary.put_if_absent(key, value).await {
            Ok(v) => Ok(v),
            Err(err) => {
                self.note_failure("put_if_absent", &err);
                self.fallback.put_if_absent(key, value)
            }
        }
    }

    pub async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, StoreError> {
        match self.primary.scan_prefix(prefix).await {
            Ok(v) => Ok(v),
            Err(err) => {
                self.note_failure("scan_prefix", &err);
                self.fallback.scan_prefix(prefix)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_healthy_primary_not_degraded() {
        let store = FailoverStore::new(StoreBackend::Memory(MemoryStore::new()));
        // Memory primary counts as degraded from the start.
        assert!(store.is_degraded());

        let sqlite = crate::SqliteStore::open(":memory:").await.unwrap();
        let store = FailoverStore::new(StoreBackend::Sqlite(sqlite));
        assert!(!store.is_degraded());
        store.set("k", "v").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        assert!(!store.is_degraded());
    }

    #[tokio::test]
    async fn test_failing_primary_degrades_and_keeps_working() {
        let store = FailoverStore::new(StoreBackend::Failing);
        assert!(!store.is_degraded());

        store.set("k", "v").await.unwrap();
        assert!(store.is_degraded());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));

        // Conditional write semantics survive the failover.
        assert!(store.put_if_absent("cas", "first").await.unwrap());
        assert!(!store.put_if_absent("cas", "second").await.unwrap());
        assert_eq!(store.get("cas").await.unwrap().as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn test_memory_only_mode() {
        let store = FailoverStore::memory_only();
        assert!(store.is_degraded());
        assert_eq!(store.mode(), "memory");
        store.set("k", "v").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
    }
}
