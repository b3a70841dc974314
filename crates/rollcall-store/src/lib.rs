//! rollcall-store — the persistent-store contract the core depends on.
//!
//! The core only ever sees keyed get/set/delete plus a conditional write
//! (`put_if_absent`), addressed by hierarchical keys such as
//! `students/{id}` and `attendance/{date}/{id}`. Two backends implement
//! the contract — SQLite for persistence, an in-memory map for tests and
//! degraded operation — and [`FailoverStore`] glues them together so a
//! store outage degrades to read/write-but-not-persisted instead of
//! failing scans.

pub mod failover;
pub mod memory;
pub mod sqlite;

pub use failover::FailoverStore;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Hierarchical key builders shared by ledger and callers.
pub mod keys {
    use chrono::NaiveDate;

    pub const STUDENT_PREFIX: &str = "students/";

    pub fn student(id: &str) -> String {
        format!("{STUDENT_PREFIX}{id}")
    }

    pub fn attendance(date: NaiveDate, id: &str) -> String {
        format!("attendance/{date}/{id}")
    }

    /// Prefix covering every attendance record for one date.
    pub fn attendance_prefix(date: NaiveDate) -> String {
        format!("attendance/{date}/")
    }
}

/// Concrete backend dispatch. An enum rather than a trait object keeps the
/// async methods plain and the set of backends closed.
pub enum StoreBackend {
    Sqlite(SqliteStore),
    Memory(MemoryStore),
    /// Backend whose every operation fails; exercises failover paths.
    #[cfg(test)]
    Failing,
}

impl StoreBackend {
    pub fn kind(&self) -> &'static str {
        match self {
            StoreBackend::Sqlite(_) => "sqlite",
            StoreBackend::Memory(_) => "memory",
            #[cfg(test)]
            StoreBackend::Failing => "failing",
        }
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self {
            StoreBackend::Sqlite(s) => s.get(key).await,
            StoreBackend::Memory(s) => s.get(key),
            #[cfg(test)]
            StoreBackend::Failing => Err(StoreError::Unavailable("test backend".into())),
        }
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        match self {
            StoreBackend::Sqlite(s) => s.set(key, value).await,
            StoreBackend::Memory(s) => s.set(key, value),
            #[cfg(test)]
            StoreBackend::Failing => Err(StoreError::Unavailable("test backend".into())),
        }
    }

    pub async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        match self {
            StoreBackend::Sqlite(s) => s.delete(key).await,
            StoreBackend::Memory(s) => s.delete(key),
            #[cfg(test)]
            StoreBackend::Failing => Err(StoreError::Unavailable("test backend".into())),
        }
    }

    /// Conditional write: stores `value` only when `key` is absent.
    /// Returns whether this call performed the write. Atomic within the
    /// backend, which is what the at-most-once ledger transition rests on.
    pub async fn put_if_absent(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        match self {
            StoreBackend::Sqlite(s) => s.put_if_absent(key, value).await,
            StoreBackend::Memory(s) => s.put_if_absent(key, value),
            #[cfg(test)]
            StoreBackend::Failing => Err(StoreError::Unavailable("test backend".into())),
        }
    }

    /// All (key, value) pairs whose key starts with `prefix`, sorted by key.
    pub async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, StoreError> {
        match self {
            StoreBackend::Sqlite(s) => s.scan_prefix(prefix).await,
            StoreBackend::Memory(s) => s.scan_prefix(prefix),
            #[cfg(test)]
            StoreBackend::Failing => Err(StoreError::Unavailable("test backend".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_key_shapes() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        assert_eq!(keys::student("42"), "students/42");
        assert_eq!(keys::attendance(date, "42"), "attendance/2024-01-15/42");
        assert_eq!(keys::attendance_prefix(date), "attendance/2024-01-15/");
        assert!(keys::attendance(date, "42").starts_with(&keys::attendance_prefix(date)));
    }
}
