//! SQLite store backend via `tokio-rusqlite`.
//!
//! One `kv` table keyed by the hierarchical key string. The conditional
//! write maps onto `INSERT ... ON CONFLICT DO NOTHING`, which SQLite
//! executes atomically — this is the primitive the attendance ledger's
//! check-and-set transition rests on.

use crate::StoreError;
use rusqlite::OptionalExtension;
use std::path::Path;
use tokio_rusqlite::Connection;

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and ensure the schema.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(path.clone())
            .await
            .map_err(|e| StoreError::Unavailable(format!("{}: {e}", path.display())))?;

        conn.call(|conn| {
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.execute(
                "CREATE TABLE IF NOT EXISTS kv (
                    key   TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                )",
                [],
            )?;
            Ok(())
        })
        .await
        .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        tracing::info!(path = %path.display(), "sqlite store opened");
        Ok(Self { conn })
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let key = key.to_string();
        self.conn
            .call(move |conn| {
                let value = conn
                    .query_row("SELECT value FROM kv WHERE key = ?1", [&key], |row| {
                        row.get::<_, String>(0)
                    })
                    .optional()?;
                Ok(value)
            })
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let (key, value) = (key.to_string(), value.to_string());
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO kv (key, value) VALUES (?1, ?2)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                    [&key, &value],
                )?;
                Ok(())
            })
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    pub async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let key = key.to_string();
        self.conn
            .call(move |conn| {
                let affected = conn.execute("DELETE FROM kv WHERE key = ?1", [&key])?;
                Ok(affected > 0)
            })
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    /// Conditional write; returns whether this call inserted the row.
    pub async fn put_if_absent(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        let (key, value) = (key.to_string(), value.to_string());
        self.conn
            .call(move |conn| {
                let affected = conn.execute(
                    "INSERT INTO kv (key, value) VALUES (?1, ?2)
                     ON CONFLICT(key) DO NOTHING",
                    [&key, &value],
                )?;
                Ok(affected > 0)
            })
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    pub async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, StoreError> {
        let prefix = prefix.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt =
                    conn.prepare("SELECT key, value FROM kv WHERE key >= ?1 ORDER BY key")?;
                let rows = stmt.query_map([&prefix], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?;

                let mut out = Vec::new();
                for row in rows {
                    let (key, value) = row?;
                    if !key.starts_with(&prefix) {
                        break;
                    }
                    out.push((key, value));
                }
                Ok(out)
            })
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> SqliteStore {
        SqliteStore::open(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_roundtrip() {
        let store = store().await;
        assert_eq!(store.get("k").await.unwrap(), None);
        store.set("k", "v1").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v1"));
        store.set("k", "v2").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v2"));
        assert!(store.delete("k").await.unwrap());
        assert!(!store.delete("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_put_if_absent_keeps_first_value() {
        let store = store().await;
        assert!(store.put_if_absent("k", "first").await.unwrap());
        assert!(!store.put_if_absent("k", "second").await.unwrap());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn test_scan_prefix() {
        let store = store().await;
        store.set("attendance/2024-01-15/1", "a").await.unwrap();
        store.set("attendance/2024-01-15/2", "b").await.unwrap();
        store.set("attendance/2024-01-16/1", "c").await.unwrap();

        let rows = store.scan_prefix("attendance/2024-01-15/").await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].0, "attendance/2024-01-15/1");
        assert_eq!(rows[1].0, "attendance/2024-01-15/2");
    }
}
