//! Attendance ledger — at-most-once-per-day state machine over the store.
//!
//! Per (date, identity) the state is `Unmarked → Marked`, terminal for the
//! day. The transition is check-and-set: the store's conditional write
//! decides the single winner among concurrent attempts; losers read the
//! stored timestamp back and report an idempotent no-op. Student counters
//! update only on the winning attempt.

use chrono::{DateTime, NaiveDate, Utc};
use rollcall_store::{keys, FailoverStore, StoreError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("store operation timed out")]
    Timeout,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of one mark attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum MarkOutcome {
    /// This attempt won the transition.
    Marked { timestamp: DateTime<Utc> },
    /// Already marked today; carries the original stored timestamp.
    AlreadyMarked { timestamp: String },
}

/// Per-student running totals, stored at `students/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StudentRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub total_attendance: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
}

impl StudentRecord {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: None,
            total_attendance: 0,
            last_seen: None,
        }
    }
}

pub struct AttendanceLedger {
    store: Arc<FailoverStore>,
    op_timeout: Duration,
}

impl AttendanceLedger {
    pub fn new(store: Arc<FailoverStore>, op_timeout: Duration) -> Self {
        Self { store, op_timeout }
    }

    pub fn store(&self) -> &FailoverStore {
        &self.store
    }

    /// Attempt the `Unmarked → Marked` transition for (date, identity).
    ///
    /// Exactly one of any number of concurrent calls for the same key
    /// returns `Marked`; every other returns `AlreadyMarked` with the
    /// winner's timestamp. A store timeout commits nothing.
    pub async fn mark(
        &self,
        date: NaiveDate,
        identity: &str,
        now: DateTime<Utc>,
    ) -> Result<MarkOutcome, LedgerError> {
        let key = keys::attendance(date, identity);
        let timestamp = now.to_rfc3339();

        let won = self
            .bounded(self.store.put_if_absent(&key, &timestamp))
            .await??;

        if !won {
            let stored = self.bounded(self.store.get(&key)).await??;
            // The record can only have been written with a timestamp; an
            // absent value here means it was deleted out-of-band.
            let timestamp = stored.unwrap_or(timestamp);
            tracing::debug!(identity, date = %date, "already marked today");
            return Ok(MarkOutcome::AlreadyMarked { timestamp });
        }

        // Counter update runs after the dedup record is committed and is
        // single-writer by construction (only the transition winner gets
        // here). A crash between the two writes loses the counter bump,
        // never the dedup record — a known, narrow race.
        if let Err(err) = self.bump_student(identity, now).await {
            tracing::warn!(identity, %err, "student counter update failed after mark");
        }

        tracing::info!(identity, date = %date, "attendance marked");
        Ok(MarkOutcome::Marked { timestamp: now })
    }

    /// All (identity, timestamp) rows recorded for a date.
    pub async fn attendance_for(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<(String, String)>, LedgerError> {
        let prefix = keys::attendance_prefix(date);
        let rows = self.bounded(self.store.scan_prefix(&prefix)).await??;
        Ok(rows
            .into_iter()
            .map(|(key, timestamp)| (key[prefix.len()..].to_string(), timestamp))
            .collect())
    }

    pub async fn student(&self, id: &str) -> Result<Option<StudentRecord>, LedgerError> {
        let raw = self.bounded(self.store.get(&keys::student(id))).await??;
        match raw {
            None => Ok(None),
            Some(json) => match serde_json::from_str(&json) {
                Ok(record) => Ok(Some(record)),
                Err(err) => {
                    tracing::warn!(id, %err, "corrupt student record; treating as absent");
                    Ok(None)
                }
            },
        }
    }

    pub async fn students(&self) -> Result<Vec<StudentRecord>, LedgerError> {
        let rows = self
            .bounded(self.store.scan_prefix(keys::STUDENT_PREFIX))
            .await??;
        Ok(rows
            .into_iter()
            .filter_map(|(key, json)| match serde_json::from_str(&json) {
                Ok(record) => Some(record),
                Err(err) => {
                    tracing::warn!(%key, %err, "skipping corrupt student record");
                    None
                }
            })
            .collect())
    }

    async fn bump_student(&self, id: &str, now: DateTime<Utc>) -> Result<(), LedgerError> {
        let mut record = self
            .student(id)
            .await?
            .unwrap_or_else(|| StudentRecord::new(id));
        record.total_attendance += 1;
        record.last_seen = Some(now);

        let json = serde_json::to_string(&record)
            .map_err(|e| StoreError::Unavailable(format!("serialize student record: {e}")))?;
        self.bounded(self.store.set(&keys::student(id), &json))
            .await??;
        Ok(())
    }

    async fn bounded<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, StoreError>>,
    ) -> Result<Result<T, StoreError>, LedgerError> {
        tokio::time::timeout(self.op_timeout, fut)
            .await
            .map_err(|_| LedgerError::Timeout)
    }
}
