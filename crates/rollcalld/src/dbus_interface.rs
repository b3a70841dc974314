use crate::engine::ScanEngine;
use crate::extractor::DbusExtractor;
use rollcall_core::Frame;
use std::path::PathBuf;
use std::sync::Arc;
use zbus::interface;

/// D-Bus interface for the Rollcall attendance daemon.
///
/// Bus name: org.rollcall.Attendance1
/// Object path: /org/rollcall/Attendance1
pub struct AttendanceService {
    engine: Arc<ScanEngine<DbusExtractor>>,
    gallery_path: PathBuf,
}

impl AttendanceService {
    pub fn new(engine: Arc<ScanEngine<DbusExtractor>>, gallery_path: PathBuf) -> Self {
        Self {
            engine,
            gallery_path,
        }
    }
}

#[interface(name = "org.rollcall.Attendance1")]
impl AttendanceService {
    /// Run one scan session for `client`.
    ///
    /// Each frame is (width, height, grayscale bytes) in capture order.
    /// Returns the structured outcome as JSON.
    async fn scan(
        &self,
        client: &str,
        frames: Vec<(u32, u32, Vec<u8>)>,
    ) -> zbus::fdo::Result<String> {
        tracing::debug!(client, frames = frames.len(), "scan requested");
        let frames: Vec<Frame> = frames
            .into_iter()
            .enumerate()
            .map(|(i, (width, height, data))| Frame {
                data,
                width,
                height,
                index: i as u32,
            })
            .collect();

        let outcome = self.engine.scan(client, frames).await;
        Ok(outcome.to_wire().to_string())
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let store = self.engine.ledger().store();
        let gallery = self.engine.gallery().snapshot();
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "gallery_entries": gallery.len(),
            "embedding_dim": gallery.dim(),
            "liveness_detector": self.engine.detector_name(),
            "store_mode": store.mode(),
            "store_degraded": store.is_degraded(),
        })
        .to_string())
    }

    /// Re-read the gallery file and swap it in atomically.
    /// Returns the new entry count.
    async fn reload_gallery(&self) -> zbus::fdo::Result<u32> {
        match self.engine.gallery().reload(&self.gallery_path) {
            Ok(size) => Ok(size as u32),
            Err(err) => Err(zbus::fdo::Error::Failed(err.to_string())),
        }
    }

    /// Attendance rows for one date (`YYYY-MM-DD`), as JSON.
    async fn attendance_for_date(&self, date: &str) -> zbus::fdo::Result<String> {
        let date = date
            .parse::<chrono::NaiveDate>()
            .map_err(|e| zbus::fdo::Error::InvalidArgs(format!("bad date {date:?}: {e}")))?;
        let rows = self
            .engine
            .ledger()
            .attendance_for(date)
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;

        let rows: Vec<serde_json::Value> = rows
            .into_iter()
            .map(|(identity, timestamp)| {
                serde_json::json!({ "identity": identity, "timestamp": timestamp })
            })
            .collect();
        Ok(serde_json::Value::Array(rows).to_string())
    }

    /// All known student records, as JSON.
    async fn list_students(&self) -> zbus::fdo::Result<String> {
        let students = self
            .engine
            .ledger()
            .students()
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
        serde_json::to_string(&students).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }
}
