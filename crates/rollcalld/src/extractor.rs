//! Face detector/embedder capability boundary.
//!
//! The core never implements pixel-level detection; it consumes
//! `extract(frame) -> detections` from an external service. The production
//! implementation is a D-Bus client for `org.rollcall.Extractor1`; tests
//! substitute stubs through the [`EmbeddingExtractor`] trait. Timeouts are
//! applied by the orchestrator, not here.

use rollcall_core::{Detection, Frame};
use std::future::Future;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("extractor unavailable: {0}")]
    Unavailable(String),
    #[error("extraction failed: {0}")]
    Failed(String),
    #[error("malformed extractor reply: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// `extract(frame) -> zero or more (bbox, embedding)` — the fixed contract
/// of the external detector/embedder capability.
pub trait EmbeddingExtractor: Send + Sync {
    fn extract(
        &self,
        frame: &Frame,
    ) -> impl Future<Output = Result<Vec<Detection>, ExtractError>> + Send;
}

#[zbus::proxy(
    interface = "org.rollcall.Extractor1",
    default_service = "org.rollcall.Extractor1",
    default_path = "/org/rollcall/Extractor1"
)]
trait Extractor1 {
    /// Returns a JSON array of detections for one grayscale frame.
    fn extract(&self, width: u32, height: u32, data: Vec<u8>) -> zbus::Result<String>;
}

/// D-Bus client for the external extractor service.
pub struct DbusExtractor {
    proxy: Extractor1Proxy<'static>,
}

impl DbusExtractor {
    pub async fn connect(connection: &zbus::Connection) -> Result<Self, ExtractError> {
        let proxy = Extractor1Proxy::new(connection)
            .await
            .map_err(|e| ExtractError::Unavailable(e.to_string()))?;
        Ok(Self { proxy })
    }
}

impl EmbeddingExtractor for DbusExtractor {
    async fn extract(&self, frame: &Frame) -> Result<Vec<Detection>, ExtractError> {
        let reply = self
            .proxy
            .extract(frame.width, frame.height, frame.data.clone())
            .await
            .map_err(|e| ExtractError::Failed(e.to_string()))?;
        parse_detections(&reply)
    }
}

/// Parse the wire reply into core detections.
pub fn parse_detections(json: &str) -> Result<Vec<Detection>, ExtractError> {
    Ok(serde_json::from_str(json)?)
}
