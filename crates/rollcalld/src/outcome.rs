//! Structured scan outcomes — the caller-facing result contract.
//!
//! The web layer consumes these as JSON; nothing here is presentation-
//! specific. Every outcome carries a disposition so callers can decide
//! between retrying, re-prompting for a fresh capture, or just informing
//! the user.

use chrono::{DateTime, Utc};
use rollcall_core::liveness::{LivenessError, LivenessFailure};
use serde::Serialize;

/// How a caller should react to an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Attendance was marked.
    Success,
    /// Transient infrastructure problem; retry the same request.
    Transient,
    /// Problem with the submitted frames; capture a new session.
    BadInput,
    /// Policy outcome (already marked, blocked); informational.
    Policy,
}

/// Sub-reason for a liveness rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LivenessReason {
    InsufficientMovement,
    InsufficientBlinks,
    InconsistentFrameSizes,
    LandmarksUnavailable,
}

impl From<LivenessFailure> for LivenessReason {
    fn from(failure: LivenessFailure) -> Self {
        match failure {
            LivenessFailure::InsufficientMovement => LivenessReason::InsufficientMovement,
            LivenessFailure::InsufficientBlinks => LivenessReason::InsufficientBlinks,
            LivenessFailure::LandmarksUnavailable => LivenessReason::LandmarksUnavailable,
        }
    }
}

impl From<&LivenessError> for LivenessReason {
    fn from(err: &LivenessError) -> Self {
        match err {
            LivenessError::InconsistentFrameSizes { .. } => {
                LivenessReason::InconsistentFrameSizes
            }
            // A too-short session carries no movement evidence at all.
            LivenessError::TooFewFrames(_) => LivenessReason::InsufficientMovement,
        }
    }
}

impl LivenessReason {
    pub fn label(&self) -> &'static str {
        match self {
            LivenessReason::InsufficientMovement => "insufficient-movement",
            LivenessReason::InsufficientBlinks => "insufficient-blinks",
            LivenessReason::InconsistentFrameSizes => "inconsistent-frame-sizes",
            LivenessReason::LandmarksUnavailable => "landmarks-unavailable",
        }
    }
}

/// One scan request's terminal outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanOutcome {
    Marked {
        identity: String,
        confidence: f32,
        timestamp: DateTime<Utc>,
    },
    /// Idempotent no-op: the identity was already marked today. Carries
    /// the ORIGINAL timestamp, which a repeat request must not alter.
    AlreadyMarked {
        identity: String,
        confidence: f32,
        timestamp: String,
    },
    NoFaceDetected,
    ExtractionFailed {
        detail: String,
    },
    EmptyGallery,
    NoConfidentMatch {
        distance: f32,
    },
    LivenessFailed {
        reason: LivenessReason,
        score: f32,
    },
    ClientBlocked {
        until: DateTime<Utc>,
    },
    StoreUnavailable {
        detail: String,
    },
    Timeout {
        stage: &'static str,
    },
}

impl ScanOutcome {
    pub fn kind(&self) -> &'static str {
        match self {
            ScanOutcome::Marked { .. } => "marked",
            ScanOutcome::AlreadyMarked { .. } => "already_marked_today",
            ScanOutcome::NoFaceDetected => "no_face_detected",
            ScanOutcome::ExtractionFailed { .. } => "extraction_failed",
            ScanOutcome::EmptyGallery => "empty_gallery",
            ScanOutcome::NoConfidentMatch { .. } => "no_confident_match",
            ScanOutcome::LivenessFailed { .. } => "liveness_failed",
            ScanOutcome::ClientBlocked { .. } => "client_blocked",
            ScanOutcome::StoreUnavailable { .. } => "store_unavailable",
            ScanOutcome::Timeout { .. } => "timeout",
        }
    }

    pub fn disposition(&self) -> Disposition {
        match self {
            ScanOutcome::Marked { .. } => Disposition::Success,
            ScanOutcome::AlreadyMarked { .. } | ScanOutcome::ClientBlocked { .. } => {
                Disposition::Policy
            }
            ScanOutcome::StoreUnavailable { .. } | ScanOutcome::Timeout { .. } => {
                Disposition::Transient
            }
            ScanOutcome::NoFaceDetected
            | ScanOutcome::ExtractionFailed { .. }
            | ScanOutcome::EmptyGallery
            | ScanOutcome::NoConfidentMatch { .. }
            | ScanOutcome::LivenessFailed { .. } => Disposition::BadInput,
        }
    }

    pub fn message(&self) -> String {
        match self {
            ScanOutcome::Marked { identity, .. } => {
                format!("attendance marked for {identity}")
            }
            ScanOutcome::AlreadyMarked { identity, timestamp, .. } => {
                format!("{identity} already marked today at {timestamp}")
            }
            ScanOutcome::NoFaceDetected => "no face detected in any frame".to_string(),
            ScanOutcome::ExtractionFailed { detail } => {
                format!("embedding extraction failed: {detail}")
            }
            ScanOutcome::EmptyGallery => "no identities enrolled".to_string(),
            ScanOutcome::NoConfidentMatch { distance } => {
                format!("face not recognized (best distance {distance:.3})")
            }
            ScanOutcome::LivenessFailed { reason, .. } => {
                format!("liveness check failed: {}", reason.label())
            }
            ScanOutcome::ClientBlocked { until } => {
                format!("client blocked until {}", until.to_rfc3339())
            }
            ScanOutcome::StoreUnavailable { detail } => {
                format!("attendance store unavailable: {detail}")
            }
            ScanOutcome::Timeout { stage } => format!("{stage} call timed out"),
        }
    }

    /// Wire representation consumed by the caller-facing layer.
    pub fn to_wire(&self) -> serde_json::Value {
        let mut obj = serde_json::Map::new();
        obj.insert("outcome".into(), self.kind().into());
        obj.insert("message".into(), self.message().into());
        obj.insert(
            "disposition".into(),
            serde_json::to_value(self.disposition()).unwrap_or_default(),
        );

        match self {
            ScanOutcome::Marked { identity, confidence, timestamp } => {
                obj.insert("identity".into(), identity.as_str().into());
                obj.insert("confidence".into(), (*confidence).into());
                obj.insert("timestamp".into(), timestamp.to_rfc3339().into());
            }
            ScanOutcome::AlreadyMarked { identity, confidence, timestamp } => {
                obj.insert("identity".into(), identity.as_str().into());
                obj.insert("confidence".into(), (*confidence).into());
                obj.insert("timestamp".into(), timestamp.as_str().into());
            }
            ScanOutcome::NoConfidentMatch { distance } => {
                obj.insert("distance".into(), (*distance).into());
            }
            ScanOutcome::LivenessFailed { reason, score } => {
                obj.insert("reason".into(), reason.label().into());
                obj.insert("score".into(), (*score).into());
            }
            ScanOutcome::ClientBlocked { until } => {
                obj.insert("blocked_until".into(), until.to_rfc3339().into());
            }
            _ => {}
        }

        serde_json::Value::Object(obj)
    }
}
