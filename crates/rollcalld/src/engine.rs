//! Scan orchestrator — composes guard, liveness, matching, and ledger.
//!
//! One engine instance is shared (`Arc`) across all concurrent scan
//! requests; per-(date, identity) atomicity lives in the store's
//! conditional write, so nothing here serializes scans. Data flows one
//! way per request: frames → (detections, liveness verdict) → match →
//! ledger transition → outcome. External failures are translated into
//! structured outcomes at this boundary and never propagate raw.

use crate::abuse::AbuseGuard;
use crate::extractor::EmbeddingExtractor;
use crate::ledger::{AttendanceLedger, LedgerError, MarkOutcome};
use crate::outcome::{LivenessReason, ScanOutcome};
use chrono::Utc;
use rollcall_core::liveness::{self, LivenessDetector};
use rollcall_core::types::{MatchError, MatchResult};
use rollcall_core::{frame, Detection, EuclideanMatcher, Frame, GalleryHandle, Matcher};
use std::time::Duration;
use uuid::Uuid;

pub struct ScanEngine<X: EmbeddingExtractor> {
    gallery: GalleryHandle,
    detector: Box<dyn LivenessDetector>,
    matcher: EuclideanMatcher,
    ledger: AttendanceLedger,
    abuse: AbuseGuard,
    extractor: X,
    match_threshold: f32,
    extract_timeout: Duration,
}

impl<X: EmbeddingExtractor> ScanEngine<X> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        gallery: GalleryHandle,
        detector: Box<dyn LivenessDetector>,
        ledger: AttendanceLedger,
        abuse: AbuseGuard,
        extractor: X,
        match_threshold: f32,
        extract_timeout: Duration,
    ) -> Self {
        Self {
            gallery,
            detector,
            matcher: EuclideanMatcher,
            ledger,
            abuse,
            extractor,
            match_threshold,
            extract_timeout,
        }
    }

    pub fn gallery(&self) -> &GalleryHandle {
        &self.gallery
    }

    pub fn ledger(&self) -> &AttendanceLedger {
        &self.ledger
    }

    /// Reserved for a guard-inspection surface; exercised by tests today.
    #[allow(dead_code)]
    pub fn abuse(&self) -> &AbuseGuard {
        &self.abuse
    }

    pub fn detector_name(&self) -> &'static str {
        self.detector.name()
    }

    /// Run one scan session to a terminal outcome.
    pub async fn scan(&self, client: &str, frames: Vec<Frame>) -> ScanOutcome {
        let scan_id = Uuid::new_v4();
        let now = Utc::now();

        // Blocked clients are rejected before any detection work.
        if let Err(until) = self.abuse.check(client, now) {
            tracing::warn!(%scan_id, client, until = %until.to_rfc3339(), "rejected: client blocked");
            return ScanOutcome::ClientBlocked { until };
        }

        // Session shape: cheap rejects before the external extractor runs.
        if let Err(err) = liveness::validate_session(&frames) {
            tracing::info!(%scan_id, client, %err, "invalid liveness session");
            self.record_failure(client, now, &scan_id);
            return ScanOutcome::LivenessFailed {
                reason: LivenessReason::from(&err),
                score: 0.0,
            };
        }

        // Replay signal: a real capture sequence never produces
        // bit-identical frames, whatever the chosen detector.
        if frame::frames_identical(&frames) {
            tracing::info!(%scan_id, client, "rejected: byte-identical frames");
            self.record_failure(client, now, &scan_id);
            return ScanOutcome::LivenessFailed {
                reason: LivenessReason::InsufficientMovement,
                score: 0.0,
            };
        }

        let detections = match self.extract_all(&frames, &scan_id).await {
            Ok(d) => d,
            Err(outcome) => return outcome,
        };

        if detections.is_empty() {
            tracing::info!(%scan_id, client, "no face detected in any frame");
            return ScanOutcome::NoFaceDetected;
        }

        let verdict = match self.detector.detect(&frames) {
            Ok(v) => v,
            Err(err) => {
                tracing::info!(%scan_id, client, %err, "liveness detector rejected session");
                self.record_failure(client, now, &scan_id);
                return ScanOutcome::LivenessFailed {
                    reason: (&err).into(),
                    score: 0.0,
                };
            }
        };
        if !verdict.is_live {
            let reason = verdict
                .failure
                .map(Into::into)
                .unwrap_or(LivenessReason::InsufficientMovement);
            tracing::info!(
                %scan_id,
                client,
                detector = self.detector.name(),
                score = verdict.score,
                reason = reason.label(),
                "liveness failed"
            );
            self.record_failure(client, now, &scan_id);
            return ScanOutcome::LivenessFailed {
                reason,
                score: verdict.score,
            };
        }

        // Matching holds one gallery snapshot for the whole loop; a
        // concurrent reload is invisible to this scan.
        let gallery = self.gallery.snapshot();
        let mut best: Option<MatchResult> = None;
        for det in &detections {
            let result =
                match self
                    .matcher
                    .best_match(&det.embedding, &gallery, self.match_threshold)
                {
                    Ok(r) => r,
                    Err(MatchError::EmptyGallery) => return ScanOutcome::EmptyGallery,
                    Err(err @ MatchError::DimensionMismatch { .. }) => {
                        tracing::error!(%scan_id, %err, "extractor embedding does not fit gallery");
                        return ScanOutcome::ExtractionFailed {
                            detail: err.to_string(),
                        };
                    }
                };
            let better = best
                .as_ref()
                .map_or(true, |b| result.distance < b.distance);
            if better {
                best = Some(result);
            }
        }
        let Some(result) = best else {
            return ScanOutcome::NoFaceDetected;
        };

        let Some(identity) = result.identity.clone() else {
            tracing::info!(%scan_id, client, distance = result.distance, "no confident match");
            self.record_failure(client, now, &scan_id);
            return ScanOutcome::NoConfidentMatch {
                distance: result.distance,
            };
        };

        match self.ledger.mark(now.date_naive(), &identity, now).await {
            Ok(MarkOutcome::Marked { timestamp }) => {
                self.abuse.record_success(client);
                tracing::info!(
                    %scan_id,
                    client,
                    %identity,
                    confidence = result.confidence,
                    "attendance marked"
                );
                ScanOutcome::Marked {
                    identity,
                    confidence: result.confidence,
                    timestamp,
                }
            }
            Ok(MarkOutcome::AlreadyMarked { timestamp }) => {
                tracing::info!(%scan_id, client, %identity, "already marked today");
                ScanOutcome::AlreadyMarked {
                    identity,
                    confidence: result.confidence,
                    timestamp,
                }
            }
            Err(LedgerError::Timeout) => {
                tracing::warn!(%scan_id, client, %identity, "store timed out during mark");
                ScanOutcome::Timeout { stage: "store" }
            }
            Err(LedgerError::Store(err)) => {
                tracing::error!(%scan_id, client, %identity, %err, "store unavailable during mark");
                ScanOutcome::StoreUnavailable {
                    detail: err.to_string(),
                }
            }
        }
    }

    /// One bounded extractor call per frame, keeping the first reported
    /// detection of each. Multi-face policy: the first detection is used
    /// and the rest are ignored for that frame — deterministic and
    /// documented, never silently arbitrary.
    async fn extract_all(
        &self,
        frames: &[Frame],
        scan_id: &Uuid,
    ) -> Result<Vec<Detection>, ScanOutcome> {
        let mut detections = Vec::new();
        for f in frames {
            let faces =
                match tokio::time::timeout(self.extract_timeout, self.extractor.extract(f)).await
                {
                    Err(_) => {
                        tracing::warn!(%scan_id, frame = f.index, "extractor call timed out");
                        return Err(ScanOutcome::Timeout { stage: "extract" });
                    }
                    Ok(Err(err)) => {
                        tracing::warn!(%scan_id, frame = f.index, %err, "extraction failed");
                        return Err(ScanOutcome::ExtractionFailed {
                            detail: err.to_string(),
                        });
                    }
                    Ok(Ok(faces)) => faces,
                };

            if faces.len() > 1 {
                tracing::debug!(
                    %scan_id,
                    frame = f.index,
                    faces = faces.len(),
                    "multiple faces; using first detection"
                );
            }
            if let Some(first) = faces.into_iter().next() {
                detections.push(first);
            }
        }
        Ok(detections)
    }

    fn record_failure(&self, client: &str, now: chrono::DateTime<Utc>, scan_id: &Uuid) {
        if let Some(until) = self.abuse.record_failure(client, now) {
            tracing::warn!(%scan_id, client, until = %until.to_rfc3339(), "failure limit reached");
        }
    }
}
