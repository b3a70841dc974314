//! Liveness detector chain — movement, blink, and combined strategies.
//!
//! Each strategy consumes one ordered frame session and produces a verdict.
//! The chain is resolved once at process start by capability availability
//! (the blink strategy needs a landmark locator); the selected detector is
//! then held as a single instance for the process lifetime.

use crate::frame::{self, Frame};
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

// --- Named constants ---
/// A liveness session is an ordered sequence of at least this many frames.
pub const MIN_SESSION_FRAMES: usize = 3;
pub const DEFAULT_MOVEMENT_THRESHOLD: f32 = 2.0;
pub const DEFAULT_BLINK_THRESHOLD: f32 = 0.21;
pub const DEFAULT_REQUIRED_BLINKS: usize = 2;
pub const DEFAULT_COMBINED_THRESHOLD: f32 = 1.0;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum LivenessError {
    #[error("liveness session requires at least {MIN_SESSION_FRAMES} frames, got {0}")]
    TooFewFrames(usize),
    #[error(
        "frame {index} is {got_w}x{got_h}, session started at {want_w}x{want_h}"
    )]
    InconsistentFrameSizes {
        index: usize,
        want_w: u32,
        want_h: u32,
        got_w: u32,
        got_h: u32,
    },
}

/// Why a session was judged not live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LivenessFailure {
    InsufficientMovement,
    InsufficientBlinks,
    LandmarksUnavailable,
}

/// Verdict for one session.
#[derive(Debug, Clone, PartialEq)]
pub struct LivenessVerdict {
    pub is_live: bool,
    pub score: f32,
    /// Populated when `is_live` is false.
    pub failure: Option<LivenessFailure>,
}

impl LivenessVerdict {
    fn live(score: f32) -> Self {
        Self {
            is_live: true,
            score,
            failure: None,
        }
    }

    fn not_live(score: f32, failure: LivenessFailure) -> Self {
        Self {
            is_live: false,
            score,
            failure: Some(failure),
        }
    }
}

/// One liveness strategy: decide from an ordered frame session whether a
/// live subject produced it.
pub trait LivenessDetector: Send + Sync {
    fn name(&self) -> &'static str;
    fn detect(&self, frames: &[Frame]) -> Result<LivenessVerdict, LivenessError>;
}

/// Shared session shape validation: frame count and uniform dimensions.
pub fn validate_session(frames: &[Frame]) -> Result<(), LivenessError> {
    if frames.len() < MIN_SESSION_FRAMES {
        return Err(LivenessError::TooFewFrames(frames.len()));
    }
    let (want_w, want_h) = frames[0].dimensions();
    for (index, f) in frames.iter().enumerate().skip(1) {
        let (got_w, got_h) = f.dimensions();
        if (got_w, got_h) != (want_w, want_h) {
            return Err(LivenessError::InconsistentFrameSizes {
                index,
                want_w,
                want_h,
                got_w,
                got_h,
            });
        }
    }
    Ok(())
}

// --- Landmark capability (external, injected) ---

/// Six-point eye contour: [outer, upper-outer, upper-inner, inner,
/// lower-inner, lower-outer].
#[derive(Debug, Clone, Copy)]
pub struct EyeContour(pub [(f32, f32); 6]);

#[derive(Debug, Clone, Copy)]
pub struct FaceLandmarks {
    pub left_eye: EyeContour,
    pub right_eye: EyeContour,
}

/// Locates facial landmarks in a single frame. External capability: frames
/// where no landmarks can be located yield `None`.
pub trait LandmarkLocator: Send + Sync {
    fn locate(&self, frame: &Frame) -> Option<FaceLandmarks>;
}

/// Eye-aspect-ratio: `(|p2−p6| + |p3−p5|) / (2·|p1−p4|)`.
///
/// Drops toward zero as the eye closes; a frame counts as a blink frame
/// when the smaller of the two eyes' EAR falls below the blink threshold.
pub fn eye_aspect_ratio(eye: &EyeContour) -> f32 {
    fn dist(a: (f32, f32), b: (f32, f32)) -> f32 {
        ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
    }
    let p = &eye.0;
    let horizontal = dist(p[0], p[3]);
    if horizontal <= f32::EPSILON {
        return 0.0;
    }
    (dist(p[1], p[5]) + dist(p[2], p[4])) / (2.0 * horizontal)
}

// --- Strategies ---

/// Movement detector: mean absolute pixel difference between consecutive
/// frames. A static photo held in front of the camera scores 0.
pub struct MovementDetector {
    pub threshold: f32,
}

impl LivenessDetector for MovementDetector {
    fn name(&self) -> &'static str {
        "movement"
    }

    fn detect(&self, frames: &[Frame]) -> Result<LivenessVerdict, LivenessError> {
        validate_session(frames)?;
        let score = frame::movement_score(frames);
        tracing::debug!(score, threshold = self.threshold, "movement detector");
        if score > self.threshold {
            Ok(LivenessVerdict::live(score))
        } else {
            Ok(LivenessVerdict::not_live(
                score,
                LivenessFailure::InsufficientMovement,
            ))
        }
    }
}

/// Blink detector: counts frames where the eye-aspect-ratio drops below
/// the blink threshold. Frames without locatable landmarks are skipped;
/// a session with no locatable landmarks at all is reported as not live
/// with a distinguishable diagnostic rather than an error.
pub struct BlinkDetector {
    locator: Arc<dyn LandmarkLocator>,
    pub blink_threshold: f32,
    pub required_blinks: usize,
}

impl BlinkDetector {
    pub fn new(
        locator: Arc<dyn LandmarkLocator>,
        blink_threshold: f32,
        required_blinks: usize,
    ) -> Self {
        Self {
            locator,
            blink_threshold,
            required_blinks,
        }
    }
}

impl LivenessDetector for BlinkDetector {
    fn name(&self) -> &'static str {
        "blink"
    }

    fn detect(&self, frames: &[Frame]) -> Result<LivenessVerdict, LivenessError> {
        validate_session(frames)?;

        let mut located = 0usize;
        let mut blink_frames = 0usize;

        for f in frames {
            let Some(landmarks) = self.locator.locate(f) else {
                continue;
            };
            located += 1;
            let ear = eye_aspect_ratio(&landmarks.left_eye)
                .min(eye_aspect_ratio(&landmarks.right_eye));
            if ear < self.blink_threshold {
                blink_frames += 1;
            }
        }

        if located == 0 {
            tracing::warn!("blink detector: no landmarks located in any frame");
            return Ok(LivenessVerdict::not_live(
                0.0,
                LivenessFailure::LandmarksUnavailable,
            ));
        }

        tracing::debug!(located, blink_frames, required = self.required_blinks, "blink detector");
        if blink_frames >= self.required_blinks {
            Ok(LivenessVerdict::live(blink_frames as f32))
        } else {
            Ok(LivenessVerdict::not_live(
                blink_frames as f32,
                LivenessFailure::InsufficientBlinks,
            ))
        }
    }
}

/// Last-resort detector: aggregates movement with inter-frame brightness
/// variation, plus eye-aspect-ratio variation when a landmark locator is
/// present. Weights favor movement, the strongest of the weak signals.
pub struct CombinedDetector {
    locator: Option<Arc<dyn LandmarkLocator>>,
    pub threshold: f32,
}

impl CombinedDetector {
    pub fn new(locator: Option<Arc<dyn LandmarkLocator>>, threshold: f32) -> Self {
        Self { locator, threshold }
    }
}

impl LivenessDetector for CombinedDetector {
    fn name(&self) -> &'static str {
        "combined"
    }

    fn detect(&self, frames: &[Frame]) -> Result<LivenessVerdict, LivenessError> {
        validate_session(frames)?;

        let movement = frame::movement_score(frames);

        let brightness: Vec<f32> = frames.iter().map(Frame::avg_brightness).collect();
        let b_min = brightness.iter().copied().fold(f32::INFINITY, f32::min);
        let b_max = brightness.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let brightness_spread = (b_max - b_min).max(0.0);

        let mut score = 0.7 * movement + 0.3 * brightness_spread;

        if let Some(locator) = &self.locator {
            let ears: Vec<f32> = frames
                .iter()
                .filter_map(|f| locator.locate(f))
                .map(|lm| {
                    (eye_aspect_ratio(&lm.left_eye) + eye_aspect_ratio(&lm.right_eye)) / 2.0
                })
                .collect();
            if ears.len() >= 2 {
                let e_min = ears.iter().copied().fold(f32::INFINITY, f32::min);
                let e_max = ears.iter().copied().fold(f32::NEG_INFINITY, f32::max);
                // EAR swings are small in absolute terms; scale into the
                // same range as the pixel-domain signals.
                score += (e_max - e_min) * 10.0;
            }
        }

        tracing::debug!(movement, brightness_spread, score, "combined detector");
        if score > self.threshold {
            Ok(LivenessVerdict::live(score))
        } else {
            Ok(LivenessVerdict::not_live(
                score,
                LivenessFailure::InsufficientMovement,
            ))
        }
    }
}

// --- Startup-time chain selection ---

/// Strategy identifiers, in the order the default chain prefers them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    Movement,
    Blink,
    Combined,
}

impl StrategyKind {
    pub fn label(&self) -> &'static str {
        match self {
            StrategyKind::Movement => "movement",
            StrategyKind::Blink => "blink",
            StrategyKind::Combined => "combined",
        }
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "movement" => Ok(StrategyKind::Movement),
            "blink" => Ok(StrategyKind::Blink),
            "combined" => Ok(StrategyKind::Combined),
            other => Err(format!("unknown liveness strategy: {other}")),
        }
    }
}

/// Chain tuning and preference order.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub movement_threshold: f32,
    pub blink_threshold: f32,
    pub required_blinks: usize,
    pub combined_threshold: f32,
    /// Walked in order; the first available strategy wins.
    pub preference: Vec<StrategyKind>,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            movement_threshold: DEFAULT_MOVEMENT_THRESHOLD,
            blink_threshold: DEFAULT_BLINK_THRESHOLD,
            required_blinks: DEFAULT_REQUIRED_BLINKS,
            combined_threshold: DEFAULT_COMBINED_THRESHOLD,
            preference: vec![
                StrategyKind::Movement,
                StrategyKind::Blink,
                StrategyKind::Combined,
            ],
        }
    }
}

/// Resolve the liveness chain once at startup.
///
/// Walks the preference order and picks the first strategy whose
/// capabilities are available: blink requires a landmark locator, movement
/// and combined are always constructible. Falls back to movement when the
/// preference list names nothing available.
pub fn select_detector(
    config: &ChainConfig,
    locator: Option<Arc<dyn LandmarkLocator>>,
) -> Box<dyn LivenessDetector> {
    for kind in &config.preference {
        match kind {
            StrategyKind::Movement => {
                tracing::info!(strategy = kind.label(), "liveness strategy selected");
                return Box::new(MovementDetector {
                    threshold: config.movement_threshold,
                });
            }
            StrategyKind::Blink => match &locator {
                Some(locator) => {
                    tracing::info!(strategy = kind.label(), "liveness strategy selected");
                    return Box::new(BlinkDetector::new(
                        locator.clone(),
                        config.blink_threshold,
                        config.required_blinks,
                    ));
                }
                None => {
                    tracing::debug!("blink strategy unavailable: no landmark locator");
                }
            },
            StrategyKind::Combined => {
                tracing::info!(strategy = kind.label(), "liveness strategy selected");
                return Box::new(CombinedDetector::new(
                    locator.clone(),
                    config.combined_threshold,
                ));
            }
        }
    }

    tracing::warn!("no liveness strategy available from preference list; using movement");
    Box::new(MovementDetector {
        threshold: config.movement_threshold,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(index: u32, data: Vec<u8>) -> Frame {
        Frame {
            data,
            width: 2,
            height: 2,
            index,
        }
    }

    fn static_session() -> Vec<Frame> {
        (0..3).map(|i| frame(i, vec![50, 60, 70, 80])).collect()
    }

    fn moving_session() -> Vec<Frame> {
        vec![
            frame(0, vec![0, 0, 0, 0]),
            frame(1, vec![10, 10, 10, 10]),
            frame(2, vec![20, 20, 20, 20]),
        ]
    }

    /// Landmark stub returning a fixed EAR per frame index, `None` where absent.
    struct StubLocator {
        ears: Vec<Option<f32>>,
    }

    impl StubLocator {
        fn eye_with_ear(ear: f32) -> EyeContour {
            // Horizontal length 1.0, vertical gaps ear/2 each → EAR = ear.
            let h = ear / 2.0;
            EyeContour([
                (0.0, 0.0),
                (0.25, h),
                (0.75, h),
                (1.0, 0.0),
                (0.75, -h),
                (0.25, -h),
            ])
        }
    }

    impl LandmarkLocator for StubLocator {
        fn locate(&self, frame: &Frame) -> Option<FaceLandmarks> {
            let ear = self.ears.get(frame.index as usize).copied().flatten()?;
            let eye = Self::eye_with_ear(ear);
            Some(FaceLandmarks {
                left_eye: eye,
                right_eye: eye,
            })
        }
    }

    #[test]
    fn test_eye_aspect_ratio_construction() {
        let eye = StubLocator::eye_with_ear(0.3);
        assert!((eye_aspect_ratio(&eye) - 0.3).abs() < 1e-5);
    }

    #[test]
    fn test_eye_aspect_ratio_degenerate_horizontal() {
        let eye = EyeContour([(0.0, 0.0); 6]);
        assert_eq!(eye_aspect_ratio(&eye), 0.0);
    }

    #[test]
    fn test_movement_identical_frames_not_live() {
        let detector = MovementDetector { threshold: 2.0 };
        let verdict = detector.detect(&static_session()).unwrap();
        assert!(!verdict.is_live);
        assert_eq!(verdict.score, 0.0);
        assert_eq!(verdict.failure, Some(LivenessFailure::InsufficientMovement));
    }

    #[test]
    fn test_movement_passes_with_motion() {
        let detector = MovementDetector { threshold: 2.0 };
        let verdict = detector.detect(&moving_session()).unwrap();
        assert!(verdict.is_live);
        assert!(verdict.score > 2.0);
    }

    #[test]
    fn test_movement_inconsistent_sizes_fails_fast() {
        let detector = MovementDetector { threshold: 2.0 };
        let mut frames = moving_session();
        frames[2].width = 4;
        frames[2].data = vec![0; 8];
        let err = detector.detect(&frames).unwrap_err();
        assert!(matches!(
            err,
            LivenessError::InconsistentFrameSizes { index: 2, .. }
        ));
    }

    #[test]
    fn test_too_few_frames() {
        let detector = MovementDetector { threshold: 2.0 };
        let frames = vec![frame(0, vec![0; 4]), frame(1, vec![0; 4])];
        assert_eq!(
            detector.detect(&frames).unwrap_err(),
            LivenessError::TooFewFrames(2)
        );
    }

    #[test]
    fn test_blink_enough_blinks_is_live() {
        // EAR below 0.21 in frames 0 and 2 → two blink frames.
        let locator = Arc::new(StubLocator {
            ears: vec![Some(0.1), Some(0.3), Some(0.15)],
        });
        let detector = BlinkDetector::new(locator, 0.21, 2);
        let verdict = detector.detect(&static_session()).unwrap();
        assert!(verdict.is_live);
        assert_eq!(verdict.score, 2.0);
    }

    #[test]
    fn test_blink_too_few_blinks_not_live() {
        let locator = Arc::new(StubLocator {
            ears: vec![Some(0.1), Some(0.3), Some(0.3)],
        });
        let detector = BlinkDetector::new(locator, 0.21, 2);
        let verdict = detector.detect(&static_session()).unwrap();
        assert!(!verdict.is_live);
        assert_eq!(verdict.failure, Some(LivenessFailure::InsufficientBlinks));
    }

    #[test]
    fn test_blink_skips_frames_without_landmarks() {
        // Middle frame has no landmarks; the other two both blink.
        let locator = Arc::new(StubLocator {
            ears: vec![Some(0.1), None, Some(0.1)],
        });
        let detector = BlinkDetector::new(locator, 0.21, 2);
        let verdict = detector.detect(&static_session()).unwrap();
        assert!(verdict.is_live);
    }

    #[test]
    fn test_blink_landmarks_unavailable_whole_session() {
        let locator = Arc::new(StubLocator {
            ears: vec![None, None, None],
        });
        let detector = BlinkDetector::new(locator, 0.21, 2);
        let verdict = detector.detect(&static_session()).unwrap();
        assert!(!verdict.is_live);
        assert_eq!(verdict.failure, Some(LivenessFailure::LandmarksUnavailable));
    }

    #[test]
    fn test_combined_static_session_not_live() {
        let detector = CombinedDetector::new(None, 1.0);
        let verdict = detector.detect(&static_session()).unwrap();
        assert!(!verdict.is_live);
    }

    #[test]
    fn test_combined_moving_session_is_live() {
        let detector = CombinedDetector::new(None, 1.0);
        let verdict = detector.detect(&moving_session()).unwrap();
        assert!(verdict.is_live);
    }

    #[test]
    fn test_select_default_is_movement() {
        let detector = select_detector(&ChainConfig::default(), None);
        assert_eq!(detector.name(), "movement");
    }

    #[test]
    fn test_select_blink_when_locator_available() {
        let config = ChainConfig {
            preference: vec![StrategyKind::Blink, StrategyKind::Movement],
            ..ChainConfig::default()
        };
        let locator: Arc<dyn LandmarkLocator> =
            Arc::new(StubLocator { ears: vec![] });
        let detector = select_detector(&config, Some(locator));
        assert_eq!(detector.name(), "blink");
    }

    #[test]
    fn test_select_skips_unavailable_blink() {
        let config = ChainConfig {
            preference: vec![StrategyKind::Blink, StrategyKind::Combined],
            ..ChainConfig::default()
        };
        let detector = select_detector(&config, None);
        assert_eq!(detector.name(), "combined");
    }

    #[test]
    fn test_select_empty_preference_falls_back_to_movement() {
        let config = ChainConfig {
            preference: vec![],
            ..ChainConfig::default()
        };
        let detector = select_detector(&config, None);
        assert_eq!(detector.name(), "movement");
    }

    #[test]
    fn test_strategy_kind_parse() {
        assert_eq!("movement".parse(), Ok(StrategyKind::Movement));
        assert_eq!(" Blink ".parse(), Ok(StrategyKind::Blink));
        assert!("infrared".parse::<StrategyKind>().is_err());
    }
}
