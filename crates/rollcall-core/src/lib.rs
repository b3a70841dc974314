//! rollcall-core — Face matching and liveness verification engine.
//!
//! Pure-CPU primitives for the attendance pipeline: the embedding gallery,
//! the nearest-neighbor matcher, frame pixel math, and the liveness
//! detector chain. No I/O beyond gallery loading; detection and embedding
//! extraction are external capabilities consumed by the daemon.

pub mod frame;
pub mod gallery;
pub mod liveness;
pub mod types;

pub use frame::Frame;
pub use gallery::{Gallery, GalleryError, GalleryHandle};
pub use liveness::{
    select_detector, ChainConfig, LandmarkLocator, LivenessDetector, LivenessError,
    LivenessFailure, LivenessVerdict, StrategyKind, MIN_SESSION_FRAMES,
};
pub use types::{
    BoundingBox, Detection, Embedding, EuclideanMatcher, MatchError, MatchResult, Matcher,
    EMBEDDING_DIM,
};
