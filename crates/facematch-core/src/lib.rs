//! facematch-core — Face quality scoring and descriptor comparison.
//!
//! The decision layer on top of an external face detector: quality gating
//! of raw detections, profile reference indexes, and the distance and
//! adaptive matchers. No I/O.

pub mod comparator;
pub mod detector;
pub mod geometry;
pub mod quality;
pub mod types;

#[cfg(any(test, feature = "test-fixtures"))]
pub mod fixtures;

pub use comparator::{
    AdaptiveMatcher, DescriptorError, DistanceMatcher, MatchResult, MatchStrategy, Matcher,
    PairwiseMatch, ReferenceIndex,
};
pub use detector::{DetectionStrategy, DetectorError, FaceDetector, FallbackDetector};
pub use quality::{QualityAssessment, QualityAssessor, QualityMetrics, QualityThresholds};
pub use types::{
    BoundingBox, Embedding, FaceObservation, ImageRef, ImageView, ObservationId, Point, RawFace,
    EMBEDDING_DIM,
};
