//! Face quality assessment.
//!
//! Seven metrics are folded into a weighted score in [0, 1]. The score
//! ranks observations; acceptance additionally requires a valid descriptor
//! and a face above the minimum size.

use crate::detector::DetectionStrategy;
use crate::geometry;
use crate::types::{FaceObservation, ImageRef, RawFace};
use serde::{Deserialize, Serialize};

// --- Metric weights (sum to 1.0) ---
const WEIGHT_SIZE: f32 = 0.10;
const WEIGHT_CONFIDENCE: f32 = 0.20;
const WEIGHT_LANDMARKS: f32 = 0.10;
const WEIGHT_DESCRIPTOR: f32 = 0.40;
const WEIGHT_SHARPNESS: f32 = 0.05;
const WEIGHT_FRONTALITY: f32 = 0.10;
const WEIGHT_EYES_OPEN: f32 = 0.05;

/// Mean eye aspect ratio above which the eyes count as open.
const EYE_OPEN_EPSILON: f32 = 0.02;

pub const DEFAULT_MIN_FACE_SIZE: f32 = 60.0;
pub const DEFAULT_MIN_DETECTION_CONFIDENCE: f32 = 0.5;
pub const DEFAULT_MIN_QUALITY: f32 = 0.4;
pub const DEFAULT_MIN_LANDMARKS: usize = 60;

/// Acceptance thresholds for the assessor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityThresholds {
    /// Minimum `sqrt(width * height)` in pixels.
    pub min_face_size: f32,
    pub min_detection_confidence: f32,
    /// Minimum combined score for acceptance.
    pub min_quality: f32,
    pub min_landmarks: usize,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            min_face_size: DEFAULT_MIN_FACE_SIZE,
            min_detection_confidence: DEFAULT_MIN_DETECTION_CONFIDENCE,
            min_quality: DEFAULT_MIN_QUALITY,
            min_landmarks: DEFAULT_MIN_LANDMARKS,
        }
    }
}

/// Per-metric diagnostics retained on every observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub size_ok: bool,
    pub confidence_ok: bool,
    pub landmarks_ok: bool,
    pub descriptor_ok: bool,
    pub sharpness: f32,
    pub frontality: f32,
    pub eyes_open: bool,
}

impl QualityMetrics {
    /// Weighted sum: booleans contribute their full weight, continuous
    /// metrics `weight * clamp(value, 0, 1)`.
    pub fn score(&self) -> f32 {
        let flag = |ok: bool, w: f32| if ok { w } else { 0.0 };
        let score = flag(self.size_ok, WEIGHT_SIZE)
            + flag(self.confidence_ok, WEIGHT_CONFIDENCE)
            + flag(self.landmarks_ok, WEIGHT_LANDMARKS)
            + flag(self.descriptor_ok, WEIGHT_DESCRIPTOR)
            + WEIGHT_SHARPNESS * self.sharpness.clamp(0.0, 1.0)
            + WEIGHT_FRONTALITY * self.frontality.clamp(0.0, 1.0)
            + flag(self.eyes_open, WEIGHT_EYES_OPEN);
        score.clamp(0.0, 1.0)
    }
}

/// Outcome of assessing one raw face.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QualityAssessment {
    pub accepted: bool,
    pub score: f32,
    pub metrics: QualityMetrics,
}

/// Stateless quality scorer; a pure function of its inputs and thresholds.
#[derive(Debug, Clone, Default)]
pub struct QualityAssessor {
    thresholds: QualityThresholds,
}

impl QualityAssessor {
    pub fn new(thresholds: QualityThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &QualityThresholds {
        &self.thresholds
    }

    /// Score one face. `face_size` is normally `face.bbox.face_size()`.
    pub fn assess(&self, face: &RawFace, face_size: f32) -> QualityAssessment {
        let t = &self.thresholds;
        let metrics = QualityMetrics {
            size_ok: face_size >= t.min_face_size,
            confidence_ok: face.confidence >= t.min_detection_confidence,
            landmarks_ok: face.landmarks.len() >= t.min_landmarks,
            descriptor_ok: face.embedding.as_ref().is_some_and(|e| e.is_valid()),
            sharpness: geometry::sharpness(&face.landmarks),
            frontality: geometry::frontality(&face.landmarks),
            eyes_open: geometry::eyes_open(&face.landmarks, EYE_OPEN_EPSILON),
        };
        let score = metrics.score();

        // Validity gates cannot be bought back by a high score.
        let accepted = score >= t.min_quality && metrics.descriptor_ok && metrics.size_ok;

        QualityAssessment { accepted, score, metrics }
    }

    /// Assess a raw face and wrap it as an observation of `source`.
    pub fn observe(
        &self,
        face: RawFace,
        strategy: DetectionStrategy,
        source: &ImageRef,
    ) -> FaceObservation {
        let assessment = self.assess(&face, face.bbox.face_size());
        tracing::debug!(
            source = %source,
            strategy = strategy.as_str(),
            score = assessment.score,
            accepted = assessment.accepted,
            "face assessed"
        );
        FaceObservation::from_parts(face, strategy, source.clone(), assessment)
    }

    /// The best accepted observation among `faces`; ties go to the first seen.
    pub fn best_accepted(
        &self,
        faces: Vec<RawFace>,
        strategy: DetectionStrategy,
        source: &ImageRef,
    ) -> Option<FaceObservation> {
        let mut best: Option<FaceObservation> = None;
        for face in faces {
            let obs = self.observe(face, strategy, source);
            if !obs.accepted() {
                continue;
            }
            let better = match &best {
                None => true,
                Some(prev) => obs.quality_score() > prev.quality_score(),
            };
            if better {
                best = Some(obs);
            }
        }
        best
    }
}
