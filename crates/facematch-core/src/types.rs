use crate::detector::DetectionStrategy;
use crate::quality::{QualityAssessment, QualityMetrics};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Required embedding dimensionality. Anything else is a detector contract violation.
pub const EMBEDDING_DIM: usize = 128;

/// Identifier of an accepted observation inside a profile.
pub type ObservationId = Uuid;

/// Opaque reference (path, URL, storage key) to a source image.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageRef(String);

impl ImageRef {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ImageRef {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ImageRef {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A 2-D landmark point in source-image pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// Face bounding box in source-image pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    /// Geometric mean of the box sides, `sqrt(width * height)`.
    pub fn face_size(&self) -> f32 {
        (self.width.max(0.0) * self.height.max(0.0)).sqrt()
    }
}

/// Face embedding vector produced by the external detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// True when the vector has exactly [`EMBEDDING_DIM`] finite components.
    pub fn is_valid(&self) -> bool {
        self.values.len() == EMBEDDING_DIM && self.values.iter().all(|v| v.is_finite())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Borrowed view of a decoded grayscale image handed to a detector.
#[derive(Debug, Clone, Copy)]
pub struct ImageView<'a> {
    pub source: &'a ImageRef,
    /// Grayscale pixel data (width * height bytes).
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
}

/// One raw face as returned by a detector, before quality filtering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFace {
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
    #[serde(default)]
    pub landmarks: Vec<Point>,
    #[serde(default)]
    pub embedding: Option<Embedding>,
    pub confidence: f32,
}

/// A detected face with its derived quality assessment.
///
/// Only [`QualityAssessor::observe`](crate::quality::QualityAssessor::observe)
/// builds these, so the quality score always matches the face data.
#[derive(Debug, Clone, Serialize)]
pub struct FaceObservation {
    pub id: ObservationId,
    pub source: ImageRef,
    pub bbox: BoundingBox,
    pub landmarks: Vec<Point>,
    pub embedding: Option<Embedding>,
    pub detector_confidence: f32,
    pub strategy: DetectionStrategy,
    assessment: QualityAssessment,
}

impl FaceObservation {
    pub(crate) fn from_parts(
        face: RawFace,
        strategy: DetectionStrategy,
        source: ImageRef,
        assessment: QualityAssessment,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            source,
            bbox: face.bbox,
            landmarks: face.landmarks,
            embedding: face.embedding,
            detector_confidence: face.confidence,
            strategy,
            assessment,
        }
    }

    pub fn quality_score(&self) -> f32 {
        self.assessment.score
    }

    pub fn quality_metrics(&self) -> &QualityMetrics {
        &self.assessment.metrics
    }

    pub fn accepted(&self) -> bool {
        self.assessment.accepted
    }

    pub fn face_size(&self) -> f32 {
        self.bbox.face_size()
    }

    /// The embedding, if present and of the required dimensionality.
    pub fn valid_embedding(&self) -> Option<&Embedding> {
        self.embedding.as_ref().filter(|e| e.is_valid())
    }
}
