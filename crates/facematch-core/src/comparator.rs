//! Descriptor comparison.
//!
//! Two strategies share the [`Matcher`] seam:
//!
//! - [`DistanceMatcher`]: nearest neighbour over a profile's labelled
//!   descriptors with a fixed Euclidean cutoff (profile-batch mode).
//! - [`AdaptiveMatcher`]: pairwise Euclidean + cosine test whose threshold
//!   scales with detector confidence and detection-method reliability
//!   (single-reference mode).
//!
//! Both reject missing or wrong-length descriptors with a zero-confidence
//! non-match instead of comparing partially.

use crate::detector::DetectionStrategy;
use crate::types::{Embedding, FaceObservation, ObservationId, EMBEDDING_DIM};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_DISTANCE_THRESHOLD: f32 = 0.5;
pub const DEFAULT_ADAPTIVE_BASE_THRESHOLD: f32 = 0.68;

// --- Adaptive decision constants ---
const CONFIDENCE_MULTIPLIER_MIN: f32 = 0.8;
const CONFIDENCE_MULTIPLIER_MAX: f32 = 1.2;
const EUCLIDEAN_WEIGHT: f32 = 0.6;
const COSINE_WEIGHT: f32 = 0.4;
const STRONG_MIN_COSINE: f32 = 0.35;
const STRONG_MIN_COMBINED: f32 = 0.5;
const WEAK_MIN_CONFIDENCE: f32 = 0.7;
const WEAK_MIN_COMBINED: f32 = 0.45;
const WEAK_MIN_COSINE: f32 = 0.4;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DescriptorError {
    #[error("invalid descriptor: expected {expected} dimensions, got {actual}")]
    InvalidDescriptor { expected: usize, actual: usize },
    #[error("observation has no descriptor")]
    MissingDescriptor,
}

fn validate(e: &Embedding) -> Result<(), DescriptorError> {
    if e.is_valid() {
        Ok(())
    } else {
        Err(DescriptorError::InvalidDescriptor {
            expected: EMBEDDING_DIM,
            actual: e.len(),
        })
    }
}

/// Euclidean distance between two valid descriptors.
pub fn euclidean_distance(a: &Embedding, b: &Embedding) -> Result<f32, DescriptorError> {
    validate(a)?;
    validate(b)?;
    Ok(a.values
        .iter()
        .zip(b.values.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f32>()
        .sqrt())
}

/// Cosine similarity in [-1, 1] between two valid descriptors.
pub fn cosine_similarity(a: &Embedding, b: &Embedding) -> Result<f32, DescriptorError> {
    validate(a)?;
    validate(b)?;
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.values.iter().zip(b.values.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    Ok(if denom > 0.0 { dot / denom } else { 0.0 })
}

/// Outcome of comparing one candidate face against a profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub matched: bool,
    /// Match confidence in [0, 1].
    pub confidence: f32,
    /// Raw distance to the closest reference; lower is more similar.
    pub distance: f32,
    /// Reference observation that produced the best score.
    pub best_observation_id: Option<ObservationId>,
}

impl MatchResult {
    /// Zero-confidence non-match used for invalid input and empty galleries.
    pub fn rejected() -> Self {
        Self {
            matched: false,
            confidence: 0.0,
            distance: f32::INFINITY,
            best_observation_id: None,
        }
    }
}

/// One accepted reference descriptor with the context the matchers need.
#[derive(Debug, Clone)]
pub struct Reference {
    pub id: ObservationId,
    pub embedding: Embedding,
    pub confidence: f32,
    pub strategy: DetectionStrategy,
}

/// Immutable labelled descriptor set derived from a profile's observations.
///
/// Never patched: a profile mutation builds a fresh index.
#[derive(Debug, Clone)]
pub struct ReferenceIndex {
    label: String,
    references: Vec<Reference>,
}

impl ReferenceIndex {
    /// Build from observations; any invalid descriptor fails the whole build.
    pub fn build(
        label: impl Into<String>,
        observations: &[FaceObservation],
    ) -> Result<Self, DescriptorError> {
        let mut references = Vec::with_capacity(observations.len());
        for obs in observations {
            let embedding = obs.embedding.as_ref().ok_or(DescriptorError::MissingDescriptor)?;
            validate(embedding)?;
            references.push(Reference {
                id: obs.id,
                embedding: embedding.clone(),
                confidence: obs.detector_confidence,
                strategy: obs.strategy,
            });
        }
        Ok(Self { label: label.into(), references })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn references(&self) -> &[Reference] {
        &self.references
    }

    pub fn len(&self) -> usize {
        self.references.len()
    }

    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }
}

/// Strategy for comparing a candidate face against a reference index.
pub trait Matcher: Send + Sync {
    fn name(&self) -> &'static str;
    fn compare(&self, probe: &FaceObservation, index: &ReferenceIndex) -> MatchResult;
}

/// Which comparison strategy an engine uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    /// Nearest-neighbour Euclidean cutoff. Default for profile matching.
    #[default]
    Distance,
    /// Confidence- and method-scaled dual-metric test.
    Adaptive,
}

/// Nearest-neighbour matcher with a fixed Euclidean threshold.
#[derive(Debug, Clone, Copy)]
pub struct DistanceMatcher {
    pub threshold: f32,
}

impl Default for DistanceMatcher {
    fn default() -> Self {
        Self { threshold: DEFAULT_DISTANCE_THRESHOLD }
    }
}

impl Matcher for DistanceMatcher {
    fn name(&self) -> &'static str {
        "distance"
    }

    fn compare(&self, probe: &FaceObservation, index: &ReferenceIndex) -> MatchResult {
        let Some(embedding) = probe.valid_embedding() else {
            return MatchResult::rejected();
        };

        let mut best: Option<(f32, ObservationId)> = None;
        for reference in index.references() {
            let Ok(d) = euclidean_distance(embedding, &reference.embedding) else {
                continue;
            };
            if best.map_or(true, |(bd, _)| d < bd) {
                best = Some((d, reference.id));
            }
        }

        match best {
            None => MatchResult::rejected(),
            Some((distance, id)) => MatchResult {
                matched: distance <= self.threshold,
                confidence: (1.0 - distance).max(0.0),
                distance,
                best_observation_id: Some(id),
            },
        }
    }
}

/// Tier of an adaptive decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchTier {
    Strong,
    Weak,
    None,
}

/// Full diagnostics of one pairwise adaptive comparison.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PairwiseMatch {
    pub matched: bool,
    pub tier: MatchTier,
    pub distance: f32,
    /// `1 - distance`.
    pub similarity: f32,
    pub cosine: f32,
    /// `0.6 * similarity + 0.4 * cosine`.
    pub combined: f32,
    /// Threshold after confidence and reliability scaling.
    pub threshold: f32,
    pub confidence: f32,
}

impl PairwiseMatch {
    fn rejected() -> Self {
        Self {
            matched: false,
            tier: MatchTier::None,
            distance: f32::INFINITY,
            similarity: 0.0,
            cosine: 0.0,
            combined: 0.0,
            threshold: 0.0,
            confidence: 0.0,
        }
    }
}

/// Side of a pairwise comparison: descriptor plus detection context.
#[derive(Debug, Clone, Copy)]
pub struct FaceSample<'a> {
    pub embedding: Option<&'a Embedding>,
    pub confidence: f32,
    pub strategy: DetectionStrategy,
}

impl<'a> From<&'a FaceObservation> for FaceSample<'a> {
    fn from(obs: &'a FaceObservation) -> Self {
        Self {
            embedding: obs.embedding.as_ref(),
            confidence: obs.detector_confidence,
            strategy: obs.strategy,
        }
    }
}

impl<'a> From<&'a Reference> for FaceSample<'a> {
    fn from(r: &'a Reference) -> Self {
        Self {
            embedding: Some(&r.embedding),
            confidence: r.confidence,
            strategy: r.strategy,
        }
    }
}

/// Dual-metric matcher with a confidence- and method-scaled threshold.
#[derive(Debug, Clone, Copy)]
pub struct AdaptiveMatcher {
    pub base_threshold: f32,
}

impl Default for AdaptiveMatcher {
    fn default() -> Self {
        Self { base_threshold: DEFAULT_ADAPTIVE_BASE_THRESHOLD }
    }
}

impl AdaptiveMatcher {
    /// `base * clamp(avgConfidence, 0.8, 1.2) * sqrt(relA * relB)`.
    pub fn adjusted_threshold(&self, a: &FaceSample<'_>, b: &FaceSample<'_>) -> f32 {
        let avg_confidence = (a.confidence + b.confidence) / 2.0;
        let multiplier = avg_confidence.clamp(CONFIDENCE_MULTIPLIER_MIN, CONFIDENCE_MULTIPLIER_MAX);
        let reliability = (a.strategy.reliability() * b.strategy.reliability()).sqrt();
        self.base_threshold * multiplier * reliability
    }

    /// Compare exactly two faces.
    pub fn compare_pair(&self, a: &FaceSample<'_>, b: &FaceSample<'_>) -> PairwiseMatch {
        let (Some(ea), Some(eb)) = (a.embedding, b.embedding) else {
            return PairwiseMatch::rejected();
        };
        let (Ok(distance), Ok(cosine)) = (euclidean_distance(ea, eb), cosine_similarity(ea, eb))
        else {
            return PairwiseMatch::rejected();
        };

        let similarity = 1.0 - distance;
        let combined = EUCLIDEAN_WEIGHT * similarity + COSINE_WEIGHT * cosine;
        let threshold = self.adjusted_threshold(a, b);
        let avg_confidence = (a.confidence + b.confidence) / 2.0;
        let euclidean_ok = distance < threshold;

        let tier = if euclidean_ok && cosine > STRONG_MIN_COSINE && combined > STRONG_MIN_COMBINED {
            MatchTier::Strong
        } else if avg_confidence > WEAK_MIN_CONFIDENCE
            && (euclidean_ok || (combined > WEAK_MIN_COMBINED && cosine > WEAK_MIN_COSINE))
        {
            MatchTier::Weak
        } else {
            MatchTier::None
        };

        PairwiseMatch {
            matched: tier != MatchTier::None,
            tier,
            distance,
            similarity,
            cosine,
            combined,
            threshold,
            confidence: combined.clamp(0.0, 1.0),
        }
    }
}

impl Matcher for AdaptiveMatcher {
    fn name(&self) -> &'static str {
        "adaptive"
    }

    /// Best reference by distance, preferring matched pairs over unmatched.
    fn compare(&self, probe: &FaceObservation, index: &ReferenceIndex) -> MatchResult {
        if probe.valid_embedding().is_none() {
            return MatchResult::rejected();
        }
        let probe_sample = FaceSample::from(probe);

        let mut best: Option<(PairwiseMatch, ObservationId)> = None;
        for reference in index.references() {
            let pair = self.compare_pair(&probe_sample, &FaceSample::from(reference));
            if pair.tier == MatchTier::None && pair.distance.is_infinite() {
                continue;
            }
            let better = match &best {
                None => true,
                Some((prev, _)) => {
                    (pair.matched, -pair.distance) > (prev.matched, -prev.distance)
                }
            };
            if better {
                best = Some((pair, reference.id));
            }
        }

        match best {
            None => MatchResult::rejected(),
            Some((pair, id)) => MatchResult {
                matched: pair.matched,
                confidence: pair.confidence,
                distance: pair.distance,
                best_observation_id: Some(id),
            },
        }
    }
}

/// Build the matcher for a configured strategy.
pub fn matcher_for(
    strategy: MatchStrategy,
    distance_threshold: f32,
    adaptive_base_threshold: f32,
) -> Box<dyn Matcher> {
    match strategy {
        MatchStrategy::Distance => Box::new(DistanceMatcher { threshold: distance_threshold }),
        MatchStrategy::Adaptive => Box::new(AdaptiveMatcher { base_threshold: adaptive_base_threshold }),
    }
}
