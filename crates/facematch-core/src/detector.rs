//! Detector adapter seam and multi-strategy fallback.
//!
//! The neural detector itself lives outside this crate. Adapters implement
//! [`FaceDetector`] for one or more [`DetectionStrategy`] variants;
//! [`FallbackDetector`] walks the configured strategies from most to least
//! accurate until one of them finds a face.

use crate::types::{ImageView, RawFace};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Default cap on faces returned per image.
pub const DEFAULT_MAX_FACES_PER_IMAGE: usize = 15;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("detection failed: {0}")]
    Failed(String),
    #[error("strategy {0} not supported by this detector")]
    UnsupportedStrategy(DetectionStrategy),
    #[error("unknown detection strategy: {0}")]
    UnknownStrategy(String),
}

/// Detection method, ordered from most to least accurate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionStrategy {
    SsdHighAccuracy,
    SsdStandard,
    TinyLarge,
    TinyStandard,
    TinyFast,
}

impl DetectionStrategy {
    /// Every strategy in default fallback order.
    pub const ALL: [DetectionStrategy; 5] = [
        DetectionStrategy::SsdHighAccuracy,
        DetectionStrategy::SsdStandard,
        DetectionStrategy::TinyLarge,
        DetectionStrategy::TinyStandard,
        DetectionStrategy::TinyFast,
    ];

    /// How far a match produced by this method can be trusted, in [0.6, 1.0].
    pub fn reliability(self) -> f32 {
        match self {
            DetectionStrategy::SsdHighAccuracy => 1.0,
            DetectionStrategy::SsdStandard => 0.9,
            DetectionStrategy::TinyLarge => 0.8,
            DetectionStrategy::TinyStandard => 0.7,
            DetectionStrategy::TinyFast => 0.6,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DetectionStrategy::SsdHighAccuracy => "ssd_high_accuracy",
            DetectionStrategy::SsdStandard => "ssd_standard",
            DetectionStrategy::TinyLarge => "tiny_large",
            DetectionStrategy::TinyStandard => "tiny_standard",
            DetectionStrategy::TinyFast => "tiny_fast",
        }
    }
}

impl fmt::Display for DetectionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DetectionStrategy {
    type Err = DetectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| DetectorError::UnknownStrategy(s.to_string()))
    }
}

/// External face detector + embedding extractor.
///
/// Implementations may be stateful (loaded models, GPU contexts) and are
/// never invoked concurrently.
pub trait FaceDetector: Send {
    fn detect(
        &mut self,
        image: ImageView<'_>,
        strategy: DetectionStrategy,
    ) -> Result<Vec<RawFace>, DetectorError>;
}

impl<D: FaceDetector + ?Sized> FaceDetector for Box<D> {
    fn detect(
        &mut self,
        image: ImageView<'_>,
        strategy: DetectionStrategy,
    ) -> Result<Vec<RawFace>, DetectorError> {
        (**self).detect(image, strategy)
    }
}

/// Faces found in one image and the strategy that found them.
#[derive(Debug, Clone)]
pub struct Detection {
    pub strategy: DetectionStrategy,
    /// Sorted by detector confidence, highest first.
    pub faces: Vec<RawFace>,
}

/// Tries strategies in order, returning the first non-empty result.
pub struct FallbackDetector<D> {
    inner: D,
    strategies: Vec<DetectionStrategy>,
    max_faces: usize,
}

impl<D: FaceDetector> FallbackDetector<D> {
    pub fn new(inner: D) -> Self {
        Self {
            inner,
            strategies: DetectionStrategy::ALL.to_vec(),
            max_faces: DEFAULT_MAX_FACES_PER_IMAGE,
        }
    }

    pub fn with_strategies(mut self, strategies: Vec<DetectionStrategy>) -> Self {
        if !strategies.is_empty() {
            self.strategies = strategies;
        }
        self
    }

    pub fn with_max_faces(mut self, max_faces: usize) -> Self {
        self.max_faces = max_faces.max(1);
        self
    }

    pub fn strategies(&self) -> &[DetectionStrategy] {
        &self.strategies
    }

    /// Run the fallback chain.
    ///
    /// Errors from individual strategies are skipped; the call only fails
    /// when every strategy errored. When all strategies succeed without a
    /// face, returns an empty detection tagged with the last strategy.
    pub fn detect(&mut self, image: ImageView<'_>) -> Result<Detection, DetectorError> {
        let mut last_error = None;
        let mut any_ok = false;

        for &strategy in &self.strategies {
            match self.inner.detect(image, strategy) {
                Ok(faces) if !faces.is_empty() => {
                    let faces = cap_faces(faces, self.max_faces);
                    tracing::debug!(
                        source = %image.source,
                        strategy = strategy.as_str(),
                        faces = faces.len(),
                        "faces detected"
                    );
                    return Ok(Detection { strategy, faces });
                }
                Ok(_) => {
                    any_ok = true;
                    tracing::debug!(source = %image.source, strategy = strategy.as_str(), "no face, falling back");
                }
                Err(DetectorError::UnsupportedStrategy(_)) => {}
                Err(e) => {
                    tracing::debug!(source = %image.source, strategy = strategy.as_str(), error = %e, "strategy failed");
                    last_error = Some(e);
                }
            }
        }

        match (any_ok, last_error) {
            (false, Some(e)) => Err(e),
            (false, None) => Err(DetectorError::Failed(format!(
                "no configured strategy is supported for {}",
                image.source
            ))),
            (true, _) => Ok(Detection {
                strategy: *self.strategies.last().unwrap_or(&DetectionStrategy::TinyFast),
                faces: Vec::new(),
            }),
        }
    }
}

/// Keep the `max` most confident faces.
fn cap_faces(mut faces: Vec<RawFace>, max: usize) -> Vec<RawFace> {
    faces.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    faces.truncate(max);
    faces
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{seeded_embedding, strong_face};
    use crate::types::ImageRef;
    use std::collections::HashMap;

    /// Returns canned results per strategy and records every call.
    struct Scripted {
        results: HashMap<DetectionStrategy, Result<usize, String>>,
        calls: Vec<DetectionStrategy>,
    }

    impl FaceDetector for Scripted {
        fn detect(
            &mut self,
            _image: ImageView<'_>,
            strategy: DetectionStrategy,
        ) -> Result<Vec<RawFace>, DetectorError> {
            self.calls.push(strategy);
            match self.results.get(&strategy) {
                None => Err(DetectorError::UnsupportedStrategy(strategy)),
                Some(Err(msg)) => Err(DetectorError::Failed(msg.clone())),
                Some(Ok(n)) => Ok((0..*n)
                    .map(|i| {
                        let mut f = strong_face(seeded_embedding(i as u64));
                        f.confidence = 0.5 + 0.01 * i as f32;
                        f
                    })
                    .collect()),
            }
        }
    }

    fn view(source: &ImageRef) -> ImageView<'_> {
        ImageView { source, data: &[], width: 0, height: 0 }
    }

    #[test]
    fn test_reliability_range() {
        for s in DetectionStrategy::ALL {
            let r = s.reliability();
            assert!((0.6..=1.0).contains(&r), "{s}: {r}");
        }
    }

    #[test]
    fn test_strategy_parse_roundtrip() {
        for s in DetectionStrategy::ALL {
            assert_eq!(s.as_str().parse::<DetectionStrategy>().unwrap(), s);
        }
        assert!("mtcnn".parse::<DetectionStrategy>().is_err());
    }

    #[test]
    fn test_fallback_stops_at_first_hit() {
        let src = ImageRef::new("a.jpg");
        let scripted = Scripted {
            results: HashMap::from([
                (DetectionStrategy::SsdHighAccuracy, Ok(0)),
                (DetectionStrategy::SsdStandard, Err("oom".into())),
                (DetectionStrategy::TinyLarge, Ok(2)),
                (DetectionStrategy::TinyFast, Ok(3)),
            ]),
            calls: Vec::new(),
        };
        let mut det = FallbackDetector::new(scripted);
        let result = det.detect(view(&src)).unwrap();
        assert_eq!(result.strategy, DetectionStrategy::TinyLarge);
        assert_eq!(result.faces.len(), 2);
        assert_eq!(
            det.inner.calls,
            vec![
                DetectionStrategy::SsdHighAccuracy,
                DetectionStrategy::SsdStandard,
                DetectionStrategy::TinyLarge
            ]
        );
    }

    #[test]
    fn test_fallback_caps_and_sorts_by_confidence() {
        let src = ImageRef::new("crowd.jpg");
        let scripted = Scripted {
            results: HashMap::from([(DetectionStrategy::SsdHighAccuracy, Ok(20))]),
            calls: Vec::new(),
        };
        let mut det = FallbackDetector::new(scripted);
        let result = det.detect(view(&src)).unwrap();
        assert_eq!(result.faces.len(), DEFAULT_MAX_FACES_PER_IMAGE);
        assert!(result
            .faces
            .windows(2)
            .all(|w| w[0].confidence >= w[1].confidence));
    }

    #[test]
    fn test_fallback_empty_when_nothing_found() {
        let src = ImageRef::new("empty.jpg");
        let scripted = Scripted {
            results: HashMap::from([
                (DetectionStrategy::SsdHighAccuracy, Ok(0)),
                (DetectionStrategy::TinyFast, Err("timeout".into())),
            ]),
            calls: Vec::new(),
        };
        let mut det = FallbackDetector::new(scripted);
        let result = det.detect(view(&src)).unwrap();
        assert!(result.faces.is_empty());
    }

    #[test]
    fn test_fallback_errors_when_every_strategy_fails() {
        let src = ImageRef::new("broken.jpg");
        let scripted = Scripted {
            results: HashMap::from([(DetectionStrategy::SsdStandard, Err("decode".into()))]),
            calls: Vec::new(),
        };
        let mut det = FallbackDetector::new(scripted)
            .with_strategies(vec![DetectionStrategy::SsdStandard, DetectionStrategy::TinyFast]);
        let err = det.detect(view(&src)).unwrap_err();
        assert!(matches!(err, DetectorError::Failed(msg) if msg == "decode"));
    }
}
