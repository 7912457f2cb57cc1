//! Detector adapter that replays detections exported by an external model.
//!
//! For an image `photos/a.jpg` the detections live in `photos/a.jpg.faces.json`,
//! either keyed by strategy:
//!
//! ```json
//! { "ssd_high_accuracy": [], "tiny_large": [{ "box": {...}, "confidence": 0.8, ... }] }
//! ```
//!
//! or as a flat list that answers every strategy.

use crate::loader::FsImageLoader;
use facematch_core::detector::{DetectionStrategy, DetectorError, FaceDetector};
use facematch_core::{ImageRef, ImageView, RawFace};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

pub const SIDECAR_SUFFIX: &str = ".faces.json";

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum SidecarFile {
    ByStrategy(HashMap<DetectionStrategy, Vec<RawFace>>),
    Flat(Vec<RawFace>),
}

impl SidecarFile {
    fn faces_for(&self, strategy: DetectionStrategy) -> Option<&[RawFace]> {
        match self {
            SidecarFile::ByStrategy(map) => map.get(&strategy).map(Vec::as_slice),
            SidecarFile::Flat(faces) => Some(faces),
        }
    }
}

/// Reads `<image>.faces.json` next to each image.
pub struct SidecarDetector {
    resolver: FsImageLoader,
    /// Last parsed sidecar; the fallback chain queries one image several times.
    cache: Option<(ImageRef, SidecarFile)>,
}

impl SidecarDetector {
    pub fn new(resolver: FsImageLoader) -> Self {
        Self { resolver, cache: None }
    }

    pub fn sidecar_path(&self, source: &ImageRef) -> PathBuf {
        let mut path = self.resolver.resolve(source).into_os_string();
        path.push(SIDECAR_SUFFIX);
        PathBuf::from(path)
    }

    fn sidecar(&mut self, source: &ImageRef) -> Result<&SidecarFile, DetectorError> {
        let cached = matches!(&self.cache, Some((r, _)) if r == source);
        if !cached {
            let path = self.sidecar_path(source);
            let text = std::fs::read_to_string(&path).map_err(|e| {
                DetectorError::Failed(format!("reading {}: {e}", path.display()))
            })?;
            let file: SidecarFile = serde_json::from_str(&text).map_err(|e| {
                DetectorError::Failed(format!("parsing {}: {e}", path.display()))
            })?;
            self.cache = Some((source.clone(), file));
        }
        match &self.cache {
            Some((_, file)) => Ok(file),
            None => Err(DetectorError::Failed(format!("no sidecar cached for {source}"))),
        }
    }
}

impl FaceDetector for SidecarDetector {
    fn detect(
        &mut self,
        image: ImageView<'_>,
        strategy: DetectionStrategy,
    ) -> Result<Vec<RawFace>, DetectorError> {
        let file = self.sidecar(image.source)?;
        match file.faces_for(strategy) {
            Some(faces) => Ok(faces.to_vec()),
            None => Err(DetectorError::UnsupportedStrategy(strategy)),
        }
    }
}
