//! In-memory detector and loader fakes for engine tests.

use facematch_core::{DetectionStrategy, DetectorError, FaceDetector, ImageRef, ImageView, RawFace};
use facematch_io::{DecodedImage, ImageLoader, LoadError};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Shared record of every detector call, in call order.
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    fn push(&self, source: &ImageRef) {
        self.0.lock().unwrap().push(source.to_string());
    }

    /// One entry per detector call.
    pub fn images(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn distinct(&self) -> HashSet<String> {
        self.images().into_iter().collect()
    }
}

/// Answers the first strategy with canned faces per image; unknown images have none.
pub struct ScriptedDetector {
    faces: HashMap<String, Vec<RawFace>>,
    failing: HashSet<String>,
    /// Detector calls left to fail per image before it starts answering.
    flaky: HashMap<String, usize>,
    cancel_after: Option<(String, CancellationToken)>,
    calls: CallLog,
}

impl ScriptedDetector {
    pub fn new() -> Self {
        Self {
            faces: HashMap::new(),
            failing: HashSet::new(),
            flaky: HashMap::new(),
            cancel_after: None,
            calls: CallLog::default(),
        }
    }

    pub fn with_faces(mut self, image: &str, faces: Vec<RawFace>) -> Self {
        self.faces.insert(image.to_string(), faces);
        self
    }

    pub fn with_failure(mut self, image: &str) -> Self {
        self.failing.insert(image.to_string());
        self
    }

    /// Fail the first `calls` detector calls for `image`, then answer normally.
    pub fn with_transient_failure(mut self, image: &str, calls: usize) -> Self {
        self.flaky.insert(image.to_string(), calls);
        self
    }

    /// Cancel `token` while detecting `image`, as a user pressing stop mid-batch.
    pub fn cancelling_at(mut self, image: &str, token: CancellationToken) -> Self {
        self.cancel_after = Some((image.to_string(), token));
        self
    }

    pub fn calls(&self) -> CallLog {
        self.calls.clone()
    }
}

impl FaceDetector for ScriptedDetector {
    fn detect(
        &mut self,
        image: ImageView<'_>,
        strategy: DetectionStrategy,
    ) -> Result<Vec<RawFace>, DetectorError> {
        self.calls.push(image.source);
        let key = image.source.as_str();

        if let Some((at, token)) = &self.cancel_after {
            if at == key {
                token.cancel();
            }
        }
        if let Some(left) = self.flaky.get_mut(key).filter(|left| **left > 0) {
            *left -= 1;
            return Err(DetectorError::Failed(format!("transient failure for {key}")));
        }
        if self.failing.contains(key) {
            return Err(DetectorError::Failed(format!("scripted failure for {key}")));
        }
        if strategy != DetectionStrategy::SsdHighAccuracy {
            return Ok(Vec::new());
        }
        Ok(self.faces.get(key).cloned().unwrap_or_default())
    }
}

/// Decodes every reference to a small mid-grey image unless marked missing.
#[derive(Default)]
pub struct StubLoader {
    missing: HashSet<String>,
}

impl StubLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_missing(mut self, image: &str) -> Self {
        self.missing.insert(image.to_string());
        self
    }
}

impl ImageLoader for StubLoader {
    fn load(&self, source: &ImageRef) -> Result<DecodedImage, LoadError> {
        if self.missing.contains(source.as_str()) {
            return Err(LoadError::NotFound(source.to_string()));
        }
        Ok(DecodedImage {
            source: source.clone(),
            data: vec![128; 16],
            width: 4,
            height: 4,
        })
    }
}
