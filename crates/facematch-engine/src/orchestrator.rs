//! Batch matching: one photo collection against one profile.
//!
//! Photos are processed one at a time through the detector worker. The
//! cancellation token is sampled before each photo and while a progress send
//! waits on a full sink. The loop yields to the runtime between photos so a
//! batch never monopolizes a worker thread.

use facematch_core::comparator::FaceSample;
use facematch_core::{
    comparator, AdaptiveMatcher, FaceObservation, ImageRef, MatchResult, MatchStrategy, Matcher,
    PairwiseMatch, QualityAssessor,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;

use crate::config::{BatchConfig, MatcherConfig};
use crate::error::EngineError;
use crate::profile::{FaceProfile, SharedThreshold};
use crate::progress::{eta_ms, BatchState, ProgressEvent, ProgressSink};
use crate::store::ProfileStore;
use crate::worker::DetectorHandle;

/// One photo of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Photo {
    pub id: String,
    pub source: ImageRef,
}

impl Photo {
    pub fn new(id: impl Into<String>, source: impl Into<ImageRef>) -> Self {
        Self { id: id.into(), source: source.into() }
    }
}

impl From<ImageRef> for Photo {
    fn from(source: ImageRef) -> Self {
        Self { id: source.to_string(), source }
    }
}

/// Best result for one photo.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhotoMatch {
    pub photo_id: String,
    pub source: ImageRef,
    #[serde(flatten)]
    pub result: MatchResult,
}

/// How a batch ended. Cancellation carries no partial results.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutcome {
    /// Per-photo results, highest confidence first.
    Completed(Vec<PhotoMatch>),
    Cancelled,
}

impl BatchOutcome {
    pub fn matches(&self) -> &[PhotoMatch] {
        match self {
            BatchOutcome::Completed(m) => m,
            BatchOutcome::Cancelled => &[],
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, BatchOutcome::Cancelled)
    }
}

pub struct BatchMatcher {
    detector: DetectorHandle,
    store: Arc<ProfileStore>,
    assessor: QualityAssessor,
    strategy: MatchStrategy,
    adaptive_base: f32,
    /// Shared with the store, which records it in rebuilt profiles.
    threshold: SharedThreshold,
    batch: BatchConfig,
    state: watch::Sender<BatchState>,
    /// Batches run one at a time.
    running: Mutex<()>,
}

impl BatchMatcher {
    pub fn new(
        detector: DetectorHandle,
        store: Arc<ProfileStore>,
        assessor: QualityAssessor,
        matcher: &MatcherConfig,
        batch: BatchConfig,
    ) -> Self {
        let (state, _) = watch::channel(BatchState::Idle);
        let threshold = store.threshold();
        threshold.set(matcher.distance_threshold);
        Self {
            detector,
            store,
            assessor,
            strategy: matcher.strategy,
            adaptive_base: matcher.adaptive_base_threshold,
            threshold,
            batch,
            state,
            running: Mutex::new(()),
        }
    }

    pub fn distance_threshold(&self) -> f32 {
        self.threshold.get()
    }

    /// Takes effect from the next batch and the next profile rebuild.
    pub fn set_distance_threshold(&self, threshold: f32) {
        self.threshold.set(threshold);
        tracing::info!(threshold, "distance threshold updated");
    }

    pub fn state(&self) -> BatchState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<BatchState> {
        self.state.subscribe()
    }

    /// Match every photo against `owner_id`'s profile.
    ///
    /// Per-photo detection failures are logged, counted in the summary and
    /// skipped. Only a missing profile or a dead detector worker fails the
    /// batch.
    pub async fn match_all(
        &self,
        photos: &[Photo],
        owner_id: &str,
        progress: Option<&ProgressSink>,
        cancel: &CancellationToken,
    ) -> Result<BatchOutcome, EngineError> {
        let _run = self.running.lock().await;
        self.set_state(BatchState::Initializing);

        let Some(profile) = self.store.get_profile(owner_id).await else {
            let err = EngineError::ProfileNotFound(owner_id.to_string());
            self.fail(progress, &err, cancel).await;
            return Err(err);
        };

        let total = photos.len();
        tracing::info!(
            owner = owner_id,
            reference_faces = profile.face_count(),
            photos = total,
            "batch started"
        );
        let delivered = emit(
            progress,
            ProgressEvent::Initializing {
                owner_id: owner_id.to_string(),
                reference_faces: profile.face_count(),
                total_photos: total,
            },
            cancel,
        )
        .await;
        if !delivered {
            return Ok(self.cancelled(owner_id, 0, total, progress, cancel).await);
        }

        let threshold = self.distance_threshold();
        let matcher = comparator::matcher_for(self.strategy, threshold, self.adaptive_base);
        self.set_state(BatchState::Processing);

        let started = Instant::now();
        let mut results: Vec<PhotoMatch> = Vec::new();
        let mut failed = 0usize;

        for (i, photo) in photos.iter().enumerate() {
            if cancel.is_cancelled() {
                return Ok(self.cancelled(owner_id, i, total, progress, cancel).await);
            }

            let delivered = emit(
                progress,
                ProgressEvent::Processing {
                    current: i + 1,
                    total,
                    photo_id: photo.id.clone(),
                    eta_ms: eta_ms(elapsed_ms(started), i, total),
                },
                cancel,
            )
            .await;
            if !delivered {
                return Ok(self.cancelled(owner_id, i, total, progress, cancel).await);
            }

            match self.best_match(photo, &profile, matcher.as_ref()).await {
                Ok(Some(result)) => {
                    tracing::debug!(
                        photo = %photo.id,
                        matched = result.matched,
                        distance = result.distance,
                        confidence = result.confidence,
                        "photo compared"
                    );
                    if result.matched {
                        let delivered = emit(
                            progress,
                            ProgressEvent::MatchFound {
                                photo_id: photo.id.clone(),
                                confidence: result.confidence,
                                distance: result.distance,
                            },
                            cancel,
                        )
                        .await;
                        if !delivered {
                            return Ok(self.cancelled(owner_id, i + 1, total, progress, cancel).await);
                        }
                    }
                    if result.matched || self.batch.include_non_matches {
                        results.push(PhotoMatch {
                            photo_id: photo.id.clone(),
                            source: photo.source.clone(),
                            result,
                        });
                    }
                }
                Ok(None) => tracing::debug!(photo = %photo.id, "no qualifying face"),
                Err(EngineError::WorkerClosed) => {
                    self.fail(progress, &EngineError::WorkerClosed, cancel).await;
                    return Err(EngineError::WorkerClosed);
                }
                Err(e) => {
                    failed += 1;
                    tracing::warn!(photo = %photo.id, error = %e, "photo skipped");
                }
            }

            self.throttle(i, cancel).await;
        }

        results.sort_by(|a, b| {
            b.result
                .confidence
                .partial_cmp(&a.result.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let matched: Vec<f32> = results
            .iter()
            .filter(|m| m.result.matched)
            .map(|m| m.result.confidence)
            .collect();
        let average_confidence = if matched.is_empty() {
            0.0
        } else {
            matched.iter().sum::<f32>() / matched.len() as f32
        };
        let elapsed = elapsed_ms(started);

        tracing::info!(
            owner = owner_id,
            matches = matched.len(),
            average_confidence,
            failed,
            elapsed_ms = elapsed,
            "batch completed"
        );
        self.set_state(BatchState::Completed);
        emit(
            progress,
            ProgressEvent::Completed {
                total_matches: matched.len(),
                average_confidence,
                elapsed_ms: elapsed,
                failed_photos: failed,
            },
            cancel,
        )
        .await;

        Ok(BatchOutcome::Completed(results))
    }

    /// Compare the best faces of two images with the adaptive matcher.
    pub async fn compare_images(
        &self,
        a: &ImageRef,
        b: &ImageRef,
    ) -> Result<PairwiseMatch, EngineError> {
        let first = self.best_face(a).await?;
        let second = self.best_face(b).await?;
        let matcher = AdaptiveMatcher { base_threshold: self.adaptive_base };
        let pair = matcher.compare_pair(&FaceSample::from(&first), &FaceSample::from(&second));
        tracing::debug!(
            a = %a,
            b = %b,
            matched = pair.matched,
            tier = ?pair.tier,
            distance = pair.distance,
            "pairwise comparison"
        );
        Ok(pair)
    }

    /// Every face detected in `image` with its quality assessment.
    pub async fn assess_image(&self, image: &ImageRef) -> Result<Vec<FaceObservation>, EngineError> {
        let detection = self.detector.detect(image.clone()).await?;
        Ok(detection
            .faces
            .into_iter()
            .map(|face| self.assessor.observe(face, detection.strategy, image))
            .collect())
    }

    async fn best_face(&self, image: &ImageRef) -> Result<FaceObservation, EngineError> {
        let detection = self.detector.detect(image.clone()).await?;
        self.assessor
            .best_accepted(detection.faces, detection.strategy, image)
            .ok_or_else(|| EngineError::NoAcceptedFace(image.to_string()))
    }

    /// Lowest-distance result over the photo's accepted faces, preferring matches.
    async fn best_match(
        &self,
        photo: &Photo,
        profile: &FaceProfile,
        matcher: &dyn Matcher,
    ) -> Result<Option<MatchResult>, EngineError> {
        let detection = self.detector.detect(photo.source.clone()).await?;

        let mut best: Option<MatchResult> = None;
        for face in detection.faces {
            let observation = self.assessor.observe(face, detection.strategy, &photo.source);
            if !observation.accepted() {
                continue;
            }
            let result = matcher.compare(&observation, profile.index());
            let better = match &best {
                None => true,
                Some(prev) => {
                    (result.matched && !prev.matched)
                        || (result.matched == prev.matched && result.distance < prev.distance)
                }
            };
            if better {
                best = Some(result);
            }
        }
        Ok(best)
    }

    async fn throttle(&self, index: usize, cancel: &CancellationToken) {
        let every = self.batch.yield_every;
        if every > 0 && (index + 1) % every == 0 {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(self.batch.yield_delay()) => {}
            }
        } else {
            tokio::task::yield_now().await;
        }
    }

    async fn cancelled(
        &self,
        owner_id: &str,
        processed: usize,
        total: usize,
        progress: Option<&ProgressSink>,
        cancel: &CancellationToken,
    ) -> BatchOutcome {
        tracing::info!(owner = owner_id, processed, total, "batch cancelled");
        self.set_state(BatchState::Cancelled);
        emit(progress, ProgressEvent::Cancelled { processed, total }, cancel).await;
        BatchOutcome::Cancelled
    }

    async fn fail(&self, progress: Option<&ProgressSink>, err: &EngineError, cancel: &CancellationToken) {
        tracing::warn!(error = %err, "batch failed");
        self.set_state(BatchState::Failed);
        emit(progress, ProgressEvent::Failed { reason: err.to_string() }, cancel).await;
    }

    fn set_state(&self, state: BatchState) {
        self.state.send_replace(state);
    }
}

/// Send `event`, waiting for room in the sink unless `cancel` fires first.
/// Returns false only when cancellation cut the wait short; the event is
/// dropped in that case.
async fn emit(progress: Option<&ProgressSink>, event: ProgressEvent, cancel: &CancellationToken) -> bool {
    let Some(tx) = progress else {
        return true;
    };
    tokio::select! {
        biased;
        // A caller that stopped listening does not stop the batch.
        _ = tx.send(event) => true,
        _ = cancel.cancelled() => false,
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
