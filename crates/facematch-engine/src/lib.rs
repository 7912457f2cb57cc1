//! facematch-engine — Profile store and batch matching on top of a detector.
//!
//! [`Engine::start`] spawns the detector worker and wires the
//! [`ProfileStore`] and [`BatchMatcher`] around it. Both share the one
//! worker, so the detector never runs concurrently.

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod persistence;
pub mod profile;
pub mod progress;
pub mod store;
pub mod worker;

#[cfg(test)]
mod testing;

pub use config::EngineConfig;
pub use error::EngineError;
pub use orchestrator::{BatchMatcher, BatchOutcome, Photo, PhotoMatch};
pub use persistence::ProfileRecords;
pub use profile::{
    FaceProfile, MatchSettings, ProfileMetadata, ProfileObservation, SharedThreshold, MIN_OBSERVATIONS,
};
pub use progress::{BatchState, ProgressEvent, ProgressSink};
pub use store::ProfileStore;
pub use worker::{spawn_worker, DetectorHandle};

use facematch_core::{FaceDetector, QualityAssessor};
use facematch_io::ImageLoader;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Composition root: one detector worker, one store, one batch matcher.
pub struct Engine {
    pub store: Arc<ProfileStore>,
    pub matcher: BatchMatcher,
    config: EngineConfig,
}

impl Engine {
    pub fn start<D, L>(detector: D, loader: L, config: EngineConfig) -> Result<Self, EngineError>
    where
        D: FaceDetector + 'static,
        L: ImageLoader + 'static,
    {
        let handle = spawn_worker(detector, loader, &config)?;
        let assessor = QualityAssessor::new(config.quality);
        let settings = MatchSettings {
            strategy: config.matcher.strategy,
            threshold: config.matcher.distance_threshold,
        };
        let store = Arc::new(ProfileStore::new(handle.clone(), assessor.clone(), settings));
        let matcher = BatchMatcher::new(
            handle,
            store.clone(),
            assessor,
            &config.matcher,
            config.batch.clone(),
        );
        tracing::info!(
            strategy = ?config.matcher.strategy,
            threshold = config.matcher.distance_threshold,
            min_quality = config.quality.min_quality,
            "engine started"
        );
        Ok(Self { store, matcher, config })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Progress channel sized by `batch.progress_buffer`.
    pub fn progress_channel(&self) -> (ProgressSink, mpsc::Receiver<ProgressEvent>) {
        mpsc::channel(self.config.batch.progress_buffer.max(1))
    }
}
