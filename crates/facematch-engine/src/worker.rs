//! Detector worker: owns the detector and image loader on one OS thread.
//!
//! The detector is stateful and not safe to call concurrently, so every
//! detection in the process goes through this single queue.

use facematch_core::detector::Detection;
use facematch_core::{FaceDetector, FallbackDetector, ImageRef};
use facematch_io::{ImageLoader, RetryingLoader};
use tokio::sync::{mpsc, oneshot};

use crate::config::EngineConfig;
use crate::error::EngineError;

enum WorkerRequest {
    Detect {
        source: ImageRef,
        reply: oneshot::Sender<Result<Detection, EngineError>>,
    },
}

/// Clone-safe handle to the detector worker.
#[derive(Clone)]
pub struct DetectorHandle {
    tx: mpsc::Sender<WorkerRequest>,
}

impl DetectorHandle {
    /// Load `source` and run the detection fallback chain on it.
    ///
    /// Load and detector failures come back as [`EngineError::Detection`];
    /// a dead worker as [`EngineError::WorkerClosed`].
    pub async fn detect(&self, source: ImageRef) -> Result<Detection, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(WorkerRequest::Detect {
                source,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::WorkerClosed)?;
        reply_rx.await.map_err(|_| EngineError::WorkerClosed)?
    }
}

/// Spawn the worker on a dedicated thread.
///
/// The thread exits once every [`DetectorHandle`] has been dropped.
pub fn spawn_worker<D, L>(
    detector: D,
    loader: L,
    config: &EngineConfig,
) -> Result<DetectorHandle, EngineError>
where
    D: FaceDetector + 'static,
    L: ImageLoader + 'static,
{
    let mut detector = FallbackDetector::new(detector)
        .with_strategies(config.detector.strategies.clone())
        .with_max_faces(config.detector.max_faces_per_image);
    let loader = RetryingLoader::with_policy(
        loader,
        config.loader.max_attempts,
        config.loader.retry_delay(),
    );

    tracing::info!(
        strategies = ?detector.strategies(),
        max_faces = config.detector.max_faces_per_image,
        load_attempts = config.loader.max_attempts,
        "detector configured"
    );

    let (tx, mut rx) = mpsc::channel::<WorkerRequest>(config.detector.queue_depth.max(1));

    std::thread::Builder::new()
        .name("facematch-detector".into())
        .spawn(move || {
            tracing::info!("detector thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    WorkerRequest::Detect { source, reply } => {
                        let result = run_detect(&mut detector, &loader, &source);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("detector thread exiting");
        })?;

    Ok(DetectorHandle { tx })
}

fn run_detect<D: FaceDetector, L: ImageLoader>(
    detector: &mut FallbackDetector<D>,
    loader: &RetryingLoader<L>,
    source: &ImageRef,
) -> Result<Detection, EngineError> {
    let image = loader.load(source).map_err(|e| EngineError::Detection {
        source_ref: source.to_string(),
        reason: e.to_string(),
    })?;

    if image.is_dark() {
        tracing::debug!(source = %source, brightness = image.avg_brightness(), "image is mostly dark");
    }

    detector.detect(image.view()).map_err(|e| EngineError::Detection {
        source_ref: source.to_string(),
        reason: e.to_string(),
    })
}
