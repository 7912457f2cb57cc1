use facematch_core::DescriptorError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("insufficient faces: found {found} usable, need at least {required}")]
    InsufficientFaces { found: usize, required: usize },
    #[error("removal would leave {remaining} observations, need at least {required}")]
    WouldInvalidateProfile { remaining: usize, required: usize },
    #[error("no profile for owner {0}")]
    ProfileNotFound(String),
    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(#[from] DescriptorError),
    #[error("no usable face in {0}")]
    NoAcceptedFace(String),
    #[error("detection failed for {source_ref}: {reason}")]
    Detection { source_ref: String, reason: String },
    #[error("persistence: {0}")]
    Persistence(String),
    #[error("config: {0}")]
    Config(String),
    #[error("failed to spawn detector worker: {0}")]
    WorkerSpawn(#[from] std::io::Error),
    #[error("detector worker exited")]
    WorkerClosed,
}

impl From<tokio_rusqlite::Error> for EngineError {
    fn from(e: tokio_rusqlite::Error) -> Self {
        EngineError::Persistence(e.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Persistence(format!("metadata encoding: {e}"))
    }
}
