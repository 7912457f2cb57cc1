//! Image loading with bounded retry.

use crate::decoded::DecodedImage;
use facematch_core::ImageRef;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(50);

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("image not found: {0}")]
    NotFound(String),
    #[error("decode failed for {source_ref}: {reason}")]
    DecodeFailed { source_ref: String, reason: String },
    #[error("read failed for {source_ref}: {reason}")]
    Transient { source_ref: String, reason: String },
    #[error("giving up on {source_ref} after {attempts} attempts: {last}")]
    RetriesExhausted {
        source_ref: String,
        attempts: u32,
        last: Box<LoadError>,
    },
}

impl LoadError {
    /// Only transient read failures are worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, LoadError::Transient { .. })
    }
}

/// Resolves an image reference to decoded pixels.
pub trait ImageLoader: Send {
    fn load(&self, source: &ImageRef) -> Result<DecodedImage, LoadError>;
}

impl<L: ImageLoader + ?Sized> ImageLoader for Box<L> {
    fn load(&self, source: &ImageRef) -> Result<DecodedImage, LoadError> {
        (**self).load(source)
    }
}

/// Loads images from the local filesystem, optionally relative to a root.
///
/// Accepts plain paths and `file://` URLs.
#[derive(Debug, Clone, Default)]
pub struct FsImageLoader {
    root: Option<PathBuf>,
}

impl FsImageLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: Some(root.into()) }
    }

    /// Filesystem path for a reference.
    pub fn resolve(&self, source: &ImageRef) -> PathBuf {
        let raw = source.as_str();
        let raw = raw.strip_prefix("file://").unwrap_or(raw);
        let path = Path::new(raw);
        match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }
}

impl ImageLoader for FsImageLoader {
    fn load(&self, source: &ImageRef) -> Result<DecodedImage, LoadError> {
        let path = self.resolve(source);
        if !path.exists() {
            return Err(LoadError::NotFound(path.display().to_string()));
        }

        let decoded = image::open(&path).map_err(|e| match e {
            image::ImageError::IoError(io) => LoadError::Transient {
                source_ref: source.to_string(),
                reason: io.to_string(),
            },
            other => LoadError::DecodeFailed {
                source_ref: source.to_string(),
                reason: other.to_string(),
            },
        })?;

        let gray = decoded.to_luma8();
        let (width, height) = (gray.width(), gray.height());
        if width == 0 || height == 0 {
            return Err(LoadError::DecodeFailed {
                source_ref: source.to_string(),
                reason: "image has zero area".to_string(),
            });
        }

        tracing::debug!(source = %source, width, height, "image decoded");

        Ok(DecodedImage {
            source: source.clone(),
            data: gray.into_raw(),
            width,
            height,
        })
    }
}

/// Wraps a loader with a fixed retry policy for transient failures.
pub struct RetryingLoader<L> {
    inner: L,
    max_attempts: u32,
    delay: Duration,
}

impl<L: ImageLoader> RetryingLoader<L> {
    pub fn new(inner: L) -> Self {
        Self {
            inner,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: DEFAULT_RETRY_DELAY,
        }
    }

    pub fn with_policy(inner: L, max_attempts: u32, delay: Duration) -> Self {
        Self {
            inner,
            max_attempts: max_attempts.max(1),
            delay,
        }
    }
}

impl<L: ImageLoader> ImageLoader for RetryingLoader<L> {
    fn load(&self, source: &ImageRef) -> Result<DecodedImage, LoadError> {
        let mut attempt = 1;
        loop {
            match self.inner.load(source) {
                Ok(img) => return Ok(img),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) if attempt >= self.max_attempts => {
                    return Err(LoadError::RetriesExhausted {
                        source_ref: source.to_string(),
                        attempts: attempt,
                        last: Box::new(e),
                    });
                }
                Err(e) => {
                    tracing::warn!(source = %source, attempt, error = %e, "image load failed; retrying");
                    std::thread::sleep(self.delay);
                    attempt += 1;
                }
            }
        }
    }
}
