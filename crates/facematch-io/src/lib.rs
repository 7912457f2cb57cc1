//! facematch-io — Image loading and detector adapters backed by the filesystem.
//!
//! Resolves opaque image references to decoded grayscale images with bounded
//! retry, and replays externally produced detections from sidecar files.

pub mod decoded;
pub mod loader;
pub mod sidecar;

pub use decoded::DecodedImage;
pub use loader::{FsImageLoader, ImageLoader, LoadError, RetryingLoader};
pub use sidecar::SidecarDetector;
