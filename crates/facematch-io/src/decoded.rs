//! Decoded image type and pixel statistics.

use facematch_core::{ImageRef, ImageView};

/// Fraction of near-black pixels above which an image counts as dark.
const DARK_THRESHOLD_PCT: f32 = 0.95;

/// A decoded grayscale image.
#[derive(Clone)]
pub struct DecodedImage {
    pub source: ImageRef,
    /// Grayscale pixel data (width * height bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl DecodedImage {
    /// Borrow as the view detectors consume.
    pub fn view(&self) -> ImageView<'_> {
        ImageView {
            source: &self.source,
            data: &self.data,
            width: self.width,
            height: self.height,
        }
    }

    /// Average pixel brightness (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().map(|&b| b as f32).sum::<f32>() / self.data.len() as f32
    }

    /// Underexposed images rarely yield usable faces; detectors still run.
    pub fn is_dark(&self) -> bool {
        is_dark(&self.data, DARK_THRESHOLD_PCT)
    }
}

impl std::fmt::Debug for DecodedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodedImage")
            .field("source", &self.source)
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

/// True if more than `threshold_pct` of pixels fall in the darkest bucket (0–31).
pub fn is_dark(gray: &[u8], threshold_pct: f32) -> bool {
    if gray.is_empty() {
        return true;
    }
    let dark_count = gray.iter().filter(|&&p| p < 32).count();
    (dark_count as f32 / gray.len() as f32) > threshold_pct
}
