//! Downscaling and JPEG re-encoding of images before they reach the labeler.

use image::{
    DynamicImage, GenericImageView, ImageError, Rgb, RgbImage, codecs::jpeg::JpegEncoder,
    imageops::FilterType,
};
use std::sync::Arc;

/// Shrinks images to a bounded resolution and re-encodes them as JPEG.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageOptimizer {
    max_dimension: u32,
    quality: u8,
}

impl Default for ImageOptimizer {
    fn default() -> Self {
        Self::new(512, 90)
    }
}

impl ImageOptimizer {
    /// Bound both edges to `max_dimension` pixels and encode at JPEG `quality` (1-100).
    pub fn new(max_dimension: u32, quality: u8) -> Self {
        Self {
            max_dimension: max_dimension.max(1),
            quality: quality.clamp(1, 100),
        }
    }

    /// Decode, downscale if needed, flatten transparency onto white, and encode as JPEG.
    pub fn optimize(&self, bytes: &[u8]) -> Result<Vec<u8>, ImageError> {
        let decoded = image::load_from_memory(bytes)?;
        let (width, height) = decoded.dimensions();

        let resized = if width > self.max_dimension || height > self.max_dimension {
            decoded.resize(self.max_dimension, self.max_dimension, FilterType::Lanczos3)
        } else {
            decoded
        };

        let rgb = flatten_on_white(&resized);
        let mut encoded = Vec::new();
        JpegEncoder::new_with_quality(&mut encoded, self.quality).encode_image(&rgb)?;

        tracing::trace!(
            original_bytes = bytes.len(),
            optimized_bytes = encoded.len(),
            width = rgb.width(),
            height = rgb.height(),
            "Image optimized"
        );
        Ok(encoded)
    }

    /// Run [`Self::optimize`] off the async runtime, keeping the original bytes on failure.
    pub async fn optimize_or_original(&self, bytes: Arc<Vec<u8>>) -> Arc<Vec<u8>> {
        let optimizer = *self;
        let input = Arc::clone(&bytes);
        match tokio::task::spawn_blocking(move || optimizer.optimize(&input)).await {
            Ok(Ok(optimized)) => Arc::new(optimized),
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "Image optimization failed; using original bytes");
                bytes
            }
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    "Image optimization task failed; using original bytes"
                );
                bytes
            }
        }
    }
}

fn flatten_on_white(image: &DynamicImage) -> RgbImage {
    if !image.color().has_alpha() {
        return image.to_rgb8();
    }

    let rgba = image.to_rgba8();
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let alpha = u16::from(a);
        let blend = |channel: u8| -> u8 {
            ((u16::from(channel) * alpha + 255 * (255 - alpha)) / 255) as u8
        };
        Rgb([blend(r), blend(g), blend(b)])
    })
}
