//! Image post-processing for emoji delivery.
//!
//! Generated images are large, usually 1024px squares. Emoji must be small
//! squares under the platform's byte limit, so the processor crops to a
//! square, then walks a ladder of edge sizes until the encoded PNG fits.

use image::codecs::png::{CompressionType, FilterType as PngFilterType, PngEncoder};
use image::imageops::FilterType;
use image::{DynamicImage, ImageReader};
use std::io::Cursor;
use tracing::{debug, warn};

use emojibot_common::{AppError, AppResult};

use crate::artifact::GeneratedArtifact;
use crate::job::ImageSize;

/// Smallest edge the ladder goes down to.
pub const MIN_EDGE_PX: u32 = 128;

/// Output format produced by the processor.
pub const OUTPUT_MIME: &str = "image/png";

/// Decode the whole image and return its dimensions.
///
/// A header can be intact while the pixel data is truncated, so the full
/// body is decoded.
#[must_use]
pub fn decoded_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    let img = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?
        .decode()
        .ok()?;
    Some((img.width(), img.height()))
}

/// One encoded rendition.
#[derive(Clone)]
pub struct ProcessedImage {
    /// PNG bytes.
    pub data: Vec<u8>,
    /// Edge length in pixels.
    pub edge_px: u32,
}

impl std::fmt::Debug for ProcessedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessedImage")
            .field("bytes", &self.data.len())
            .field("edge_px", &self.edge_px)
            .finish()
    }
}

/// Crop, resize and compress generated images.
#[derive(Debug, Clone, Copy)]
pub struct ImagePostProcessor {
    max_bytes: usize,
}

impl ImagePostProcessor {
    /// Processor targeting at most `max_bytes` per image.
    #[must_use]
    pub const fn new(max_bytes: usize) -> Self {
        Self { max_bytes }
    }

    /// Byte limit per image.
    #[must_use]
    pub const fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Edge sizes tried in order: the requested size, halving down to [`MIN_EDGE_PX`].
    #[must_use]
    pub fn ladder(start_px: u32) -> Vec<u32> {
        let mut edges = Vec::new();
        let mut edge = start_px.max(MIN_EDGE_PX);
        loop {
            edges.push(edge);
            if edge / 2 < MIN_EDGE_PX {
                break;
            }
            edge /= 2;
        }
        edges
    }

    /// Compress raw image bytes to a square PNG.
    ///
    /// Returns the first rendition within the byte limit. When none fits,
    /// the smallest rendition is returned and a warning logged; the upload
    /// step reports the platform's rejection.
    pub fn compress(&self, raw: &[u8], size: ImageSize) -> AppResult<ProcessedImage> {
        let decoded = image::load_from_memory(raw)
            .map_err(|e| AppError::TransientProvider(format!("Generated image could not be decoded: {e}")))?;
        let square = crop_to_square(&decoded);

        let mut smallest: Option<ProcessedImage> = None;
        for edge in Self::ladder(size.pixels()) {
            let resized = square.resize_exact(edge, edge, FilterType::Lanczos3);
            let data = encode_png(&resized)?;
            debug!(edge_px = edge, bytes = data.len(), limit = self.max_bytes, "Encoded rendition");

            if data.len() <= self.max_bytes {
                return Ok(ProcessedImage { data, edge_px: edge });
            }
            smallest = Some(ProcessedImage { data, edge_px: edge });
        }

        let smallest = smallest
            .ok_or_else(|| AppError::Internal("Resize ladder produced no renditions".to_string()))?;
        warn!(
            edge_px = smallest.edge_px,
            bytes = smallest.data.len(),
            limit = self.max_bytes,
            "No rendition fits the size limit, using the smallest"
        );
        Ok(smallest)
    }

    /// Post-process an artifact, keeping its provenance.
    pub fn process(&self, artifact: &GeneratedArtifact, size: ImageSize) -> AppResult<GeneratedArtifact> {
        let processed = self.compress(artifact.image_bytes(), size)?;
        artifact.with_processed(processed.data, OUTPUT_MIME, processed.edge_px)
    }
}

/// Center-crop to the largest square; alpha is kept.
fn crop_to_square(img: &DynamicImage) -> DynamicImage {
    let (width, height) = (img.width(), img.height());
    let edge = width.min(height);
    let x = (width - edge) / 2;
    let y = (height - edge) / 2;
    DynamicImage::ImageRgba8(img.crop_imm(x, y, edge, edge).to_rgba8())
}

fn encode_png(img: &DynamicImage) -> AppResult<Vec<u8>> {
    let mut out = Vec::new();
    let encoder = PngEncoder::new_with_quality(&mut out, CompressionType::Best, PngFilterType::Adaptive);
    img.write_with_encoder(encoder)
        .map_err(|e| AppError::Internal(format!("PNG encoding failed: {e}")))?;
    Ok(out)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::job::ProviderId;
    use image::{ImageFormat, Rgba, RgbaImage};

    fn encode(img: RgbaImage) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(img).write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    /// Simple gradient with a transparent border, compresses well.
    fn gradient(width: u32, height: u32) -> Vec<u8> {
        encode(RgbaImage::from_fn(width, height, |x, y| {
            let alpha = if x < 10 || y < 10 { 0 } else { 255 };
            Rgba([(x % 256) as u8, (y % 256) as u8, 128, alpha])
        }))
    }

    /// Pseudo-random pixels that defeat compression.
    fn noise(edge: u32) -> Vec<u8> {
        let mut state: u32 = 0x1234_5678;
        encode(RgbaImage::from_fn(edge, edge, |_, _| {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            let [a, b, c, d] = state.to_le_bytes();
            Rgba([a, b, c, d])
        }))
    }

    #[test]
    fn test_ladder() {
        assert_eq!(ImagePostProcessor::ladder(512), vec![512, 256, 128]);
        assert_eq!(ImagePostProcessor::ladder(256), vec![256, 128]);
        assert_eq!(ImagePostProcessor::ladder(128), vec![128]);
        assert_eq!(ImagePostProcessor::ladder(64), vec![128]);
    }

    #[test]
    fn test_output_is_square_png_within_limit() {
        let processor = ImagePostProcessor::new(128 * 1024);
        let out = processor.compress(&gradient(1024, 768), ImageSize::Px512).unwrap();

        assert!(out.data.len() <= 128 * 1024);
        let decoded = image::load_from_memory_with_format(&out.data, ImageFormat::Png).unwrap();
        assert_eq!(decoded.width(), decoded.height());
        assert_eq!(decoded.width(), out.edge_px);
        assert!(decoded.color().has_alpha());
    }

    #[test]
    fn test_requested_size_is_starting_edge() {
        let processor = ImagePostProcessor::new(128 * 1024);
        let out = processor.compress(&gradient(600, 600), ImageSize::Px256).unwrap();
        assert_eq!(out.edge_px, 256);
    }

    #[test]
    fn test_incompressible_returns_smallest() {
        let processor = ImagePostProcessor::new(1024);
        let out = processor.compress(&noise(600), ImageSize::Px512).unwrap();

        assert_eq!(out.edge_px, MIN_EDGE_PX);
        assert!(out.data.len() > 1024);
    }

    #[test]
    fn test_noise_steps_down_the_ladder() {
        // 512px noise is ~1MB; 128px noise is ~64KB.
        let processor = ImagePostProcessor::new(128 * 1024);
        let out = processor.compress(&noise(512), ImageSize::Px512).unwrap();

        assert!(out.edge_px < 512);
        assert!(out.data.len() <= 128 * 1024);
    }

    #[test]
    fn test_undecodable_input() {
        let processor = ImagePostProcessor::new(1024);
        let err = processor.compress(b"definitely not an image", ImageSize::Px128).unwrap_err();
        assert!(matches!(err, AppError::TransientProvider(_)));
    }

    #[test]
    fn test_truncated_body_has_no_dimensions() {
        let bytes = gradient(64, 64);
        assert_eq!(decoded_dimensions(&bytes), Some((64, 64)));
        assert_eq!(decoded_dimensions(&bytes[..60]), None);
    }

    #[test]
    fn test_process_keeps_provenance() {
        let bytes = gradient(300, 200);
        let (w, h) = decoded_dimensions(&bytes).unwrap();
        assert_eq!((w, h), (300, 200));

        let artifact =
            GeneratedArtifact::new(bytes, "image/png", w, h, ProviderId::GoogleGemini, "m", true).unwrap();
        let processed = ImagePostProcessor::new(128 * 1024)
            .process(&artifact, ImageSize::Px128)
            .unwrap();

        assert!(processed.is_square());
        assert_eq!(processed.width_px, 128);
        assert_eq!(processed.mime_format, OUTPUT_MIME);
        assert!(processed.is_fallback);
    }
}
