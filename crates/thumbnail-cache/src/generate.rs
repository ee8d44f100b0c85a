//! Image transforms: proportional thumbnails and crop-to-fill derivatives
//!
//! Everything here is synchronous and CPU bound. Callers run it on the
//! blocking pool (or inside rayon) and only move encoded bytes across tasks.

use crate::error::{ThumbnailError, ThumbnailResult};
use crate::ThumbnailConfig;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageError, ImageReader};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

/// Resize and crop geometry for a crop-to-fill derivative
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropPlan {
    pub resized_width: u32,
    pub resized_height: u32,
    pub offset_x: u32,
    pub offset_y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropPlan {
    /// Scale so the target box is fully covered, then center the crop.
    ///
    /// A source that is relatively wider than the target is scaled to the
    /// target height and cropped left/right; otherwise it is scaled to the
    /// target width and cropped top/bottom.
    pub fn compute(source_width: u32, source_height: u32, width: u32, height: u32) -> Self {
        let source_aspect = source_width as f64 / source_height as f64;
        let target_aspect = width as f64 / height as f64;

        let (resized_width, resized_height) = if source_aspect > target_aspect {
            let scaled = (height as f64 * source_aspect).round() as u32;
            (scaled.max(width), height)
        } else {
            let scaled = (width as f64 / source_aspect).round() as u32;
            (width, scaled.max(height))
        };

        Self {
            resized_width,
            resized_height,
            offset_x: (resized_width - width) / 2,
            offset_y: (resized_height - height) / 2,
            width,
            height,
        }
    }
}

/// Largest size fitting inside `max_width` x `max_height` with the source aspect.
/// Never upscales.
pub fn fit_within(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    if width <= max_width && height <= max_height {
        return (width, height);
    }

    let ratio = (max_width as f64 / width as f64).min(max_height as f64 / height as f64);
    let new_width = ((width as f64 * ratio).round() as u32).clamp(1, max_width);
    let new_height = ((height as f64 * ratio).round() as u32).clamp(1, max_height);
    (new_width, new_height)
}

pub fn decode(bytes: &[u8]) -> ThumbnailResult<DynamicImage> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| ThumbnailError::Decode(ImageError::IoError(e)))?
        .decode()
        .map_err(ThumbnailError::Decode)
}

/// Encode as baseline JPEG. Alpha is dropped, JPEG has no alpha channel.
pub fn encode_jpeg(img: &DynamicImage, quality: u8) -> ThumbnailResult<Vec<u8>> {
    let rgb = img.to_rgb8();
    let mut buffer = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buffer, quality);
    rgb.write_with_encoder(encoder).map_err(ThumbnailError::Encode)?;
    Ok(buffer)
}

/// Proportionally shrink an image so it fits the configured bound.
pub fn resize_to_fit(img: DynamicImage, config: &ThumbnailConfig) -> DynamicImage {
    let (width, height) = img.dimensions();
    let (new_width, new_height) = fit_within(width, height, config.max_width, config.max_height);
    if (new_width, new_height) == (width, height) {
        return img;
    }
    img.resize_exact(new_width, new_height, FilterType::Lanczos3)
}

/// Scale and center-crop to exactly `width` x `height`.
pub fn crop_to_fill(img: &DynamicImage, width: u32, height: u32) -> DynamicImage {
    let (source_width, source_height) = img.dimensions();
    let plan = CropPlan::compute(source_width, source_height, width, height);
    img.resize_exact(plan.resized_width, plan.resized_height, FilterType::Lanczos3)
        .crop_imm(plan.offset_x, plan.offset_y, plan.width, plan.height)
}

/// Decode, shrink and encode one thumbnail
pub fn render_thumbnail(source: &[u8], config: &ThumbnailConfig) -> ThumbnailResult<Vec<u8>> {
    let img = decode(source)?;
    let resized = resize_to_fit(img, config);
    encode_jpeg(&resized, config.quality)
}

/// Decode, crop-to-fill and encode one derivative
pub fn render_crop_to_fill(
    source: &[u8],
    width: u32,
    height: u32,
    quality: u8,
) -> ThumbnailResult<Vec<u8>> {
    if width == 0 || height == 0 {
        return Err(ThumbnailError::InvalidDimensions { width, height });
    }
    let img = decode(source)?;
    encode_jpeg(&crop_to_fill(&img, width, height), quality)
}
