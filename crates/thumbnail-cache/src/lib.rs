//! Thumbnail generation and derivative caching for imagehoard
//!
//! Two kinds of generated images live next to the downloaded assets:
//!
//! - **Thumbnails**: one bounded, proportional JPEG per asset, stored at
//!   `<collection>/thumbnails/<stem>.jpg` and produced in bulk by the
//!   [`ThumbnailPipeline`]
//! - **Derivatives**: exact `width x height` crop-to-fill variants produced on
//!   demand by the [`DerivativeCache`], computed at most once per
//!   `(asset, width, height)` and bounded by an LRU index
//!
//! Both are pure functions of their source asset, so they can always be
//! regenerated from it.

pub mod cache;
pub mod error;
pub mod generate;
pub mod pipeline;

pub use cache::{DerivativeCache, DerivativeKey, DerivativeStats};
pub use error::{ThumbnailError, ThumbnailResult};
pub use generate::{CropPlan, crop_to_fill, fit_within, render_crop_to_fill, render_thumbnail};
pub use pipeline::{PipelineReport, ThumbnailPipeline};

use serde::{Deserialize, Serialize};

/// Settings for proportional thumbnails
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThumbnailConfig {
    pub max_width: u32,
    pub max_height: u32,
    pub quality: u8,
    /// Assets decoded in parallel per batch; cancellation is checked between batches
    pub chunk_size: usize,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            max_width: 150,
            max_height: 150,
            quality: 80,
            chunk_size: 8,
        }
    }
}

/// Settings for crop-to-fill derivatives
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DerivativeConfig {
    /// Key prefix under which derivatives are stored
    pub cache_root: String,
    /// Index capacity; the least recently used derivative is deleted beyond it
    pub max_entries: usize,
    pub quality: u8,
}

impl Default for DerivativeConfig {
    fn default() -> Self {
        Self {
            cache_root: "cache".to_string(),
            max_entries: 512,
            quality: 85,
        }
    }
}

/// Content hash used as an ETag for served images
pub fn content_digest(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    // First 16 bytes (32 hex chars) keep the tag short
    hex::encode(&result[..16])
}
