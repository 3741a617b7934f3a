//! Geometric quality gate applied to raw detector output.
//!
//! Runs before any model inference: regions that are too small, too large,
//! oddly shaped or pushed against the frame edge never reach the embedder.

use crate::types::{BoundingBox, DetectedRegion};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const DEFAULT_MIN_AREA_RATIO: f32 = 0.02;
const DEFAULT_MAX_AREA_RATIO: f32 = 0.6;
const DEFAULT_MIN_WIDTH: f32 = 40.0;
const DEFAULT_MIN_HEIGHT: f32 = 40.0;
const DEFAULT_MIN_ASPECT_RATIO: f32 = 0.8;
const DEFAULT_MAX_ASPECT_RATIO: f32 = 2.0;
const DEFAULT_MAX_CENTER_OFFSET: f32 = 0.4;

/// Thresholds for the quality gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Minimum region area as a fraction of the frame area.
    pub min_area_ratio: f32,
    /// Maximum region area as a fraction of the frame area.
    pub max_area_ratio: f32,
    /// Minimum region width in pixels.
    pub min_width: f32,
    /// Minimum region height in pixels.
    pub min_height: f32,
    /// Lower bound on height / width.
    pub min_aspect_ratio: f32,
    /// Upper bound on height / width.
    pub max_aspect_ratio: f32,
    /// Maximum distance of the region center from the frame center,
    /// as a fraction of the frame diagonal.
    pub max_center_offset: f32,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_area_ratio: DEFAULT_MIN_AREA_RATIO,
            max_area_ratio: DEFAULT_MAX_AREA_RATIO,
            min_width: DEFAULT_MIN_WIDTH,
            min_height: DEFAULT_MIN_HEIGHT,
            min_aspect_ratio: DEFAULT_MIN_ASPECT_RATIO,
            max_aspect_ratio: DEFAULT_MAX_ASPECT_RATIO,
            max_center_offset: DEFAULT_MAX_CENTER_OFFSET,
        }
    }
}

/// Why a region was turned away.
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum Rejection {
    #[error("area ratio {0:.4} below minimum")]
    TooSmall(f32),
    #[error("area ratio {0:.4} above maximum")]
    TooLarge(f32),
    #[error("{width:.0}x{height:.0} px below minimum size")]
    BelowMinSize { width: f32, height: f32 },
    #[error("aspect ratio {0:.2} outside allowed band")]
    AspectRatio(f32),
    #[error("center offset {0:.2} of diagonal exceeds maximum")]
    OffCenter(f32),
}

#[derive(Debug, Clone, Default)]
pub struct QualityGate {
    config: QualityConfig,
}

impl QualityGate {
    pub fn new(config: QualityConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &QualityConfig {
        &self.config
    }

    /// Evaluate one bounding box against a frame of the given size.
    ///
    /// Reports the first failing rule; a region is admitted only when all pass.
    pub fn check(&self, (frame_w, frame_h): (u32, u32), bbox: &BoundingBox) -> Result<(), Rejection> {
        let cfg = &self.config;
        let frame_w = frame_w as f32;
        let frame_h = frame_h as f32;
        let frame_area = frame_w * frame_h;

        let area_ratio = if frame_area > 0.0 { bbox.area() / frame_area } else { 0.0 };
        if area_ratio < cfg.min_area_ratio {
            return Err(Rejection::TooSmall(area_ratio));
        }
        if area_ratio > cfg.max_area_ratio {
            return Err(Rejection::TooLarge(area_ratio));
        }

        if bbox.width < cfg.min_width || bbox.height < cfg.min_height {
            return Err(Rejection::BelowMinSize { width: bbox.width, height: bbox.height });
        }

        let aspect = bbox.aspect_ratio();
        if !(cfg.min_aspect_ratio..=cfg.max_aspect_ratio).contains(&aspect) {
            return Err(Rejection::AspectRatio(aspect));
        }

        let (cx, cy) = bbox.center();
        let dx = cx - frame_w / 2.0;
        let dy = cy - frame_h / 2.0;
        let diagonal = (frame_w * frame_w + frame_h * frame_h).sqrt();
        let offset = (dx * dx + dy * dy).sqrt() / diagonal;
        if offset > cfg.max_center_offset {
            return Err(Rejection::OffCenter(offset));
        }

        Ok(())
    }

    /// Keep the regions that pass every rule, in their original order.
    pub fn filter(&self, frame_dims: (u32, u32), regions: Vec<DetectedRegion>) -> Vec<DetectedRegion> {
        regions
            .into_iter()
            .filter(|region| match self.check(frame_dims, &region.bbox) {
                Ok(()) => true,
                Err(reason) => {
                    tracing::debug!(bbox = ?region.bbox, %reason, "quality gate rejected region");
                    false
                }
            })
            .collect()
    }
}
