use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

/// Axis-aligned face region in source-image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Left edge.
    pub x: f32,
    /// Top edge.
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// Detector score for this region (0.0 when the source has none).
    pub confidence: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height, confidence: 0.0 }
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Height over width. Degenerate boxes report infinity.
    pub fn aspect_ratio(&self) -> f32 {
        if self.width > 0.0 {
            self.height / self.width
        } else {
            f32::INFINITY
        }
    }
}

/// A grayscale image: full camera frames and face crops share this layout.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Row-major luma pixels (width * height bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    /// Wrap raw luma pixels. Returns `None` when the buffer is shorter than `width * height`.
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Option<Self> {
        if data.len() < (width as usize) * (height as usize) {
            return None;
        }
        Some(Self { data, width, height })
    }

    pub fn from_luma(img: image::GrayImage) -> Self {
        let (width, height) = img.dimensions();
        Self { data: img.into_raw(), width, height }
    }

    /// Decode an image file and convert it to luma.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, image::ImageError> {
        Ok(Self::from_luma(image::open(path)?.to_luma8()))
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Cut the pixels under `bbox`, clamped to the frame bounds.
    pub fn crop(&self, bbox: &BoundingBox) -> Frame {
        let x0 = bbox.x.floor().clamp(0.0, self.width as f32) as usize;
        let y0 = bbox.y.floor().clamp(0.0, self.height as f32) as usize;
        let x1 = (bbox.x + bbox.width).ceil().clamp(0.0, self.width as f32) as usize;
        let y1 = (bbox.y + bbox.height).ceil().clamp(0.0, self.height as f32) as usize;

        if x1 <= x0 || y1 <= y0 {
            return Frame { data: Vec::new(), width: 0, height: 0 };
        }

        let stride = self.width as usize;
        let mut data = Vec::with_capacity((x1 - x0) * (y1 - y0));
        for y in y0..y1 {
            data.extend_from_slice(&self.data[y * stride + x0..y * stride + x1]);
        }

        Frame { data, width: (x1 - x0) as u32, height: (y1 - y0) as u32 }
    }

    pub(crate) fn to_luma(&self) -> Option<image::GrayImage> {
        image::GrayImage::from_raw(self.width, self.height, self.data.clone())
    }
}

/// One face reported by the detector, consumed once by the quality gate.
#[derive(Debug, Clone)]
pub struct DetectedRegion {
    pub bbox: BoundingBox,
    pub crop: Frame,
}

impl DetectedRegion {
    /// Build a region by cropping `bbox` out of `frame`.
    pub fn from_frame(frame: &Frame, bbox: BoundingBox) -> Self {
        Self { crop: frame.crop(&bbox), bbox }
    }
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values, model_version: None }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Cosine similarity between two embeddings, in [-1, 1]. Higher = more similar.
    ///
    /// A zero-magnitude vector on either side yields 0.0 rather than NaN.
    /// Always processes all dimensions.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 {
            (dot / denom).clamp(-1.0, 1.0)
        } else {
            0.0
        }
    }
}

/// One enrolled face sample. Several records may share a `person_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollmentRecord {
    pub record_id: Uuid,
    pub person_id: i64,
    pub person_name: String,
    pub embedding: Embedding,
    pub enrolled_at: DateTime<Utc>,
}

impl EnrollmentRecord {
    pub fn new(person_id: i64, person_name: impl Into<String>, embedding: Embedding) -> Self {
        Self {
            record_id: Uuid::new_v4(),
            person_id,
            person_name: person_name.into(),
            embedding,
            enrolled_at: Utc::now(),
        }
    }
}
