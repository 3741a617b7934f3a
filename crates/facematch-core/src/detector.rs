//! Face detection: the `Detector` collaborator and an SCRFD implementation.
//!
//! SCRFD runs via ONNX Runtime with 3-stride anchor-free decoding and NMS
//! post-processing. Each surviving box is cropped out of the frame.

use crate::types::{BoundingBox, DetectedRegion, Frame};
use image::imageops::{self, FilterType};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectionError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("empty frame")]
    EmptyFrame,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Finds faces in a frame. Implementations must be shareable across tasks.
pub trait Detector: Send + Sync {
    fn detect(&self, frame: &Frame) -> Result<Vec<DetectedRegion>, DetectionError>;
}

/// Letterbox mapping from model input space back to frame space.
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn fit(width: usize, height: usize, target: usize) -> Self {
        let scale = (target as f32 / width as f32).min(target as f32 / height as f32);
        let new_w = (width as f32 * scale).round();
        let new_h = (height as f32 * scale).round();
        Self {
            scale,
            pad_x: (target as f32 - new_w) / 2.0,
            pad_y: (target as f32 - new_h) / 2.0,
        }
    }

    fn to_frame(&self, (x, y): (f32, f32)) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Output tensor indices for one stride: (score_idx, bbox_idx).
type StrideOutputs = (usize, usize);

/// SCRFD-based face detector.
pub struct ScrfdDetector {
    session: Mutex<Session>,
    stride_outputs: [StrideOutputs; 3],
}

impl ScrfdDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, DetectionError> {
        if !Path::new(model_path).exists() {
            return Err(DetectionError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        tracing::info!(path = model_path, outputs = ?output_names, "loaded SCRFD model");

        if output_names.len() < 6 {
            return Err(DetectionError::InferenceFailed(format!(
                "SCRFD model requires score and bbox outputs for 3 strides, got {} outputs",
                output_names.len()
            )));
        }

        Ok(Self {
            session: Mutex::new(session),
            stride_outputs: discover_output_indices(&output_names),
        })
    }

    fn run(&self, frame: &Frame) -> Result<Vec<BoundingBox>, DetectionError> {
        let (input, letterbox) = preprocess(frame)?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| DetectionError::InferenceFailed("session lock poisoned".into()))?;
        let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx) = self.stride_outputs[pos];
            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectionError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, bboxes) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectionError::InferenceFailed(format!("bboxes stride {stride}: {e}")))?;

            candidates.extend(decode_stride(scores, bboxes, stride, &letterbox, SCRFD_CONFIDENCE_THRESHOLD));
        }

        Ok(nms(candidates, SCRFD_NMS_THRESHOLD))
    }
}

impl Detector for ScrfdDetector {
    fn detect(&self, frame: &Frame) -> Result<Vec<DetectedRegion>, DetectionError> {
        if frame.is_empty() {
            return Err(DetectionError::EmptyFrame);
        }
        let boxes = self.run(frame)?;
        tracing::debug!(faces = boxes.len(), "SCRFD detection complete");
        Ok(boxes.into_iter().map(|b| DetectedRegion::from_frame(frame, b)).collect())
    }
}

/// Letterbox a grayscale frame into a 640x640 NCHW tensor.
///
/// Padding uses `SCRFD_MEAN`, which normalizes to 0.0.
fn preprocess(frame: &Frame) -> Result<(Array4<f32>, Letterbox), DetectionError> {
    let letterbox = Letterbox::fit(frame.width as usize, frame.height as usize, SCRFD_INPUT_SIZE);
    let new_w = ((frame.width as f32 * letterbox.scale).round() as u32).max(1);
    let new_h = ((frame.height as f32 * letterbox.scale).round() as u32).max(1);

    let luma = frame
        .to_luma()
        .ok_or_else(|| DetectionError::InferenceFailed("frame buffer does not match dimensions".into()))?;
    let resized = imageops::resize(&luma, new_w, new_h, FilterType::Triangle);

    let pad_x = letterbox.pad_x.floor() as usize;
    let pad_y = letterbox.pad_y.floor() as usize;
    let size = SCRFD_INPUT_SIZE;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

    for y in 0..size {
        for x in 0..size {
            let inside = y >= pad_y && y < pad_y + new_h as usize && x >= pad_x && x < pad_x + new_w as usize;
            let pixel = if inside {
                resized.get_pixel((x - pad_x) as u32, (y - pad_y) as u32)[0] as f32
            } else {
                SCRFD_MEAN
            };
            let normalized = (pixel - SCRFD_MEAN) / SCRFD_STD;
            for c in 0..3 {
                tensor[[0, c, y, x]] = normalized;
            }
        }
    }

    Ok((tensor, letterbox))
}

/// Map stride slots to output tensors.
///
/// Prefers "score_8"/"bbox_8"-style names; otherwise assumes the standard
/// export order [0-2] = scores, [3-5] = bboxes.
fn discover_output_indices(names: &[String]) -> [StrideOutputs; 3] {
    let find = |prefix: &str, stride: usize| -> Option<usize> {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| n == &target)
    };

    let named: Option<Vec<StrideOutputs>> = SCRFD_STRIDES
        .iter()
        .map(|&stride| Some((find("score", stride)?, find("bbox", stride)?)))
        .collect();

    match named {
        Some(found) => {
            tracing::info!("SCRFD: using name-based output tensor mapping");
            [found[0], found[1], found[2]]
        }
        None => {
            tracing::info!(?names, "SCRFD: output names not recognized, using positional mapping");
            [(0, 3), (1, 4), (2, 5)]
        }
    }
}

/// Decode detections for a single stride level.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    stride: usize,
    letterbox: &Letterbox,
    threshold: f32,
) -> Vec<BoundingBox> {
    let grid_w = SCRFD_INPUT_SIZE / stride;
    let grid_h = SCRFD_INPUT_SIZE / stride;
    let num_anchors = grid_w * grid_h * SCRFD_ANCHORS_PER_CELL;
    let s = stride as f32;

    (0..num_anchors)
        .filter_map(|idx| {
            let score = scores.get(idx).copied().unwrap_or(0.0);
            if score <= threshold {
                return None;
            }
            let off = idx * 4;
            let d = bboxes.get(off..off + 4)?;

            let cell = idx / SCRFD_ANCHORS_PER_CELL;
            let anchor_x = (cell % grid_w) as f32 * s;
            let anchor_y = (cell / grid_w) as f32 * s;

            let (x1, y1) = letterbox.to_frame((anchor_x - d[0] * s, anchor_y - d[1] * s));
            let (x2, y2) = letterbox.to_frame((anchor_x + d[2] * s, anchor_y + d[3] * s));

            Some(BoundingBox { x: x1, y: y1, width: x2 - x1, height: y2 - y1, confidence: score })
        })
        .collect()
}

/// Non-Maximum Suppression, highest confidence first.
fn nms(mut detections: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<BoundingBox> = Vec::new();
    for det in detections {
        if keep.iter().all(|k| iou(k, &det) <= iou_threshold) {
            keep.push(det);
        }
    }
    keep
}

/// Intersection-over-Union between two boxes.
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let inter_w = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let inter_h = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = inter_w * inter_h;
    let union = a.area() + b.area() - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}
