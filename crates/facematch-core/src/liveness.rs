//! Passive liveness (anti-spoof) checking.
//!
//! Liveness is an annotation on a recognition outcome, never a gate on the
//! identity decision. The ONNX checker classifies an enlarged square crop
//! around the face with a MiniFASNet-style model.

use crate::types::{BoundingBox, Frame};
use image::imageops::{self, FilterType};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use serde::Serialize;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

const SPOOF_INPUT_SIZE: u32 = 80;
/// Context around the face box fed to the classifier.
const SPOOF_CROP_SCALE: f32 = 2.7;
/// Index of the "real face" logit.
const SPOOF_LIVE_CLASS: usize = 1;
/// Probability needed on either side for a definite verdict.
const SPOOF_DECISION_PROB: f32 = 0.7;

#[derive(Error, Debug)]
pub enum LivenessError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face region lies outside the frame")]
    EmptyRegion,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Liveness {
    Live,
    Spoof,
    Inconclusive,
}

/// What a checker reports for one face.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LivenessReport {
    pub status: Liveness,
    /// Probability assigned to `status` (0.0 for `Inconclusive` without a model).
    pub confidence: f32,
}

/// A report plus how long the check took, as attached to an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LivenessVerdict {
    pub status: Liveness,
    pub confidence: f32,
    pub latency: Duration,
}

pub trait LivenessChecker: Send + Sync {
    fn check(&self, frame: &Frame, bbox: &BoundingBox) -> Result<LivenessReport, LivenessError>;
}

/// Stand-in used when no anti-spoof model is configured.
pub struct DisabledLiveness;

impl LivenessChecker for DisabledLiveness {
    fn check(&self, _frame: &Frame, _bbox: &BoundingBox) -> Result<LivenessReport, LivenessError> {
        Ok(LivenessReport { status: Liveness::Inconclusive, confidence: 0.0 })
    }
}

pub struct OnnxLivenessChecker {
    session: Mutex<Session>,
}

impl OnnxLivenessChecker {
    pub fn load(model_path: &str) -> Result<Self, LivenessError> {
        if !Path::new(model_path).exists() {
            return Err(LivenessError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(1)?
            .commit_from_file(model_path)?;
        tracing::info!(path = model_path, "loaded anti-spoof model");

        Ok(Self { session: Mutex::new(session) })
    }
}

impl LivenessChecker for OnnxLivenessChecker {
    fn check(&self, frame: &Frame, bbox: &BoundingBox) -> Result<LivenessReport, LivenessError> {
        let input = preprocess(frame, bbox)?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| LivenessError::InferenceFailed("session lock poisoned".into()))?;
        let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, logits) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| LivenessError::InferenceFailed(format!("logits: {e}")))?;

        if logits.len() <= SPOOF_LIVE_CLASS {
            return Err(LivenessError::InferenceFailed(format!(
                "expected at least {} logits, got {}",
                SPOOF_LIVE_CLASS + 1,
                logits.len()
            )));
        }

        Ok(classify(&softmax(logits)))
    }
}

/// Square box `SPOOF_CROP_SCALE` times the larger face side, centred on the face.
fn expand_box(bbox: &BoundingBox) -> BoundingBox {
    let side = bbox.width.max(bbox.height) * SPOOF_CROP_SCALE;
    let (cx, cy) = bbox.center();
    BoundingBox { x: cx - side / 2.0, y: cy - side / 2.0, width: side, height: side, confidence: bbox.confidence }
}

/// Build an 80x80 NCHW tensor of raw pixel values.
fn preprocess(frame: &Frame, bbox: &BoundingBox) -> Result<Array4<f32>, LivenessError> {
    let crop = frame.crop(&expand_box(bbox));
    if crop.is_empty() {
        return Err(LivenessError::EmptyRegion);
    }
    let luma = crop.to_luma().ok_or(LivenessError::EmptyRegion)?;
    let resized = imageops::resize(&luma, SPOOF_INPUT_SIZE, SPOOF_INPUT_SIZE, FilterType::Triangle);

    let size = SPOOF_INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = pixel[0] as f32;
        }
    }
    Ok(tensor)
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|l| (l - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

fn classify(probs: &[f32]) -> LivenessReport {
    let live = probs[SPOOF_LIVE_CLASS];
    let spoof = 1.0 - live;
    if live >= SPOOF_DECISION_PROB {
        LivenessReport { status: Liveness::Live, confidence: live }
    } else if spoof >= SPOOF_DECISION_PROB {
        LivenessReport { status: Liveness::Spoof, confidence: spoof }
    } else {
        LivenessReport { status: Liveness::Inconclusive, confidence: live.max(spoof) }
    }
}
