//! Embedding extraction: the `Embedder` collaborator and an ArcFace implementation.
//!
//! ArcFace (w600k_r50) maps a face crop to a 512-dimensional, L2-normalized
//! embedding.

use crate::types::{Embedding, Frame};
use image::imageops::{self, FilterType};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

const ARCFACE_INPUT_SIZE: u32 = 112;
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5; // symmetric, unlike SCRFD
pub const ARCFACE_EMBEDDING_DIM: usize = 512;
const ARCFACE_MODEL_VERSION: &str = "w600k_r50";

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face crop is empty or malformed")]
    BadCrop,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Turns a cropped face into an embedding of fixed dimensionality.
///
/// Must be deterministic for a fixed model.
pub trait Embedder: Send + Sync {
    fn embed(&self, crop: &Frame) -> Result<Embedding, ExtractionError>;

    /// Dimensionality of every embedding this extractor produces.
    fn dim(&self) -> usize;
}

/// ArcFace-based embedder.
pub struct ArcFaceEmbedder {
    session: Mutex<Session>,
}

impl ArcFaceEmbedder {
    /// Load the ArcFace ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, ExtractionError> {
        if !Path::new(model_path).exists() {
            return Err(ExtractionError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded ArcFace model"
        );

        Ok(Self { session: Mutex::new(session) })
    }
}

impl Embedder for ArcFaceEmbedder {
    fn embed(&self, crop: &Frame) -> Result<Embedding, ExtractionError> {
        let input = preprocess(crop)?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| ExtractionError::InferenceFailed("session lock poisoned".into()))?;
        let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ExtractionError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.len() != ARCFACE_EMBEDDING_DIM {
            return Err(ExtractionError::InferenceFailed(format!(
                "expected {ARCFACE_EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        Ok(Embedding {
            values: l2_normalize(raw.to_vec()),
            model_version: Some(ARCFACE_MODEL_VERSION.to_string()),
        })
    }

    fn dim(&self) -> usize {
        ARCFACE_EMBEDDING_DIM
    }
}

/// Resize a grayscale crop to 112x112 and build a normalized NCHW tensor.
fn preprocess(crop: &Frame) -> Result<Array4<f32>, ExtractionError> {
    if crop.is_empty() {
        return Err(ExtractionError::BadCrop);
    }
    let luma = crop.to_luma().ok_or(ExtractionError::BadCrop)?;
    let aligned = imageops::resize(&luma, ARCFACE_INPUT_SIZE, ARCFACE_INPUT_SIZE, FilterType::Triangle);

    let size = ARCFACE_INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in aligned.enumerate_pixels() {
        let normalized = (pixel[0] as f32 - ARCFACE_MEAN) / ARCFACE_STD;
        // Grayscale → 3-channel
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = normalized;
        }
    }
    Ok(tensor)
}

fn l2_normalize(raw: Vec<f32>) -> Vec<f32> {
    let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|x| x / norm).collect()
    } else {
        raw
    }
}
