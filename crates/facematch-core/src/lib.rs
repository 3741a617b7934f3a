//! facematch-core: face matching pipeline.
//!
//! Quality-gates detected faces, embeds them with ArcFace, matches them
//! against an in-memory enrollment store by cosine similarity and annotates
//! each outcome with a passive liveness verdict. Detection, embedding and
//! liveness are pluggable collaborators; ONNX Runtime implementations are
//! provided.

pub mod config;
pub mod detector;
pub mod liveness;
pub mod matcher;
pub mod metrics;
pub mod pipeline;
pub mod quality;
pub mod recognizer;
pub mod stage;
pub mod store;
pub mod types;

pub use config::{PipelineConfig, StageTimeouts};
pub use detector::{DetectionError, Detector, ScrfdDetector};
pub use liveness::{DisabledLiveness, Liveness, LivenessChecker, LivenessVerdict, OnnxLivenessChecker};
pub use matcher::{CosineMatcher, MatchResult, Matcher};
pub use metrics::FrameMetrics;
pub use pipeline::{EnrollmentError, FrameReport, FrameStream, Pipeline, PersonLabel, RecognitionOutcome, RecognizeError};
pub use quality::{QualityConfig, QualityGate, Rejection};
pub use recognizer::{ArcFaceEmbedder, Embedder, ExtractionError};
pub use stage::StageError;
pub use store::{EmbeddingStore, PersonSummary, StoreError};
pub use types::{BoundingBox, DetectedRegion, Embedding, EnrollmentRecord, Frame};
