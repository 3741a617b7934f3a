//! Per-frame recognition pipeline and enrollment.
//!
//! Each detected region flows independently through
//! quality gate → embedding → store query → liveness. A failure in one
//! region turns into an `Error` outcome for that region only. Regions run as
//! separate tasks; outcomes are reassembled in detection order.
//!
//! Every `recognize` call takes a new generation on its [`FrameStream`].
//! Region tasks belonging to an older generation of the same stream stop at
//! their next stage boundary and the older call returns
//! [`RecognizeError::Superseded`]. Frames on different streams never cancel
//! each other.

use crate::config::PipelineConfig;
use crate::detector::{DetectionError, Detector};
use crate::liveness::{LivenessChecker, LivenessVerdict};
use crate::matcher::MatchResult;
use crate::metrics::{FrameMetrics, RegionTimings};
use crate::quality::{QualityGate, Rejection};
use crate::recognizer::{Embedder, ExtractionError};
use crate::stage::{run_stage, StageError};
use crate::store::{EmbeddingStore, StoreError};
use crate::types::{BoundingBox, DetectedRegion, EnrollmentRecord, Frame};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Identity decision for one face.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum PersonLabel {
    Resolved { person_id: i64, name: String, similarity: f32 },
    NotRecognized,
    /// A stage failed; carries the reason.
    Error(String),
}

impl fmt::Display for PersonLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersonLabel::Resolved { name, .. } => f.write_str(name),
            PersonLabel::NotRecognized => f.write_str("Not recognized"),
            PersonLabel::Error(_) => f.write_str("Error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecognitionOutcome {
    pub label: PersonLabel,
    pub bbox: BoundingBox,
    /// Absent when the liveness check failed or was not reached.
    pub liveness: Option<LivenessVerdict>,
}

/// Everything `recognize` reports for one frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameReport {
    /// `None` when no region survived the quality gate.
    pub metrics: Option<FrameMetrics>,
    /// One entry per region that passed the quality gate, in detection order.
    pub outcomes: Vec<RecognitionOutcome>,
}

#[derive(Error, Debug)]
pub enum RecognizeError {
    #[error("detection failed: {0}")]
    Detection(StageError<DetectionError>),
    #[error("frame superseded by a newer frame")]
    Superseded,
}

#[derive(Error, Debug)]
pub enum EnrollmentError {
    #[error("no face found in enrollment image")]
    NoFaceFound,
    #[error("{0} faces found in enrollment image, expected exactly one")]
    MultipleFacesFound(usize),
    #[error("face rejected by quality gate: {0}")]
    PoorQuality(Rejection),
    #[error("detection failed: {0}")]
    Detection(StageError<DetectionError>),
    #[error("embedding extraction failed: {0}")]
    Extraction(StageError<ExtractionError>),
    #[error("store: {0}")]
    Store(StageError<StoreError>),
}

/// Stage names used in diagnostics.
#[derive(Debug, Clone, Copy)]
enum RegionStage {
    Embed,
    Search,
    Liveness,
}

impl fmt::Display for RegionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RegionStage::Embed => "embed",
            RegionStage::Search => "search",
            RegionStage::Liveness => "liveness",
        })
    }
}

enum RegionRun {
    Done(RecognitionOutcome, RegionTimings),
    /// A newer frame started; the region stopped early.
    Abandoned,
}

/// Cancellation scope for [`Pipeline::recognize_on`].
///
/// A frame started on a stream supersedes the frames still in flight on the
/// same stream. Clones share the scope.
#[derive(Debug, Clone, Default)]
pub struct FrameStream {
    generation: Arc<AtomicU64>,
}

impl FrameStream {
    pub fn new() -> Self {
        Self::default()
    }

    fn advance(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_stale(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) != generation
    }
}

struct Inner {
    detector: Arc<dyn Detector>,
    embedder: Arc<dyn Embedder>,
    liveness: Arc<dyn LivenessChecker>,
    store: Arc<EmbeddingStore>,
    gate: QualityGate,
    config: PipelineConfig,
    stream: FrameStream,
}

/// Recognition and enrollment over one shared embedding store.
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<Inner>,
}

impl Pipeline {
    /// Fails when the embedder and store disagree on dimensionality.
    pub fn new(
        detector: Arc<dyn Detector>,
        embedder: Arc<dyn Embedder>,
        liveness: Arc<dyn LivenessChecker>,
        store: Arc<EmbeddingStore>,
        config: PipelineConfig,
    ) -> Result<Self, StoreError> {
        if embedder.dim() != store.dim() {
            return Err(StoreError::DimensionMismatch { expected: store.dim(), actual: embedder.dim() });
        }
        Ok(Self {
            inner: Arc::new(Inner {
                detector,
                embedder,
                liveness,
                store,
                gate: QualityGate::new(config.quality.clone()),
                config,
                stream: FrameStream::new(),
            }),
        })
    }

    pub fn store(&self) -> &Arc<EmbeddingStore> {
        &self.inner.store
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    /// Detect, gate and identify every face in `frame` on the pipeline's own stream.
    pub async fn recognize(&self, frame: Frame) -> Result<FrameReport, RecognizeError> {
        self.recognize_on(&self.inner.stream, frame).await
    }

    /// Like [`recognize`](Self::recognize), superseding only frames of `stream`.
    pub async fn recognize_on(&self, stream: &FrameStream, frame: Frame) -> Result<FrameReport, RecognizeError> {
        let inner = &self.inner;
        let generation = stream.advance();
        let frame = Arc::new(frame);

        let detector = Arc::clone(&inner.detector);
        let detect_frame = Arc::clone(&frame);
        let (detected, detection_latency) =
            run_stage(inner.config.timeouts.detect(), move || detector.detect(&detect_frame)).await;
        let regions = detected.map_err(RecognizeError::Detection)?;
        let detected_count = regions.len();

        let regions = inner.gate.filter(frame.dimensions(), regions);
        tracing::debug!(detected = detected_count, admitted = regions.len(), generation, "frame detection done");

        if stream.is_stale(generation) {
            return Err(RecognizeError::Superseded);
        }
        if regions.is_empty() {
            return Ok(FrameReport { metrics: None, outcomes: Vec::new() });
        }

        let tasks: Vec<_> = regions
            .into_iter()
            .map(|region| {
                let bbox = region.bbox;
                let handle = tokio::spawn(process_region(
                    Arc::clone(inner),
                    stream.clone(),
                    Arc::clone(&frame),
                    region,
                    generation,
                ));
                (bbox, handle)
            })
            .collect();

        let mut outcomes = Vec::with_capacity(tasks.len());
        let mut timings = Vec::with_capacity(tasks.len());
        let mut tasks = tasks.into_iter();

        while let Some((bbox, handle)) = tasks.next() {
            match handle.await {
                Ok(RegionRun::Done(outcome, t)) => {
                    outcomes.push(outcome);
                    timings.push(t);
                }
                Ok(RegionRun::Abandoned) => {
                    for (_, rest) in tasks {
                        rest.abort();
                    }
                    tracing::debug!(generation, "frame superseded, dropping partial results");
                    return Err(RecognizeError::Superseded);
                }
                Err(join_err) => {
                    tracing::warn!(?bbox, error = %join_err, "region task failed");
                    outcomes.push(RecognitionOutcome {
                        label: PersonLabel::Error(join_err.to_string()),
                        bbox,
                        liveness: None,
                    });
                    timings.push(RegionTimings::default());
                }
            }
        }

        if stream.is_stale(generation) {
            return Err(RecognizeError::Superseded);
        }

        Ok(FrameReport {
            metrics: Some(FrameMetrics::aggregate(detection_latency, &timings)),
            outcomes,
        })
    }

    /// Enroll one face sample for a person.
    ///
    /// The image must contain exactly one detected face, and that face must
    /// pass the quality gate. Returns the new record's id.
    pub async fn enroll(&self, person_id: i64, person_name: &str, image: Frame) -> Result<Uuid, EnrollmentError> {
        let inner = &self.inner;
        let image = Arc::new(image);

        let detector = Arc::clone(&inner.detector);
        let detect_image = Arc::clone(&image);
        let (detected, _) = run_stage(inner.config.timeouts.detect(), move || detector.detect(&detect_image)).await;
        let mut regions = detected.map_err(EnrollmentError::Detection)?;

        let region = match regions.len() {
            0 => return Err(EnrollmentError::NoFaceFound),
            1 => regions.remove(0),
            n => {
                tracing::warn!(person_id, faces = n, "enroll: multiple faces in image");
                return Err(EnrollmentError::MultipleFacesFound(n));
            }
        };

        inner.gate.check(image.dimensions(), &region.bbox).map_err(|reason| {
            tracing::warn!(person_id, bbox = ?region.bbox, %reason, "enroll: face rejected by quality gate");
            EnrollmentError::PoorQuality(reason)
        })?;

        let embedder = Arc::clone(&inner.embedder);
        let crop = region.crop;
        let (embedded, elapsed) = run_stage(inner.config.timeouts.embed(), move || embedder.embed(&crop)).await;
        let embedding = embedded.map_err(EnrollmentError::Extraction)?;

        let record = EnrollmentRecord::new(person_id, person_name, embedding);
        let record_id = record.record_id;
        let store = Arc::clone(&inner.store);
        let (added, _) = run_stage(None, move || store.add(record)).await;
        added.map_err(EnrollmentError::Store)?;

        tracing::info!(person_id, person_name, %record_id, embed_ms = elapsed.as_millis() as u64, "enroll: sample stored");
        Ok(record_id)
    }

    /// Remove every enrolled sample of `person_id`. Returns the number removed.
    pub async fn unenroll(&self, person_id: i64) -> Result<usize, StageError<StoreError>> {
        let store = Arc::clone(&self.inner.store);
        let (removed, _) = run_stage(None, move || store.remove_by_person(person_id)).await;
        removed
    }
}

fn error_outcome<E: fmt::Display>(stage: RegionStage, bbox: BoundingBox, err: StageError<E>) -> RecognitionOutcome {
    tracing::warn!(%stage, ?bbox, error = %err, "region failed");
    RecognitionOutcome { label: PersonLabel::Error(format!("{stage}: {err}")), bbox, liveness: None }
}

async fn process_region(
    inner: Arc<Inner>,
    stream: FrameStream,
    frame: Arc<Frame>,
    region: DetectedRegion,
    generation: u64,
) -> RegionRun {
    let bbox = region.bbox;
    let timeouts = &inner.config.timeouts;
    let mut timings = RegionTimings::default();

    if stream.is_stale(generation) {
        return RegionRun::Abandoned;
    }

    let embedder = Arc::clone(&inner.embedder);
    let crop = region.crop;
    let (embedded, elapsed) = run_stage(timeouts.embed(), move || embedder.embed(&crop)).await;
    timings.embed = Some(elapsed);
    let embedding = match embedded {
        Ok(embedding) => embedding,
        Err(err) => return RegionRun::Done(error_outcome(RegionStage::Embed, bbox, err), timings),
    };

    if stream.is_stale(generation) {
        return RegionRun::Abandoned;
    }

    let store = Arc::clone(&inner.store);
    let threshold = inner.config.similarity_threshold;
    let (matched, elapsed) = run_stage(timeouts.search(), move || store.query(&embedding, threshold)).await;
    timings.search = Some(elapsed);
    let label = match matched {
        Ok(MatchResult::Matched { person_id, person_name, similarity, .. }) => {
            PersonLabel::Resolved { person_id, name: person_name, similarity }
        }
        Ok(MatchResult::NoMatch) => PersonLabel::NotRecognized,
        Err(err) => return RegionRun::Done(error_outcome(RegionStage::Search, bbox, err), timings),
    };

    if stream.is_stale(generation) {
        return RegionRun::Abandoned;
    }

    let checker = Arc::clone(&inner.liveness);
    let (checked, elapsed) = run_stage(timeouts.liveness(), move || checker.check(&frame, &bbox)).await;
    timings.liveness = Some(elapsed);
    let liveness = match checked {
        Ok(report) => Some(LivenessVerdict { status: report.status, confidence: report.confidence, latency: elapsed }),
        Err(err) => {
            tracing::warn!(stage = %RegionStage::Liveness, ?bbox, error = %err, "liveness unavailable for region");
            None
        }
    };

    RegionRun::Done(RecognitionOutcome { label, bbox, liveness }, timings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::liveness::{DisabledLiveness, Liveness, LivenessError, LivenessReport};
    use crate::types::Embedding;
    use std::time::Duration;

    const DIM: usize = 4;
    const FRAME_W: u32 = 640;
    const FRAME_H: u32 = 480;

    /// Box that passes the default quality gate. `marker` rides in `confidence`
    /// and becomes the crop's only pixel, which picks the fake embedding.
    fn face_at(x: f32, marker: u8) -> BoundingBox {
        BoundingBox { x, y: 180.0, width: 100.0, height: 120.0, confidence: marker as f32 }
    }

    fn frame() -> Frame {
        Frame::new(vec![0; (FRAME_W * FRAME_H) as usize], FRAME_W, FRAME_H).unwrap()
    }

    /// Returns preset boxes; each crop's first byte carries the box's marker.
    struct FakeDetector {
        boxes: Vec<BoundingBox>,
        delay: Duration,
    }

    impl Detector for FakeDetector {
        fn detect(&self, _frame: &Frame) -> Result<Vec<DetectedRegion>, DetectionError> {
            std::thread::sleep(self.delay);
            Ok(self
                .boxes
                .iter()
                .map(|b| DetectedRegion { bbox: *b, crop: Frame { data: vec![b.confidence as u8], width: 1, height: 1 } })
                .collect())
        }
    }

    struct FailingDetector;

    impl Detector for FailingDetector {
        fn detect(&self, _frame: &Frame) -> Result<Vec<DetectedRegion>, DetectionError> {
            Err(DetectionError::InferenceFailed("camera garbage".into()))
        }
    }

    /// Marker 1 → axis 0, marker 2 → axis 1, ...; marker 0 fails.
    struct FakeEmbedder;

    impl Embedder for FakeEmbedder {
        fn embed(&self, crop: &Frame) -> Result<Embedding, ExtractionError> {
            let marker = crop.data.first().copied().unwrap_or(0) as usize;
            if marker == 0 || marker > DIM {
                return Err(ExtractionError::InferenceFailed(format!("marker {marker}")));
            }
            let mut values = vec![0.0; DIM];
            values[marker - 1] = 1.0;
            Ok(Embedding::new(values))
        }

        fn dim(&self) -> usize {
            DIM
        }
    }

    struct FakeLiveness {
        fail: bool,
    }

    impl LivenessChecker for FakeLiveness {
        fn check(&self, _frame: &Frame, _bbox: &BoundingBox) -> Result<LivenessReport, LivenessError> {
            if self.fail {
                Err(LivenessError::InferenceFailed("spoof model down".into()))
            } else {
                Ok(LivenessReport { status: Liveness::Live, confidence: 0.93 })
            }
        }
    }

    fn store_with_ana() -> Arc<EmbeddingStore> {
        let store = Arc::new(EmbeddingStore::new(DIM));
        store
            .add(EnrollmentRecord::new(1, "Ana", Embedding::new(vec![1.0, 0.0, 0.0, 0.0])))
            .unwrap();
        store
    }

    fn pipeline(detector: impl Detector + 'static, liveness: impl LivenessChecker + 'static) -> Pipeline {
        Pipeline::new(
            Arc::new(detector),
            Arc::new(FakeEmbedder),
            Arc::new(liveness),
            store_with_ana(),
            PipelineConfig::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_recognizes_enrolled_face() {
        let p = pipeline(FakeDetector { boxes: vec![face_at(270.0, 1)], delay: Duration::ZERO }, FakeLiveness { fail: false });
        let report = p.recognize(frame()).await.unwrap();

        assert_eq!(report.outcomes.len(), 1);
        let outcome = &report.outcomes[0];
        match &outcome.label {
            PersonLabel::Resolved { person_id, name, similarity } => {
                assert_eq!(*person_id, 1);
                assert_eq!(name, "Ana");
                assert!((similarity - 1.0).abs() < 1e-6);
            }
            other => panic!("unexpected label {other:?}"),
        }
        assert_eq!(outcome.label.to_string(), "Ana");
        assert_eq!(outcome.liveness.map(|v| v.status), Some(Liveness::Live));

        let metrics = report.metrics.expect("metrics for a non-empty frame");
        assert!(metrics.mean_embedding_latency.is_some());
        assert!(metrics.mean_search_latency.is_some());
        assert!(metrics.mean_liveness_latency.is_some());
    }

    #[tokio::test]
    async fn test_unknown_face_still_gets_liveness() {
        let p = pipeline(FakeDetector { boxes: vec![face_at(270.0, 2)], delay: Duration::ZERO }, FakeLiveness { fail: false });
        let report = p.recognize(frame()).await.unwrap();
        assert_eq!(report.outcomes[0].label, PersonLabel::NotRecognized);
        assert_eq!(report.outcomes[0].label.to_string(), "Not recognized");
        assert!(report.outcomes[0].liveness.is_some());
    }

    #[tokio::test]
    async fn test_failing_region_is_isolated() {
        // Middle region's marker 0 makes the embedder fail
        let boxes = vec![face_at(200.0, 1), face_at(270.0, 0), face_at(340.0, 3)];
        let p = pipeline(FakeDetector { boxes: boxes.clone(), delay: Duration::ZERO }, FakeLiveness { fail: false });
        let report = p.recognize(frame()).await.unwrap();

        assert_eq!(report.outcomes.len(), 3);
        for (outcome, bbox) in report.outcomes.iter().zip(&boxes) {
            assert_eq!(outcome.bbox, *bbox);
        }
        assert!(matches!(report.outcomes[0].label, PersonLabel::Resolved { .. }));
        assert!(matches!(report.outcomes[1].label, PersonLabel::Error(_)));
        assert_eq!(report.outcomes[1].label.to_string(), "Error");
        assert!(report.outcomes[1].liveness.is_none());
        assert_eq!(report.outcomes[2].label, PersonLabel::NotRecognized);
        assert!(report.outcomes[2].liveness.is_some());
    }

    #[tokio::test]
    async fn test_liveness_failure_keeps_identity() {
        let p = pipeline(FakeDetector { boxes: vec![face_at(270.0, 1)], delay: Duration::ZERO }, FakeLiveness { fail: true });
        let report = p.recognize(frame()).await.unwrap();
        assert!(matches!(report.outcomes[0].label, PersonLabel::Resolved { .. }));
        assert!(report.outcomes[0].liveness.is_none());
        // The attempt still counts toward liveness latency
        assert!(report.metrics.unwrap().mean_liveness_latency.is_some());
    }

    #[tokio::test]
    async fn test_no_surviving_regions_has_no_metrics() {
        // Tiny box fails the quality gate
        let tiny = BoundingBox { x: 300.0, y: 200.0, width: 5.0, height: 5.0, confidence: 1.0 };
        let p = pipeline(FakeDetector { boxes: vec![tiny], delay: Duration::ZERO }, DisabledLiveness);
        let report = p.recognize(frame()).await.unwrap();
        assert!(report.outcomes.is_empty());
        assert!(report.metrics.is_none());
    }

    #[tokio::test]
    async fn test_detection_failure_is_reported() {
        let p = pipeline(FailingDetector, DisabledLiveness);
        let err = p.recognize(frame()).await.unwrap_err();
        assert!(matches!(err, RecognizeError::Detection(StageError::Failed(_))));
    }

    #[tokio::test]
    async fn test_embed_timeout_becomes_error_outcome() {
        struct SlowEmbedder;
        impl Embedder for SlowEmbedder {
            fn embed(&self, _crop: &Frame) -> Result<Embedding, ExtractionError> {
                std::thread::sleep(Duration::from_millis(200));
                Ok(Embedding::new(vec![1.0, 0.0, 0.0, 0.0]))
            }
            fn dim(&self) -> usize {
                DIM
            }
        }

        let mut config = PipelineConfig::default();
        config.timeouts.embed_ms = Some(10);
        let p = Pipeline::new(
            Arc::new(FakeDetector { boxes: vec![face_at(270.0, 1)], delay: Duration::ZERO }),
            Arc::new(SlowEmbedder),
            Arc::new(DisabledLiveness),
            store_with_ana(),
            config,
        )
        .unwrap();

        let report = p.recognize(frame()).await.unwrap();
        match &report.outcomes[0].label {
            PersonLabel::Error(reason) => assert!(reason.contains("timed out"), "{reason}"),
            other => panic!("unexpected label {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_newer_frame_supersedes_older() {
        let p = pipeline(
            FakeDetector { boxes: vec![face_at(270.0, 1)], delay: Duration::from_millis(100) },
            DisabledLiveness,
        );
        let older = {
            let p = p.clone();
            tokio::spawn(async move { p.recognize(frame()).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let newer = p.recognize(frame()).await;

        assert!(matches!(older.await.unwrap(), Err(RecognizeError::Superseded)));
        assert_eq!(newer.unwrap().outcomes.len(), 1);
    }

    #[tokio::test]
    async fn test_separate_streams_do_not_supersede() {
        let p = pipeline(
            FakeDetector { boxes: vec![face_at(270.0, 1)], delay: Duration::from_millis(100) },
            DisabledLiveness,
        );
        let first = {
            let p = p.clone();
            tokio::spawn(async move { p.recognize_on(&FrameStream::new(), frame()).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = p.recognize_on(&FrameStream::new(), frame()).await;

        assert_eq!(first.await.unwrap().unwrap().outcomes.len(), 1);
        assert_eq!(second.unwrap().outcomes.len(), 1);
    }

    #[tokio::test]
    async fn test_enroll_then_recognize_then_unenroll() {
        let p = pipeline(FakeDetector { boxes: vec![face_at(270.0, 2)], delay: Duration::ZERO }, DisabledLiveness);

        let report = p.recognize(frame()).await.unwrap();
        assert_eq!(report.outcomes[0].label, PersonLabel::NotRecognized);

        let record_id = p.enroll(2, "Ben", frame()).await.unwrap();
        assert_eq!(p.store().len().unwrap(), 2);
        assert!(p.store().records().unwrap().iter().any(|r| r.record_id == record_id));

        let report = p.recognize(frame()).await.unwrap();
        assert!(matches!(&report.outcomes[0].label, PersonLabel::Resolved { person_id: 2, .. }));

        assert_eq!(p.unenroll(2).await.unwrap(), 1);
        let report = p.recognize(frame()).await.unwrap();
        assert_eq!(report.outcomes[0].label, PersonLabel::NotRecognized);
    }

    #[tokio::test]
    async fn test_enroll_rejects_multiple_faces() {
        let p = pipeline(
            FakeDetector { boxes: vec![face_at(200.0, 2), face_at(340.0, 3)], delay: Duration::ZERO },
            DisabledLiveness,
        );
        let err = p.enroll(9, "Zoe", frame()).await.unwrap_err();
        assert!(matches!(err, EnrollmentError::MultipleFacesFound(2)));
        assert_eq!(p.store().len().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_enroll_rejects_no_face() {
        let p = pipeline(FakeDetector { boxes: vec![], delay: Duration::ZERO }, DisabledLiveness);
        assert!(matches!(p.enroll(9, "Zoe", frame()).await, Err(EnrollmentError::NoFaceFound)));
    }

    #[tokio::test]
    async fn test_enroll_rejects_poor_quality() {
        let edge = BoundingBox { x: 0.0, y: 0.0, width: 100.0, height: 100.0, confidence: 2.0 };
        let p = pipeline(FakeDetector { boxes: vec![edge], delay: Duration::ZERO }, DisabledLiveness);
        let err = p.enroll(9, "Zoe", frame()).await.unwrap_err();
        assert!(matches!(err, EnrollmentError::PoorQuality(Rejection::OffCenter(_))));
        assert_eq!(p.store().len().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_enroll_and_recognize() {
        let p = pipeline(FakeDetector { boxes: vec![face_at(270.0, 1)], delay: Duration::ZERO }, DisabledLiveness);
        let mut seen = 0usize;

        let writer = {
            let p = p.clone();
            tokio::spawn(async move {
                for _ in 0..20 {
                    p.enroll(1, "Ana", frame()).await.unwrap();
                }
            })
        };
        for _ in 0..20 {
            if let Ok(report) = p.recognize(frame()).await {
                assert!(matches!(report.outcomes[0].label, PersonLabel::Resolved { person_id: 1, .. }));
                seen += 1;
            }
        }
        writer.await.unwrap();
        assert_eq!(p.store().len().unwrap(), 21);
        assert_eq!(seen, 20);
    }

    #[test]
    fn test_new_rejects_dimension_mismatch() {
        let err = Pipeline::new(
            Arc::new(FailingDetector),
            Arc::new(FakeEmbedder),
            Arc::new(DisabledLiveness),
            Arc::new(EmbeddingStore::new(DIM + 1)),
            PipelineConfig::default(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, StoreError::DimensionMismatch { .. }));
    }
}
