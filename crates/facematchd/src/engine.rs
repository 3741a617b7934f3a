use crate::config::Config;
use facematch_core::{
    ArcFaceEmbedder, DisabledLiveness, EmbeddingStore, Embedder, EnrollmentError, Frame, FrameReport, FrameStream,
    LivenessChecker, OnnxLivenessChecker, PersonSummary, Pipeline, RecognizeError, ScrfdDetector, StageError,
    StoreError,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("detector error: {0}")]
    Detector(#[from] facematch_core::DetectionError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] facematch_core::ExtractionError),
    #[error("liveness error: {0}")]
    Liveness(#[from] facematch_core::liveness::LivenessError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("enrollment failed: {0}")]
    Enrollment(#[from] EnrollmentError),
    #[error("unenroll failed: {0}")]
    Unenroll(#[from] StageError<StoreError>),
    #[error("recognition failed: {0}")]
    Recognize(#[from] RecognizeError),
    #[error("cannot read image: {0}")]
    Image(#[from] image::ImageError),
    #[error("worker task failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
    #[error("engine task exited")]
    ChannelClosed,
}

/// Store mutations, serialized through the owner task.
enum EngineRequest {
    Enroll {
        person_id: i64,
        person_name: String,
        image: Frame,
        reply: oneshot::Sender<Result<Uuid, EngineError>>,
    },
    Unenroll {
        person_id: i64,
        reply: oneshot::Sender<Result<usize, EngineError>>,
    },
}

/// Clone-safe handle to the engine.
///
/// Recognition runs directly on the shared pipeline; enrollment changes go
/// through the owner task, which also persists the snapshot after each one.
/// A mutation whose snapshot cannot be written is rolled back in memory.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    pipeline: Pipeline,
    /// One frame stream per caller, so a caller's newer frame only
    /// supersedes that caller's older ones.
    streams: Arc<Mutex<HashMap<String, FrameStream>>>,
    liveness_enabled: bool,
}

impl EngineHandle {
    pub async fn enroll(&self, person_id: i64, person_name: &str, image_path: PathBuf) -> Result<Uuid, EngineError> {
        let image = load_image(image_path).await?;
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Enroll {
                person_id,
                person_name: person_name.to_string(),
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    pub async fn unenroll(&self, person_id: i64) -> Result<usize, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Unenroll { person_id, reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    pub async fn recognize(&self, caller: &str, image_path: PathBuf) -> Result<FrameReport, EngineError> {
        let frame = load_image(image_path).await?;
        let stream = self.streams.lock().await.entry(caller.to_string()).or_default().clone();
        Ok(self.pipeline.recognize_on(&stream, frame).await?)
    }

    pub fn people(&self) -> Result<Vec<PersonSummary>, EngineError> {
        Ok(self.pipeline.store().people()?)
    }

    pub fn status(&self) -> serde_json::Value {
        let store = self.pipeline.store();
        serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "records": store.len().ok(),
            "embedding_dim": store.dim(),
            "similarity_threshold": self.pipeline.config().similarity_threshold,
            "liveness_enabled": self.liveness_enabled,
        })
    }
}

async fn load_image(path: PathBuf) -> Result<Frame, EngineError> {
    Ok(tokio::task::spawn_blocking(move || Frame::open(&path)).await??)
}

/// Load the models and snapshot, then spawn the owner task.
///
/// Fails fast at startup if any model or the snapshot is unusable.
pub fn spawn_engine(config: &Config) -> Result<EngineHandle, EngineError> {
    let detector = ScrfdDetector::load(&config.scrfd_model_path())?;
    let embedder = ArcFaceEmbedder::load(&config.arcface_model_path())?;

    let liveness: Arc<dyn LivenessChecker> = if config.liveness_enabled {
        Arc::new(OnnxLivenessChecker::load(&config.liveness_model_path())?)
    } else {
        tracing::info!("liveness disabled via FACEMATCH_LIVENESS_ENABLED=0");
        Arc::new(DisabledLiveness)
    };

    let store = Arc::new(EmbeddingStore::open_or_new(&config.store_path, embedder.dim())?);
    tracing::info!(
        path = %config.store_path.display(),
        records = store.len()?,
        "enrollment store ready"
    );

    let pipeline = Pipeline::new(
        Arc::new(detector),
        Arc::new(embedder),
        liveness,
        Arc::clone(&store),
        config.pipeline.clone(),
    )?;

    Ok(start(pipeline, config.store_path.clone(), config.liveness_enabled))
}

/// Spawn the owner task for an already-built pipeline.
fn start(pipeline: Pipeline, store_path: PathBuf, liveness_enabled: bool) -> EngineHandle {
    let (tx, rx) = mpsc::channel::<EngineRequest>(4);
    tokio::spawn(run_owner(pipeline.clone(), store_path, rx));
    EngineHandle { tx, pipeline, streams: Arc::default(), liveness_enabled }
}

async fn run_owner(pipeline: Pipeline, store_path: PathBuf, mut rx: mpsc::Receiver<EngineRequest>) {
    tracing::info!("engine owner task started");
    while let Some(req) = rx.recv().await {
        match req {
            EngineRequest::Enroll { person_id, person_name, image, reply } => {
                let result = match pipeline.enroll(person_id, &person_name, image).await {
                    Ok(record_id) => match persist(&pipeline, &store_path).await {
                        Ok(()) => Ok(record_id),
                        Err(e) => {
                            revert(&pipeline, "enroll", move |store| {
                                store.remove_record(record_id).map(|_| ())
                            })
                            .await;
                            Err(e)
                        }
                    },
                    Err(e) => {
                        tracing::warn!(person_id, error = %e, "enroll failed");
                        Err(e.into())
                    }
                };
                let _ = reply.send(result);
            }
            EngineRequest::Unenroll { person_id, reply } => {
                let _ = reply.send(unenroll_persisted(&pipeline, &store_path, person_id).await);
            }
        }
    }
    tracing::info!("engine owner task exiting");
}

async fn unenroll_persisted(
    pipeline: &Pipeline,
    store_path: &std::path::Path,
    person_id: i64,
) -> Result<usize, EngineError> {
    let store = Arc::clone(pipeline.store());
    let before = tokio::task::spawn_blocking(move || store.records()).await??;
    let removed = pipeline.unenroll(person_id).await?;
    if let Err(e) = persist(pipeline, store_path).await {
        revert(pipeline, "unenroll", move |store| store.replace(before)).await;
        return Err(e);
    }
    Ok(removed)
}

/// Undo an in-memory change whose snapshot could not be written.
async fn revert<F>(pipeline: &Pipeline, change: &'static str, undo: F)
where
    F: FnOnce(&EmbeddingStore) -> Result<(), StoreError> + Send + 'static,
{
    let store = Arc::clone(pipeline.store());
    match tokio::task::spawn_blocking(move || undo(&store)).await {
        Ok(Ok(())) => tracing::warn!(change, "snapshot write failed, change reverted"),
        Ok(Err(e)) => tracing::error!(change, error = %e, "snapshot write failed and revert failed"),
        Err(e) => tracing::error!(change, error = %e, "revert task failed"),
    }
}

async fn persist(pipeline: &Pipeline, path: &std::path::Path) -> Result<(), EngineError> {
    let store = Arc::clone(pipeline.store());
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || store.save(&path)).await??;
    Ok(())
}
