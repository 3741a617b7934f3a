//! Runs one collaborator call off the async executor and times it.

use std::time::{Duration, Instant};
use thiserror::Error;

/// A collaborator failure, or the orchestrator giving up on the call.
#[derive(Error, Debug)]
pub enum StageError<E> {
    #[error("{0}")]
    Failed(E),
    #[error("timed out after {0:?}")]
    TimedOut(Duration),
    #[error("worker panicked: {0}")]
    Panicked(String),
}

/// Run `work` on the blocking pool, bounded by `limit` when set.
///
/// Always returns the elapsed wall time alongside the result. A timed-out
/// call keeps running on its worker thread; its result is discarded.
pub(crate) async fn run_stage<T, E, F>(limit: Option<Duration>, work: F) -> (Result<T, StageError<E>>, Duration)
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    let started = Instant::now();
    let task = tokio::task::spawn_blocking(work);

    let joined = match limit {
        Some(limit) => match tokio::time::timeout(limit, task).await {
            Ok(joined) => joined,
            Err(_) => return (Err(StageError::TimedOut(limit)), started.elapsed()),
        },
        None => task.await,
    };

    let result = match joined {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(StageError::Failed(e)),
        Err(join_err) => Err(StageError::Panicked(join_err.to_string())),
    };
    (result, started.elapsed())
}
