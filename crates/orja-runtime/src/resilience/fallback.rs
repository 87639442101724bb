//! Per-stage outcome with fallback on failure.

use std::fmt::Display;
use std::future::Future;
use std::time::Instant;

/// Result of one pipeline stage.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome<T> {
    /// The stage ran and produced a value.
    Completed { value: T, latency_ms: f64 },

    /// The stage failed; `fallback` stands in for its value.
    Degraded { fallback: T, error: String },
}

impl<T> StageOutcome<T> {
    pub fn value(&self) -> &T {
        match self {
            StageOutcome::Completed { value, .. } => value,
            StageOutcome::Degraded { fallback, .. } => fallback,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            StageOutcome::Completed { value, .. } => value,
            StageOutcome::Degraded { fallback, .. } => fallback,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, StageOutcome::Completed { .. })
    }

    /// Elapsed time; absent for a degraded stage.
    pub fn latency_ms(&self) -> Option<f64> {
        match self {
            StageOutcome::Completed { latency_ms, .. } => Some(*latency_ms),
            StageOutcome::Degraded { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            StageOutcome::Completed { .. } => None,
            StageOutcome::Degraded { error, .. } => Some(error),
        }
    }
}

/// Run one stage, timing it and substituting `fallback` on error.
pub async fn run_stage<T, E, Fut, F>(stage: &str, work: Fut, fallback: F) -> StageOutcome<T>
where
    E: Display,
    Fut: Future<Output = Result<T, E>>,
    F: FnOnce() -> T,
{
    let start = Instant::now();
    match work.await {
        Ok(value) => StageOutcome::Completed {
            value,
            latency_ms: start.elapsed().as_secs_f64() * 1000.0,
        },
        Err(e) => {
            tracing::error!(stage = stage, error = %e, "Stage failed, using fallback");
            StageOutcome::Degraded {
                fallback: fallback(),
                error: e.to_string(),
            }
        }
    }
}
