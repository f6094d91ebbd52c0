use std::{path::PathBuf, time::Duration};

use thiserror::Error;

use crate::executor::RunSummary;

/// Error returned by a user iteration.
///
/// Boxed so that iterations can use `?` on any error type. Whatever an iteration
/// returns is recorded as a failed iteration and never stops the virtual user.
pub type IterationError = Box<dyn std::error::Error + Send + Sync>;

/// An invalid [`RunPlan`](crate::RunPlan). Always reported before any virtual user
/// is spawned.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("plan has no stages")]
    NoStages,
    #[error("stage {index} has a zero duration")]
    ZeroStageDuration { index: usize },
    #[error("invalid duration {input:?}: {reason}")]
    InvalidDuration { input: String, reason: String },
    #[error("tick interval must be greater than zero")]
    ZeroTick,
    #[error("max duration must be greater than zero")]
    ZeroMaxDuration,
    #[error("iteration limit must be greater than zero")]
    ZeroIterations,
    #[error("stage durations add up to more than can be scheduled")]
    DurationOverflow,
    #[error("failed to read plan file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse plan file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

impl ConfigError {
    pub(crate) fn invalid_duration(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidDuration {
            input: input.into(),
            reason: reason.into(),
        }
    }
}

/// A request that never produced a response.
///
/// Non-2xx statuses are not transport errors; they come back as a normal
/// [`HttpResponse`](crate::http::HttpResponse).
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("invalid request: {0}")]
    Request(String),
    #[error("transport failure: {0}")]
    Other(String),
}

/// One or more named checks did not pass.
///
/// Checks never fail an iteration on their own; an iteration that wants to treat
/// a failed check as fatal returns this error with `?`.
#[derive(Debug, Error)]
#[error("checks failed: {}", .failed.join(", "))]
pub struct CheckFailure {
    pub failed: Vec<String>,
}

/// Terminating errors of a run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The run was aborted from outside. The summary gathered up to that point is
    /// kept so it can still be reported.
    #[error("run cancelled after {:.1}s", .0.elapsed.as_secs_f64())]
    Cancelled(Box<RunSummary>),
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("failed to write report: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to serialize report: {0}")]
    Serialize(#[from] serde_json::Error),
}
