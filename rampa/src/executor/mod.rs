//! Executor: orchestration of virtual users over a run plan
//!
//! The `Executor` trait is the runtime that executes a [`Scenario`]. The built-in
//! [`StageExecutor`] ramps a pool of virtual users up and down following the
//! stages of a [`RunPlan`](crate::RunPlan).
pub mod stage;
pub use stage::StageExecutor;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{error::IterationError, metrics::Snapshot, scenario::Scenario, vu::VuSummary};

/// The runtime hook that executes a [`Scenario`].
pub trait Executor<F, Fut>
where
    Self: Send + Sync + Sized,
    F: Fn() -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = Result<(), IterationError>> + Send + 'static,
{
    type Error;
    /// Execute the scenario until its plan is done and return what happened.
    fn exec(
        &self,
        scenario: &Scenario<F, Fut>,
    ) -> impl Future<Output = Result<RunSummary, Self::Error>> + Send;
}

/// Why a run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// Every stage elapsed.
    Completed,
    /// The plan's `max_duration` was reached first.
    MaxDuration,
    /// The plan's iteration limit was spent.
    IterationLimit,
    /// Cancelled from outside.
    Cancelled,
}

impl std::fmt::Display for EndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Completed => "completed",
            Self::MaxDuration => "max duration reached",
            Self::IterationLimit => "iteration limit reached",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Everything a run produced.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunSummary {
    pub scenario: String,
    pub elapsed: Duration,
    pub end_reason: EndReason,
    /// One entry per virtual user that ever ran, ordered by id.
    pub vus: Vec<VuSummary>,
    pub metrics: Snapshot,
}

impl RunSummary {
    /// Sum of the per-user iteration counts.
    pub fn iterations(&self) -> u64 {
        self.vus.iter().map(|vu| vu.iterations).sum()
    }

    pub fn forced_stops(&self) -> usize {
        self.vus.iter().filter(|vu| vu.forced).count()
    }
}
