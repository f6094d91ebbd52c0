use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How samples recorded under a metric name are interpreted.
///
/// Every metric stores the same raw aggregate (count, sum, min, max, last value),
/// the kind only decides what else is tracked and how the value is reported:
///
/// - [`Counter`](MetricKind::Counter): the interesting value is the sum.
/// - [`Gauge`](MetricKind::Gauge): the interesting value is the last sample.
/// - [`Rate`](MetricKind::Rate): the fraction of samples that were non-zero.
/// - [`Trend`](MetricKind::Trend): a distribution; percentiles are estimated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Gauge,
    Rate,
    Trend,
}

/// Names of the metrics the engine records on its own.
pub mod names {
    pub const ITERATIONS: &str = "iterations";
    /// Milliseconds
    pub const ITERATION_DURATION: &str = "iteration_duration";
    pub const ITERATIONS_FAILED: &str = "iterations_failed";
    pub const ITERATIONS_PANICKED: &str = "iterations_panicked";

    pub const VUS: &str = "vus";
    pub const VUS_MAX: &str = "vus_max";
    pub const VUS_FORCED_STOP: &str = "vus_forced_stop";

    pub const HTTP_REQS: &str = "http_reqs";
    /// Milliseconds
    pub const HTTP_REQ_DURATION: &str = "http_req_duration";
    pub const HTTP_REQ_FAILED: &str = "http_req_failed";
    pub const TRANSPORT_ERRORS: &str = "transport_errors";

    pub const CHECKS: &str = "checks";
    /// Prefix of the per-check rate metrics, e.g. `checks::status is 200`.
    pub const CHECK_PREFIX: &str = "checks::";
}

/// Why an iteration did not succeed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "lowercase")]
pub enum IterationFailure {
    /// The iteration returned an error.
    Error(String),
    /// The iteration panicked. The panic was contained at the virtual user boundary.
    Panic(String),
}

/// The outcome of a single invocation of the user iteration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IterationResult {
    pub duration: Duration,
    pub success: bool,
    pub error: Option<IterationFailure>,
}

impl IterationResult {
    pub fn success(duration: Duration) -> Self {
        Self {
            duration,
            success: true,
            error: None,
        }
    }

    pub fn failure(duration: Duration, failure: IterationFailure) -> Self {
        Self {
            duration,
            success: false,
            error: Some(failure),
        }
    }

    pub fn panicked(&self) -> bool {
        matches!(self.error, Some(IterationFailure::Panic(_)))
    }
}
