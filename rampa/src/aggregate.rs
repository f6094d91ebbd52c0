use hdrhistogram::Histogram;
use serde::{Deserialize, Serialize};

use crate::metric::MetricKind;

/// Trend samples are stored in the histogram with three decimal places.
const HISTOGRAM_SCALE: f64 = 1_000.0;
/// Relative error of the percentile estimates is bounded by 10^-3.
const SIGNIFICANT_FIGURES: u8 = 3;
/// Largest trend sample the histogram tells apart: one hour, in milliseconds.
const HISTOGRAM_MAX: u64 = 3_600_000_000;

/// The running aggregate behind a single metric name.
///
/// A `Series` stores only compact, raw data: counters, extrema and, for trends,
/// an HDR histogram acting as the streaming quantile estimator. Derived values
/// (mean, rate, percentiles) are computed on demand by [`Series::summary`], so
/// the hot path in [`Series::consume`] stays a handful of arithmetic operations.
///
/// # Memory vs accuracy
///
/// The histogram has a fixed range of up to one hour (in milliseconds) and keeps
/// three significant figures, which bounds the percentile error at 0.1%
/// regardless of how many samples are recorded. Samples outside that range are
/// clamped inside the histogram (negative ones to zero); count, sum and extrema
/// always see the exact value.
#[derive(Debug, Clone)]
pub struct Series {
    kind: MetricKind,
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
    last: f64,
    non_zero: u64,
    histogram: Option<Histogram<u64>>,
}

impl Series {
    pub fn new(kind: MetricKind) -> Self {
        let histogram = if kind == MetricKind::Trend {
            Histogram::new_with_bounds(1, HISTOGRAM_MAX, SIGNIFICANT_FIGURES).ok()
        } else {
            None
        };
        Self {
            kind,
            count: 0,
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            last: 0.0,
            non_zero: 0,
            histogram,
        }
    }

    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    /// Incorporate a single sample. Non-finite values are ignored.
    pub fn consume(&mut self, value: f64) {
        if !value.is_finite() {
            return;
        }
        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.last = value;
        if value != 0.0 {
            self.non_zero += 1;
        }
        if let Some(histogram) = self.histogram.as_mut() {
            histogram.saturating_record((value.max(0.0) * HISTOGRAM_SCALE).round() as u64);
        }
    }

    /// Derive the reportable statistics from the raw aggregate.
    pub fn summary(&self) -> MetricSummary {
        let empty = self.count == 0;
        let percentile = |q: f64| {
            self.histogram
                .as_ref()
                .filter(|h| !h.is_empty())
                .map(|h| h.value_at_quantile(q) as f64 / HISTOGRAM_SCALE)
        };
        MetricSummary {
            kind: self.kind,
            count: self.count,
            sum: self.sum,
            min: (!empty).then_some(self.min),
            max: (!empty).then_some(self.max),
            mean: (!empty).then(|| self.sum / self.count as f64),
            last: (!empty).then_some(self.last),
            rate: (!empty).then(|| self.non_zero as f64 / self.count as f64),
            p50: percentile(0.50),
            p90: percentile(0.90),
            p99: percentile(0.99),
        }
    }
}

/// Point-in-time statistics of one metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub kind: MetricKind,
    pub count: u64,
    pub sum: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    pub last: Option<f64>,
    /// Fraction of non-zero samples, in `[0, 1]`.
    pub rate: Option<f64>,
    pub p50: Option<f64>,
    pub p90: Option<f64>,
    pub p99: Option<f64>,
}
