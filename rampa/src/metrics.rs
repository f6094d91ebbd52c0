use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::{
    aggregate::{MetricSummary, Series},
    metric::{IterationResult, MetricKind, names},
};

type SeriesHandle = Arc<Mutex<Series>>;

/// Thread-safe, name-keyed metric store shared by every virtual user.
///
/// Cloning a `MetricsSink` is cheap and yields a handle to the same store, so the
/// sink is usually created once, handed to the [`Scenario`](crate::Scenario) and
/// captured by the iteration (directly or through an
/// [`HttpExecutor`](crate::http::HttpExecutor)).
///
/// Each metric lives behind its own mutex: writers to different metrics never
/// contend, and the registry lock is only taken for writing the first time a name
/// is seen. Unknown names are created on first use with the kind of that first
/// call; later calls with another kind are folded into the existing series.
///
/// ```rust
/// use rampa::MetricsSink;
///
/// let metrics = MetricsSink::new();
/// metrics.record("cart_size", 3.0);
/// metrics.add("orders", 1.0);
/// metrics.rate("in_stock", true);
///
/// let snapshot = metrics.snapshot();
/// assert_eq!(snapshot.get("orders").unwrap().sum, 1.0);
/// ```
#[derive(Clone, Default)]
pub struct MetricsSink {
    series: Arc<RwLock<HashMap<String, SeriesHandle>>>,
}

impl std::fmt::Debug for MetricsSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsSink")
            .field("metrics", &self.series.read().len())
            .finish()
    }
}

impl MetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a sample into a trend (distribution) metric.
    pub fn record(&self, name: &str, value: f64) {
        self.record_as(MetricKind::Trend, name, value);
    }

    /// Add `value` to a counter.
    pub fn add(&self, name: &str, value: f64) {
        self.record_as(MetricKind::Counter, name, value);
    }

    /// Set a gauge to `value`.
    pub fn gauge(&self, name: &str, value: f64) {
        self.record_as(MetricKind::Gauge, name, value);
    }

    /// Record one pass/fail sample into a rate.
    pub fn rate(&self, name: &str, passed: bool) {
        self.record_as(MetricKind::Rate, name, if passed { 1.0 } else { 0.0 });
    }

    pub fn record_as(&self, kind: MetricKind, name: &str, value: f64) {
        let series = self.series(kind, name);
        series.lock().consume(value);
    }

    /// Record everything the engine tracks about one finished iteration.
    pub fn record_iteration(&self, result: &IterationResult) {
        self.add(names::ITERATIONS, 1.0);
        self.record(
            names::ITERATION_DURATION,
            result.duration.as_secs_f64() * 1_000.0,
        );
        if !result.success {
            self.add(names::ITERATIONS_FAILED, 1.0);
        }
        if result.panicked() {
            self.add(names::ITERATIONS_PANICKED, 1.0);
        }
    }

    /// A point-in-time copy of every metric.
    ///
    /// Writers are only blocked while their own series is being summarized.
    pub fn snapshot(&self) -> Snapshot {
        let handles: Vec<(String, SeriesHandle)> = self
            .series
            .read()
            .iter()
            .map(|(name, series)| (name.clone(), series.clone()))
            .collect();

        Snapshot(
            handles
                .into_iter()
                .map(|(name, series)| {
                    let summary = series.lock().summary();
                    (name, summary)
                })
                .collect(),
        )
    }

    fn series(&self, kind: MetricKind, name: &str) -> SeriesHandle {
        if let Some(series) = self.series.read().get(name) {
            return series.clone();
        }
        let mut registry = self.series.write();
        let series = registry
            .entry(name.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(Series::new(kind))));
        let existing = series.lock().kind();
        if existing != kind {
            tracing::debug!(
                metric = name,
                ?existing,
                requested = ?kind,
                "metric already registered with another kind"
            );
        }
        series.clone()
    }
}

/// Metric name to statistics, ordered by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot(BTreeMap<String, MetricSummary>);

impl Snapshot {
    pub fn get(&self, name: &str) -> Option<&MetricSummary> {
        self.0.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MetricSummary)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Sum of a counter, zero if it was never recorded.
    pub fn counter(&self, name: &str) -> f64 {
        self.get(name).map(|m| m.sum).unwrap_or(0.0)
    }
}
