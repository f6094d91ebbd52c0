use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::{
    fmt::{self, Debug, Display},
    future::Future,
    io::Write,
    path::PathBuf,
};

use crate::{
    aggregate::MetricSummary,
    error::ReportError,
    executor::{EndReason, RunSummary},
    metric::{MetricKind, names},
    metrics::Snapshot,
    vu::VuSummary,
};

/// A [`Report`] is the processed, presentation-ready form of a [`RunSummary`].
///
/// Reports are pure data: built with `From<RunSummary>`, free of I/O, and
/// serializable so that any [`Reporter`] can ship them wherever it wants.
pub trait Report
where
    Self: Send + Sync + Debug + From<RunSummary> + Serialize + DeserializeOwned,
{
}

/// A [`Reporter`] consumes a [`Report`] and performs the side effect: printing it,
/// writing it to a file, sending it somewhere.
pub trait Reporter<R: Report> {
    fn report(&self, report: &R) -> impl Future<Output = Result<(), ReportError>>;
}

/// The default end-of-run report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryReport {
    pub scenario: String,
    pub end_reason: EndReason,
    pub elapsed_secs: f64,
    pub iterations: u64,
    pub iterations_per_sec: f64,
    pub vus: Vec<VuSummary>,
    pub metrics: Snapshot,
}

impl From<RunSummary> for SummaryReport {
    fn from(summary: RunSummary) -> Self {
        let elapsed_secs = summary.elapsed.as_secs_f64();
        let iterations = summary.iterations();
        Self {
            iterations_per_sec: if elapsed_secs > 0.0 {
                iterations as f64 / elapsed_secs
            } else {
                0.0
            },
            scenario: summary.scenario,
            end_reason: summary.end_reason,
            elapsed_secs,
            iterations,
            vus: summary.vus,
            metrics: summary.metrics,
        }
    }
}

impl Report for SummaryReport {}

const NAME_WIDTH: usize = 34;

impl SummaryReport {
    /// Overall check pass rate, if any check ran.
    pub fn check_pass_rate(&self) -> Option<f64> {
        self.metrics.get(names::CHECKS).and_then(|m| m.rate)
    }

    fn write_metric(&self, f: &mut fmt::Formatter<'_>, name: &str, m: &MetricSummary) -> fmt::Result {
        let indent = if name.starts_with(names::CHECK_PREFIX) { "  " } else { "" };
        let label = format!("{indent}{name}");
        let dots = ".".repeat(NAME_WIDTH.saturating_sub(label.len()).max(2));
        write!(f, "{label}{dots}: ")?;

        let num = |v: Option<f64>| v.map_or_else(|| "-".to_string(), |v| format!("{v:.2}"));
        match m.kind {
            MetricKind::Counter => {
                let per_sec = if self.elapsed_secs > 0.0 {
                    m.sum / self.elapsed_secs
                } else {
                    0.0
                };
                writeln!(f, "{}  {per_sec:.2}/s", m.sum)
            }
            MetricKind::Gauge => writeln!(
                f,
                "{}  min={} max={}",
                num(m.last),
                num(m.min),
                num(m.max)
            ),
            MetricKind::Rate => {
                let rate = m.rate.unwrap_or(0.0);
                let passes = (rate * m.count as f64).round() as u64;
                writeln!(
                    f,
                    "{:.2}%  ✓ {passes}  ✗ {}",
                    rate * 100.0,
                    m.count - passes.min(m.count)
                )
            }
            MetricKind::Trend => writeln!(
                f,
                "avg={} min={} p(50)={} p(90)={} p(99)={} max={}",
                num(m.mean),
                num(m.min),
                num(m.p50),
                num(m.p90),
                num(m.p99),
                num(m.max)
            ),
        }
    }
}

impl Display for SummaryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "scenario: {} ({} after {:.1}s)",
            self.scenario, self.end_reason, self.elapsed_secs
        )?;
        writeln!(
            f,
            "iterations: {} ({:.2}/s) over {} virtual users",
            self.iterations,
            self.iterations_per_sec,
            self.vus.len()
        )?;
        writeln!(f)?;
        if self.metrics.is_empty() {
            return writeln!(f, "no metrics recorded");
        }
        for (name, metric) in self.metrics.iter() {
            self.write_metric(f, name, metric)?;
        }
        Ok(())
    }
}

/// Prints the human-readable summary to stdout.
pub struct StdoutReporter;

impl<R: Report + Display> Reporter<R> for StdoutReporter {
    async fn report(&self, report: &R) -> Result<(), ReportError> {
        let mut out = std::io::stdout().lock();
        writeln!(out, "{report}")?;
        Ok(())
    }
}

/// Writes the report as pretty-printed JSON.
pub struct JsonReporter {
    pub path: PathBuf,
}

impl JsonReporter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl<R: Report> Reporter<R> for JsonReporter {
    async fn report(&self, report: &R) -> Result<(), ReportError> {
        let json = serde_json::to_vec_pretty(report)?;
        tokio::fs::write(&self.path, json).await?;
        tracing::info!(path = %self.path.display(), "Report written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::MetricsSink;

    fn summary() -> RunSummary {
        let metrics = MetricsSink::new();
        for _ in 0..4 {
            metrics.add(names::HTTP_REQS, 1.0);
            metrics.rate(names::CHECKS, false);
            metrics.rate("checks::status is 200", false);
        }
        metrics.record(names::HTTP_REQ_DURATION, 12.0);
        metrics.gauge(names::VUS, 0.0);
        RunSummary {
            scenario: "stocks".into(),
            elapsed: Duration::from_secs(2),
            end_reason: EndReason::Completed,
            vus: vec![
                VuSummary {
                    id: 1,
                    iterations: 3,
                    failures: 0,
                    forced: false,
                },
                VuSummary {
                    id: 2,
                    iterations: 1,
                    failures: 1,
                    forced: false,
                },
            ],
            metrics: metrics.snapshot(),
        }
    }

    #[test]
    fn report_derives_totals() {
        let report = SummaryReport::from(summary());
        assert_eq!(report.iterations, 4);
        assert_eq!(report.iterations_per_sec, 2.0);
        assert_eq!(report.check_pass_rate(), Some(0.0));
    }

    #[test]
    fn human_readable_output() {
        let text = SummaryReport::from(summary()).to_string();
        assert!(text.starts_with("scenario: stocks (completed after 2.0s)"), "{text}");
        assert!(text.contains("iterations: 4 (2.00/s) over 2 virtual users"), "{text}");
        assert!(text.contains("0.00%  ✓ 0  ✗ 4"), "{text}");
        assert!(text.contains("  checks::status is 200"), "{text}");
        assert!(text.contains("http_reqs"), "{text}");
        assert!(text.contains("4  2.00/s"), "{text}");
        assert!(text.contains("avg=12.00 min=12.00"), "{text}");
    }

    #[test]
    fn empty_run_says_so() {
        let mut summary = summary();
        summary.metrics = MetricsSink::new().snapshot();
        let text = SummaryReport::from(summary).to_string();
        assert!(text.ends_with("no metrics recorded\n"), "{text}");
    }

    #[tokio::test]
    async fn json_reporter_writes_the_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        let report = SummaryReport::from(summary());

        JsonReporter::new(&path).report(&report).await.unwrap();

        let written: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(written["scenario"], "stocks");
        assert_eq!(written["end_reason"], "completed");
        assert_eq!(written["metrics"]["http_reqs"]["kind"], "counter");
        assert_eq!(written["metrics"]["http_reqs"]["sum"], 4.0);
        assert_eq!(written["vus"].as_array().unwrap().len(), 2);
    }
}
