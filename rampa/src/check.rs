//! Named assertions.
//!
//! A check is a named predicate over a value, typically an
//! [`HttpResponse`](crate::http::HttpResponse). Every evaluation is recorded twice:
//! into the `checks` rate (all checks together) and into `checks::<name>`. A
//! failing check never fails the iteration by itself; call
//! [`CheckOutcome::into_result`] and `?` it when it should.
//!
//! ```rust
//! use rampa::{MetricsSink, check::Checks};
//!
//! let metrics = MetricsSink::new();
//! let checks = Checks::new()
//!     .with("status is 200", |status: &u16| *status == 200)
//!     .with("not a redirect", |status: &u16| !(300..400).contains(status));
//!
//! let outcome = checks.run(&metrics, &500);
//! assert_eq!(outcome.failed, vec!["status is 200".to_string()]);
//! assert!(outcome.into_result().is_err());
//! ```
use crate::{error::CheckFailure, metric::names, metrics::MetricsSink};

type Predicate<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;

/// A reusable, ordered set of named checks. Build it once and share it with
/// every virtual user.
pub struct Checks<T> {
    checks: Vec<(String, Predicate<T>)>,
}

impl<T> Default for Checks<T> {
    fn default() -> Self {
        Self { checks: Vec::new() }
    }
}

impl<T> std::fmt::Debug for Checks<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.checks.iter().map(|(name, _)| name))
            .finish()
    }
}

impl<T> Checks<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(
        mut self,
        name: impl Into<String>,
        predicate: impl Fn(&T) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.checks.push((name.into(), Box::new(predicate)));
        self
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// Evaluate every check against `subject` and record the results.
    pub fn run(&self, metrics: &MetricsSink, subject: &T) -> CheckOutcome {
        let mut outcome = CheckOutcome::default();
        for (name, predicate) in &self.checks {
            outcome.push(metrics, name, predicate(subject));
        }
        outcome
    }
}

/// Evaluate ad-hoc checks without building a [`Checks`] set.
pub fn check<T>(
    metrics: &MetricsSink,
    subject: &T,
    checks: &[(&str, &dyn Fn(&T) -> bool)],
) -> CheckOutcome {
    let mut outcome = CheckOutcome::default();
    for (name, predicate) in checks {
        outcome.push(metrics, name, predicate(subject));
    }
    outcome
}

/// Names of the checks that passed and failed, in evaluation order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CheckOutcome {
    pub passed: Vec<String>,
    pub failed: Vec<String>,
}

impl CheckOutcome {
    fn push(&mut self, metrics: &MetricsSink, name: &str, passed: bool) {
        metrics.rate(names::CHECKS, passed);
        metrics.rate(&format!("{}{name}", names::CHECK_PREFIX), passed);
        if passed {
            self.passed.push(name.to_owned());
        } else {
            tracing::trace!(check = name, "check failed");
            self.failed.push(name.to_owned());
        }
    }

    pub fn all_passed(&self) -> bool {
        self.failed.is_empty()
    }

    /// Turn failed checks into an error, for iterations that treat them as fatal.
    pub fn into_result(self) -> Result<(), CheckFailure> {
        if self.failed.is_empty() {
            Ok(())
        } else {
            Err(CheckFailure {
                failed: self.failed,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_overall_and_per_check_rates() {
        let metrics = MetricsSink::new();
        let checks = Checks::new()
            .with("is even", |n: &u32| n % 2 == 0)
            .with("is small", |n: &u32| *n < 10);

        for n in [2, 3, 40, 8] {
            checks.run(&metrics, &n);
        }

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.get(names::CHECKS).unwrap().count, 8);
        assert_eq!(snapshot.get(names::CHECKS).unwrap().rate, Some(0.75));
        assert_eq!(snapshot.get("checks::is even").unwrap().rate, Some(0.75));
        assert_eq!(snapshot.get("checks::is small").unwrap().rate, Some(0.75));
    }

    #[test]
    fn outcome_lists_failures_in_order() {
        let metrics = MetricsSink::new();
        let outcome = check(
            &metrics,
            &"hello",
            &[
                ("non empty", &|s: &&str| !s.is_empty()),
                ("shouting", &|s: &&str| s.chars().all(|c| c.is_uppercase())),
                ("short", &|s: &&str| s.len() < 3),
            ],
        );
        assert_eq!(outcome.passed, vec!["non empty"]);
        assert_eq!(outcome.failed, vec!["shouting", "short"]);
        assert!(!outcome.all_passed());

        let err = outcome.into_result().unwrap_err();
        assert_eq!(err.to_string(), "checks failed: shouting, short");
    }

    #[test]
    fn passing_checks_do_not_error() {
        let metrics = MetricsSink::new();
        let checks = Checks::new().with("always", |_: &()| true);
        assert!(checks.run(&metrics, &()).into_result().is_ok());
        assert_eq!(checks.len(), 1);
    }
}
