//! Virtual users.
//!
//! A virtual user is one tokio task that calls the scenario's iteration in a loop.
//! Its lifecycle is a small state machine:
//!
//! ```text
//! Idle -> Running -> Stopping -> Stopped
//! ```
//!
//! The executor moves a user to `Stopping`; the user observes that only between
//! iterations, so an iteration in flight is never interrupted by a graceful stop.
//! Errors and panics raised by the iteration are recorded as failed iterations
//! and the loop carries on.
use std::{
    panic::AssertUnwindSafe,
    sync::{
        Arc,
        atomic::{AtomicU8, AtomicU64, Ordering},
    },
};

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::{
    error::IterationError,
    metric::{IterationFailure, IterationResult},
    metrics::MetricsSink,
};

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VuState {
    Idle = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
}

impl VuState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Idle,
            1 => Self::Running,
            2 => Self::Stopping,
            _ => Self::Stopped,
        }
    }
}

/// State and progress of one virtual user, shared between the user's task and
/// the executor.
///
/// Progress lives here rather than in the task's return value so that it can
/// still be read after the task was aborted.
#[derive(Debug)]
pub struct VuShared {
    state: AtomicU8,
    iterations: AtomicU64,
    failures: AtomicU64,
}

impl Default for VuShared {
    fn default() -> Self {
        Self {
            state: AtomicU8::new(VuState::Idle as u8),
            iterations: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }
}

impl VuShared {
    pub fn state(&self) -> VuState {
        VuState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move from `from` to `to`; returns false if the user was not in `from`.
    pub fn transition(&self, from: VuState, to: VuState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Ask the user to stop after its current iteration.
    ///
    /// Works from both `Idle` and `Running`; a user that never got to run stops
    /// without starting an iteration.
    pub fn request_stop(&self) {
        let _ = self.transition(VuState::Running, VuState::Stopping)
            || self.transition(VuState::Idle, VuState::Stopping);
    }

    pub(crate) fn mark_stopped(&self) {
        self.state.store(VuState::Stopped as u8, Ordering::Release);
    }

    pub fn summary(&self, id: u64, forced: bool) -> VuSummary {
        VuSummary {
            id,
            iterations: self.iterations.load(Ordering::Acquire),
            failures: self.failures.load(Ordering::Acquire),
            forced,
        }
    }
}

/// What one virtual user did over the run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VuSummary {
    pub id: u64,
    /// Completed iterations, successful or not
    pub iterations: u64,
    pub failures: u64,
    /// The user was aborted after the graceful stop period ran out.
    pub forced: bool,
}

/// A global cap on the number of iterations, shared by every virtual user.
#[derive(Clone, Debug)]
pub struct IterationBudget {
    remaining: Arc<AtomicU64>,
}

impl IterationBudget {
    pub fn new(limit: u64) -> Self {
        Self {
            remaining: Arc::new(AtomicU64::new(limit)),
        }
    }

    /// Claim one iteration. Returns false once the budget is spent.
    pub fn claim(&self) -> bool {
        self.remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining.load(Ordering::Acquire) == 0
    }
}

pub struct VirtualUser<F> {
    pub id: u64,
    shared: Arc<VuShared>,
    iteration: F,
    metrics: MetricsSink,
    budget: Option<IterationBudget>,
}

impl<F, Fut> VirtualUser<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), IterationError>> + Send + 'static,
{
    pub fn new(
        id: u64,
        iteration: F,
        metrics: MetricsSink,
        budget: Option<IterationBudget>,
    ) -> Self {
        Self {
            id,
            shared: Arc::new(VuShared::default()),
            iteration,
            metrics,
            budget,
        }
    }

    pub fn shared(&self) -> Arc<VuShared> {
        self.shared.clone()
    }

    /// Loop until asked to stop or the iteration budget runs out.
    pub async fn run(self) {
        // a user stopped before it was ever polled never starts
        self.shared.transition(VuState::Idle, VuState::Running);

        while self.shared.state() == VuState::Running {
            if self.budget.as_ref().is_some_and(|b| !b.claim()) {
                tracing::debug!(vu = self.id, "iteration budget exhausted");
                break;
            }

            let result = self.iterate().await;
            self.metrics.record_iteration(&result);
            self.shared.iterations.fetch_add(1, Ordering::AcqRel);
            if !result.success {
                self.shared.failures.fetch_add(1, Ordering::AcqRel);
            }

            // An iteration that never awaits must not starve the other users
            tokio::task::yield_now().await;
        }

        self.shared.mark_stopped();
    }

    async fn iterate(&self) -> IterationResult {
        let start = Instant::now();
        let outcome = AssertUnwindSafe(async { (self.iteration)().await })
            .catch_unwind()
            .await;
        let duration = start.elapsed();

        match outcome {
            Ok(Ok(())) => IterationResult::success(duration),
            Ok(Err(e)) => {
                tracing::trace!(vu = self.id, error = %e, "iteration failed");
                IterationResult::failure(duration, IterationFailure::Error(e.to_string()))
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::warn!(vu = self.id, %message, "iteration panicked");
                IterationResult::failure(duration, IterationFailure::Panic(message))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::atomic::AtomicUsize, time::Duration};

    use super::*;
    use crate::metric::names;

    #[test]
    fn state_transitions() {
        let shared = VuShared::default();
        assert_eq!(shared.state(), VuState::Idle);
        assert!(shared.transition(VuState::Idle, VuState::Running));
        assert!(!shared.transition(VuState::Idle, VuState::Running));
        shared.request_stop();
        assert_eq!(shared.state(), VuState::Stopping);
        // stopping twice is harmless
        shared.request_stop();
        assert_eq!(shared.state(), VuState::Stopping);
    }

    #[test]
    fn budget_is_never_overdrawn() {
        let budget = IterationBudget::new(3);
        let claimed = (0..10).filter(|_| budget.claim()).count();
        assert_eq!(claimed, 3);
        assert!(budget.is_exhausted());
    }

    #[tokio::test(start_paused = true)]
    async fn stops_between_iterations() {
        let calls = Arc::new(AtomicUsize::new(0));
        let metrics = MetricsSink::new();
        let vu = VirtualUser::new(
            1,
            {
                let calls = calls.clone();
                move || {
                    let calls = calls.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok(())
                    }
                }
            },
            metrics.clone(),
            None,
        );
        let shared = vu.shared();
        let handle = tokio::spawn(vu.run());

        tokio::time::sleep(Duration::from_millis(250)).await;
        shared.request_stop();
        handle.await.unwrap();

        assert_eq!(shared.state(), VuState::Stopped);
        // the third iteration was in flight when the stop came and still finished
        let summary = shared.summary(1, false);
        assert_eq!(summary.iterations, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(metrics.snapshot().counter(names::ITERATIONS), 3.0);
    }

    #[tokio::test(start_paused = true)]
    async fn errors_and_panics_do_not_stop_the_user() {
        let calls = Arc::new(AtomicUsize::new(0));
        let metrics = MetricsSink::new();
        let vu = VirtualUser::new(
            7,
            {
                let calls = calls.clone();
                move || {
                    let calls = calls.clone();
                    async move {
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        let n = calls.fetch_add(1, Ordering::SeqCst);
                        if n % 2 == 0 {
                            panic!("iteration {n} exploded");
                        }
                        Err::<(), IterationError>("bad response".into())
                    }
                }
            },
            metrics.clone(),
            None,
        );
        let shared = vu.shared();
        let handle = tokio::spawn(vu.run());

        tokio::time::sleep(Duration::from_millis(105)).await;
        assert_eq!(shared.state(), VuState::Running);
        shared.request_stop();
        handle.await.unwrap();

        let summary = shared.summary(7, false);
        assert!(summary.iterations >= 10);
        assert_eq!(summary.failures, summary.iterations);

        let snapshot = metrics.snapshot();
        assert_eq!(
            snapshot.counter(names::ITERATIONS_FAILED),
            summary.iterations as f64
        );
        assert!(snapshot.counter(names::ITERATIONS_PANICKED) >= 5.0);
    }

    #[tokio::test]
    async fn budget_ends_the_loop() {
        let metrics = MetricsSink::new();
        let vu = VirtualUser::new(
            1,
            || async { Ok::<(), IterationError>(()) },
            metrics.clone(),
            Some(IterationBudget::new(5)),
        );
        let shared = vu.shared();
        vu.run().await;

        assert_eq!(shared.state(), VuState::Stopped);
        assert_eq!(shared.summary(1, false).iterations, 5);
    }

    #[tokio::test]
    async fn stopped_before_start_never_iterates() {
        let calls = Arc::new(AtomicUsize::new(0));
        let vu = VirtualUser::new(
            1,
            {
                let calls = calls.clone();
                move || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok::<(), IterationError>(()) }
                }
            },
            MetricsSink::new(),
            None,
        );
        let shared = vu.shared();
        shared.request_stop();
        vu.run().await;
        assert_eq!(shared.state(), VuState::Stopped);
        assert_eq!(shared.summary(1, false).iterations, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
