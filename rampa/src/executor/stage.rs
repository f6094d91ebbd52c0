use std::{collections::VecDeque, sync::Arc, time::Duration};

use tokio::{task::JoinHandle, time::Instant};

use super::{EndReason, Executor, RunSummary};
use crate::{
    error::{IterationError, RunError},
    metric::names,
    metrics::MetricsSink,
    plan::{RunPlan, Scheduler},
    scenario::Scenario,
    vu::{IterationBudget, VirtualUser, VuShared, VuSummary},
};
use internals::*;

/// Executor that ramps a pool of virtual users through the stages of a [`RunPlan`].
///
/// Every `tick` the executor asks the [`Scheduler`] for the target VU count at the
/// current elapsed time and resizes the pool:
///
/// - below target: spawn the missing users, each one a tokio task looping over the
///   scenario's iteration;
/// - above target: mark the oldest users as stopping. They finish the iteration in
///   flight and exit; if that takes longer than `graceful_stop` they are aborted
///   and counted in `vus_forced_stop`.
///
/// The run ends when every stage has elapsed, `max_duration` is reached, the
/// iteration limit is spent, or the cancellation future passed to
/// [`exec_until`](Self::exec_until) resolves. In all cases the remaining users get
/// the same graceful stop treatment before the summary is taken.
///
/// # Tuning knobs
///
/// - `tick`: granularity of pool adjustments. The VU count can lag the ideal
///   ramp by at most one tick. The default of 1s is plenty for ramps measured in
///   seconds; short stages want shorter ticks.
/// - `graceful_stop`: should comfortably exceed the slowest expected iteration,
///   otherwise ramp-downs turn into aborted iterations.
#[derive(Clone, Debug)]
pub struct StageExecutor {
    pub plan: RunPlan,
}

impl StageExecutor {
    pub fn new(plan: RunPlan) -> Self {
        Self { plan }
    }

    /// Run the scenario, stopping early once `cancel` resolves.
    ///
    /// A cancelled run still drains its users and returns the summary inside
    /// [`RunError::Cancelled`].
    pub async fn exec_until<F, Fut, C>(
        &self,
        scenario: &Scenario<F, Fut>,
        cancel: C,
    ) -> Result<RunSummary, RunError>
    where
        F: Fn() -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = Result<(), IterationError>> + Send + 'static,
        C: Future<Output = ()> + Send,
    {
        let plan = &self.plan;
        plan.validate()?;
        let scheduler = Scheduler::new(&plan.stages)?;

        let metrics = scenario.metrics.clone();
        let budget = plan.iterations.map(IterationBudget::new);
        let mut pool = Pool::new(scenario.iteration.clone(), metrics.clone(), budget.clone());

        tracing::info!(
            scenario = %scenario.name,
            stages = plan.stages.len(),
            duration = ?scheduler.total(),
            peak_vus = plan.peak_vus(),
            "Starting run"
        );
        let started = Instant::now();
        // instants too far out to represent are never reached
        let stages_end = started.checked_add(scheduler.total());
        let deadline = plan.max_duration.and_then(|d| started.checked_add(d));
        let mut next_tick = Some(started);
        let mut stage = 0;
        tokio::pin!(cancel);

        let end_reason = loop {
            let now = Instant::now();
            let target = scheduler.target_at(now - started);
            if target.done {
                break EndReason::Completed;
            }
            if deadline.is_some_and(|d| now >= d) {
                break EndReason::MaxDuration;
            }
            if budget.as_ref().is_some_and(IterationBudget::is_exhausted) {
                break EndReason::IterationLimit;
            }
            if target.stage != stage {
                stage = target.stage;
                tracing::info!(stage, target = plan.stages[stage].target, "Entering stage");
            }

            pool.reap(plan.graceful_stop);
            pool.scale_to(target.vus as usize);
            tracing::trace!(
                elapsed = ?(now - started),
                target = target.vus,
                live = pool.live(),
                retiring = pool.retiring(),
                "Tick"
            );

            next_tick = next_tick.and_then(|t| t.checked_add(plan.tick));
            let wake = [next_tick, stages_end, deadline].into_iter().flatten().min();
            tokio::select! {
                _ = &mut cancel => break EndReason::Cancelled,
                _ = sleep_until(wake) => {}
            }
        };

        tracing::info!(reason = %end_reason, "Stopping virtual users...");
        let vus = pool.shutdown(plan.graceful_stop).await;
        metrics.gauge(names::VUS, 0.0);

        let summary = RunSummary {
            scenario: scenario.name.clone(),
            elapsed: started.elapsed(),
            end_reason,
            vus,
            metrics: metrics.snapshot(),
        };
        tracing::info!(
            scenario = %summary.scenario,
            elapsed = ?summary.elapsed,
            iterations = summary.iterations(),
            forced_stops = summary.forced_stops(),
            "Done running scenario"
        );

        match end_reason {
            EndReason::Cancelled => Err(RunError::Cancelled(Box::new(summary))),
            _ => Ok(summary),
        }
    }
}

async fn sleep_until(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

impl<F, Fut> Executor<F, Fut> for StageExecutor
where
    F: Fn() -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = Result<(), IterationError>> + Send + 'static,
{
    type Error = RunError;

    async fn exec(&self, scenario: &Scenario<F, Fut>) -> Result<RunSummary, Self::Error> {
        self.exec_until(scenario, std::future::pending()).await
    }
}

#[cfg(feature = "internals")]
pub use internals::*;

/// The virtual user pool. Only the executor's tick loop touches it.
mod internals {
    use super::*;

    pub struct VuHandle {
        pub id: u64,
        pub shared: Arc<VuShared>,
        pub task: JoinHandle<()>,
    }

    struct Retiring {
        handle: VuHandle,
        since: Instant,
    }

    pub struct Pool<F> {
        iteration: F,
        metrics: MetricsSink,
        budget: Option<IterationBudget>,
        next_id: u64,
        /// Running users, oldest first.
        live: VecDeque<VuHandle>,
        /// Users asked to stop that have not exited yet.
        retiring: Vec<Retiring>,
        done: Vec<VuSummary>,
        peak: usize,
    }

    impl<F, Fut> Pool<F>
    where
        F: Fn() -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = Result<(), IterationError>> + Send + 'static,
    {
        pub fn new(iteration: F, metrics: MetricsSink, budget: Option<IterationBudget>) -> Self {
            Self {
                iteration,
                metrics,
                budget,
                next_id: 0,
                live: VecDeque::new(),
                retiring: Vec::new(),
                done: Vec::new(),
                peak: 0,
            }
        }

        pub fn live(&self) -> usize {
            self.live.len()
        }

        pub fn retiring(&self) -> usize {
            self.retiring.len()
        }

        #[cfg(any(test, feature = "internals"))]
        pub fn live_ids(&self) -> Vec<u64> {
            self.live.iter().map(|h| h.id).collect()
        }

        /// Spawn or retire users until `target` are live.
        pub fn scale_to(&mut self, target: usize) {
            let live = self.live.len();
            // no respawns once the iteration budget is spent
            let spent = self.budget.as_ref().is_some_and(IterationBudget::is_exhausted);
            if target > live && !spent {
                for _ in live..target {
                    self.spawn();
                }
                tracing::debug!(from = live, to = target, "Spawned virtual users");
            } else if target < live {
                let now = Instant::now();
                for handle in self.live.drain(..live - target) {
                    handle.shared.request_stop();
                    self.retiring.push(Retiring { handle, since: now });
                }
                tracing::debug!(from = live, to = target, "Retiring virtual users");
            }

            self.peak = self.peak.max(self.live.len());
            self.metrics.gauge(names::VUS, self.live.len() as f64);
            self.metrics.gauge(names::VUS_MAX, self.peak as f64);
        }

        fn spawn(&mut self) {
            self.next_id += 1;
            let vu = VirtualUser::new(
                self.next_id,
                self.iteration.clone(),
                self.metrics.clone(),
                self.budget.clone(),
            );
            let shared = vu.shared();
            let task = tokio::spawn(vu.run());
            self.live.push_back(VuHandle {
                id: self.next_id,
                shared,
                task,
            });
        }

        /// Collect users that have exited and abort retiring users that overran
        /// the grace period.
        pub fn reap(&mut self, grace: Duration) {
            // users only exit on their own once the iteration budget is spent
            let (exited, running): (Vec<_>, Vec<_>) =
                self.live.drain(..).partition(|h| h.task.is_finished());
            self.live = running.into();
            for handle in exited {
                self.done.push(handle.shared.summary(handle.id, false));
            }

            let now = Instant::now();
            for Retiring { handle, since } in std::mem::take(&mut self.retiring) {
                if handle.task.is_finished() {
                    self.done.push(handle.shared.summary(handle.id, false));
                } else if now.duration_since(since) >= grace {
                    self.force_stop(handle);
                    self.metrics.add(names::VUS_FORCED_STOP, 1.0);
                } else {
                    self.retiring.push(Retiring { handle, since });
                }
            }
        }

        fn force_stop(&mut self, handle: VuHandle) {
            tracing::warn!(vu = handle.id, "Virtual user overran the graceful stop, aborting");
            handle.task.abort();
            handle.shared.mark_stopped();
            self.done.push(handle.shared.summary(handle.id, true));
        }

        /// Stop every user, waiting up to `grace` for in-flight iterations.
        pub async fn shutdown(mut self, grace: Duration) -> Vec<VuSummary> {
            let now = Instant::now();
            let mut pending: Vec<(VuHandle, Option<Instant>)> = self
                .retiring
                .drain(..)
                .map(|r| (r.handle, r.since.checked_add(grace)))
                .collect();
            for handle in self.live.drain(..) {
                handle.shared.request_stop();
                pending.push((handle, now.checked_add(grace)));
            }

            let mut forced = 0;
            for (mut handle, deadline) in pending {
                let outcome = match deadline {
                    Some(deadline) => tokio::time::timeout_at(deadline, &mut handle.task).await,
                    None => Ok((&mut handle.task).await),
                };
                match outcome {
                    Ok(Ok(())) => self.done.push(handle.shared.summary(handle.id, false)),
                    Ok(Err(e)) => {
                        tracing::error!(vu = handle.id, "Virtual user task failed: {e}");
                        handle.shared.mark_stopped();
                        self.done.push(handle.shared.summary(handle.id, false));
                    }
                    Err(_) => {
                        forced += 1;
                        self.force_stop(handle);
                    }
                }
            }
            self.metrics.add(names::VUS_FORCED_STOP, forced as f64);

            self.done.sort_by_key(|vu| vu.id);
            self.done
        }
    }
}
