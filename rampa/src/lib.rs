//! Rampa: a stage-driven virtual-user load engine.
//!
//! A run is described by a [`RunPlan`]: an ordered list of [`Stage`]s, each one a
//! duration and a target number of concurrent virtual users (VUs). The engine
//! ramps linearly from one target to the next, keeping a pool of VUs that each
//! loop over the scenario's iteration, and records what happened into a shared
//! [`MetricsSink`].
//!
//! # Architecture
//!
//! - [`Scenario`]: the iteration to run, plus the sink it reports into.
//! - [`StageExecutor`]: the orchestrator. It asks the [`Scheduler`] for the target
//!   VU count every tick and grows or shrinks the pool of [`VirtualUser`]s.
//! - [`MetricsSink`]: thread-safe named metrics (counters, gauges, rates and
//!   trends) shared by the engine and the iterations.
//! - [`http::HttpExecutor`]: issues requests from inside an iteration and records
//!   latency and transport failures.
//! - [`check`]: named assertions on responses, recorded as pass rates.
//! - [`Report`] / [`Reporter`]: turn the final [`RunSummary`] into output.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use rampa::{
//!     Executor, IterationError, MetricsSink, RunPlan, Scenario, Stage, StageExecutor,
//!     http::{HttpExecutor, HttpRequest},
//!     report::{Reporter, StdoutReporter, SummaryReport},
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let metrics = MetricsSink::new();
//! let http = HttpExecutor::new(metrics.clone())?;
//!
//! let scenario = Scenario::builder()
//!     .name("stocks")
//!     .iteration(move || {
//!         let http = http.clone();
//!         async move {
//!             http.execute(HttpRequest::get("http://localhost:8080/api/stocks"))
//!                 .await?;
//!             Ok::<(), IterationError>(())
//!         }
//!     })
//!     .metrics(metrics)
//!     .build();
//!
//! let plan = RunPlan::builder()
//!     .stages(vec![
//!         Stage::new(Duration::from_secs(5), 10),
//!         Stage::new(Duration::from_secs(20), 10),
//!         Stage::new(Duration::from_secs(5), 0),
//!     ])
//!     .build();
//!
//! let summary = StageExecutor::new(plan).exec(&scenario).await?;
//! StdoutReporter.report(&SummaryReport::from(summary)).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Feature flags
//! - `internals`: expose the VU pool used by [`StageExecutor`] (unstable)

/// Streaming per-metric aggregation
pub mod aggregate;
pub mod check;
/// Plan files
pub mod config;
pub mod error;
/// Orchestrators that define how things will actually run
pub mod executor;
pub mod http;
/// Metric kinds, well-known names and iteration results
pub mod metric;
pub mod metrics;
/// Stages, run plans and the ramp scheduler
pub mod plan;
/// Reports and Reporters
pub mod report;
pub mod scenario;
/// Virtual users
pub mod vu;

pub use aggregate::Series;
pub use config::load_plan;
pub use error::{CheckFailure, ConfigError, IterationError, ReportError, RunError, TransportError};
pub use executor::{EndReason, Executor, RunSummary, StageExecutor};
pub use metrics::{MetricsSink, Snapshot};
pub use plan::{RunPlan, Scheduler, Stage, parse_duration};
pub use report::{Report, Reporter};
pub use scenario::Scenario;
pub use vu::{IterationBudget, VirtualUser, VuState, VuSummary};
