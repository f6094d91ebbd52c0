//! Rampa command line
//!
//! Ramps virtual users against a single HTTP endpoint following a plan file or
//! `--stage` flags, then prints the summary report.

mod cli;
mod template;

use std::{process::ExitCode, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use rampa::{
    ConfigError, IterationError, MetricsSink, RunError, RunPlan, Scenario, StageExecutor,
    check::Checks,
    http::{HttpExecutor, HttpRequest, HttpResponse},
    load_plan,
    plan::{DEFAULT_GRACEFUL_STOP, DEFAULT_TICK},
    report::{JsonReporter, Reporter, StdoutReporter, SummaryReport},
};
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands, RunArgs};

const EXIT_CONFIG: u8 = 2;
const EXIT_CANCELLED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    let outcome = match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::Validate { plan } => validate(&plan),
    };
    match outcome {
        Ok(code) => code,
        Err(e) if is_config_error(&e) => {
            eprintln!("configuration error: {e:#}");
            ExitCode::from(EXIT_CONFIG)
        }
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::try_new(level).unwrap_or_else(|_| {
            eprintln!("invalid log filter {level:?}, falling back to rampa=info");
            EnvFilter::new("rampa=info")
        }),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rampa=info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn is_config_error(e: &anyhow::Error) -> bool {
    e.downcast_ref::<ConfigError>().is_some()
        || matches!(e.downcast_ref::<RunError>(), Some(RunError::Config(_)))
}

fn build_plan(args: &RunArgs) -> Result<RunPlan> {
    let mut plan = match &args.plan {
        Some(path) => load_plan(path)?,
        None => RunPlan {
            stages: args.stages.clone(),
            iterations: None,
            max_duration: None,
            tick: DEFAULT_TICK,
            graceful_stop: DEFAULT_GRACEFUL_STOP,
        },
    };
    if let Some(iterations) = args.iterations {
        plan.iterations = Some(iterations);
    }
    if let Some(max_duration) = args.max_duration {
        plan.max_duration = Some(max_duration);
    }
    if let Some(tick) = args.tick {
        plan.tick = tick;
    }
    if let Some(graceful_stop) = args.graceful_stop {
        plan.graceful_stop = graceful_stop;
    }
    plan.validate()?;
    Ok(plan)
}

fn validate(path: &std::path::Path) -> Result<ExitCode> {
    let plan = load_plan(path)?;
    println!(
        "{}: {} stages over {:?}, peak {} virtual users",
        path.display(),
        plan.stages.len(),
        plan.total_duration(),
        plan.peak_vus()
    );
    let mut from = 0;
    for (i, stage) in plan.stages.iter().enumerate() {
        println!("  #{i}: {from} -> {} over {:?}", stage.target, stage.duration);
        from = stage.target;
    }
    Ok(ExitCode::SUCCESS)
}

async fn run(args: RunArgs) -> Result<ExitCode> {
    let plan = build_plan(&args)?;

    let metrics = MetricsSink::new();
    let http = HttpExecutor::with_timeout(metrics.clone(), args.timeout)
        .context("failed to build the HTTP client")?;
    let mut checks = Checks::new();
    if let Some(expected) = args.expect_status {
        checks = checks.with(format!("status is {expected}"), move |r: &HttpResponse| {
            r.status == expected
        });
    }
    if checks.is_empty() && args.fail_on_check {
        tracing::warn!("--fail-on-check has no effect without --expect-status");
    }
    tracing::debug!(checks = checks.len(), timeout = ?http.timeout(), "HTTP iteration ready");
    let checks = Arc::new(checks);

    let template = Arc::new(args.url);
    tracing::debug!(url = %template, randomized = !template.is_static(), method = %args.method, "Request template");
    let method = args.method;
    let headers = Arc::new(args.headers);
    let body = args.body;
    let fail_on_check = args.fail_on_check;

    let iteration = {
        let metrics = metrics.clone();
        move || {
            let mut request = HttpRequest::new(method.clone(), template.render(&mut rand::rng()));
            for (name, value) in headers.iter() {
                request = request.header(name.as_str(), value.as_str());
            }
            if let Some(body) = &body {
                request = request.body(body.clone());
            }
            let http = http.clone();
            let checks = checks.clone();
            let metrics = metrics.clone();
            async move {
                let response = http.execute(request).await?;
                let outcome = checks.run(&metrics, &response);
                if fail_on_check {
                    outcome.into_result()?;
                }
                Ok::<(), IterationError>(())
            }
        }
    };

    let scenario = Scenario::builder()
        .name(args.name)
        .iteration(iteration)
        .metrics(metrics)
        .build();

    let cancel = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Interrupted, stopping virtual users"),
            Err(e) => {
                tracing::warn!("Unable to listen for Ctrl-C: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    let (summary, cancelled) = match StageExecutor::new(plan).exec_until(&scenario, cancel).await {
        Ok(summary) => (summary, false),
        Err(RunError::Cancelled(summary)) => (*summary, true),
        Err(e) => return Err(e.into()),
    };

    let report = SummaryReport::from(summary);
    StdoutReporter.report(&report).await?;
    if let Some(path) = args.json {
        JsonReporter::new(path).report(&report).await?;
    }

    Ok(if cancelled {
        ExitCode::from(EXIT_CANCELLED)
    } else {
        ExitCode::SUCCESS
    })
}
