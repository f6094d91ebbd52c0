//! Command line definitions

use std::{path::PathBuf, time::Duration};

use clap::{Args, Parser, Subcommand};
use rampa::{Stage, parse_duration};
use reqwest::Method;

use crate::template::UrlTemplate;

#[derive(Parser)]
#[command(author, version, about = "Stage-driven HTTP load generator", long_about = None)]
pub struct Cli {
    /// Log filter (overrides RUST_LOG), e.g. `debug` or `rampa=trace`
    #[arg(long, value_name = "FILTER", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Ramp virtual users against an HTTP endpoint
    Run(RunArgs),

    /// Load a plan file and print the resulting ramp without running it
    Validate {
        /// YAML or JSON plan file
        #[arg(value_name = "PATH")]
        plan: PathBuf,
    },
}

#[derive(Args)]
pub struct RunArgs {
    /// YAML or JSON plan file
    #[arg(long, value_name = "PATH", conflicts_with = "stages", required_unless_present = "stages")]
    pub plan: Option<PathBuf>,

    /// A stage as DURATION:TARGET, repeat for each stage (e.g. --stage 5s:10)
    #[arg(long = "stage", value_name = "DURATION:TARGET", value_parser = parse_stage)]
    pub stages: Vec<Stage>,

    /// Target URL; `{rand:LO..HI}` is replaced by a random integer per iteration
    #[arg(long, value_name = "URL")]
    pub url: UrlTemplate,

    #[arg(long, default_value = "GET", value_parser = parse_method)]
    pub method: Method,

    /// Request header as NAME:VALUE, repeatable
    #[arg(long = "header", value_name = "NAME:VALUE", value_parser = parse_header)]
    pub headers: Vec<(String, String)>,

    /// Request body
    #[arg(long)]
    pub body: Option<String>,

    /// Register a `status is N` check
    #[arg(long, value_name = "STATUS")]
    pub expect_status: Option<u16>,

    /// Count an iteration as failed when any check fails
    #[arg(long)]
    pub fail_on_check: bool,

    /// Per-request timeout
    #[arg(long, default_value = "30s", value_parser = parse_duration)]
    pub timeout: Duration,

    /// Also write the report as JSON
    #[arg(long, value_name = "PATH")]
    pub json: Option<PathBuf>,

    /// Stop after this many iterations in total
    #[arg(long)]
    pub iterations: Option<u64>,

    #[arg(long, value_parser = parse_duration)]
    pub max_duration: Option<Duration>,

    /// Interval between virtual user adjustments
    #[arg(long, value_parser = parse_duration)]
    pub tick: Option<Duration>,

    /// Time a stopping virtual user gets to finish its iteration
    #[arg(long, value_parser = parse_duration)]
    pub graceful_stop: Option<Duration>,

    /// Scenario name shown in the report
    #[arg(long, default_value = "http")]
    pub name: String,
}

fn parse_stage(s: &str) -> Result<Stage, String> {
    let (duration, target) = s
        .rsplit_once(':')
        .ok_or_else(|| format!("expected DURATION:TARGET, got {s:?}"))?;
    let duration = parse_duration(duration).map_err(|e| e.to_string())?;
    let target = target
        .trim()
        .parse()
        .map_err(|e| format!("bad target in {s:?}: {e}"))?;
    Ok(Stage::new(duration, target))
}

fn parse_header(s: &str) -> Result<(String, String), String> {
    let (name, value) = s
        .split_once(':')
        .ok_or_else(|| format!("expected NAME:VALUE, got {s:?}"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("empty header name in {s:?}"));
    }
    Ok((name.to_owned(), value.trim().to_owned()))
}

fn parse_method(s: &str) -> Result<Method, String> {
    Method::from_bytes(s.to_ascii_uppercase().as_bytes()).map_err(|e| e.to_string())
}
