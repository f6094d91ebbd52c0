//! Run plans and the stage scheduler.
//!
//! A [`RunPlan`] is an ordered list of [`Stage`]s. Each stage ramps the number of
//! virtual users linearly from where the previous stage ended (zero for the first
//! one) to its own `target` over its `duration`:
//!
//! ```text
//! p = elapsed_in_stage / stage.duration
//! vus(t) = floor(from + (to - from) * p)
//! ```
//!
//! Flooring means a ramp reaches its target exactly at the end of the stage. A
//! stage with `from == to` simply holds the level.
//!
//! Stage windows are half-open, `[start, end)`: at the exact boundary instant the
//! later stage is the active one. Since interpolation is continuous the target
//! VU count is the same either way; only [`Target::stage`] differs.
use std::time::Duration;

use typed_builder::TypedBuilder;

use crate::error::ConfigError;

pub const DEFAULT_TICK: Duration = Duration::from_secs(1);
pub const DEFAULT_GRACEFUL_STOP: Duration = Duration::from_secs(30);

/// One segment of the ramp profile.
///
/// `Stage::new(Duration::from_secs(10), 50)` ramps to 50 virtual users over 10s.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Stage {
    pub duration: Duration,
    /// Virtual users at the end of the stage
    pub target: u32,
}

impl Stage {
    pub fn new(duration: Duration, target: u32) -> Self {
        Self { duration, target }
    }
}

/// Everything the executor needs to drive a run. Immutable once the run starts.
#[derive(Clone, Debug, TypedBuilder)]
pub struct RunPlan {
    /// The ramp profile, executed in order.
    pub stages: Vec<Stage>,
    /// Stop after this many iterations across all virtual users.
    #[builder(default, setter(strip_option))]
    pub iterations: Option<u64>,
    /// Hard cap on the run time, regardless of the stages.
    #[builder(default, setter(strip_option))]
    pub max_duration: Option<Duration>,
    /// How often the executor re-evaluates the target VU count.
    #[builder(default = DEFAULT_TICK)]
    pub tick: Duration,
    /// How long stopping virtual users may take to finish their iteration before
    /// they are aborted.
    #[builder(default = DEFAULT_GRACEFUL_STOP)]
    pub graceful_stop: Duration,
}

impl RunPlan {
    /// Reject plans that cannot run. Called before any virtual user is spawned.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stages.is_empty() {
            return Err(ConfigError::NoStages);
        }
        if let Some(index) = self.stages.iter().position(|s| s.duration.is_zero()) {
            return Err(ConfigError::ZeroStageDuration { index });
        }
        checked_total(&self.stages).ok_or(ConfigError::DurationOverflow)?;
        if self.tick.is_zero() {
            return Err(ConfigError::ZeroTick);
        }
        if self.max_duration.is_some_and(|d| d.is_zero()) {
            return Err(ConfigError::ZeroMaxDuration);
        }
        if self.iterations == Some(0) {
            return Err(ConfigError::ZeroIterations);
        }
        Ok(())
    }

    /// Sum of all stage durations, saturating at [`Duration::MAX`].
    pub fn total_duration(&self) -> Duration {
        self.stages
            .iter()
            .fold(Duration::ZERO, |total, s| total.saturating_add(s.duration))
    }

    /// Highest target over all stages.
    pub fn peak_vus(&self) -> u32 {
        self.stages.iter().map(|s| s.target).max().unwrap_or(0)
    }
}

fn checked_total(stages: &[Stage]) -> Option<Duration> {
    stages
        .iter()
        .try_fold(Duration::ZERO, |total, s| total.checked_add(s.duration))
}

/// Parse a time span.
///
/// Accepts humantime spans (`"500ms"`, `"5s"`, `"1m30s"`) and ISO-8601 durations
/// (`"PT5S"`, `"PT1M30.5S"`, `"P1DT2H"`). A bare number such as `"5"` is rejected:
/// there is no default unit.
pub fn parse_duration(input: &str) -> Result<Duration, ConfigError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(ConfigError::invalid_duration(input, "empty duration"));
    }
    if s.parse::<f64>().is_ok() {
        return Err(ConfigError::invalid_duration(
            input,
            "missing time unit (e.g. \"5s\")",
        ));
    }
    if s.starts_with(['P', 'p']) {
        return parse_iso8601(s).ok_or_else(|| {
            ConfigError::invalid_duration(input, "malformed ISO-8601 duration")
        });
    }
    humantime::parse_duration(s).map_err(|e| ConfigError::invalid_duration(input, e.to_string()))
}

fn parse_iso8601(s: &str) -> Option<Duration> {
    let rest = s.get(1..)?.to_ascii_uppercase();
    let (date, time) = match rest.split_once('T') {
        Some((date, time)) => {
            if time.is_empty() {
                return None;
            }
            (date.to_owned(), time.to_owned())
        }
        None => (rest, String::new()),
    };

    let mut secs = 0.0;
    let mut seen = false;
    for (part, units) in [
        (date.as_str(), &[('W', 604_800.0), ('D', 86_400.0)][..]),
        (time.as_str(), &[('H', 3_600.0), ('M', 60.0), ('S', 1.0)][..]),
    ] {
        let mut number = String::new();
        let mut next_unit = 0;
        for c in part.chars() {
            if c.is_ascii_digit() || c == '.' {
                number.push(c);
                continue;
            }
            let offset = units[next_unit..].iter().position(|(u, _)| *u == c)?;
            let (_, scale) = units[next_unit + offset];
            secs += number.parse::<f64>().ok()? * scale;
            number.clear();
            next_unit += offset + 1;
            seen = true;
        }
        if !number.is_empty() {
            return None;
        }
    }

    if !seen {
        return None;
    }
    Duration::try_from_secs_f64(secs).ok()
}

/// Target VU count at a point in time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Target {
    pub vus: u32,
    /// Index of the active stage. Equals the number of stages once done.
    pub stage: usize,
    /// Every stage has elapsed.
    pub done: bool,
}

#[derive(Clone, Copy, Debug)]
struct Window {
    start: Duration,
    end: Duration,
    from: u32,
    to: u32,
}

/// Maps elapsed run time to the target VU count.
#[derive(Clone, Debug)]
pub struct Scheduler {
    windows: Vec<Window>,
    total: Duration,
}

impl Scheduler {
    pub fn new(stages: &[Stage]) -> Result<Self, ConfigError> {
        if stages.is_empty() {
            return Err(ConfigError::NoStages);
        }
        let mut windows = Vec::with_capacity(stages.len());
        let mut start = Duration::ZERO;
        let mut from = 0;
        for (index, stage) in stages.iter().enumerate() {
            if stage.duration.is_zero() {
                return Err(ConfigError::ZeroStageDuration { index });
            }
            let end = start
                .checked_add(stage.duration)
                .ok_or(ConfigError::DurationOverflow)?;
            windows.push(Window {
                start,
                end,
                from,
                to: stage.target,
            });
            start = end;
            from = stage.target;
        }
        Ok(Self {
            windows,
            total: start,
        })
    }

    pub fn total(&self) -> Duration {
        self.total
    }

    pub fn target_at(&self, elapsed: Duration) -> Target {
        match self.windows.iter().position(|w| elapsed < w.end) {
            Some(stage) => {
                let w = self.windows[stage];
                Target {
                    vus: interpolate(elapsed - w.start, w.end - w.start, w.from, w.to),
                    stage,
                    done: false,
                }
            }
            None => Target {
                vus: self.windows.last().map(|w| w.to).unwrap_or(0),
                stage: self.windows.len(),
                done: true,
            },
        }
    }
}

/// Linear interpolation between `from` and `to`, floored.
pub(crate) fn interpolate(elapsed: Duration, duration: Duration, from: u32, to: u32) -> u32 {
    if duration.is_zero() {
        return to;
    }
    // interpolation factor [0..1]
    let p = (elapsed.as_secs_f64() / duration.as_secs_f64()).clamp(0.0, 1.0);
    let vus = from as f64 + (to as f64 - from as f64) * p;
    // guard against 9.999999 when p is exactly 1
    if p >= 1.0 {
        return to;
    }
    vus.floor().max(0.0) as u32
}
