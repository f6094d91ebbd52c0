//! Plan files.
//!
//! A plan file describes a [`RunPlan`] in YAML or JSON, using the same field names
//! load-testing tools commonly use:
//!
//! ```yaml
//! stages:
//!   - { duration: 5s, target: 10 }
//!   - { duration: 20s, target: 10 }
//!   - { duration: 5s, target: 0 }
//! maxDuration: 1m
//! tickInterval: 1s
//! gracefulStop: 10s
//! iterations: 5000
//! ```
//!
//! Durations must carry a unit; `duration: 5` or `duration: "5"` is a
//! configuration error.
use std::{path::Path, time::Duration};

use serde::Deserialize;

use crate::{
    error::ConfigError,
    plan::{DEFAULT_GRACEFUL_STOP, DEFAULT_TICK, RunPlan, Stage, parse_duration},
};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PlanFile {
    pub stages: Vec<StageFile>,
    #[serde(default)]
    pub iterations: Option<u64>,
    #[serde(default)]
    pub max_duration: Option<DurationLiteral>,
    #[serde(default)]
    pub tick_interval: Option<DurationLiteral>,
    #[serde(default)]
    pub graceful_stop: Option<DurationLiteral>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageFile {
    pub duration: DurationLiteral,
    pub target: u32,
}

/// A duration as written in the file, before unit validation.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DurationLiteral {
    Text(String),
    Number(f64),
}

impl DurationLiteral {
    pub fn resolve(&self) -> Result<Duration, ConfigError> {
        match self {
            Self::Text(s) => parse_duration(s),
            Self::Number(n) => Err(ConfigError::invalid_duration(
                n.to_string(),
                "missing time unit (e.g. \"5s\")",
            )),
        }
    }
}

impl PlanFile {
    /// Read a plan file. `.json` files are parsed as JSON, anything else as YAML.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let parsed = if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::from_str(&content).map_err(|e| e.to_string())
        } else {
            serde_yaml::from_str(&content).map_err(|e| e.to_string())
        };
        parsed.map_err(|message| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        })
    }

    /// Resolve every duration and validate the resulting plan.
    pub fn into_plan(self) -> Result<RunPlan, ConfigError> {
        let stages = self
            .stages
            .iter()
            .map(|s| Ok(Stage::new(s.duration.resolve()?, s.target)))
            .collect::<Result<Vec<_>, ConfigError>>()?;

        let plan = RunPlan {
            stages,
            iterations: self.iterations,
            max_duration: self
                .max_duration
                .as_ref()
                .map(DurationLiteral::resolve)
                .transpose()?,
            tick: self
                .tick_interval
                .as_ref()
                .map(DurationLiteral::resolve)
                .transpose()?
                .unwrap_or(DEFAULT_TICK),
            graceful_stop: self
                .graceful_stop
                .as_ref()
                .map(DurationLiteral::resolve)
                .transpose()?
                .unwrap_or(DEFAULT_GRACEFUL_STOP),
        };
        plan.validate()?;
        Ok(plan)
    }
}

/// Load and validate a plan file in one step.
pub fn load_plan(path: impl AsRef<Path>) -> Result<RunPlan, ConfigError> {
    PlanFile::from_path(path)?.into_plan()
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_file(suffix: &str, content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_yaml_plan() {
        let file = write_file(
            ".yaml",
            r#"
stages:
  - { duration: 5s, target: 10 }
  - { duration: 20s, target: 10 }
  - { duration: PT5S, target: 0 }
maxDuration: 1m
gracefulStop: 2s
iterations: 100
"#,
        );
        let plan = load_plan(file.path()).unwrap();
        assert_eq!(plan.stages.len(), 3);
        assert_eq!(plan.stages[2], Stage::new(Duration::from_secs(5), 0));
        assert_eq!(plan.total_duration(), Duration::from_secs(30));
        assert_eq!(plan.max_duration, Some(Duration::from_secs(60)));
        assert_eq!(plan.graceful_stop, Duration::from_secs(2));
        assert_eq!(plan.tick, DEFAULT_TICK);
        assert_eq!(plan.iterations, Some(100));
    }

    #[test]
    fn loads_json_plan() {
        let file = write_file(
            ".json",
            r#"{"stages": [{"duration": "500ms", "target": 2}], "tickInterval": "100ms"}"#,
        );
        let plan = load_plan(file.path()).unwrap();
        assert_eq!(plan.stages[0].duration, Duration::from_millis(500));
        assert_eq!(plan.tick, Duration::from_millis(100));
        assert_eq!(plan.graceful_stop, DEFAULT_GRACEFUL_STOP);
    }

    #[test]
    fn unitless_duration_is_a_config_error() {
        for stage in [r#"{duration: "5", target: 0}"#, "{duration: 5, target: 0}"] {
            let file = write_file(
                ".yaml",
                &format!("stages:\n  - {{duration: 5s, target: 10}}\n  - {stage}\n"),
            );
            let err = load_plan(file.path()).unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidDuration { ref input, .. } if input == "5"),
                "unexpected error for {stage}: {err}"
            );
        }
    }

    #[test]
    fn negative_target_is_a_parse_error() {
        let file = write_file(".yaml", "stages:\n  - {duration: 5s, target: -1}\n");
        assert!(matches!(
            load_plan(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let file = write_file(".yaml", "stages: []\nvus: 10\n");
        assert!(matches!(
            load_plan(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        assert!(matches!(
            load_plan("/definitely/not/here.yaml"),
            Err(ConfigError::Io { .. })
        ));
    }
}
