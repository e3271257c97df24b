// src/config.rs
//! Run configuration: YAML file plus environment overrides.

use anyhow::{Context, Result};
use chrono::Local;
use serde::Deserialize;
use std::{
    collections::BTreeMap,
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::{info, warn};

use crate::error::ExtractError;
use crate::period::ReferencePeriod;
use crate::process::query::RowFilter;
use crate::process::{OutputFormat, ParseMode};
use crate::retry::RetryPolicy;
use crate::scheduler::MAX_WORKERS;
use crate::variant::MeasurementScope;

pub const CONFIG_ENV: &str = "SPOOLEX_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "spoolex.yaml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Remote system the sessions attach to.
    pub system_name: String,
    /// `YYYY_MM`; the current month when absent.
    pub period: Option<String>,
    /// Where the host exports spool text.
    pub landing_dir: PathBuf,
    /// One file per extraction.
    pub exported_dir: PathBuf,
    /// Consolidated tables.
    pub table_dir: PathBuf,
    pub workers: usize,
    /// Spool requests the user may have listed at once.
    pub shared_capacity: usize,
    pub poll_interval_secs: u64,
    pub session_retry_secs: u64,
    pub retry: RetrySettings,
    pub merge_tables: bool,
    /// Transaction prefix -> consolidated table name.
    pub tables: BTreeMap<String, String>,
    pub output_formats: Vec<OutputFormat>,
    pub parse_mode: ParseMode,
    pub extractions: Vec<ExtractionConfig>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            system_name: "ERP".to_string(),
            period: None,
            landing_dir: PathBuf::from("spool"),
            exported_dir: PathBuf::from("data"),
            table_dir: PathBuf::from("tables"),
            workers: MAX_WORKERS,
            shared_capacity: 48,
            poll_interval_secs: 3,
            session_retry_secs: 10,
            retry: RetrySettings::default(),
            merge_tables: true,
            tables: BTreeMap::from([
                ("IW67".to_string(), "TB_ECC_MEDIDA".to_string()),
                ("IW39".to_string(), "TB_ECC_ORDEM".to_string()),
            ]),
            output_formats: vec![OutputFormat::Text],
            parse_mode: ParseMode::AllOrNothing,
            extractions: vec![
                ExtractionConfig::measurements(MeasurementScope::AllTime),
                ExtractionConfig::measurements(MeasurementScope::Period),
            ],
        }
    }
}

/// Circuit breakers for retried stages. Unset fields mean "retry forever".
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub delay_ms: Option<u64>,
    pub max_attempts: Option<u32>,
    pub max_elapsed_secs: Option<u64>,
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::immediate()
            .with_delay(self.delay_ms.map(Duration::from_millis))
            .with_max_attempts(self.max_attempts)
            .with_max_elapsed(self.max_elapsed_secs.map(Duration::from_secs))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionKind {
    MeasurementsPeriod,
    MeasurementsAllTime,
}

impl ExtractionKind {
    pub fn scope(&self) -> MeasurementScope {
        match self {
            ExtractionKind::MeasurementsPeriod => MeasurementScope::Period,
            ExtractionKind::MeasurementsAllTime => MeasurementScope::AllTime,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractionConfig {
    pub kind: ExtractionKind,
    /// Explicit parameter codes; the variant's defaults when absent.
    #[serde(default)]
    pub codes: Option<Vec<String>>,
    /// Derive the parameters from an exported table instead.
    #[serde(default)]
    pub source: Option<ParameterSource>,
}

impl ExtractionConfig {
    pub fn measurements(scope: MeasurementScope) -> Self {
        let kind = match scope {
            MeasurementScope::Period => ExtractionKind::MeasurementsPeriod,
            MeasurementScope::AllTime => ExtractionKind::MeasurementsAllTime,
        };
        Self {
            kind,
            codes: None,
            source: None,
        }
    }
}

/// Distinct values of `column` over the rows of a delimited table that
/// pass every filter.
#[derive(Debug, Clone, Deserialize)]
pub struct ParameterSource {
    pub file: PathBuf,
    pub column: String,
    #[serde(default)]
    pub filters: Vec<RowFilter>,
}

impl RunConfig {
    /// Load from `$SPOOLEX_CONFIG` (or `spoolex.yaml`), apply environment
    /// overrides and validate.
    pub fn load() -> Result<Self> {
        let path = env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut config = Self::from_file(Path::new(&path))?;
        config.apply_env(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// A missing file yields the defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let text =
            fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let config = Self::from_yaml(&text).with_context(|| format!("parsing {}", path.display()))?;
        info!(path = %path.display(), "loaded config");
        Ok(config)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Override fields from `SPOOLEX_PERIOD`, `SPOOLEX_WORKERS` and
    /// `SPOOLEX_CAPACITY` as returned by `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(period) = lookup("SPOOLEX_PERIOD") {
            self.period = Some(period);
        }
        if let Some(workers) = lookup("SPOOLEX_WORKERS") {
            self.workers = workers
                .trim()
                .parse()
                .map_err(|_| ExtractError::config(format!("SPOOLEX_WORKERS={workers}")))?;
        }
        if let Some(capacity) = lookup("SPOOLEX_CAPACITY") {
            self.shared_capacity = capacity
                .trim()
                .parse()
                .map_err(|_| ExtractError::config(format!("SPOOLEX_CAPACITY={capacity}")))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ExtractError> {
        if !(1..=MAX_WORKERS).contains(&self.workers) {
            return Err(ExtractError::config(format!(
                "workers must be within 1..={MAX_WORKERS}, got {}",
                self.workers
            )));
        }
        if self.shared_capacity < self.workers {
            return Err(ExtractError::config(format!(
                "shared capacity {} is below the worker count {}",
                self.shared_capacity, self.workers
            )));
        }
        if self.output_formats.is_empty() {
            return Err(ExtractError::config("no output format configured"));
        }
        self.reference_period()?;
        Ok(())
    }

    pub fn reference_period(&self) -> Result<ReferencePeriod, ExtractError> {
        match &self.period {
            Some(name) => ReferencePeriod::parse(name)
                .map_err(|e| ExtractError::config(format!("period {name}: {e:#}"))),
            None => Ok(ReferencePeriod::containing(Local::now().date_naive())),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn stage_policy(&self) -> RetryPolicy {
        self.retry.policy()
    }

    pub fn session_policy(&self) -> RetryPolicy {
        self.retry
            .policy()
            .with_delay(Some(Duration::from_secs(self.session_retry_secs)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn yaml_fields_override_defaults() {
        let config = RunConfig::from_yaml(
            r#"
period: "2023_09"
workers: 3
landing_dir: /tmp/spool
retry:
  delay_ms: 500
  max_attempts: 10
output_formats: [text, parquet]
parse_mode: keep_partial
extractions:
  - kind: measurements_period
    codes: ["380", "30"]
  - kind: measurements_all_time
    source:
      file: data/IW67_MEDL.txt
      column: MEDIDA
      filters:
        - column: STATUS
          kind: contains_any
          args: [MEDE]
"#,
        )
        .unwrap();

        assert_eq!(config.workers, 3);
        assert_eq!(config.shared_capacity, 48);
        assert_eq!(config.landing_dir, PathBuf::from("/tmp/spool"));
        assert_eq!(config.output_formats, vec![OutputFormat::Text, OutputFormat::Parquet]);
        assert_eq!(config.parse_mode, ParseMode::KeepPartial);
        assert_eq!(config.tables["IW67"], "TB_ECC_MEDIDA");
        assert_eq!(config.extractions.len(), 2);
        assert_eq!(config.extractions[1].source.as_ref().unwrap().filters.len(), 1);

        let policy = config.stage_policy();
        assert_eq!(policy.delay, Some(Duration::from_millis(500)));
        assert_eq!(policy.max_attempts, Some(10));
        assert_eq!(config.session_policy().delay, Some(Duration::from_secs(10)));
        assert_eq!(config.reference_period().unwrap().name(), "2023_09");
    }

    #[test]
    fn missing_file_means_defaults() {
        let dir = tempdir().unwrap();
        let config = RunConfig::from_file(&dir.path().join("absent.yaml")).unwrap();
        assert_eq!(config.workers, 6);
        assert_eq!(config.extractions.len(), 2);
        config.validate().unwrap();
    }

    #[test]
    fn environment_overrides_and_validation() {
        let mut config = RunConfig::default();
        let vars = BTreeMap::from([("SPOOLEX_WORKERS", "7"), ("SPOOLEX_PERIOD", "2024_01")]);
        config
            .apply_env(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.period.as_deref(), Some("2024_01"));
        assert!(config.validate().unwrap_err().is_fatal());

        config.workers = 4;
        config.shared_capacity = 3;
        assert!(config.validate().is_err());

        config.shared_capacity = 48;
        config.period = Some("2024-01".into());
        assert!(config.validate().is_err());

        let bad = config.apply_env(|key| (key == "SPOOLEX_CAPACITY").then_some("lots".to_string()));
        assert!(crate::error::is_fatal(&bad.unwrap_err()));
    }
}
