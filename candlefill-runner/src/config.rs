//! Run configuration: a TOML file plus environment overrides.
//!
//! ```toml
//! mode = "api"
//! table = "candles"
//! universe = "universe.toml"
//!
//! [store]
//! root = "data/store"
//!
//! [scheduler]
//! floor_date = "2016-01-01"
//! stall_threshold = 3
//!
//! [pacing]
//! delay_ms = 500
//!
//! [api]
//! interval = "1d"
//! commit_mode = "bulk"
//!
//! [local]
//! dir = "data/local"
//! group_size = 5
//! commit_mode = "monthly"
//! ```
//!
//! Every field has a default, so an empty file is a valid configuration.

use candlefill_core::ingest::{
    BackfillScheduler, CommitMode, FixedDelay, JitteredDelay, NoDelay, Pacer, SchedulerConfig,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const ENV_MODE: &str = "CANDLEFILL_MODE";
pub const ENV_STORE_ROOT: &str = "CANDLEFILL_STORE_ROOT";
pub const ENV_TABLE: &str = "CANDLEFILL_TABLE";
pub const ENV_LOCAL_DIR: &str = "CANDLEFILL_LOCAL_DIR";
pub const ENV_UNIVERSE: &str = "CANDLEFILL_UNIVERSE";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },
}

impl ConfigError {
    fn invalid(key: &str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

/// Where candles come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceMode {
    #[default]
    Api,
    Local,
}

impl FromStr for SourceMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "api" => Ok(SourceMode::Api),
            "local" => Ok(SourceMode::Local),
            other => Err(ConfigError::invalid(
                "mode",
                format!("expected 'api' or 'local', got '{other}'"),
            )),
        }
    }
}

impl fmt::Display for SourceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceMode::Api => write!(f, "api"),
            SourceMode::Local => write!(f, "local"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub root: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data/store"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    /// Fixed pause before each provider call.
    pub delay_ms: u64,
    /// Extra uniform random pause on top of `delay_ms`.
    pub jitter_ms: u64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            delay_ms: 500,
            jitter_ms: 0,
        }
    }
}

impl PacingConfig {
    pub fn build(&self) -> Box<dyn Pacer> {
        match (self.delay_ms, self.jitter_ms) {
            (0, 0) => Box::new(NoDelay),
            (delay, 0) => Box::new(FixedDelay(Duration::from_millis(delay))),
            (delay, jitter) => Box::new(JitteredDelay {
                base: Duration::from_millis(delay),
                jitter: Duration::from_millis(jitter),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Candle interval requested from the chart API.
    pub interval: String,
    /// Override for the chart endpoint.
    pub base_url: Option<String>,
    pub breaker_cooldown_secs: u64,
    pub commit_mode: CommitMode,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            interval: "1d".into(),
            base_url: None,
            breaker_cooldown_secs: 30 * 60,
            commit_mode: CommitMode::Bulk,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    pub dir: PathBuf,
    /// Files per group; 0 reads the whole directory as one group.
    pub group_size: usize,
    pub commit_mode: CommitMode,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data/local"),
            group_size: 5,
            commit_mode: CommitMode::Monthly,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub mode: SourceMode,
    pub table: String,
    pub universe: PathBuf,
    pub store: StoreConfig,
    pub scheduler: SchedulerConfig,
    pub pacing: PacingConfig,
    pub api: ApiConfig,
    pub local: LocalConfig,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            mode: SourceMode::Api,
            table: "candles".into(),
            universe: PathBuf::from("universe.toml"),
            store: StoreConfig::default(),
            scheduler: SchedulerConfig::default(),
            pacing: PacingConfig::default(),
            api: ApiConfig::default(),
            local: LocalConfig::default(),
        }
    }
}

impl IngestConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// File (or defaults when `path` is `None`), then process environment,
    /// then validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `CANDLEFILL_*` overrides. Blank values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        if let Some(mode) = get(ENV_MODE) {
            self.mode = mode.parse()?;
        }
        if let Some(root) = get(ENV_STORE_ROOT) {
            self.store.root = PathBuf::from(root);
        }
        if let Some(table) = get(ENV_TABLE) {
            self.table = table;
        }
        if let Some(dir) = get(ENV_LOCAL_DIR) {
            self.local.dir = PathBuf::from(dir);
        }
        if let Some(universe) = get(ENV_UNIVERSE) {
            self.universe = PathBuf::from(universe);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let table = self.table.trim();
        if table.is_empty() {
            return Err(ConfigError::invalid("table", "must not be empty"));
        }
        if table.contains(['/', '\\']) || table.starts_with('.') || table.starts_with('_') {
            return Err(ConfigError::invalid(
                "table",
                format!("'{table}' is not a valid table name"),
            ));
        }
        self.scheduler
            .validate()
            .map_err(|reason| ConfigError::invalid("scheduler", reason))?;
        if self.api.interval.trim().is_empty() {
            return Err(ConfigError::invalid("api.interval", "must not be empty"));
        }
        Ok(())
    }

    /// Scheduler with this configuration's pacing and the system clock.
    pub fn build_scheduler(&self) -> BackfillScheduler {
        BackfillScheduler::new(self.scheduler.clone()).with_pacer(self.pacing.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::collections::HashMap;

    #[test]
    fn empty_file_is_all_defaults() {
        let config = IngestConfig::from_toml("").unwrap();
        assert_eq!(config, IngestConfig::default());
        assert_eq!(config.scheduler.stall_threshold, 3);
        assert_eq!(config.local.group_size, 5);
        assert_eq!(config.api.commit_mode, CommitMode::Bulk);
        assert_eq!(config.local.commit_mode, CommitMode::Monthly);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parses_nested_sections() {
        let toml = r#"
mode = "local"
table = "nse_minute"

[scheduler]
floor_date = "2020-01-01"
stall_threshold = 5

[pacing]
delay_ms = 250
jitter_ms = 100

[local]
dir = "/srv/csv"
group_size = 0
"#;
        let config = IngestConfig::from_toml(toml).unwrap();
        assert_eq!(config.mode, SourceMode::Local);
        assert_eq!(config.table, "nse_minute");
        assert_eq!(
            config.scheduler.floor_date,
            NaiveDate::from_ymd_opt(2020, 1, 1).unwrap()
        );
        assert_eq!(config.scheduler.window_span_days, 29);
        assert_eq!(config.pacing.jitter_ms, 100);
        assert_eq!(config.local.dir, PathBuf::from("/srv/csv"));
        assert_eq!(config.local.group_size, 0);
    }

    #[test]
    fn env_overrides_file_values() {
        let env: HashMap<&str, &str> = [
            (ENV_MODE, "LOCAL"),
            (ENV_TABLE, "ohlcv"),
            (ENV_STORE_ROOT, "/var/lib/candles"),
            (ENV_LOCAL_DIR, "  "),
        ]
        .into_iter()
        .collect();

        let mut config = IngestConfig::default();
        config
            .apply_env(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.mode, SourceMode::Local);
        assert_eq!(config.table, "ohlcv");
        assert_eq!(config.store.root, PathBuf::from("/var/lib/candles"));
        assert_eq!(config.local.dir, LocalConfig::default().dir);
    }

    #[test]
    fn bad_mode_and_table_are_rejected() {
        let mut config = IngestConfig::default();
        let err = config
            .apply_env(|k| (k == ENV_MODE).then(|| "ftp".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "mode"));

        config.table = "../etc".into();
        assert!(config.validate().is_err());
        assert!(IngestConfig::from_toml("mode = \"ftp\"").is_err());
    }

    #[test]
    fn zero_stall_threshold_is_invalid() {
        let config = IngestConfig::from_toml("[scheduler]\nstall_threshold = 0\n").unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { ref key, .. }) if key == "scheduler"
        ));
    }

    #[test]
    fn window_span_above_provider_limit_is_invalid() {
        let config = IngestConfig::from_toml("[scheduler]\nwindow_span_days = 90\n").unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { ref key, .. }) if key == "scheduler"
        ));

        let at_limit = IngestConfig::from_toml("[scheduler]\nwindow_span_days = 29\n").unwrap();
        assert!(at_limit.validate().is_ok());
    }
}
